//! Zero-copy views over the solver's evaluation request/result records.
//!
//! The solver owns every buffer these views refer to; construction only
//! queries dimensions and wraps the raw pointers in bounded slices.
//! Nothing is copied, and writes through [`EvalResult`] land directly
//! in solver memory. Views live for a single callback invocation.

use libc::c_int;

use crate::ffi;

/// Which evaluation the solver is requesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalKind {
    /// Objective and constraint values.
    Fc,
    /// Objective gradient and constraint Jacobian.
    Ga,
    /// Hessian of the Lagrangian.
    Hess,
    /// Hessian-vector product.
    HessVec,
    /// Least-squares residuals.
    Rsd,
    /// Residual Jacobian.
    RsdJac,
}

impl EvalKind {
    pub fn from_raw(code: c_int) -> Option<EvalKind> {
        match code {
            ffi::PG_EVAL_FC => Some(EvalKind::Fc),
            ffi::PG_EVAL_GA => Some(EvalKind::Ga),
            ffi::PG_EVAL_H => Some(EvalKind::Hess),
            ffi::PG_EVAL_HV => Some(EvalKind::HessVec),
            ffi::PG_EVAL_RSD => Some(EvalKind::Rsd),
            ffi::PG_EVAL_RSDJ => Some(EvalKind::RsdJac),
            _ => None,
        }
    }
}

/// Read-only view of one evaluation request.
pub struct EvalRequest<'a> {
    code: c_int,
    /// Solver worker thread issuing this request. Concurrent evaluation
    /// configurations use it to index per-thread scratch space.
    pub thread_id: i32,
    /// Current primal point, one entry per model variable.
    pub x: &'a [f64],
    /// Duals/multipliers, `num_vars + num_cons` entries.
    pub lambda: &'a [f64],
    /// Objective scale factor for Hessian requests; 1.0 when the solver
    /// left it unset.
    pub sigma: f64,
    /// Operand of a Hessian-vector-product request, one entry per
    /// variable.
    pub vec: &'a [f64],
}

impl<'a> EvalRequest<'a> {
    /// Wraps a solver-owned request record.
    ///
    /// Dimensions come from the solver itself; a failing accessor call
    /// aborts construction with its status so the trampoline can hand
    /// it straight back.
    ///
    /// # Safety
    /// `req` must point to a live `PG_eval_request` whose buffers are
    /// sized consistently with the model behind `kc`, and the view must
    /// not outlive the callback invocation.
    pub(crate) unsafe fn from_raw(
        kc: ffi::PG_context,
        req: *const ffi::PG_eval_request,
    ) -> Result<EvalRequest<'a>, c_int> {
        let req = &*req;
        let n = query(|out| ffi::PG_get_number_vars(kc, out))? as usize;
        let m = query(|out| ffi::PG_get_number_cons(kc, out))? as usize;
        Ok(EvalRequest {
            code: req.code,
            thread_id: req.thread_id,
            x: std::slice::from_raw_parts(req.x, n),
            lambda: std::slice::from_raw_parts(req.lambda, n + m),
            sigma: if req.sigma.is_null() { 1.0 } else { *req.sigma },
            vec: std::slice::from_raw_parts(req.vec, n),
        })
    }

    /// Raw request code as sent by the solver.
    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn kind(&self) -> Option<EvalKind> {
        EvalKind::from_raw(self.code)
    }
}

/// Write-through view of one evaluation result.
///
/// Every slice aliases a solver-owned buffer sized by what *this*
/// callback declared at registration time, not by global model
/// dimensions. Parts the callback does not cover are empty.
pub struct EvalResult<'a> {
    /// Objective value.
    pub obj: &'a mut f64,
    /// Values of the constraints this callback covers.
    pub cons: &'a mut [f64],
    /// Objective gradient, one entry per declared nonzero.
    pub obj_grad: &'a mut [f64],
    /// Constraint Jacobian, one entry per declared nonzero.
    pub jac: &'a mut [f64],
    /// Lagrangian Hessian, one entry per declared nonzero.
    pub hess: &'a mut [f64],
    /// Hessian-vector product, one entry per model variable.
    pub hess_vec: &'a mut [f64],
    /// Residuals this callback covers (least-squares models).
    pub rsd: &'a mut [f64],
    /// Residual Jacobian, one entry per declared nonzero.
    pub rsd_jac: &'a mut [f64],
}

impl<'a> EvalResult<'a> {
    /// Wraps a solver-owned result record for the callback behind `cb`.
    ///
    /// # Safety
    /// As [`EvalRequest::from_raw`], with `cb` naming the callback the
    /// solver is asking to evaluate.
    pub(crate) unsafe fn from_raw(
        kc: ffi::PG_context,
        cb: ffi::PG_CB,
        res: *mut ffi::PG_eval_result,
    ) -> Result<EvalResult<'a>, c_int> {
        let res = &mut *res;
        let n = query(|out| ffi::PG_get_number_vars(kc, out))? as usize;
        let nc = query(|out| ffi::PG_get_cb_number_cons(kc, cb, out))? as usize;
        let nr = query(|out| ffi::PG_get_cb_number_rsds(kc, cb, out))? as usize;
        let objgrad_nnz = query(|out| ffi::PG_get_cb_objgrad_nnz(kc, cb, out))? as usize;
        let jac_nnz = query(|out| ffi::PG_get_cb_jacobian_nnz(kc, cb, out))? as usize;
        let hess_nnz = query(|out| ffi::PG_get_cb_hessian_nnz(kc, cb, out))? as usize;
        let rsdjac_nnz = query(|out| ffi::PG_get_cb_rsd_jacobian_nnz(kc, cb, out))? as usize;
        Ok(EvalResult {
            obj: &mut *res.obj,
            cons: out_slice(res.c, nc),
            obj_grad: out_slice(res.objGrad, objgrad_nnz),
            jac: out_slice(res.jac, jac_nnz),
            hess: out_slice(res.hess, hess_nnz),
            hess_vec: out_slice(res.hessVec, n),
            rsd: out_slice(res.rsd, nr),
            rsd_jac: out_slice(res.rsdJac, rsdjac_nnz),
        })
    }
}

/// Calls a native accessor of the `(handle..., *mut c_int) -> status`
/// shape and surfaces either the value or the failing status.
unsafe fn query(call: impl FnOnce(*mut c_int) -> c_int) -> Result<c_int, c_int> {
    let mut out: c_int = 0;
    let status = call(&mut out);
    if status != ffi::PG_RC_OK {
        return Err(status);
    }
    Ok(out)
}

unsafe fn out_slice<'a>(ptr: *mut f64, len: usize) -> &'a mut [f64] {
    if ptr.is_null() || len == 0 {
        Default::default()
    } else {
        std::slice::from_raw_parts_mut(ptr, len)
    }
}
