//! Registration of evaluation callbacks and derivative structure.
//!
//! Each entry point allocates (or locates) a [`CallbackContext`],
//! registers the matching trampoline with the native layer, and only
//! then binds the user function into the context. On any native
//! failure the error is raised at the call site and nothing
//! half-registered is left behind.

use std::any::Any;
use std::ptr;

use libc::c_int;

use crate::callback::{CallbackContext, CbHandle, EvalFn};
use crate::error::{Error, Result};
use crate::eval::{EvalRequest, EvalResult};
use crate::ffi;
use crate::model::Model;
use crate::trampoline;

/// Sparsity of an objective gradient declaration.
pub enum GradSparsity<'a> {
    /// One nonzero per variable, in variable order.
    Dense,
    /// Explicit variable indices, one per nonzero.
    Vars(&'a [i32]),
}

/// Sparsity of a constraint or residual Jacobian declaration.
pub enum JacSparsity<'a> {
    Dense,
    /// Paired row (constraint/residual) and variable indices; the two
    /// slices must have equal length.
    Pairs { rows: &'a [i32], vars: &'a [i32] },
}

/// Sparsity of a Hessian declaration (upper triangle).
pub enum HessSparsity<'a> {
    Dense,
    /// Paired variable indices; the two slices must have equal length.
    Pairs { vars1: &'a [i32], vars2: &'a [i32] },
}

/// Resolves paired index slices into the (count, ptr, ptr) triple the
/// native layer takes, checking the pair lengths first.
fn resolve_pairs<'a>(
    what: &'static str,
    sparsity: Option<(&'a [i32], &'a [i32])>,
) -> Result<(c_int, *const c_int, *const c_int)> {
    match sparsity {
        None => Ok((ffi::PG_DENSE, ptr::null(), ptr::null())),
        Some((left, right)) => {
            if left.len() != right.len() {
                return Err(Error::IndexPairMismatch {
                    what,
                    left: left.len(),
                    right: right.len(),
                });
            }
            Ok((left.len() as c_int, left.as_ptr(), right.as_ptr()))
        }
    }
}

impl Model {
    fn install_context(
        &mut self,
        mut ctx: Box<CallbackContext>,
        cb: ffi::PG_CB,
    ) -> Result<CbHandle> {
        ctx.cb = cb;
        let ctx = Box::into_raw(ctx);
        // The context pointer becomes the opaque token the trampoline
        // will recover on every solver-initiated evaluation.
        let status =
            unsafe { ffi::PG_set_cb_user_params(self.env(), cb, (*ctx).token()) };
        if let Err(err) = Error::check("PG_set_cb_user_params", status) {
            drop(unsafe { Box::from_raw(ctx) });
            return Err(err);
        }
        self.inner.callbacks.push(ctx);
        Ok(CbHandle(self.inner.callbacks.len() - 1))
    }

    /// Registers an evaluation callback for (part of) the objective and
    /// the given constraint subset. Distinct callbacks may cover
    /// disjoint or overlapping subsets; the solver arbitrates
    /// consistency.
    pub fn add_eval_callback<F>(
        &mut self,
        eval_obj: bool,
        index_cons: &[i32],
        eval_fc: F,
    ) -> Result<CbHandle>
    where
        F: Fn(&CallbackContext, &EvalRequest, &mut EvalResult) -> i32 + Send + Sync + 'static,
    {
        let mut ctx = Box::new(CallbackContext::new(self.env()));
        ctx.eval_fc = Some(Box::new(eval_fc) as EvalFn);
        let mut cb: ffi::PG_CB = ptr::null_mut();
        let status = unsafe {
            ffi::PG_add_eval_callback(
                self.env(),
                eval_obj as c_int,
                index_cons.len() as c_int,
                index_cons.as_ptr(),
                trampoline::eval_fc,
                &mut cb,
            )
        };
        Error::check("PG_add_eval_callback", status)?;
        self.install_context(ctx, cb)
    }

    /// Registers an evaluation callback covering the whole objective
    /// and every constraint.
    pub fn add_eval_callback_all<F>(&mut self, eval_fc: F) -> Result<CbHandle>
    where
        F: Fn(&CallbackContext, &EvalRequest, &mut EvalResult) -> i32 + Send + Sync + 'static,
    {
        let mut ctx = Box::new(CallbackContext::new(self.env()));
        ctx.eval_fc = Some(Box::new(eval_fc) as EvalFn);
        let mut cb: ffi::PG_CB = ptr::null_mut();
        let status = unsafe {
            ffi::PG_add_eval_callback_all(self.env(), trampoline::eval_fc, &mut cb)
        };
        Error::check("PG_add_eval_callback_all", status)?;
        self.install_context(ctx, cb)
    }

    /// Registers a least-squares residual callback covering the given
    /// residual subset.
    pub fn add_lsq_eval_callback<F>(&mut self, index_rsds: &[i32], eval_rsd: F) -> Result<CbHandle>
    where
        F: Fn(&CallbackContext, &EvalRequest, &mut EvalResult) -> i32 + Send + Sync + 'static,
    {
        let mut ctx = Box::new(CallbackContext::new(self.env()));
        ctx.eval_rsd = Some(Box::new(eval_rsd) as EvalFn);
        let mut cb: ffi::PG_CB = ptr::null_mut();
        let status = unsafe {
            ffi::PG_add_lsq_eval_callback(
                self.env(),
                index_rsds.len() as c_int,
                index_rsds.as_ptr(),
                trampoline::eval_rsd,
                &mut cb,
            )
        };
        Error::check("PG_add_lsq_eval_callback", status)?;
        self.install_context(ctx, cb)
    }

    /// Declares first-derivative structure for a callback and binds its
    /// gradient/Jacobian evaluation function.
    pub fn set_cb_grad<F>(
        &mut self,
        h: CbHandle,
        objgrad: GradSparsity<'_>,
        jac: JacSparsity<'_>,
        eval_ga: F,
    ) -> Result<()>
    where
        F: Fn(&CallbackContext, &EvalRequest, &mut EvalResult) -> i32 + Send + Sync + 'static,
    {
        let (n_objgrad, objgrad_ptr) = match objgrad {
            GradSparsity::Dense => (ffi::PG_DENSE, ptr::null()),
            GradSparsity::Vars(vars) => (vars.len() as c_int, vars.as_ptr()),
        };
        let (n_jac, jac_cons, jac_vars) = resolve_pairs(
            "set_cb_grad: jacobian index pairs",
            match jac {
                JacSparsity::Dense => None,
                JacSparsity::Pairs { rows, vars } => Some((rows, vars)),
            },
        )?;
        let env = self.env();
        let ctx = self.callback_mut(h)?;
        let status = unsafe {
            ffi::PG_set_cb_grad(
                env,
                ctx.cb,
                n_objgrad,
                objgrad_ptr,
                n_jac,
                jac_cons,
                jac_vars,
                trampoline::eval_ga,
            )
        };
        Error::check("PG_set_cb_grad", status)?;
        ctx.eval_ga = Some(Box::new(eval_ga) as EvalFn);
        Ok(())
    }

    /// Declares Hessian structure for a callback and binds its Hessian
    /// evaluation function (also invoked for Hessian-vector requests).
    pub fn set_cb_hess<F>(&mut self, h: CbHandle, hess: HessSparsity<'_>, eval_h: F) -> Result<()>
    where
        F: Fn(&CallbackContext, &EvalRequest, &mut EvalResult) -> i32 + Send + Sync + 'static,
    {
        let (n_hess, vars1, vars2) = resolve_pairs(
            "set_cb_hess: hessian index pairs",
            match hess {
                HessSparsity::Dense => None,
                HessSparsity::Pairs { vars1, vars2 } => Some((vars1, vars2)),
            },
        )?;
        let env = self.env();
        let ctx = self.callback_mut(h)?;
        let status = unsafe {
            ffi::PG_set_cb_hess(env, ctx.cb, n_hess, vars1, vars2, trampoline::eval_h)
        };
        Error::check("PG_set_cb_hess", status)?;
        ctx.eval_h = Some(Box::new(eval_h) as EvalFn);
        Ok(())
    }

    /// Declares residual-Jacobian structure for a least-squares
    /// callback and binds its evaluation function.
    pub fn set_cb_rsd_jac<F>(
        &mut self,
        h: CbHandle,
        rsd_jac: JacSparsity<'_>,
        eval_rsdj: F,
    ) -> Result<()>
    where
        F: Fn(&CallbackContext, &EvalRequest, &mut EvalResult) -> i32 + Send + Sync + 'static,
    {
        let (n_rsd_jac, rsds, vars) = resolve_pairs(
            "set_cb_rsd_jac: residual index pairs",
            match rsd_jac {
                JacSparsity::Dense => None,
                JacSparsity::Pairs { rows, vars } => Some((rows, vars)),
            },
        )?;
        let env = self.env();
        let ctx = self.callback_mut(h)?;
        let status = unsafe {
            ffi::PG_set_cb_rsd_jac(env, ctx.cb, n_rsd_jac, rsds, vars, trampoline::eval_rsdj)
        };
        Error::check("PG_set_cb_rsd_jac", status)?;
        ctx.eval_rsdj = Some(Box::new(eval_rsdj) as EvalFn);
        Ok(())
    }

    /// Stores auxiliary data on a registered callback context.
    pub fn set_cb_user_param(
        &mut self,
        h: CbHandle,
        key: impl Into<String>,
        value: Box<dyn Any + Send + Sync>,
    ) -> Result<()> {
        self.callback_mut(h)?.set_user_param(key, value);
        Ok(())
    }

    /// Invoked by the solver after each accepted iterate.
    pub fn set_newpt_callback<F>(&mut self, f: F) -> Result<()>
    where
        F: Fn(&[f64], &[f64]) -> i32 + Send + Sync + 'static,
    {
        let token = self.inner.token();
        Error::check("PG_set_newpt_callback", unsafe {
            ffi::PG_set_newpt_callback(self.env(), trampoline::newpt, token)
        })?;
        self.inner.newpt = Some(Box::new(f));
        Ok(())
    }

    /// Invoked by the solver after each multistart solve finishes.
    pub fn set_ms_process_callback<F>(&mut self, f: F) -> Result<()>
    where
        F: Fn(&[f64], &[f64]) -> i32 + Send + Sync + 'static,
    {
        let token = self.inner.token();
        Error::check("PG_set_ms_process_callback", unsafe {
            ffi::PG_set_ms_process_callback(self.env(), trampoline::ms_process, token)
        })?;
        self.inner.ms_process = Some(Box::new(f));
        Ok(())
    }

    /// Invoked by the solver before each multistart solve; may rewrite
    /// the initial point for that solve number.
    pub fn set_ms_initpt_callback<F>(&mut self, f: F) -> Result<()>
    where
        F: Fn(i32, &mut [f64], &mut [f64]) -> i32 + Send + Sync + 'static,
    {
        let token = self.inner.token();
        Error::check("PG_set_ms_initpt_callback", unsafe {
            ffi::PG_set_ms_initpt_callback(self.env(), trampoline::ms_initpt, token)
        })?;
        self.inner.ms_initpt = Some(Box::new(f));
        Ok(())
    }

    /// Invoked by the solver at each explored MIP node.
    pub fn set_mip_node_callback<F>(&mut self, f: F) -> Result<()>
    where
        F: Fn(&[f64], &[f64]) -> i32 + Send + Sync + 'static,
    {
        let token = self.inner.token();
        Error::check("PG_set_mip_node_callback", unsafe {
            ffi::PG_set_mip_node_callback(self.env(), trampoline::mip_node, token)
        })?;
        self.inner.mip_node = Some(Box::new(f));
        Ok(())
    }

    /// Routes solver text output through `f` instead of stdout.
    pub fn set_puts_callback<F>(&mut self, f: F) -> Result<()>
    where
        F: Fn(&str) -> i32 + Send + Sync + 'static,
    {
        let token = self.inner.token();
        Error::check("PG_set_puts_callback", unsafe {
            ffi::PG_set_puts_callback(self.env(), trampoline::puts, token)
        })?;
        self.inner.puts = Some(Box::new(f));
        Ok(())
    }
}
