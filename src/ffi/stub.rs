//! In-process stand-in for the native solver library.
//!
//! Compiled when the `native` feature is off. Implements the same C ABI
//! as `peregrine.h` over a heap-allocated bookkeeping struct, plus a
//! minimal fixed-step steepest-descent "solve" that drives registered
//! callbacks exactly the way the real solver does: through the stored
//! trampoline function pointers, with fully laid-out request/result
//! records. The test suite links against this backend, so every
//! dispatch path can be exercised without a solver license.

use std::collections::HashMap;
use std::ffi::{CStr, CString};

use libc::{c_char, c_double, c_int, c_void};

use super::{
    PG_eval_callback_fn, PG_eval_request, PG_eval_result, PG_ms_initpt_callback_fn, PG_puts_fn,
    PG_user_callback_fn, PG_CB, PG_context, PG_DENSE, PG_EVAL_FC, PG_EVAL_GA, PG_INFBOUND,
    PG_RC_BAD_PARAM, PG_RC_OK,
};

#[derive(Default)]
struct StubCallback {
    eval_fc: Option<PG_eval_callback_fn>,
    eval_ga: Option<PG_eval_callback_fn>,
    eval_h: Option<PG_eval_callback_fn>,
    eval_rsd: Option<PG_eval_callback_fn>,
    eval_rsdj: Option<PG_eval_callback_fn>,
    user_params: Option<*mut c_void>,
    eval_obj: bool,
    index_cons: Vec<c_int>,
    index_rsds: Vec<c_int>,
    objgrad_nnz: c_int,
    // Empty means dense (identity) layout over all variables.
    objgrad_index_vars: Vec<c_int>,
    jac_nnz: c_int,
    hess_nnz: c_int,
    rsdjac_nnz: c_int,
}

#[derive(Default)]
struct StubModel {
    n_vars: usize,
    m_cons: usize,
    lobnds: Vec<f64>,
    upbnds: Vec<f64>,
    x0: Vec<f64>,
    int_params: HashMap<String, c_int>,
    dbl_params: HashMap<String, f64>,
    compcons: Vec<(c_int, c_int, c_int)>,
    callbacks: Vec<Box<StubCallback>>,
    newpt: Option<(PG_user_callback_fn, *mut c_void)>,
    ms_process: Option<(PG_user_callback_fn, *mut c_void)>,
    ms_initpt: Option<(PG_ms_initpt_callback_fn, *mut c_void)>,
    mip_node: Option<(PG_user_callback_fn, *mut c_void)>,
    puts: Option<(PG_puts_fn, *mut c_void)>,
    solution: Option<(c_int, f64, Vec<f64>, Vec<f64>)>,
}

unsafe fn model<'a>(kc: PG_context) -> &'a mut StubModel {
    &mut *(kc as *mut StubModel)
}

unsafe fn callback<'a>(cb: PG_CB) -> &'a mut StubCallback {
    &mut *(cb as *mut StubCallback)
}

unsafe fn read_slice(ptr: *const c_int, len: c_int) -> Vec<c_int> {
    if ptr.is_null() || len <= 0 {
        Vec::new()
    } else {
        std::slice::from_raw_parts(ptr, len as usize).to_vec()
    }
}

unsafe fn param_name(name: *const c_char) -> Option<String> {
    if name.is_null() {
        return None;
    }
    CStr::from_ptr(name).to_str().ok().map(str::to_owned)
}

pub unsafe extern "C" fn PG_new(kc: *mut PG_context) -> c_int {
    if kc.is_null() {
        return PG_RC_BAD_PARAM;
    }
    *kc = Box::into_raw(Box::<StubModel>::default()) as PG_context;
    PG_RC_OK
}

pub unsafe extern "C" fn PG_free(kc: PG_context) {
    if !kc.is_null() {
        drop(Box::from_raw(kc as *mut StubModel));
    }
}

pub unsafe extern "C" fn PG_add_vars(kc: PG_context, n: c_int) -> c_int {
    if n < 0 {
        return PG_RC_BAD_PARAM;
    }
    let m = model(kc);
    m.n_vars += n as usize;
    m.lobnds.resize(m.n_vars, -PG_INFBOUND);
    m.upbnds.resize(m.n_vars, PG_INFBOUND);
    m.x0.resize(m.n_vars, 0.0);
    PG_RC_OK
}

pub unsafe extern "C" fn PG_add_cons(kc: PG_context, m_new: c_int) -> c_int {
    if m_new < 0 {
        return PG_RC_BAD_PARAM;
    }
    model(kc).m_cons += m_new as usize;
    PG_RC_OK
}

pub unsafe extern "C" fn PG_set_var_lobnds(kc: PG_context, lobnds: *const c_double) -> c_int {
    let m = model(kc);
    m.lobnds = std::slice::from_raw_parts(lobnds, m.n_vars).to_vec();
    PG_RC_OK
}

pub unsafe extern "C" fn PG_set_var_upbnds(kc: PG_context, upbnds: *const c_double) -> c_int {
    let m = model(kc);
    m.upbnds = std::slice::from_raw_parts(upbnds, m.n_vars).to_vec();
    PG_RC_OK
}

pub unsafe extern "C" fn PG_set_var_primal_init_values(
    kc: PG_context,
    x0: *const c_double,
) -> c_int {
    let m = model(kc);
    m.x0 = std::slice::from_raw_parts(x0, m.n_vars).to_vec();
    PG_RC_OK
}

pub unsafe extern "C" fn PG_set_int_param(
    kc: PG_context,
    name: *const c_char,
    value: c_int,
) -> c_int {
    match param_name(name) {
        Some(name) => {
            model(kc).int_params.insert(name, value);
            PG_RC_OK
        }
        None => PG_RC_BAD_PARAM,
    }
}

pub unsafe extern "C" fn PG_set_double_param(
    kc: PG_context,
    name: *const c_char,
    value: c_double,
) -> c_int {
    match param_name(name) {
        Some(name) => {
            model(kc).dbl_params.insert(name, value);
            PG_RC_OK
        }
        None => PG_RC_BAD_PARAM,
    }
}

pub unsafe extern "C" fn PG_set_compcons(
    kc: PG_context,
    ncc: c_int,
    cc_types: *const c_int,
    index_comps1: *const c_int,
    index_comps2: *const c_int,
) -> c_int {
    if ncc < 0 {
        return PG_RC_BAD_PARAM;
    }
    let m = model(kc);
    let types = read_slice(cc_types, ncc);
    let c1 = read_slice(index_comps1, ncc);
    let c2 = read_slice(index_comps2, ncc);
    if c1.iter().chain(&c2).any(|&i| i < 0 || i as usize >= m.n_vars) {
        return PG_RC_BAD_PARAM;
    }
    m.compcons = types
        .into_iter()
        .zip(c1)
        .zip(c2)
        .map(|((t, a), b)| (t, a, b))
        .collect();
    PG_RC_OK
}

pub unsafe extern "C" fn PG_get_number_vars(kc: PG_context, n: *mut c_int) -> c_int {
    *n = model(kc).n_vars as c_int;
    PG_RC_OK
}

pub unsafe extern "C" fn PG_get_number_cons(kc: PG_context, m: *mut c_int) -> c_int {
    *m = model(kc).m_cons as c_int;
    PG_RC_OK
}

pub unsafe extern "C" fn PG_get_cb_number_cons(_kc: PG_context, cb: PG_CB, nc: *mut c_int) -> c_int {
    *nc = callback(cb).index_cons.len() as c_int;
    PG_RC_OK
}

pub unsafe extern "C" fn PG_get_cb_number_rsds(_kc: PG_context, cb: PG_CB, nr: *mut c_int) -> c_int {
    *nr = callback(cb).index_rsds.len() as c_int;
    PG_RC_OK
}

pub unsafe extern "C" fn PG_get_cb_objgrad_nnz(_kc: PG_context, cb: PG_CB, nnz: *mut c_int) -> c_int {
    *nnz = callback(cb).objgrad_nnz;
    PG_RC_OK
}

pub unsafe extern "C" fn PG_get_cb_jacobian_nnz(_kc: PG_context, cb: PG_CB, nnz: *mut c_int) -> c_int {
    *nnz = callback(cb).jac_nnz;
    PG_RC_OK
}

pub unsafe extern "C" fn PG_get_cb_hessian_nnz(_kc: PG_context, cb: PG_CB, nnz: *mut c_int) -> c_int {
    *nnz = callback(cb).hess_nnz;
    PG_RC_OK
}

pub unsafe extern "C" fn PG_get_cb_rsd_jacobian_nnz(
    _kc: PG_context,
    cb: PG_CB,
    nnz: *mut c_int,
) -> c_int {
    *nnz = callback(cb).rsdjac_nnz;
    PG_RC_OK
}

unsafe fn push_callback(kc: PG_context, new_cb: StubCallback, cb: *mut PG_CB) -> c_int {
    if cb.is_null() {
        return PG_RC_BAD_PARAM;
    }
    let m = model(kc);
    m.callbacks.push(Box::new(new_cb));
    let last = m.callbacks.last_mut().unwrap();
    *cb = last.as_mut() as *mut StubCallback as PG_CB;
    PG_RC_OK
}

pub unsafe extern "C" fn PG_add_eval_callback(
    kc: PG_context,
    eval_obj: c_int,
    n_cons: c_int,
    index_cons: *const c_int,
    cb_fn: PG_eval_callback_fn,
    cb: *mut PG_CB,
) -> c_int {
    if n_cons < 0 {
        return PG_RC_BAD_PARAM;
    }
    let m = model(kc);
    let index_cons = read_slice(index_cons, n_cons);
    if index_cons.iter().any(|&i| i < 0 || i as usize >= m.m_cons) {
        return PG_RC_BAD_PARAM;
    }
    push_callback(
        kc,
        StubCallback {
            eval_fc: Some(cb_fn),
            eval_obj: eval_obj != 0,
            index_cons,
            ..Default::default()
        },
        cb,
    )
}

pub unsafe extern "C" fn PG_add_eval_callback_all(
    kc: PG_context,
    cb_fn: PG_eval_callback_fn,
    cb: *mut PG_CB,
) -> c_int {
    let m_cons = model(kc).m_cons;
    push_callback(
        kc,
        StubCallback {
            eval_fc: Some(cb_fn),
            eval_obj: true,
            index_cons: (0..m_cons as c_int).collect(),
            ..Default::default()
        },
        cb,
    )
}

pub unsafe extern "C" fn PG_add_lsq_eval_callback(
    kc: PG_context,
    n_rsds: c_int,
    index_rsds: *const c_int,
    cb_fn: PG_eval_callback_fn,
    cb: *mut PG_CB,
) -> c_int {
    if n_rsds < 0 {
        return PG_RC_BAD_PARAM;
    }
    push_callback(
        kc,
        StubCallback {
            eval_rsd: Some(cb_fn),
            index_rsds: read_slice(index_rsds, n_rsds),
            ..Default::default()
        },
        cb,
    )
}

pub unsafe extern "C" fn PG_set_cb_grad(
    kc: PG_context,
    cb: PG_CB,
    n_objgrad: c_int,
    objgrad_index_vars: *const c_int,
    n_jac: c_int,
    jac_index_cons: *const c_int,
    _jac_index_vars: *const c_int,
    cb_fn: PG_eval_callback_fn,
) -> c_int {
    if (n_objgrad < 0 && n_objgrad != PG_DENSE) || (n_jac < 0 && n_jac != PG_DENSE) {
        return PG_RC_BAD_PARAM;
    }
    let n_vars = model(kc).n_vars;
    let cbx = callback(cb);
    if n_objgrad == PG_DENSE {
        cbx.objgrad_nnz = n_vars as c_int;
        cbx.objgrad_index_vars = Vec::new();
    } else {
        cbx.objgrad_nnz = n_objgrad;
        cbx.objgrad_index_vars = read_slice(objgrad_index_vars, n_objgrad);
    }
    cbx.jac_nnz = if n_jac == PG_DENSE {
        (cbx.index_cons.len() * n_vars) as c_int
    } else {
        let _ = read_slice(jac_index_cons, n_jac);
        n_jac
    };
    cbx.eval_ga = Some(cb_fn);
    PG_RC_OK
}

pub unsafe extern "C" fn PG_set_cb_hess(
    kc: PG_context,
    cb: PG_CB,
    n_hess: c_int,
    _hess_index_vars1: *const c_int,
    _hess_index_vars2: *const c_int,
    cb_fn: PG_eval_callback_fn,
) -> c_int {
    if n_hess < 0 && n_hess != PG_DENSE {
        return PG_RC_BAD_PARAM;
    }
    let n_vars = model(kc).n_vars;
    let cbx = callback(cb);
    cbx.hess_nnz = if n_hess == PG_DENSE {
        (n_vars * (n_vars + 1) / 2) as c_int
    } else {
        n_hess
    };
    cbx.eval_h = Some(cb_fn);
    PG_RC_OK
}

pub unsafe extern "C" fn PG_set_cb_rsd_jac(
    kc: PG_context,
    cb: PG_CB,
    n_rsd_jac: c_int,
    _rsd_jac_index_rsds: *const c_int,
    _rsd_jac_index_vars: *const c_int,
    cb_fn: PG_eval_callback_fn,
) -> c_int {
    if n_rsd_jac < 0 && n_rsd_jac != PG_DENSE {
        return PG_RC_BAD_PARAM;
    }
    let n_vars = model(kc).n_vars;
    let cbx = callback(cb);
    cbx.rsdjac_nnz = if n_rsd_jac == PG_DENSE {
        (cbx.index_rsds.len() * n_vars) as c_int
    } else {
        n_rsd_jac
    };
    cbx.eval_rsdj = Some(cb_fn);
    PG_RC_OK
}

pub unsafe extern "C" fn PG_set_cb_user_params(
    _kc: PG_context,
    cb: PG_CB,
    user_params: *mut c_void,
) -> c_int {
    callback(cb).user_params = Some(user_params);
    PG_RC_OK
}

pub unsafe extern "C" fn PG_set_newpt_callback(
    kc: PG_context,
    cb_fn: PG_user_callback_fn,
    user_params: *mut c_void,
) -> c_int {
    model(kc).newpt = Some((cb_fn, user_params));
    PG_RC_OK
}

pub unsafe extern "C" fn PG_set_ms_process_callback(
    kc: PG_context,
    cb_fn: PG_user_callback_fn,
    user_params: *mut c_void,
) -> c_int {
    model(kc).ms_process = Some((cb_fn, user_params));
    PG_RC_OK
}

pub unsafe extern "C" fn PG_set_ms_initpt_callback(
    kc: PG_context,
    cb_fn: PG_ms_initpt_callback_fn,
    user_params: *mut c_void,
) -> c_int {
    model(kc).ms_initpt = Some((cb_fn, user_params));
    PG_RC_OK
}

pub unsafe extern "C" fn PG_set_mip_node_callback(
    kc: PG_context,
    cb_fn: PG_user_callback_fn,
    user_params: *mut c_void,
) -> c_int {
    model(kc).mip_node = Some((cb_fn, user_params));
    PG_RC_OK
}

pub unsafe extern "C" fn PG_set_puts_callback(
    kc: PG_context,
    cb_fn: PG_puts_fn,
    user_params: *mut c_void,
) -> c_int {
    model(kc).puts = Some((cb_fn, user_params));
    PG_RC_OK
}

/// Per-callback scratch buffers laid out exactly as the real solver
/// lays out its result record for that callback.
struct ResultBuffers {
    obj: f64,
    cons: Vec<f64>,
    obj_grad: Vec<f64>,
    jac: Vec<f64>,
    hess: Vec<f64>,
    hess_vec: Vec<f64>,
    rsd: Vec<f64>,
    rsd_jac: Vec<f64>,
}

impl ResultBuffers {
    fn for_callback(n_vars: usize, cbx: &StubCallback) -> ResultBuffers {
        ResultBuffers {
            obj: 0.0,
            cons: vec![0.0; cbx.index_cons.len()],
            obj_grad: vec![0.0; cbx.objgrad_nnz.max(0) as usize],
            jac: vec![0.0; cbx.jac_nnz.max(0) as usize],
            hess: vec![0.0; cbx.hess_nnz.max(0) as usize],
            hess_vec: vec![0.0; n_vars],
            rsd: vec![0.0; cbx.index_rsds.len()],
            rsd_jac: vec![0.0; cbx.rsdjac_nnz.max(0) as usize],
        }
    }

    fn record(&mut self) -> PG_eval_result {
        PG_eval_result {
            obj: &mut self.obj,
            c: self.cons.as_mut_ptr(),
            objGrad: self.obj_grad.as_mut_ptr(),
            jac: self.jac.as_mut_ptr(),
            hess: self.hess.as_mut_ptr(),
            hessVec: self.hess_vec.as_mut_ptr(),
            rsd: self.rsd.as_mut_ptr(),
            rsdJac: self.rsd_jac.as_mut_ptr(),
        }
    }
}

unsafe fn invoke(
    kc: PG_context,
    cbx: &StubCallback,
    cb_fn: PG_eval_callback_fn,
    code: c_int,
    x: &[f64],
    lambda: &[f64],
    buffers: &mut ResultBuffers,
) -> c_int {
    let sigma = 1.0;
    let vec = vec![0.0; x.len()];
    let req = PG_eval_request {
        code,
        thread_id: 0,
        x: x.as_ptr(),
        lambda: lambda.as_ptr(),
        sigma: &sigma,
        vec: vec.as_ptr(),
    };
    let mut res = buffers.record();
    let user = cbx.user_params.unwrap_or(std::ptr::null_mut());
    cb_fn(
        kc,
        cbx as *const StubCallback as PG_CB,
        &req,
        &mut res,
        user,
    )
}

unsafe fn eval_objective(kc: PG_context, x: &[f64], lambda: &[f64], out: &mut f64) -> c_int {
    let m = model(kc);
    let mut total = 0.0;
    for cbx in &m.callbacks {
        let Some(cb_fn) = cbx.eval_fc else { continue };
        let mut buffers = ResultBuffers::for_callback(m.n_vars, cbx);
        let rc = invoke(kc, cbx, cb_fn, PG_EVAL_FC, x, lambda, &mut buffers);
        if rc != PG_RC_OK {
            return rc;
        }
        if cbx.eval_obj {
            total += buffers.obj;
        }
    }
    *out = total;
    PG_RC_OK
}

unsafe fn eval_gradient(kc: PG_context, ci: usize, x: &[f64], lambda: &[f64], grad: &mut [f64]) -> c_int {
    let m = model(kc);
    let cbx = &m.callbacks[ci];
    let cb_fn = cbx.eval_ga.unwrap();
    let mut buffers = ResultBuffers::for_callback(m.n_vars, cbx);
    let rc = invoke(kc, cbx, cb_fn, PG_EVAL_GA, x, lambda, &mut buffers);
    if rc != PG_RC_OK {
        return rc;
    }
    grad.fill(0.0);
    if cbx.objgrad_index_vars.is_empty() {
        grad.copy_from_slice(&buffers.obj_grad);
    } else {
        for (k, &v) in cbx.objgrad_index_vars.iter().enumerate() {
            grad[v as usize] += buffers.obj_grad[k];
        }
    }
    PG_RC_OK
}

pub unsafe extern "C" fn PG_solve(kc: PG_context) -> c_int {
    let m = model(kc);
    let maxit = *m.int_params.get("maxit").unwrap_or(&10);
    let step = *m.dbl_params.get("steplength").unwrap_or(&0.1);
    let multistart = m.int_params.get("ms_enable") == Some(&1);
    let restarts = if multistart {
        (*m.int_params.get("ms_numsolves").unwrap_or(&2)).max(1)
    } else {
        1
    };
    let grad_cb = m
        .callbacks
        .iter()
        .position(|c| c.eval_ga.is_some() && c.objgrad_nnz > 0);

    let mut best: Option<(f64, Vec<f64>, Vec<f64>)> = None;
    for solve_no in 0..restarts {
        let mut x = m.x0.clone();
        let mut lambda = vec![0.0; m.n_vars + m.m_cons];
        if multistart {
            if let Some((cb_fn, user)) = m.ms_initpt {
                let rc = cb_fn(kc, solve_no, x.as_mut_ptr(), lambda.as_mut_ptr(), user);
                if rc != PG_RC_OK {
                    return rc;
                }
            }
        }

        if let Some(ci) = grad_cb {
            let mut grad = vec![0.0; m.n_vars];
            for _ in 0..maxit.max(0) {
                let rc = eval_gradient(kc, ci, &x, &lambda, &mut grad);
                if rc != PG_RC_OK {
                    return rc;
                }
                for j in 0..m.n_vars {
                    x[j] = (x[j] - step * grad[j]).clamp(m.lobnds[j], m.upbnds[j]);
                }
                if let Some((cb_fn, user)) = m.newpt {
                    let rc = cb_fn(kc, x.as_ptr(), lambda.as_ptr(), user);
                    if rc != PG_RC_OK {
                        return rc;
                    }
                }
            }
        }

        let mut obj = 0.0;
        let rc = eval_objective(kc, &x, &lambda, &mut obj);
        if rc != PG_RC_OK {
            return rc;
        }
        if multistart {
            if let Some((cb_fn, user)) = m.ms_process {
                let rc = cb_fn(kc, x.as_ptr(), lambda.as_ptr(), user);
                if rc != PG_RC_OK {
                    return rc;
                }
            }
        }
        if best.as_ref().map_or(true, |(b, _, _)| obj < *b) {
            best = Some((obj, x, lambda));
        }
    }

    let (obj, x, lambda) = best.unwrap();
    m.solution = Some((PG_RC_OK, obj, x, lambda));
    if let Some((cb_fn, user)) = m.puts {
        let line = CString::new(format!("stub solve finished: obj = {:.6e}", obj)).unwrap();
        cb_fn(line.as_ptr(), user);
    }
    PG_RC_OK
}

pub unsafe extern "C" fn PG_get_solution(
    kc: PG_context,
    status: *mut c_int,
    obj: *mut c_double,
    x: *mut c_double,
    lambda: *mut c_double,
) -> c_int {
    let m = model(kc);
    match &m.solution {
        Some((st, ob, xs, ls)) => {
            *status = *st;
            *obj = *ob;
            std::ptr::copy_nonoverlapping(xs.as_ptr(), x, xs.len());
            std::ptr::copy_nonoverlapping(ls.as_ptr(), lambda, ls.len());
            PG_RC_OK
        }
        None => PG_RC_BAD_PARAM,
    }
}
