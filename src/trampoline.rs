//! C-callable dispatch functions registered with the solver.
//!
//! These are thin `extern "C"` wrappers that handle the unsafe
//! C-to-Rust transition and route a solver-initiated evaluation back
//! into the user's closures. Every wrapper follows the same sequence:
//! panic fence, checked recovery of the user-data token, view
//! construction over the solver's buffers, dispatch. Panics and user
//! errors are converted to status codes here; nothing unwinds across
//! the solver's frames.
//!
//! The solver may invoke these concurrently from its own worker
//! threads. No serialization happens at this layer; user closures see
//! the request's `thread_id` and coordinate themselves.

use std::ffi::{c_void, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};

use libc::{c_char, c_double, c_int};

use crate::callback::{recover_token, CallbackContext, EvalFn, InitPointFn, PointFn, TokenKind};
use crate::eval::{EvalRequest, EvalResult};
use crate::ffi;
use crate::model::ModelInner;

/// Runs a dispatch body inside a panic fence. A panic is reported and
/// converted to an error status, because unwinding into the solver's
/// calling frame is undefined behavior for its ABI.
fn guard<F>(what: &'static str, body: F) -> c_int
where
    F: FnOnce() -> c_int,
{
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(status) => status,
        Err(_) => {
            eprintln!("peregrine: panic in {what} callback; reporting evaluation failure to the solver");
            ffi::PG_RC_CALLBACK_ERR
        }
    }
}

fn eval_dispatch(
    what: &'static str,
    pick: impl FnOnce(&CallbackContext) -> Option<&EvalFn>,
    kc: ffi::PG_context,
    cb: ffi::PG_CB,
    req: *const ffi::PG_eval_request,
    res: *mut ffi::PG_eval_result,
    user: *mut c_void,
) -> c_int {
    guard(what, || {
        // The token is an untyped pointer of unknown provenance; verify
        // it actually is one of ours before treating it as a context.
        let ctx = match unsafe { recover_token::<CallbackContext>(user, TokenKind::Callback) } {
            Some(ctx) => ctx,
            None => return ffi::PG_RC_BAD_CB_CONTEXT,
        };
        let fun = match pick(ctx) {
            Some(fun) => fun,
            None => {
                eprintln!("peregrine: solver requested a {what} evaluation but no {what} function is bound");
                return ffi::PG_RC_CALLBACK_ERR;
            }
        };
        let request = match unsafe { EvalRequest::from_raw(kc, req) } {
            Ok(request) => request,
            Err(status) => return status,
        };
        let mut result = match unsafe { EvalResult::from_raw(kc, cb, res) } {
            Ok(result) => result,
            Err(status) => return status,
        };
        fun(ctx, &request, &mut result)
    })
}

pub(crate) extern "C" fn eval_fc(
    kc: ffi::PG_context,
    cb: ffi::PG_CB,
    req: *const ffi::PG_eval_request,
    res: *mut ffi::PG_eval_result,
    user: *mut c_void,
) -> c_int {
    eval_dispatch("objective/constraint", |ctx| ctx.eval_fc.as_ref(), kc, cb, req, res, user)
}

pub(crate) extern "C" fn eval_ga(
    kc: ffi::PG_context,
    cb: ffi::PG_CB,
    req: *const ffi::PG_eval_request,
    res: *mut ffi::PG_eval_result,
    user: *mut c_void,
) -> c_int {
    eval_dispatch("gradient/Jacobian", |ctx| ctx.eval_ga.as_ref(), kc, cb, req, res, user)
}

pub(crate) extern "C" fn eval_h(
    kc: ffi::PG_context,
    cb: ffi::PG_CB,
    req: *const ffi::PG_eval_request,
    res: *mut ffi::PG_eval_result,
    user: *mut c_void,
) -> c_int {
    eval_dispatch("Hessian", |ctx| ctx.eval_h.as_ref(), kc, cb, req, res, user)
}

pub(crate) extern "C" fn eval_rsd(
    kc: ffi::PG_context,
    cb: ffi::PG_CB,
    req: *const ffi::PG_eval_request,
    res: *mut ffi::PG_eval_result,
    user: *mut c_void,
) -> c_int {
    eval_dispatch("residual", |ctx| ctx.eval_rsd.as_ref(), kc, cb, req, res, user)
}

pub(crate) extern "C" fn eval_rsdj(
    kc: ffi::PG_context,
    cb: ffi::PG_CB,
    req: *const ffi::PG_eval_request,
    res: *mut ffi::PG_eval_result,
    user: *mut c_void,
) -> c_int {
    eval_dispatch("residual-Jacobian", |ctx| ctx.eval_rsdj.as_ref(), kc, cb, req, res, user)
}

/// Global dimensions for lifecycle views, straight from the solver.
unsafe fn dims(kc: ffi::PG_context) -> Result<(usize, usize), c_int> {
    let mut n: c_int = 0;
    let mut m: c_int = 0;
    let status = ffi::PG_get_number_vars(kc, &mut n);
    if status != ffi::PG_RC_OK {
        return Err(status);
    }
    let status = ffi::PG_get_number_cons(kc, &mut m);
    if status != ffi::PG_RC_OK {
        return Err(status);
    }
    Ok((n as usize, m as usize))
}

fn point_dispatch(
    what: &'static str,
    pick: impl FnOnce(&ModelInner) -> Option<&PointFn>,
    kc: ffi::PG_context,
    x: *const c_double,
    lambda: *const c_double,
    user: *mut c_void,
) -> c_int {
    guard(what, || {
        let model = match unsafe { recover_token::<ModelInner>(user, TokenKind::Model) } {
            Some(model) => model,
            None => return ffi::PG_RC_BAD_CB_CONTEXT,
        };
        let fun = match pick(model) {
            Some(fun) => fun,
            None => {
                eprintln!("peregrine: solver fired a {what} event but no {what} function is bound");
                return ffi::PG_RC_CALLBACK_ERR;
            }
        };
        let (n, m) = match unsafe { dims(kc) } {
            Ok(dims) => dims,
            Err(status) => return status,
        };
        let x = unsafe { std::slice::from_raw_parts(x, n) };
        let lambda = unsafe { std::slice::from_raw_parts(lambda, n + m) };
        fun(x, lambda)
    })
}

pub(crate) extern "C" fn newpt(
    kc: ffi::PG_context,
    x: *const c_double,
    lambda: *const c_double,
    user: *mut c_void,
) -> c_int {
    point_dispatch("new-point", |m| m.newpt.as_ref(), kc, x, lambda, user)
}

pub(crate) extern "C" fn ms_process(
    kc: ffi::PG_context,
    x: *const c_double,
    lambda: *const c_double,
    user: *mut c_void,
) -> c_int {
    point_dispatch("multistart-process", |m| m.ms_process.as_ref(), kc, x, lambda, user)
}

pub(crate) extern "C" fn mip_node(
    kc: ffi::PG_context,
    x: *const c_double,
    lambda: *const c_double,
    user: *mut c_void,
) -> c_int {
    point_dispatch("MIP-node", |m| m.mip_node.as_ref(), kc, x, lambda, user)
}

pub(crate) extern "C" fn ms_initpt(
    kc: ffi::PG_context,
    solve_number: c_int,
    x: *mut c_double,
    lambda: *mut c_double,
    user: *mut c_void,
) -> c_int {
    guard("multistart-init-point", || {
        let model = match unsafe { recover_token::<ModelInner>(user, TokenKind::Model) } {
            Some(model) => model,
            None => return ffi::PG_RC_BAD_CB_CONTEXT,
        };
        let fun: &InitPointFn = match model.ms_initpt.as_ref() {
            Some(fun) => fun,
            None => return ffi::PG_RC_CALLBACK_ERR,
        };
        let (n, m) = match unsafe { dims(kc) } {
            Ok(dims) => dims,
            Err(status) => return status,
        };
        let x = unsafe { std::slice::from_raw_parts_mut(x, n) };
        let lambda = unsafe { std::slice::from_raw_parts_mut(lambda, n + m) };
        fun(solve_number, x, lambda)
    })
}

pub(crate) extern "C" fn puts(str_: *const c_char, user: *mut c_void) -> c_int {
    guard("text-output", || {
        let model = match unsafe { recover_token::<ModelInner>(user, TokenKind::Model) } {
            Some(model) => model,
            None => return ffi::PG_RC_BAD_CB_CONTEXT,
        };
        let fun = match model.puts.as_ref() {
            Some(fun) => fun,
            None => return ffi::PG_RC_CALLBACK_ERR,
        };
        if str_.is_null() {
            return ffi::PG_RC_CALLBACK_ERR;
        }
        let line = unsafe { CStr::from_ptr(str_) }.to_string_lossy();
        fun(&line)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::{GradSparsity, HessSparsity, JacSparsity};
    use crate::Model;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Owns every buffer a hand-built request/result record points at.
    struct RawEval {
        x: Vec<f64>,
        lambda: Vec<f64>,
        vec: Vec<f64>,
        obj: f64,
        cons: Vec<f64>,
        obj_grad: Vec<f64>,
        jac: Vec<f64>,
        hess: Vec<f64>,
        hess_vec: Vec<f64>,
        rsd: Vec<f64>,
        rsd_jac: Vec<f64>,
    }

    impl RawEval {
        fn new(n: usize, m: usize) -> RawEval {
            RawEval {
                x: vec![0.0; n],
                lambda: vec![0.0; n + m],
                vec: vec![0.0; n],
                obj: 0.0,
                cons: vec![0.0; m],
                obj_grad: vec![0.0; n],
                jac: vec![0.0; n * m],
                hess: vec![0.0; n * (n + 1) / 2],
                hess_vec: vec![0.0; n],
                rsd: vec![0.0; 8],
                rsd_jac: vec![0.0; 8 * n],
            }
        }

        fn request(&self, code: i32) -> ffi::PG_eval_request {
            ffi::PG_eval_request {
                code,
                thread_id: 0,
                x: self.x.as_ptr(),
                lambda: self.lambda.as_ptr(),
                sigma: std::ptr::null(),
                vec: self.vec.as_ptr(),
            }
        }

        fn result(&mut self) -> ffi::PG_eval_result {
            ffi::PG_eval_result {
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

    fn counting(
        hits: &Arc<AtomicUsize>,
    ) -> impl Fn(&CallbackContext, &EvalRequest, &mut EvalResult) -> i32 + Send + Sync + 'static
    {
        let hits = Arc::clone(hits);
        move |_: &CallbackContext, _: &EvalRequest, _: &mut EvalResult| {
            hits.fetch_add(1, Ordering::SeqCst);
            0
        }
    }

    fn model_2x1() -> Model {
        let mut model = Model::new().unwrap();
        model.add_vars(2).unwrap();
        model.add_cons(1).unwrap();
        model
    }

    #[test]
    fn dispatch_routes_each_kind_to_its_own_function() {
        let mut model = model_2x1();
        let fc_hits = Arc::new(AtomicUsize::new(0));
        let ga_hits = Arc::new(AtomicUsize::new(0));
        let h_hits = Arc::new(AtomicUsize::new(0));
        let rsd_hits = Arc::new(AtomicUsize::new(0));
        let rsdj_hits = Arc::new(AtomicUsize::new(0));

        let cb1 = model.add_eval_callback(true, &[0], counting(&fc_hits)).unwrap();
        model
            .set_cb_grad(cb1, GradSparsity::Dense, JacSparsity::Dense, counting(&ga_hits))
            .unwrap();
        model
            .set_cb_hess(
                cb1,
                HessSparsity::Pairs {
                    vars1: &[0, 0, 1],
                    vars2: &[0, 1, 1],
                },
                counting(&h_hits),
            )
            .unwrap();
        let cb2 = model.add_lsq_eval_callback(&[0, 1], counting(&rsd_hits)).unwrap();
        model
            .set_cb_rsd_jac(
                cb2,
                JacSparsity::Pairs {
                    rows: &[0, 1],
                    vars: &[0, 1],
                },
                counting(&rsdj_hits),
            )
            .unwrap();

        let kc = model.env();
        let table: [(ffi::PG_eval_callback_fn, i32, crate::CbHandle, &Arc<AtomicUsize>); 5] = [
            (eval_fc, ffi::PG_EVAL_FC, cb1, &fc_hits),
            (eval_ga, ffi::PG_EVAL_GA, cb1, &ga_hits),
            (eval_h, ffi::PG_EVAL_H, cb1, &h_hits),
            (eval_rsd, ffi::PG_EVAL_RSD, cb2, &rsd_hits),
            (eval_rsdj, ffi::PG_EVAL_RSDJ, cb2, &rsdj_hits),
        ];
        for (tramp, code, handle, hits) in table {
            let ctx = model.callback(handle).unwrap();
            let mut raw = RawEval::new(2, 1);
            let req = raw.request(code);
            let mut res = raw.result();
            let status = tramp(kc, ctx.raw_cb(), &req, &mut res, ctx.token());
            assert_eq!(status, 0);
            assert_eq!(hits.load(Ordering::SeqCst), 1);
        }
        // Each counter was hit exactly once across all five dispatches.
        for hits in [&fc_hits, &ga_hits, &h_hits, &rsd_hits, &rsdj_hits] {
            assert_eq!(hits.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn foreign_token_is_rejected_without_invoking_user_code() {
        let mut model = model_2x1();
        let hits = Arc::new(AtomicUsize::new(0));
        let cb = model.add_eval_callback(true, &[], counting(&hits)).unwrap();
        let ctx = model.callback(cb).unwrap();

        #[repr(C)]
        struct Foreign {
            _junk: u64,
            _more: u64,
        }
        let mut foreign = Foreign {
            _junk: 0xdead_beef,
            _more: 0,
        };

        let mut raw = RawEval::new(2, 1);
        let req = raw.request(ffi::PG_EVAL_FC);
        let mut res = raw.result();
        let status = eval_fc(
            model.env(),
            ctx.raw_cb(),
            &req,
            &mut res,
            &mut foreign as *mut Foreign as *mut c_void,
        );
        assert_eq!(status, ffi::PG_RC_BAD_CB_CONTEXT);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        // Null tokens are rejected the same way.
        let mut res = raw.result();
        let status = eval_fc(model.env(), ctx.raw_cb(), &req, &mut res, std::ptr::null_mut());
        assert_eq!(status, ffi::PG_RC_BAD_CB_CONTEXT);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn model_token_is_not_accepted_as_a_callback_context() {
        let mut model = model_2x1();
        let hits = Arc::new(AtomicUsize::new(0));
        let cb = model.add_eval_callback(true, &[], counting(&hits)).unwrap();
        model.set_newpt_callback(|_, _| 0).unwrap();

        let model_token = model.inner.token();
        let ctx = model.callback(cb).unwrap();
        let mut raw = RawEval::new(2, 1);
        let req = raw.request(ffi::PG_EVAL_FC);
        let mut res = raw.result();
        // Right magic, wrong kind: the tag check must still refuse it.
        let status = eval_fc(model.env(), ctx.raw_cb(), &req, &mut res, model_token);
        assert_eq!(status, ffi::PG_RC_BAD_CB_CONTEXT);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        // And a callback token is not accepted where a model is expected.
        let status = newpt(model.env(), raw.x.as_ptr(), raw.lambda.as_ptr(), ctx.token());
        assert_eq!(status, ffi::PG_RC_BAD_CB_CONTEXT);
    }

    #[test]
    fn unbound_evaluator_slot_reports_a_callback_error() {
        let mut model = model_2x1();
        let hits = Arc::new(AtomicUsize::new(0));
        let cb = model.add_eval_callback(true, &[], counting(&hits)).unwrap();
        let ctx = model.callback(cb).unwrap();

        let mut raw = RawEval::new(2, 1);
        let req = raw.request(ffi::PG_EVAL_GA);
        let mut res = raw.result();
        // No gradient function was ever bound on this context.
        let status = eval_ga(model.env(), ctx.raw_cb(), &req, &mut res, ctx.token());
        assert_eq!(status, ffi::PG_RC_CALLBACK_ERR);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panics_are_contained_at_the_boundary() {
        let mut model = model_2x1();
        let cb = model
            .add_eval_callback(true, &[], |_: &CallbackContext, _: &EvalRequest, _: &mut EvalResult| {
                panic!("user code blew up")
            })
            .unwrap();
        let ctx = model.callback(cb).unwrap();

        let mut raw = RawEval::new(2, 1);
        let req = raw.request(ffi::PG_EVAL_FC);
        let mut res = raw.result();
        let status = eval_fc(model.env(), ctx.raw_cb(), &req, &mut res, ctx.token());
        assert_eq!(status, ffi::PG_RC_CALLBACK_ERR);
    }

    #[test]
    fn user_error_status_is_returned_verbatim() {
        let mut model = model_2x1();
        let cb = model
            .add_eval_callback(true, &[], |_: &CallbackContext, _: &EvalRequest, _: &mut EvalResult| 7)
            .unwrap();
        let ctx = model.callback(cb).unwrap();

        let mut raw = RawEval::new(2, 1);
        let req = raw.request(ffi::PG_EVAL_FC);
        let mut res = raw.result();
        assert_eq!(eval_fc(model.env(), ctx.raw_cb(), &req, &mut res, ctx.token()), 7);
    }

    #[test]
    fn hessian_vector_product_writes_through_the_view() {
        let mut model = model_2x1();
        let cb = model.add_eval_callback(true, &[], |_: &CallbackContext, _: &EvalRequest, _: &mut EvalResult| 0).unwrap();
        // Fixed symmetric matrix [[2, 1], [1, 3]].
        model
            .set_cb_hess(
                cb,
                HessSparsity::Pairs {
                    vars1: &[0, 0, 1],
                    vars2: &[0, 1, 1],
                },
                |_: &CallbackContext, req: &EvalRequest, res: &mut EvalResult| {
                    let v = req.vec;
                    res.hess_vec[0] = 2.0 * v[0] + 1.0 * v[1];
                    res.hess_vec[1] = 1.0 * v[0] + 3.0 * v[1];
                    0
                },
            )
            .unwrap();
        let ctx = model.callback(cb).unwrap();

        let mut raw = RawEval::new(2, 1);
        raw.vec = vec![0.5, -1.0];
        let req = raw.request(ffi::PG_EVAL_HV);
        let mut res = raw.result();
        let status = eval_h(model.env(), ctx.raw_cb(), &req, &mut res, ctx.token());
        assert_eq!(status, 0);
        assert!((raw.hess_vec[0] - 0.0).abs() < 1e-12);
        assert!((raw.hess_vec[1] - (-2.5)).abs() < 1e-12);
    }

    #[test]
    fn lifecycle_trampolines_route_to_the_model() {
        let mut model = model_2x1();
        let nodes = Arc::new(AtomicUsize::new(0));
        let nodes_seen = Arc::clone(&nodes);
        model
            .set_mip_node_callback(move |x, lambda| {
                assert_eq!(x.len(), 2);
                assert_eq!(lambda.len(), 3);
                nodes_seen.fetch_add(1, Ordering::SeqCst);
                0
            })
            .unwrap();
        model
            .set_ms_initpt_callback(|solve_number, x, _lambda| {
                x[0] = solve_number as f64;
                0
            })
            .unwrap();

        let token = model.inner.token();
        let x = [0.0, 0.0];
        let lambda = [0.0; 3];
        assert_eq!(mip_node(model.env(), x.as_ptr(), lambda.as_ptr(), token), 0);
        assert_eq!(nodes.load(Ordering::SeqCst), 1);

        let mut x = [9.0, 9.0];
        let mut lambda = [0.0; 3];
        assert_eq!(
            ms_initpt(model.env(), 4, x.as_mut_ptr(), lambda.as_mut_ptr(), token),
            0
        );
        assert_eq!(x[0], 4.0);
    }
}
