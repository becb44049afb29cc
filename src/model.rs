//! Owning wrapper around the solver's opaque model context.

use std::ffi::CString;

use libc::{c_double, c_int};

use crate::callback::{CallbackContext, CbHandle, InitPointFn, PointFn, PutsFn, TokenHeader, TokenKind};
use crate::error::{Error, Result};
use crate::ffi;

/// Final solve outcome as reported by the solver.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    /// Solver termination status (0 = converged; solver-defined
    /// otherwise).
    pub status: i32,
    pub obj: f64,
    pub x: Vec<f64>,
    pub lambda: Vec<f64>,
}

/// Heap-pinned model state. Its address is registered with the solver
/// as the user-data token for lifecycle callbacks, so it must never
/// move; [`Model`] keeps it boxed for that reason.
#[repr(C)]
pub(crate) struct ModelInner {
    header: TokenHeader, // must stay the first field
    pub(crate) env: ffi::PG_context,
    // Raw pointers rather than boxes: the solver holds copies of these
    // addresses for the lifetime of the model, so no Rust alias of the
    // allocation may remain.
    pub(crate) callbacks: Vec<*mut CallbackContext>,
    pub(crate) newpt: Option<PointFn>,
    pub(crate) ms_process: Option<PointFn>,
    pub(crate) ms_initpt: Option<InitPointFn>,
    pub(crate) mip_node: Option<PointFn>,
    pub(crate) puts: Option<PutsFn>,
}

impl ModelInner {
    pub(crate) fn token(&self) -> *mut std::ffi::c_void {
        self as *const ModelInner as *mut std::ffi::c_void
    }
}

impl Drop for ModelInner {
    fn drop(&mut self) {
        for &ctx in &self.callbacks {
            // Reclaims the contexts leaked to the solver at registration.
            drop(unsafe { Box::from_raw(ctx) });
        }
        unsafe { ffi::PG_free(self.env) };
    }
}

/// One optimization model: an owned `PG_context` plus every callback
/// context registered against it.
///
/// Not `Send`/`Sync`; the solver may spin up its own worker threads
/// during [`solve`](Model::solve), but the model object itself belongs
/// to the thread that built it.
pub struct Model {
    pub(crate) inner: Box<ModelInner>,
}

impl Model {
    pub fn new() -> Result<Model> {
        let mut env: ffi::PG_context = std::ptr::null_mut();
        Error::check("PG_new", unsafe { ffi::PG_new(&mut env) })?;
        Ok(Model {
            inner: Box::new(ModelInner {
                header: TokenHeader::new(TokenKind::Model),
                env,
                callbacks: Vec::new(),
                newpt: None,
                ms_process: None,
                ms_initpt: None,
                mip_node: None,
                puts: None,
            }),
        })
    }

    pub(crate) fn env(&self) -> ffi::PG_context {
        self.inner.env
    }

    pub fn add_vars(&mut self, n: usize) -> Result<()> {
        Error::check("PG_add_vars", unsafe {
            ffi::PG_add_vars(self.env(), n as c_int)
        })
    }

    pub fn add_cons(&mut self, m: usize) -> Result<()> {
        Error::check("PG_add_cons", unsafe {
            ffi::PG_add_cons(self.env(), m as c_int)
        })
    }

    pub fn num_vars(&self) -> Result<usize> {
        let mut n: c_int = 0;
        Error::check("PG_get_number_vars", unsafe {
            ffi::PG_get_number_vars(self.env(), &mut n)
        })?;
        Ok(n as usize)
    }

    pub fn num_cons(&self) -> Result<usize> {
        let mut m: c_int = 0;
        Error::check("PG_get_number_cons", unsafe {
            ffi::PG_get_number_cons(self.env(), &mut m)
        })?;
        Ok(m as usize)
    }

    pub fn set_var_lobnds(&mut self, lobnds: &[f64]) -> Result<()> {
        self.check_var_len("set_var_lobnds", lobnds.len())?;
        Error::check("PG_set_var_lobnds", unsafe {
            ffi::PG_set_var_lobnds(self.env(), lobnds.as_ptr())
        })
    }

    pub fn set_var_upbnds(&mut self, upbnds: &[f64]) -> Result<()> {
        self.check_var_len("set_var_upbnds", upbnds.len())?;
        Error::check("PG_set_var_upbnds", unsafe {
            ffi::PG_set_var_upbnds(self.env(), upbnds.as_ptr())
        })
    }

    pub fn set_var_primal_init_values(&mut self, x0: &[f64]) -> Result<()> {
        self.check_var_len("set_var_primal_init_values", x0.len())?;
        Error::check("PG_set_var_primal_init_values", unsafe {
            ffi::PG_set_var_primal_init_values(self.env(), x0.as_ptr())
        })
    }

    pub fn set_int_param(&mut self, name: &str, value: i32) -> Result<()> {
        let name = CString::new(name).map_err(|_| Error::InvalidParamName)?;
        Error::check("PG_set_int_param", unsafe {
            ffi::PG_set_int_param(self.env(), name.as_ptr(), value)
        })
    }

    pub fn set_double_param(&mut self, name: &str, value: f64) -> Result<()> {
        let name = CString::new(name).map_err(|_| Error::InvalidParamName)?;
        Error::check("PG_set_double_param", unsafe {
            ffi::PG_set_double_param(self.env(), name.as_ptr(), value as c_double)
        })
    }

    /// Declares complementarity constraints. All three arrays describe
    /// the same `ncc` pairs and must agree in length.
    pub fn set_compcons(
        &mut self,
        cc_types: &[i32],
        index_comps1: &[i32],
        index_comps2: &[i32],
    ) -> Result<()> {
        let ncc = cc_types.len();
        if index_comps1.len() != ncc {
            return Err(Error::LengthMismatch {
                what: "set_compcons: index_comps1",
                expected: ncc,
                actual: index_comps1.len(),
            });
        }
        if index_comps2.len() != ncc {
            return Err(Error::LengthMismatch {
                what: "set_compcons: index_comps2",
                expected: ncc,
                actual: index_comps2.len(),
            });
        }
        Error::check("PG_set_compcons", unsafe {
            ffi::PG_set_compcons(
                self.env(),
                ncc as c_int,
                cc_types.as_ptr(),
                index_comps1.as_ptr(),
                index_comps2.as_ptr(),
            )
        })
    }

    /// Shared view of a registered callback context.
    pub fn callback(&self, h: CbHandle) -> Result<&CallbackContext> {
        let ptr = *self.inner.callbacks.get(h.0).ok_or(Error::UnknownCallback)?;
        Ok(unsafe { &*ptr })
    }

    /// Mutable view of a registered callback context, for pre-solve
    /// configuration such as user parameters.
    pub fn callback_mut(&mut self, h: CbHandle) -> Result<&mut CallbackContext> {
        let ptr = *self.inner.callbacks.get(h.0).ok_or(Error::UnknownCallback)?;
        Ok(unsafe { &mut *ptr })
    }

    /// Hands control to the solver until it terminates. User callbacks
    /// run zero or more times during this call, possibly from solver
    /// worker threads. A failed evaluation is fatal for the solve and
    /// surfaces as [`Error::Native`] with the callback's status.
    pub fn solve(&mut self) -> Result<Solution> {
        Error::check("PG_solve", unsafe { ffi::PG_solve(self.env()) })?;
        self.solution()
    }

    fn solution(&self) -> Result<Solution> {
        let n = self.num_vars()?;
        let m = self.num_cons()?;
        let mut status: c_int = 0;
        let mut obj: f64 = 0.0;
        let mut x = vec![0.0; n];
        let mut lambda = vec![0.0; n + m];
        Error::check("PG_get_solution", unsafe {
            ffi::PG_get_solution(
                self.env(),
                &mut status,
                &mut obj,
                x.as_mut_ptr(),
                lambda.as_mut_ptr(),
            )
        })?;
        Ok(Solution {
            status,
            obj,
            x,
            lambda,
        })
    }

    fn check_var_len(&self, what: &'static str, actual: usize) -> Result<()> {
        let expected = self.num_vars()?;
        if actual != expected {
            return Err(Error::LengthMismatch {
                what,
                expected,
                actual,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::GradSparsity;
    use crate::register::JacSparsity;
    use crate::{CallbackContext, EvalRequest, EvalResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn objective_is_evaluated_at_the_initial_point() {
        let mut model = Model::new().unwrap();
        model.add_vars(2).unwrap();
        model.set_var_primal_init_values(&[1.0, 2.0]).unwrap();
        model
            .add_eval_callback(true, &[], |_: &CallbackContext, req: &EvalRequest, res: &mut EvalResult| {
                assert_eq!(req.x.len(), 2);
                *res.obj = req.x[0] * req.x[0] + req.x[1] * req.x[1];
                0
            })
            .unwrap();

        let solution = model.solve().unwrap();
        assert_eq!(solution.status, 0);
        assert_eq!(solution.obj, 5.0);
        assert_eq!(solution.x, vec![1.0, 2.0]);
    }

    #[test]
    fn descent_follows_the_user_gradient() {
        // minimize (x0 - 3)^2; the stub's fixed-step descent should get
        // close to the stationary point given enough iterations.
        let mut model = Model::new().unwrap();
        model.add_vars(1).unwrap();
        model.set_int_param("maxit", 200).unwrap();
        model.set_double_param("steplength", 0.1).unwrap();

        let h = model
            .add_eval_callback(true, &[], |_: &CallbackContext, req: &EvalRequest, res: &mut EvalResult| {
                *res.obj = (req.x[0] - 3.0) * (req.x[0] - 3.0);
                0
            })
            .unwrap();
        model
            .set_cb_grad(
                h,
                GradSparsity::Dense,
                JacSparsity::Dense,
                |_: &CallbackContext, req: &EvalRequest, res: &mut EvalResult| {
                    res.obj_grad[0] = 2.0 * (req.x[0] - 3.0);
                    0
                },
            )
            .unwrap();

        let newpts = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&newpts);
        model
            .set_newpt_callback(move |x, _| {
                assert_eq!(x.len(), 1);
                seen.fetch_add(1, Ordering::SeqCst);
                0
            })
            .unwrap();

        let solution = model.solve().unwrap();
        assert!((solution.x[0] - 3.0).abs() < 1e-6, "x = {:?}", solution.x);
        assert!(solution.obj < 1e-10);
        assert_eq!(newpts.load(Ordering::SeqCst), 200);
    }

    #[test]
    fn bounds_clamp_the_iterates() {
        let mut model = Model::new().unwrap();
        model.add_vars(1).unwrap();
        model.set_var_lobnds(&[-1.0]).unwrap();
        model.set_var_upbnds(&[1.0]).unwrap();
        model.set_int_param("maxit", 100).unwrap();

        let h = model
            .add_eval_callback(true, &[], |_: &CallbackContext, req: &EvalRequest, res: &mut EvalResult| {
                *res.obj = (req.x[0] - 3.0) * (req.x[0] - 3.0);
                0
            })
            .unwrap();
        model
            .set_cb_grad(
                h,
                GradSparsity::Dense,
                JacSparsity::Dense,
                |_: &CallbackContext, req: &EvalRequest, res: &mut EvalResult| {
                    res.obj_grad[0] = 2.0 * (req.x[0] - 3.0);
                    0
                },
            )
            .unwrap();

        let solution = model.solve().unwrap();
        assert_eq!(solution.x[0], 1.0);
    }

    #[test]
    fn multistart_picks_the_best_restart() {
        // Two restarts seeded at 5 and -5 for f(x) = (x - 3)^2 with few
        // iterations; the restart seeded at 5 stays closer to 3.
        let mut model = Model::new().unwrap();
        model.add_vars(1).unwrap();
        model.set_int_param("ms_enable", 1).unwrap();
        model.set_int_param("ms_numsolves", 2).unwrap();
        model.set_int_param("maxit", 50).unwrap();

        let h = model
            .add_eval_callback(true, &[], |_: &CallbackContext, req: &EvalRequest, res: &mut EvalResult| {
                *res.obj = (req.x[0] - 3.0) * (req.x[0] - 3.0);
                0
            })
            .unwrap();
        model
            .set_cb_grad(
                h,
                GradSparsity::Dense,
                JacSparsity::Dense,
                |_: &CallbackContext, req: &EvalRequest, res: &mut EvalResult| {
                    res.obj_grad[0] = 2.0 * (req.x[0] - 3.0);
                    0
                },
            )
            .unwrap();

        let inits = Arc::new(AtomicUsize::new(0));
        let processed = Arc::new(AtomicUsize::new(0));
        let inits_seen = Arc::clone(&inits);
        let processed_seen = Arc::clone(&processed);
        model
            .set_ms_initpt_callback(move |solve_number, x, _| {
                inits_seen.fetch_add(1, Ordering::SeqCst);
                x[0] = if solve_number == 0 { 5.0 } else { -5.0 };
                0
            })
            .unwrap();
        model
            .set_ms_process_callback(move |_, _| {
                processed_seen.fetch_add(1, Ordering::SeqCst);
                0
            })
            .unwrap();

        let solution = model.solve().unwrap();
        assert_eq!(inits.load(Ordering::SeqCst), 2);
        assert_eq!(processed.load(Ordering::SeqCst), 2);
        assert!((solution.x[0] - 3.0).abs() < 1e-3);
    }

    #[test]
    fn solver_output_is_routed_through_the_puts_callback() {
        let mut model = Model::new().unwrap();
        model.add_vars(1).unwrap();
        model
            .add_eval_callback(true, &[], |_: &CallbackContext, _: &EvalRequest, res: &mut EvalResult| {
                *res.obj = 0.0;
                0
            })
            .unwrap();

        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        model
            .set_puts_callback(move |line| {
                sink.lock().unwrap().push(line.to_owned());
                line.len() as i32
            })
            .unwrap();

        model.solve().unwrap();
        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("solve finished"));
    }

    #[test]
    fn failing_evaluation_aborts_the_solve() {
        let mut model = Model::new().unwrap();
        model.add_vars(1).unwrap();
        model
            .add_eval_callback(true, &[], |_: &CallbackContext, _: &EvalRequest, _: &mut EvalResult| 3)
            .unwrap();
        let err = model.solve().unwrap_err();
        assert!(matches!(err, Error::Native { call: "PG_solve", status: 3 }));
    }

    #[test]
    fn compcons_arrays_must_agree_in_length() {
        let mut model = Model::new().unwrap();
        model.add_vars(4).unwrap();
        let err = model.set_compcons(&[0, 0], &[0, 1], &[2]).unwrap_err();
        assert!(matches!(
            err,
            Error::LengthMismatch {
                expected: 2,
                actual: 1,
                ..
            }
        ));
        model.set_compcons(&[0, 0], &[0, 1], &[2, 3]).unwrap();
    }

    #[test]
    fn bound_arrays_are_length_checked() {
        let mut model = Model::new().unwrap();
        model.add_vars(3).unwrap();
        let err = model.set_var_lobnds(&[0.0, 0.0]).unwrap_err();
        assert!(matches!(
            err,
            Error::LengthMismatch {
                expected: 3,
                actual: 2,
                ..
            }
        ));
    }

    #[test]
    fn dimension_accessors_track_the_model() {
        let mut model = Model::new().unwrap();
        assert_eq!(model.num_vars().unwrap(), 0);
        model.add_vars(3).unwrap();
        model.add_cons(2).unwrap();
        assert_eq!(model.num_vars().unwrap(), 3);
        assert_eq!(model.num_cons().unwrap(), 2);
    }
}
