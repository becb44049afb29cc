//! Safe Rust bindings to the C API of the Peregrine nonlinear
//! optimization solver.
//!
//! The solver is an opaque iterative engine: the caller describes a
//! model, registers evaluation callbacks for objective, constraints and
//! derivatives, and hands over control with [`Model::solve`]. During
//! the solve, Peregrine calls back into user code through C function
//! pointers; this crate supplies the `extern "C"` trampolines that make
//! that boundary safe (tag-checked context recovery, zero-copy views
//! over solver buffers, panic containment).
//!
//! ```no_run
//! use peregrine::{CallbackContext, EvalRequest, EvalResult, Model};
//!
//! # fn main() -> peregrine::Result<()> {
//! let mut model = Model::new()?;
//! model.add_vars(2)?;
//! model.set_var_primal_init_values(&[1.0, 2.0])?;
//! model.add_eval_callback(true, &[], |_: &CallbackContext, req: &EvalRequest, res: &mut EvalResult| {
//!     *res.obj = req.x[0] * req.x[0] + req.x[1] * req.x[1];
//!     0
//! })?;
//! let solution = model.solve()?;
//! println!("objective: {}", solution.obj);
//! # Ok(())
//! # }
//! ```
//!
//! Built without the `native` feature, the crate links an in-process
//! stub backend instead of the solver library; the test suite runs
//! entirely against that stub.

mod callback;
mod error;
mod eval;
pub mod ffi;
mod model;
mod register;
mod trampoline;

pub use callback::{CallbackContext, CbHandle, EvalFn, InitPointFn, PointFn, PutsFn};
pub use error::{Error, Result};
pub use eval::{EvalKind, EvalRequest, EvalResult};
pub use model::{Model, Solution};
pub use register::{GradSparsity, HessSparsity, JacSparsity};
