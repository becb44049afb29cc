//! Raw FFI surface of the Peregrine C interface.
//!
//! These definitions mirror the `peregrine.h` header: opaque handle
//! typedefs, the flat evaluation request/result records the solver
//! writes into directly, the callback function-pointer types, and the
//! entry points this crate calls. With the `native` feature the entry
//! points resolve to the installed solver library; without it they
//! resolve to the in-process stub backend in [`stub`], which is what
//! the test suite runs against.

#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use libc::{c_char, c_double, c_int, c_void};

#[cfg(not(feature = "native"))]
pub mod stub;

/// A pointer to the opaque solver context (one per model).
pub type PG_context = *mut c_void;
/// A pointer to the opaque per-callback structure owned by the solver.
pub type PG_CB = *mut c_void;

pub const PG_INFBOUND: c_double = 1.0e30;

/// Dense-mode marker for derivative structure declarations; passed in
/// place of a nonzero count when no index arrays are supplied.
pub const PG_DENSE: c_int = -1;

// --- Evaluation request codes (the `code` field of PG_eval_request) ---

pub const PG_EVAL_FC: c_int = 1;
pub const PG_EVAL_GA: c_int = 2;
pub const PG_EVAL_H: c_int = 3;
pub const PG_EVAL_HV: c_int = 7;
pub const PG_EVAL_RSD: c_int = 10;
pub const PG_EVAL_RSDJ: c_int = 11;

// --- Status codes ---

pub const PG_RC_OK: c_int = 0;
/// The user-data token attached to a callback did not refer to a valid
/// callback context. Returned by the dispatch layer, never by user code.
pub const PG_RC_BAD_CB_CONTEXT: c_int = 32;
/// A user callback failed (returned an error status or panicked).
pub const PG_RC_CALLBACK_ERR: c_int = -500;
/// An argument of a solver call was out of range or malformed.
pub const PG_RC_BAD_PARAM: c_int = -201;

// --- Evaluation request/result records ---
//
// The solver allocates these and passes pointers to the registered
// callback; field order and widths must match the header exactly.

#[repr(C)]
pub struct PG_eval_request {
    /// One of the PG_EVAL_* request codes.
    pub code: c_int,
    /// Identifies the solver worker thread issuing the request.
    pub thread_id: c_int,
    pub x: *const c_double,
    pub lambda: *const c_double,
    /// Objective scale factor for Hessian requests; may be null.
    pub sigma: *const c_double,
    /// Operand for Hessian-vector-product requests.
    pub vec: *const c_double,
}

#[repr(C)]
pub struct PG_eval_result {
    pub obj: *mut c_double,
    pub c: *mut c_double,
    pub objGrad: *mut c_double,
    pub jac: *mut c_double,
    pub hess: *mut c_double,
    pub hessVec: *mut c_double,
    pub rsd: *mut c_double,
    pub rsdJac: *mut c_double,
}

// --- Callback function-pointer types ---

pub type PG_eval_callback_fn = extern "C" fn(
    kc: PG_context,
    cb: PG_CB,
    eval_request: *const PG_eval_request,
    eval_result: *mut PG_eval_result,
    user_params: *mut c_void,
) -> c_int;

pub type PG_user_callback_fn = extern "C" fn(
    kc: PG_context,
    x: *const c_double,
    lambda: *const c_double,
    user_params: *mut c_void,
) -> c_int;

pub type PG_ms_initpt_callback_fn = extern "C" fn(
    kc: PG_context,
    solve_number: c_int,
    x: *mut c_double,
    lambda: *mut c_double,
    user_params: *mut c_void,
) -> c_int;

pub type PG_puts_fn = extern "C" fn(str: *const c_char, user_params: *mut c_void) -> c_int;

// --- Entry points ---

#[cfg(feature = "native")]
extern "C" {
    pub fn PG_new(kc: *mut PG_context) -> c_int;
    pub fn PG_free(kc: PG_context);

    pub fn PG_add_vars(kc: PG_context, n: c_int) -> c_int;
    pub fn PG_add_cons(kc: PG_context, m: c_int) -> c_int;
    pub fn PG_set_var_lobnds(kc: PG_context, lobnds: *const c_double) -> c_int;
    pub fn PG_set_var_upbnds(kc: PG_context, upbnds: *const c_double) -> c_int;
    pub fn PG_set_var_primal_init_values(kc: PG_context, x0: *const c_double) -> c_int;
    pub fn PG_set_int_param(kc: PG_context, name: *const c_char, value: c_int) -> c_int;
    pub fn PG_set_double_param(kc: PG_context, name: *const c_char, value: c_double) -> c_int;
    pub fn PG_set_compcons(
        kc: PG_context,
        ncc: c_int,
        cc_types: *const c_int,
        index_comps1: *const c_int,
        index_comps2: *const c_int,
    ) -> c_int;

    pub fn PG_get_number_vars(kc: PG_context, n: *mut c_int) -> c_int;
    pub fn PG_get_number_cons(kc: PG_context, m: *mut c_int) -> c_int;
    pub fn PG_get_cb_number_cons(kc: PG_context, cb: PG_CB, nc: *mut c_int) -> c_int;
    pub fn PG_get_cb_number_rsds(kc: PG_context, cb: PG_CB, nr: *mut c_int) -> c_int;
    pub fn PG_get_cb_objgrad_nnz(kc: PG_context, cb: PG_CB, nnz: *mut c_int) -> c_int;
    pub fn PG_get_cb_jacobian_nnz(kc: PG_context, cb: PG_CB, nnz: *mut c_int) -> c_int;
    pub fn PG_get_cb_hessian_nnz(kc: PG_context, cb: PG_CB, nnz: *mut c_int) -> c_int;
    pub fn PG_get_cb_rsd_jacobian_nnz(kc: PG_context, cb: PG_CB, nnz: *mut c_int) -> c_int;

    pub fn PG_add_eval_callback(
        kc: PG_context,
        eval_obj: c_int,
        n_cons: c_int,
        index_cons: *const c_int,
        callback: PG_eval_callback_fn,
        cb: *mut PG_CB,
    ) -> c_int;
    pub fn PG_add_eval_callback_all(
        kc: PG_context,
        callback: PG_eval_callback_fn,
        cb: *mut PG_CB,
    ) -> c_int;
    pub fn PG_add_lsq_eval_callback(
        kc: PG_context,
        n_rsds: c_int,
        index_rsds: *const c_int,
        callback: PG_eval_callback_fn,
        cb: *mut PG_CB,
    ) -> c_int;

    pub fn PG_set_cb_grad(
        kc: PG_context,
        cb: PG_CB,
        n_objgrad: c_int,
        objgrad_index_vars: *const c_int,
        n_jac: c_int,
        jac_index_cons: *const c_int,
        jac_index_vars: *const c_int,
        callback: PG_eval_callback_fn,
    ) -> c_int;
    pub fn PG_set_cb_hess(
        kc: PG_context,
        cb: PG_CB,
        n_hess: c_int,
        hess_index_vars1: *const c_int,
        hess_index_vars2: *const c_int,
        callback: PG_eval_callback_fn,
    ) -> c_int;
    pub fn PG_set_cb_rsd_jac(
        kc: PG_context,
        cb: PG_CB,
        n_rsd_jac: c_int,
        rsd_jac_index_rsds: *const c_int,
        rsd_jac_index_vars: *const c_int,
        callback: PG_eval_callback_fn,
    ) -> c_int;
    pub fn PG_set_cb_user_params(kc: PG_context, cb: PG_CB, user_params: *mut c_void) -> c_int;

    pub fn PG_set_newpt_callback(
        kc: PG_context,
        callback: PG_user_callback_fn,
        user_params: *mut c_void,
    ) -> c_int;
    pub fn PG_set_ms_process_callback(
        kc: PG_context,
        callback: PG_user_callback_fn,
        user_params: *mut c_void,
    ) -> c_int;
    pub fn PG_set_ms_initpt_callback(
        kc: PG_context,
        callback: PG_ms_initpt_callback_fn,
        user_params: *mut c_void,
    ) -> c_int;
    pub fn PG_set_mip_node_callback(
        kc: PG_context,
        callback: PG_user_callback_fn,
        user_params: *mut c_void,
    ) -> c_int;
    pub fn PG_set_puts_callback(kc: PG_context, callback: PG_puts_fn, user_params: *mut c_void)
        -> c_int;

    pub fn PG_solve(kc: PG_context) -> c_int;
    pub fn PG_get_solution(
        kc: PG_context,
        status: *mut c_int,
        obj: *mut c_double,
        x: *mut c_double,
        lambda: *mut c_double,
    ) -> c_int;
}

#[cfg(not(feature = "native"))]
pub use stub::*;
