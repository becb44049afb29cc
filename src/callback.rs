//! Callback contexts and the tagged user-data token.
//!
//! The solver stores nothing about a registered callback except an
//! untyped pointer handed over at registration time. Everything the
//! dispatch layer recovers from that pointer goes through the tagged
//! [`TokenHeader`] at the start of the pointee, so a stray or foreign
//! pointer is rejected at the boundary instead of being dereferenced as
//! the wrong type.

use std::any::Any;
use std::collections::HashMap;
use std::ffi::c_void;

use libc::c_int;

use crate::error::{Error, Result};
use crate::eval::{EvalRequest, EvalResult};
use crate::ffi;

/// A user evaluation function. Receives the context it was registered
/// on, the solver's request, and the result view to populate; returns 0
/// on success, any other value to fail the evaluation.
pub type EvalFn =
    Box<dyn Fn(&CallbackContext, &EvalRequest<'_>, &mut EvalResult<'_>) -> i32 + Send + Sync>;

/// A lifecycle function receiving the current point and multipliers.
pub type PointFn = Box<dyn Fn(&[f64], &[f64]) -> i32 + Send + Sync>;

/// A multistart initial-point function; may rewrite the point and
/// multipliers for the given solve number.
pub type InitPointFn = Box<dyn Fn(i32, &mut [f64], &mut [f64]) -> i32 + Send + Sync>;

/// A text-output function receiving one line of solver output.
pub type PutsFn = Box<dyn Fn(&str) -> i32 + Send + Sync>;

pub(crate) const TOKEN_MAGIC: u32 = 0x5047_4342; // "PGCB"

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Callback = 1,
    Model = 2,
}

/// First field of every object whose address is handed to the solver as
/// a user-data token. `#[repr(C)]` so the check below is layout-stable.
#[repr(C)]
pub(crate) struct TokenHeader {
    magic: u32,
    kind: TokenKind,
}

impl TokenHeader {
    pub(crate) fn new(kind: TokenKind) -> Self {
        TokenHeader {
            magic: TOKEN_MAGIC,
            kind,
        }
    }
}

/// Checked downcast of an untyped user-data token.
///
/// Reads only the leading [`TokenHeader`] and refuses the cast when the
/// magic or kind disagrees. `T` must be `#[repr(C)]` with a
/// `TokenHeader` as its first field.
///
/// # Safety
/// `token` must be null or point to memory where at least a
/// `TokenHeader` is readable.
pub(crate) unsafe fn recover_token<'a, T>(token: *mut c_void, kind: TokenKind) -> Option<&'a T> {
    if token.is_null() {
        return None;
    }
    let header = &*(token as *const TokenHeader);
    if header.magic != TOKEN_MAGIC || header.kind != kind {
        return None;
    }
    Some(&*(token as *const T))
}

/// Index of a registered callback context within its [`crate::Model`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CbHandle(pub(crate) usize);

/// One registered evaluation callback: the native `PG_CB` handle it
/// wraps, the evaluation functions bound to it, and a bag of arbitrary
/// user data retrievable from inside those functions.
///
/// Contexts are created by the registration methods on
/// [`crate::Model`] and stay pinned on the heap until the model is
/// dropped; the solver keeps a raw pointer to them for the whole solve.
#[repr(C)]
pub struct CallbackContext {
    header: TokenHeader, // must stay the first field
    pub(crate) cb: ffi::PG_CB,
    pub(crate) env: ffi::PG_context,
    user_params: HashMap<String, Box<dyn Any + Send + Sync>>,
    pub(crate) eval_fc: Option<EvalFn>,
    pub(crate) eval_ga: Option<EvalFn>,
    pub(crate) eval_h: Option<EvalFn>,
    pub(crate) eval_rsd: Option<EvalFn>,
    pub(crate) eval_rsdj: Option<EvalFn>,
}

impl CallbackContext {
    pub(crate) fn new(env: ffi::PG_context) -> Self {
        CallbackContext {
            header: TokenHeader::new(TokenKind::Callback),
            cb: std::ptr::null_mut(),
            env,
            user_params: HashMap::new(),
            eval_fc: None,
            eval_ga: None,
            eval_h: None,
            eval_rsd: None,
            eval_rsdj: None,
        }
    }

    /// The raw native handle of this callback.
    pub fn raw_cb(&self) -> ffi::PG_CB {
        self.cb
    }

    /// Stores auxiliary data under `key`, replacing any prior value.
    ///
    /// The map is read-only while the solver runs; store interior
    /// mutability (`Mutex`, atomics) if callbacks need to write to it.
    pub fn set_user_param(&mut self, key: impl Into<String>, value: Box<dyn Any + Send + Sync>) {
        self.user_params.insert(key.into(), value);
    }

    /// Typed read of auxiliary data stored via [`set_user_param`].
    ///
    /// [`set_user_param`]: CallbackContext::set_user_param
    pub fn user_param<T: 'static>(&self, key: &str) -> Option<&T> {
        self.user_params.get(key)?.downcast_ref()
    }

    /// Number of variables in the owning model.
    pub fn num_vars(&self) -> Result<usize> {
        let mut n: c_int = 0;
        Error::check("PG_get_number_vars", unsafe {
            ffi::PG_get_number_vars(self.env, &mut n)
        })?;
        Ok(n as usize)
    }

    /// Number of constraints in the owning model.
    pub fn num_cons(&self) -> Result<usize> {
        let mut m: c_int = 0;
        Error::check("PG_get_number_cons", unsafe {
            ffi::PG_get_number_cons(self.env, &mut m)
        })?;
        Ok(m as usize)
    }

    /// The opaque token under which the solver knows this context.
    pub(crate) fn token(&self) -> *mut c_void {
        self as *const CallbackContext as *mut c_void
    }
}
