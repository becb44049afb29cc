use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A native solver call returned a non-zero status.
    #[error("solver call {call} failed with status {status}")]
    Native { call: &'static str, status: i32 },
    /// Paired index arrays of a sparsity declaration disagree in length.
    #[error("{what}: index arrays disagree in length ({left} vs {right})")]
    IndexPairMismatch {
        what: &'static str,
        left: usize,
        right: usize,
    },
    /// An array argument does not match the dimension the model declares.
    #[error("{what}: expected {expected} entries, got {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    /// The callback handle does not name a context registered with this model.
    #[error("unknown callback handle")]
    UnknownCallback,
    /// A parameter name contained an interior NUL byte.
    #[error("parameter name contains an interior NUL byte")]
    InvalidParamName,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wraps a native status code, mapping 0 to `Ok(())`.
    pub(crate) fn check(call: &'static str, status: i32) -> Result<()> {
        if status == 0 {
            Ok(())
        } else {
            Err(Error::Native { call, status })
        }
    }
}
