use kernelir_core::IrError;
use thiserror::Error;

/// Fatal conditions of a device compilation. None of them is recoverable: the module must be
/// discarded once one is returned.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("thread-local storage is not implemented on device (live use in @{function})")]
    ThreadLocalStorage { function: String },

    #[error("@{intrinsic} is referenced by a non-call instruction in @{function}")]
    UnexpectedIntrinsicUse { intrinsic: String, function: String },

    #[error("invalid kernel entry @{function}: {reason}")]
    InvalidEntry { function: String, reason: String },

    #[error("@{function} has {expected} non-ghost argument type(s) but {actual} IR parameter(s)")]
    SignatureMismatch {
        function: String,
        expected: usize,
        actual: usize,
    },

    #[error("wrapper for @{function}: parameter {index} expects {expected}, wrapper passes {actual}")]
    WrapperInvariant {
        function: String,
        index: usize,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Ir(#[from] IrError),

    #[error("Pass error: {0}")]
    Pass(String),
}

impl From<anyhow::Error> for CompileError {
    fn from(err: anyhow::Error) -> Self {
        let err = match err.downcast::<CompileError>() {
            Ok(compile) => return compile,
            Err(err) => err,
        };
        match err.downcast::<IrError>() {
            Ok(ir) => CompileError::Ir(ir),
            Err(err) => CompileError::Pass(format!("{:#}", err)),
        }
    }
}

pub type CompileResult<T> = std::result::Result<T, CompileError>;
