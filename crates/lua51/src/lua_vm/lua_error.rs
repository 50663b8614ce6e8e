use thiserror::Error;

/// Lightweight error tag. The error value itself (usually a message
/// string) is kept in `LuaVM::error_object` so it stays visible to the
/// collector while the error propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LuaError {
    #[error("runtime error")]
    RuntimeError,
    #[error("syntax error")]
    SyntaxError,
    #[error("not enough memory")]
    MemoryError,
    #[error("error in error handling")]
    ErrorHandlingError,
    /// Not an error: a coroutine is suspending. Unwinds native frames up
    /// to the resume point.
    #[error("coroutine yield")]
    Yield,
}

pub type LuaResult<T> = Result<T, LuaError>;

/// Status of a thread, as reported by the embedding API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    Ok = 0,
    Yield = 1,
    RuntimeError = 2,
    SyntaxError = 3,
    MemoryError = 4,
    ErrorHandlingError = 5,
}

impl From<LuaError> for ThreadStatus {
    fn from(e: LuaError) -> Self {
        match e {
            LuaError::RuntimeError => ThreadStatus::RuntimeError,
            LuaError::SyntaxError => ThreadStatus::SyntaxError,
            LuaError::MemoryError => ThreadStatus::MemoryError,
            LuaError::ErrorHandlingError => ThreadStatus::ErrorHandlingError,
            LuaError::Yield => ThreadStatus::Yield,
        }
    }
}
