use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmeError {
    #[error("initialization data type must not be empty")]
    EmptyInitDataType,

    #[error("initialization data must not be empty")]
    EmptyInitData,

    #[error("initialization data too large: {len} bytes, max is {max}")]
    InitDataTooLarge { len: usize, max: usize },

    #[error("unknown key status: {0}")]
    UnknownKeyStatus(String),

    #[error("unknown session type: {0}")]
    UnknownSessionType(String),

    #[error("no Tokio runtime to watch for session close")]
    NoRuntime,

    #[error("invalid session state: {0}")]
    InvalidState(&'static str),
}

pub type EmeResult<T> = Result<T, EmeError>;
