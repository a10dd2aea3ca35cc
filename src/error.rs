use thiserror::Error;

#[derive(Error, Debug)]
pub enum SensaError {
    #[error("no buffer named \"{0}\" is registered")]
    UnknownBuffer(String),

    #[error("a buffer named \"{0}\" is already registered")]
    DuplicateBuffer(String),

    #[error("{module}: missing required input \"{role}\"")]
    MissingInput { module: &'static str, role: &'static str },

    #[error("{module}: input \"{role}\" must be a buffer")]
    InputNotBuffer { module: &'static str, role: &'static str },

    #[error("{module}: missing required output \"{role}\"")]
    MissingOutput { module: &'static str, role: &'static str },

    #[error("{module}: {reason}")]
    InvalidModule { module: &'static str, reason: String },

    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),

    #[error("scheduler is already running")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, SensaError>;
