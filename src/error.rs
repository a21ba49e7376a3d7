// Error type shared by the library and the binary.
// Every failure maps to exit code 1; what differs is where it is reported
// (inline per file for local read failures, fatal for everything here).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClassinetError>;

#[derive(Error, Debug)]
pub enum ClassinetError {
    /// Command line misuse. The message may span several lines.
    #[error("{0}")]
    Usage(String),
    #[error("Failed to activate classinet client: {0}")]
    Connection(String),
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("Service error: {0}")]
    Service(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl ClassinetError {
    pub fn usage(message: impl Into<String>) -> Self {
        ClassinetError::Usage(message.into())
    }

    pub fn exit_code(&self) -> i32 {
        1
    }

    /// Text printed to the output stream before exiting.
    pub fn report(&self) -> String {
        match self {
            ClassinetError::Usage(message) => {
                format!("{}\nAborting.\nTry: classinet help\n", message.trim_end())
            }
            ClassinetError::ModelUnavailable(_) => "Model unavailable. Aborting.\n".into(),
            ClassinetError::Connection(_) => format!("{}\nAborting.\n", self),
            other => format!("{}. Aborting.\n", other),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for ClassinetError {
    fn from(error: std::sync::PoisonError<T>) -> Self {
        ClassinetError::Service(error.to_string())
    }
}
