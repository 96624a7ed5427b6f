use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("filesystem error on {path}: {message}")]
    Filesystem { path: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("illegal operation: {0}")]
    Illegal(String),

    #[error("invalid argument: {0}")]
    Invalid(String),

    #[error("layout error: {0}")]
    Layout(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("server is shutting down")]
    Shutdown,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ContentError {
    pub fn filesystem(path: &std::path::Path, message: impl Into<String>) -> Self {
        ContentError::Filesystem {
            path: path.display().to_string(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ContentError::NotFound(_))
    }
}

impl From<vireo_model::ModelError> for ContentError {
    fn from(err: vireo_model::ModelError) -> Self {
        ContentError::Invalid(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ContentError>;
