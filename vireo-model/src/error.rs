use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("invalid object: {0}")]
    InvalidObject(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
