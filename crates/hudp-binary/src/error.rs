use thiserror::Error;

#[derive(Error, Debug)]
pub enum BinaryError {
    #[error("buffer ended unexpectedly: wanted {wanted} bytes, had {remaining}")]
    UnexpectedEof { wanted: usize, remaining: usize },
    #[error("invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, BinaryError>;
