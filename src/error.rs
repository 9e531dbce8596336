use thiserror::Error;

/// Errors raised while configuring, training or restoring a room GAN run.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("non-finite {term} during {phase}: {value}")]
    NonFinite {
        phase: &'static str,
        term: &'static str,
        value: f32,
    },

    #[error("data error: {0}")]
    Data(String),

    #[error("record error: {0}")]
    Recorder(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, Error>;
