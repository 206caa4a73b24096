use validator::ValidationErrors;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("failed to load model: {0:#}")]
    ModelLoad(#[source] anyhow::Error),

    #[error("{0:#}")]
    Inference(#[source] anyhow::Error),

    #[error("failed to encode image: {0}")]
    Encode(#[from] image::ImageError),
}

impl Error {
    /// Stable name of the error kind, reported to batch callers.
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::Validation(_) => "ValidationError",
            Error::ModelLoad(_) => "ModelLoadError",
            Error::Inference(_) => "InferenceError",
            Error::Encode(_) => "EncodeError",
        }
    }

    /// The full cause chain, plus the backtrace when one was captured
    /// (`RUST_BACKTRACE=1`).
    pub fn traceback(&self) -> String {
        match self {
            Error::ModelLoad(e) | Error::Inference(e) => {
                format!("{}: {e:?}", self.error_type())
            }
            other => format!("{}: {other:?}", self.error_type()),
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}
