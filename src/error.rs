use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("a task is already running")]
    TaskAlreadyRunning,

    #[error("previous result has not been consumed")]
    UnconsumedResult,

    #[error("unsupported input image: {0}")]
    UnsupportedImage(#[source] image::ImageError),

    #[error("pixel buffer holds {actual} pixels, expected {expected}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("model payload unavailable: {0}")]
    ModelPayload(anyhow::Error),

    #[error("inference backend returned no result")]
    InferenceFailed,

    #[error("output encoding failed: {0}")]
    Encode(#[source] image::ImageError),

    #[error("output write failed: {0}")]
    Storage(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            format!("{}", Error::TaskAlreadyRunning),
            "a task is already running"
        );
        assert_eq!(
            format!(
                "{}",
                Error::BufferSizeMismatch {
                    expected: 100,
                    actual: 99
                }
            ),
            "pixel buffer holds 99 pixels, expected 100"
        );
        assert_eq!(
            format!("{}", Error::InferenceFailed),
            "inference backend returned no result"
        );
    }
}
