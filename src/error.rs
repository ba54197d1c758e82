/// Result alias for the transform, pipeline and tempo core.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Contract violations and processing failures raised by the core.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Transform sizes must be a power of two greater than one.
    #[error("transform size {0} is not a power of two greater than 1")]
    InvalidTransformSize(usize),
    /// Chunk buffers need room for at least one element.
    #[error("buffer capacity must be positive")]
    InvalidCapacity,
    #[error("{what}: expected {expected} elements, got {actual}")]
    BufferSizeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("tempo range [{lower}, {upper}) is empty or starts at zero")]
    InvalidTempoRange { lower: u32, upper: u32 },
    #[error("frame rate parameters are invalid: {0}")]
    InvalidFrameRate(String),
    /// A processing job failed. The pipeline kept draining; this is the
    /// first failure reported since the previous drain.
    #[error("chunk processing failed: {0}")]
    Sink(String),
    /// The sink was already taken out of the pipeline.
    #[error("pipeline sink is no longer available")]
    SinkUnavailable,
}

impl CoreError {
    pub(crate) fn size_mismatch(what: &'static str, expected: usize, actual: usize) -> Self {
        Self::BufferSizeMismatch {
            what,
            expected,
            actual,
        }
    }
}
