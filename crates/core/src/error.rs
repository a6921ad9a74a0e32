#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Dimension mismatch in {field} at sample {index}: expected {expected}, got {actual}")]
    DimensionMismatch {
        field: &'static str,
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Length mismatch: {what} has {actual} entries, expected {expected}")]
    LengthMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    #[error("Non-finite value in {field} at sample {index}")]
    NonFinite { field: &'static str, index: usize },

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Data-integrity errors are fatal for a single analysis or export call
    /// and must never be silently repaired.
    pub fn is_data_integrity(&self) -> bool {
        matches!(self, Self::DimensionMismatch { .. } | Self::LengthMismatch { .. } | Self::NonFinite { .. })
    }
}
