/// Episodes are addressed by their index within a dataset.
pub type EpisodeIndex = u32;

/// Zero-based frame index, aligned with the trajectory sample index.
pub type FrameIndex = usize;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
