use thiserror::Error;

/// Internal failures of the admission path. None of these ever reject a
/// request; the middleware lets the request through when it sees one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("bucket store is full ({max_buckets} buckets), refusing to track {key}")]
    StoreFull { key: String, max_buckets: usize },

    #[error("token bucket lock for {key} was poisoned")]
    BucketPoisoned { key: String },
}

impl AdmissionError {
    /// Label used for the `failed` outcome in metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            AdmissionError::StoreFull { .. } => "store_full",
            AdmissionError::BucketPoisoned { .. } => "bucket_poisoned",
        }
    }
}
