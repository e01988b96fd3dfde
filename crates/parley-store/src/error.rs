//! Store errors.

/// Errors from the persistence layer.
///
/// Callers in the broker treat these as best-effort failures: they are logged
/// and the in-memory effect of the operation still applies.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
