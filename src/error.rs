use thiserror::Error;

/// Failure modes of the suspending acquire forms.
///
/// The blocking and non-blocking forms never fail; cancellation is the only
/// error the registry can produce.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AcquireError {
    /// The acquire attempt was cancelled before the lock was granted.
    ///
    /// The caller holds nothing and owes no release; the key's lock state is
    /// exactly as if the attempt never happened.
    #[error("lock acquire cancelled before grant")]
    Cancelled,
}
