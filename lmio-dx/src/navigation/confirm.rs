//! Confirmation before discarding unsaved landmarks

use async_trait::async_trait;

/// Asks the user whether to go ahead with a destructive transition
///
/// Awaiting the answer suspends the transition; `false` leaves navigation
/// untouched.
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, message: &str) -> bool;
}

/// Answers yes without asking
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysProceed;

#[async_trait]
impl Confirm for AlwaysProceed {
    async fn confirm(&self, _message: &str) -> bool {
        true
    }
}
