//! Shared test doubles for lmio-dx integration tests

#![allow(dead_code)]

pub mod fake_backend;
pub mod memory_transport;

/// Yield to other tasks until `condition` holds
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
