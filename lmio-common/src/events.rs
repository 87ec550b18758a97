//! Event types for the landmarker event system
//!
//! Provides the shared event definitions and the EventBus the navigator
//! publishes to. Full navigation snapshots travel separately over a watch
//! channel; events here are notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Landmarker event types
///
/// Serializable so a UI bridge can forward them verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LmioEvent {
    /// Active template selected or replaced
    TemplateChanged {
        template: String,
        timestamp: DateTime<Utc>,
    },

    /// Asset catalog rebuilt for a collection
    CatalogRebuilt {
        collection: String,
        /// "image" or "mesh"
        mode: String,
        asset_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A new asset/landmark pair became current
    AssetPublished {
        asset_id: String,
        asset_index: usize,
        template: String,
        /// Switch generation that produced this pair
        generation: u64,
        timestamp: DateTime<Utc>,
    },

    /// A switch completed after a newer one had started and was dropped
    SwitchDiscarded {
        asset_index: usize,
        generation: u64,
        timestamp: DateTime<Utc>,
    },

    /// Landmarks written to the backend
    LandmarksSaved {
        asset_id: String,
        template: String,
        timestamp: DateTime<Utc>,
    },

    /// A transition failed; the previous state stays visible
    NavigationFailed {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

/// Central event distribution bus
///
/// Backed by `tokio::sync::broadcast`:
/// - Non-blocking publish (slow subscribers don't block the navigator)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LmioEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<LmioEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; `Err` when nobody is listening
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: LmioEvent,
    ) -> std::result::Result<usize, broadcast::error::SendError<LmioEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: LmioEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}
