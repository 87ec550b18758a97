//! Navigation state snapshots

use crate::asset_source::AssetPayload;
use crate::landmarks::LandmarkGroup;
use crate::mode::Mode;
use serde::{Deserialize, Serialize};

/// Where the navigator is in its startup/switch cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavPhase {
    #[default]
    Idle,
    TemplateResolving,
    CollectionResolving,
    CatalogLoading,
    AssetSwitching,
    Ready,
}

impl std::fmt::Display for NavPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NavPhase::Idle => write!(f, "idle"),
            NavPhase::TemplateResolving => write!(f, "template_resolving"),
            NavPhase::CollectionResolving => write!(f, "collection_resolving"),
            NavPhase::CatalogLoading => write!(f, "catalog_loading"),
            NavPhase::AssetSwitching => write!(f, "asset_switching"),
            NavPhase::Ready => write!(f, "ready"),
        }
    }
}

/// A fully loaded asset together with its landmarks
///
/// Asset and landmarks only ever exist together, so a snapshot can never
/// show landmarks next to an asset they do not belong to.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentAsset {
    pub asset_id: String,
    pub index: usize,
    pub payload: AssetPayload,
    pub landmarks: LandmarkGroup,
}

/// What observers see of the navigator
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NavigationState {
    pub phase: NavPhase,
    pub mode: Mode,
    pub templates: Vec<String>,
    pub collections: Vec<String>,
    pub active_template: Option<String>,
    pub active_collection: Option<String>,
    pub asset_count: usize,
    /// Index of the published asset
    pub asset_index: Option<usize>,
    pub current: Option<CurrentAsset>,
    /// Generation of the switch that published `current`
    pub generation: u64,
    pub auto_save: bool,
    pub last_error: Option<String>,
}

impl NavigationState {
    pub fn current_asset_id(&self) -> Option<&str> {
        self.current.as_ref().map(|c| c.asset_id.as_str())
    }

    pub fn current_landmarks(&self) -> Option<&LandmarkGroup> {
        self.current.as_ref().map(|c| &c.landmarks)
    }

    /// Current landmarks differ from what was last saved or loaded
    pub fn has_unsaved_changes(&self) -> bool {
        self.current_landmarks().is_some_and(|lms| !lms.is_current())
    }

    /// Phase to fall back to when a transition fails
    pub(crate) fn settled_phase(&self) -> NavPhase {
        if self.current.is_some() {
            NavPhase::Ready
        } else {
            NavPhase::Idle
        }
    }
}
