use thiserror::Error;

use fleet_core::InventoryError;
use fleet_state::StateError;

use crate::phase::CyclePhase;

/// Errors that end a cycle without a report.
///
/// Per-service failures never show up here; they are recorded against the
/// service and the cycle carries on.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error("inventory lists service {0} more than once")]
    DuplicateService(String),

    #[error("cycle cancelled during {phase}")]
    Cancelled { phase: CyclePhase },

    #[error("state store: {0}")]
    State(#[from] StateError),
}

impl CycleError {
    /// Whether the inventory could not be listed.
    pub fn is_inventory_failure(&self) -> bool {
        matches!(self, CycleError::Inventory(_) | CycleError::DuplicateService(_))
    }
}
