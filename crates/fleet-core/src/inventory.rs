//! Inventory provider — where the fleet's `ServiceSpec`s come from.
//!
//! Listing the inventory is the one operation whose failure aborts a whole
//! control cycle: without an inventory there is nothing to decide on.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::types::ServiceSpec;

/// Errors returned by an inventory provider.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("inventory unavailable: {0}")]
    Unavailable(String),

    #[error("inventory timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Boxed future alias for inventory listings.
pub type InventoryFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<ServiceSpec>, InventoryError>> + Send + 'a>>;

/// Supplies the current fleet.
pub trait InventoryProvider: Send + Sync {
    /// List every managed service.
    fn list_services(&self) -> InventoryFuture<'_>;
}

/// Inventory fixed at construction, typically from `FleetConfig.services`.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    services: Vec<ServiceSpec>,
}

impl StaticInventory {
    pub fn new(services: Vec<ServiceSpec>) -> Self {
        Self { services }
    }
}

impl InventoryProvider for StaticInventory {
    fn list_services(&self) -> InventoryFuture<'_> {
        let services = self.services.clone();
        Box::pin(async move { Ok(services) })
    }
}
