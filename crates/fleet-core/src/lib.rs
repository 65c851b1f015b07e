pub mod config;
pub mod duration;
pub mod inventory;
pub mod types;

pub use config::{
    validate_services, ConfigError, ControlConfig, FleetConfig, HealthSection, ProbeTarget,
};
pub use duration::parse_duration;
pub use inventory::{InventoryError, InventoryFuture, InventoryProvider, StaticInventory};
pub use types::*;
