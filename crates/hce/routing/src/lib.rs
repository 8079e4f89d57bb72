//! Routing table management for host card emulation.
//!
//! [`RoutingTablePacker`] turns resolution entries into controller rows and
//! fits them under the table capacity by trying candidate default routes in
//! order. [`AidRoutingManager`] commits the result, skipping unchanged tables
//! and reporting overflow once per occurrence. [`SystemCodeRoutingManager`]
//! does the same for NFC-F identifiers.

pub mod controller;
pub mod error;
pub mod manager;
pub mod mocks;
pub mod options;
pub mod packer;
pub mod power;
pub mod system_code;

pub use controller::NfcController;
pub use error::{Result, RoutingError};
pub use manager::{AidRoutingManager, RoutingOutcome};
pub use mocks::{ControllerCall, MockController};
pub use options::RoutingOptions;
pub use packer::{PackedTable, RoutingPlan, RoutingTablePacker};
pub use power::compute_power_state;
pub use system_code::SystemCodeRoutingManager;
