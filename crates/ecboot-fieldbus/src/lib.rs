//! EtherCAT quick-reboot orchestration.
//!
//! This crate provides:
//! - [`MasterStack`] trait abstracting the EtherCAT master library
//! - [`reboot`] module with the [`RebootOrchestrator`] that forces a slave
//!   through BOOT and back to INIT so it restarts
//! - [`sii`] module decoding the boot mailbox descriptors
//! - [`sync_manager`] module with the SM0/SM1 register images
//! - [`simulated`] module with an in-memory master for testing
//! - `soem_master` module (feature `soem`, Linux) with the SOEM-backed master

pub mod master;
pub mod reboot;
pub mod report;
pub mod sii;
#[cfg(feature = "simulated")]
pub mod simulated;
pub mod slave;
#[cfg(all(feature = "soem", target_os = "linux"))]
pub mod soem_master;
pub mod sync_manager;

pub use master::*;
pub use reboot::*;
pub use report::*;
pub use sii::*;
#[cfg(feature = "simulated")]
pub use simulated::*;
pub use slave::*;
#[cfg(all(feature = "soem", target_os = "linux"))]
pub use soem_master::SoemMaster;
pub use sync_manager::*;
