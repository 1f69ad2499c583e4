//! End-to-end scenarios for the quick-reboot sequence.
//!
//! Everything here runs against `SimulatedMaster`; no hardware or
//! privileges are needed.

mod common;
mod reboot_test;
mod report_test;
