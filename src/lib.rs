//! HP BIOS Thermal Daemon
//!
//! Reapplies a fixed CPU/GPU power and fan policy through the HP BIOS WMI
//! interface on a timer and reports the IR temperature sensor.

pub mod args;
pub mod bios;
pub mod channel;
pub mod cooling;
pub mod daemon;
pub mod errors;
pub mod host;
pub mod logging;
pub mod provider;
#[cfg(target_os = "windows")]
pub mod wmi;

// Re-export commonly used types
pub use bios::{BiosCommandRequest, BiosCommandResponse, BiosMethod};
pub use channel::FirmwareCommandChannel;
pub use cooling::{CoolingControlLoop, CoolingPolicy, GpuPowerMode};
pub use errors::{Result, ThermalError};
