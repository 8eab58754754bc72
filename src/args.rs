//! Command line argument parsing for the thermal daemon

use crate::cooling::CoolingPolicy;
use clap::{Parser, ValueEnum};

/// HP BIOS thermal daemon
///
/// Keeps reapplying a fixed power and fan policy through the HP BIOS WMI
/// interface and logs the IR temperature sensor.
#[derive(Parser, Debug)]
#[command(name = "hp-thermal-daemon")]
#[command(about = "Reapply HP BIOS power and fan limits on a timer")]
#[command(version)]
pub struct Args {
    /// Increase verbosity (can be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Built-in policy to apply
    #[arg(long, value_enum, default_value_t = PolicyPreset::Performance)]
    pub policy: PolicyPreset,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyPreset {
    /// 45 W PL1, full GPU power, every 5 seconds
    Performance,
    /// 45 W PL1, minimum GPU power, every 30 seconds
    GpuSaver,
}

impl PolicyPreset {
    pub fn policy(self) -> CoolingPolicy {
        match self {
            Self::Performance => CoolingPolicy::performance(),
            Self::GpuSaver => CoolingPolicy::gpu_saver(),
        }
    }
}
