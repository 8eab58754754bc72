//! Error types for the thermal daemon

use thiserror::Error;

/// Result type alias for the thermal daemon
pub type Result<T> = std::result::Result<T, ThermalError>;

/// Main error type for the thermal daemon
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ThermalError {
    #[error("BIOS not responding to WMI command {command}/{opcode}")]
    FirmwareUnresponsive { command: u32, opcode: u32 },

    #[error("BIOS command {command}/{opcode} not available")]
    CommandNotSupported { command: u32, opcode: u32 },

    #[error("Payload for BIOS command {command}/{opcode} is too small")]
    PayloadTooSmall { command: u32, opcode: u32 },

    #[error("BIOS returned {actual} data bytes, expected {expected}")]
    ReplySizeMismatch { expected: u32, actual: usize },

    #[error("No BIOS method accepts a reply size of {0} bytes")]
    UnsupportedReplySize(u32),

    #[error("Failed to establish BIOS WMI session: {0}")]
    SessionEstablishment(String),

    #[error("WMI provider error: {0}")]
    Provider(String),

    #[error("IR sensor returned no data")]
    MissingSensorData,

    #[error("Cooling loop task failed: {0}")]
    Worker(String),
}

impl ThermalError {
    /// True for failures reported by the firmware itself rather than the
    /// WMI plumbing around it.
    pub fn is_firmware_status(&self) -> bool {
        matches!(
            self,
            Self::CommandNotSupported { .. } | Self::PayloadTooSmall { .. }
        )
    }
}
