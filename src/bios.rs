//! HP BIOS WMI command protocol
//!
//! Requests travel to the firmware as an `hpqBDataIn` instance passed to one
//! of the `hpqBIOSInt*` methods of the `hpqBIntM` class in `root\wmi`. The
//! method is chosen by how many bytes the caller expects back; the reply
//! arrives as an `hpqBDataOut` object carrying a return code and the data.

use crate::errors::{Result, ThermalError};

/// WMI namespace hosting the HP BIOS interface
pub const WMI_NAMESPACE: &str = "root\\wmi";
/// Query resolving the BIOS method provider instance
pub const BIOS_INSTANCE_QUERY: &str = "SELECT * FROM hpqBIntM";
/// Class exposing the `hpqBIOSInt*` methods
pub const BIOS_METHOD_CLASS: &str = "hpqBIntM";
/// Class of the method input record
pub const BIOS_DATA_IN_CLASS: &str = "hpqBDataIn";
/// Name of the method input parameter
pub const IN_PARAM: &str = "InData";
/// Name of the method output parameter
pub const OUT_PARAM: &str = "OutData";

/// "SECU", sent with every request and echoed by the firmware
pub const SIGNATURE: [u8; 4] = *b"SECU";

/// Command code of the thermal/power subsystem on OMEN-family machines
pub const THERMAL_COMMAND: u32 = 0x20008;

/// Firmware status: the opcode is not implemented
pub const STATUS_COMMAND_NOT_SUPPORTED: u32 = 0x03;
/// Firmware status: the input buffer is too small for the opcode
pub const STATUS_PAYLOAD_TOO_SMALL: u32 = 0x05;

/// Opcodes under [`THERMAL_COMMAND`]
pub mod opcode {
    pub const SET_FAN_MODE: u32 = 26;
    pub const SET_GPU_POWER: u32 = 34;
    pub const READ_IR_SENSOR: u32 = 35;
    pub const SET_PL1: u32 = 41;
    pub const SET_FAN_SPEED: u32 = 46;
}

/// Field names of the `hpqBDataIn` / `hpqBDataOut` records
pub mod field {
    pub const COMMAND: &str = "Command";
    pub const COMMAND_TYPE: &str = "CommandType";
    pub const SIGN: &str = "Sign";
    pub const DATA_IN: &str = "hpqBData";
    pub const SIZE: &str = "Size";

    pub const CLASS: &str = "__CLASS";
    pub const PATH: &str = "__PATH";
    pub const ACTIVE: &str = "Active";
    pub const DATA_OUT: &str = "Data";
    pub const INSTANCE_NAME: &str = "InstanceName";
    pub const RETURN_CODE: &str = "rwReturnCode";
}

/// The firmware exposes one method per reply-size slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BiosMethod {
    Int0,
    Int4,
    Int128,
    Int1024,
    Int4096,
}

impl BiosMethod {
    /// Select the method serving replies of `size` bytes
    pub fn for_reply_size(size: u32) -> Result<Self> {
        match size {
            0 => Ok(Self::Int0),
            4 => Ok(Self::Int4),
            128 => Ok(Self::Int128),
            1024 => Ok(Self::Int1024),
            4096 => Ok(Self::Int4096),
            other => Err(ThermalError::UnsupportedReplySize(other)),
        }
    }

    /// WMI method name
    pub fn name(self) -> &'static str {
        match self {
            Self::Int0 => "hpqBIOSInt0",
            Self::Int4 => "hpqBIOSInt4",
            Self::Int128 => "hpqBIOSInt128",
            Self::Int1024 => "hpqBIOSInt1024",
            Self::Int4096 => "hpqBIOSInt4096",
        }
    }

    /// Nominal reply size of the slot
    pub fn reply_size(self) -> u32 {
        match self {
            Self::Int0 => 0,
            Self::Int4 => 4,
            Self::Int128 => 128,
            Self::Int1024 => 1024,
            Self::Int4096 => 4096,
        }
    }
}

/// A single BIOS command as issued by the control loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BiosCommandRequest {
    command: u32,
    opcode: u32,
    expected_reply_size: u32,
    payload: Vec<u8>,
}

impl BiosCommandRequest {
    pub fn new(command: u32, opcode: u32, expected_reply_size: u32, payload: Option<&[u8]>) -> Self {
        Self {
            command,
            opcode,
            expected_reply_size,
            payload: payload.map(<[u8]>::to_vec).unwrap_or_default(),
        }
    }

    pub fn command(&self) -> u32 {
        self.command
    }

    pub fn opcode(&self) -> u32 {
        self.opcode
    }

    pub fn expected_reply_size(&self) -> u32 {
        self.expected_reply_size
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Method slot for this request's reply size
    pub fn method(&self) -> Result<BiosMethod> {
        BiosMethod::for_reply_size(self.expected_reply_size)
    }

    /// Build the `hpqBDataIn` record sent to the firmware
    pub fn to_data_in(&self) -> BiosDataIn {
        BiosDataIn {
            command: self.command,
            command_type: self.opcode,
            sign: SIGNATURE,
            // Size describes the payload, not the reply slot.
            size: self.payload.len() as u32,
            data: self.payload.clone(),
        }
    }
}

/// Wire layout of `hpqBDataIn`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BiosDataIn {
    pub command: u32,
    pub command_type: u32,
    pub sign: [u8; 4],
    pub data: Vec<u8>,
    pub size: u32,
}

/// Decoded `hpqBDataOut` reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BiosCommandResponse {
    /// Class name reported by the provider
    pub original_data_type: String,
    pub active: Option<bool>,
    pub data: Option<Vec<u8>>,
    pub instance_name: String,
    pub return_code: u32,
    pub signature: Vec<u8>,
}

impl BiosCommandResponse {
    /// Returned data, empty when the firmware sent none
    pub fn data(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    pub fn signature_matches(&self) -> bool {
        self.signature == SIGNATURE
    }
}
