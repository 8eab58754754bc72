//! Seams between the command channel and the management provider
//!
//! The channel only needs three things from WMI: a way to open a session,
//! a way to run one `hpqBIOSInt*` method on it, and read access to the fields
//! of the returned `OutData` object. Output objects are provider handles and
//! are released when dropped.

use crate::bios::{BiosDataIn, BiosMethod};
use crate::errors::{Result, ThermalError};

/// Opens sessions to the BIOS management provider
pub trait FirmwareProvider {
    type Session: FirmwareSession;

    /// Connect to the provider and resolve the `hpqBIntM` instance
    fn open_session(&self) -> Result<Self::Session>;
}

/// An open session bound to the firmware method instance
pub trait FirmwareSession {
    type Output: BiosOutput;

    /// Run `method` with `input` as the `InData` parameter.
    ///
    /// `Ok(None)` means the call went through but the provider produced no
    /// `OutData` object.
    fn invoke(&mut self, method: BiosMethod, input: &BiosDataIn) -> Result<Option<Self::Output>>;
}

/// Field access on an `OutData` object
pub trait BiosOutput {
    fn class_name(&self) -> Result<String>;
    fn return_code(&self) -> Result<u32>;
    fn active(&self) -> Result<Option<bool>>;
    fn data(&self) -> Result<Option<Vec<u8>>>;
    fn instance_name(&self) -> Result<String>;
    fn signature(&self) -> Result<Vec<u8>>;
}

/// Provider for targets without the HP BIOS WMI interface
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedPlatform;

/// Uninhabited session and output type of [`UnsupportedPlatform`]
#[derive(Debug)]
pub enum NoSession {}

impl FirmwareProvider for UnsupportedPlatform {
    type Session = NoSession;

    fn open_session(&self) -> Result<NoSession> {
        Err(ThermalError::SessionEstablishment(format!(
            "the HP BIOS WMI interface is not available on {}",
            std::env::consts::OS
        )))
    }
}

impl FirmwareSession for NoSession {
    type Output = NoSession;

    fn invoke(&mut self, _method: BiosMethod, _input: &BiosDataIn) -> Result<Option<NoSession>> {
        match *self {}
    }
}

impl BiosOutput for NoSession {
    fn class_name(&self) -> Result<String> {
        match *self {}
    }

    fn return_code(&self) -> Result<u32> {
        match *self {}
    }

    fn active(&self) -> Result<Option<bool>> {
        match *self {}
    }

    fn data(&self) -> Result<Option<Vec<u8>>> {
        match *self {}
    }

    fn instance_name(&self) -> Result<String> {
        match *self {}
    }

    fn signature(&self) -> Result<Vec<u8>> {
        match *self {}
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_platform_refuses_session() {
        match UnsupportedPlatform.open_session() {
            Err(ThermalError::SessionEstablishment(msg)) => assert!(msg.contains("not available")),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
