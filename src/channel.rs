//! Request/response channel to the HP BIOS

use crate::bios::{
    BiosCommandRequest, BiosCommandResponse, STATUS_COMMAND_NOT_SUPPORTED,
    STATUS_PAYLOAD_TOO_SMALL,
};
use crate::errors::{Result, ThermalError};
use crate::provider::{BiosOutput, FirmwareProvider, FirmwareSession};
use log::{debug, warn};

/// Issues BIOS commands over a lazily opened provider session.
///
/// One command is in flight at a time; `invoke` takes `&mut self`, so sharing
/// a channel between tasks needs a lock around it.
pub struct FirmwareCommandChannel<P: FirmwareProvider> {
    provider: P,
    session: Option<P::Session>,
}

impl<P: FirmwareProvider> FirmwareCommandChannel<P> {
    /// Create a channel; no session is opened until the first command
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            session: None,
        }
    }

    /// Whether a session has been established
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn session(&mut self) -> Result<&mut P::Session> {
        let session = match self.session.take() {
            Some(session) => session,
            None => {
                debug!("Opening BIOS WMI session");
                let session = self.provider.open_session()?;
                debug!("BIOS WMI session established");
                session
            }
        };
        Ok(self.session.insert(session))
    }

    /// Invoke a BIOS command and decode the firmware's reply.
    ///
    /// Status codes 3 and 5 are failures; every other code is handed back to
    /// the caller. A reply whose data length differs from
    /// `expected_reply_size` is logged and still returned.
    pub fn invoke(
        &mut self,
        command: u32,
        opcode: u32,
        expected_reply_size: u32,
        payload: Option<&[u8]>,
    ) -> Result<BiosCommandResponse> {
        let request = BiosCommandRequest::new(command, opcode, expected_reply_size, payload);
        self.send(&request)
    }

    /// Same as [`invoke`](Self::invoke) for a prebuilt request
    pub fn send(&mut self, request: &BiosCommandRequest) -> Result<BiosCommandResponse> {
        let method = request.method()?;
        let data_in = request.to_data_in();
        let session = self.session()?;

        debug!(
            "Invoking {} (command {}, opcode {}, {} payload bytes)",
            method.name(),
            request.command(),
            request.opcode(),
            data_in.size
        );

        // Dropping `out_data` releases the provider object on every path.
        let out_data = session
            .invoke(method, &data_in)?
            .ok_or(ThermalError::FirmwareUnresponsive {
                command: request.command(),
                opcode: request.opcode(),
            })?;

        decode(request, &out_data)
    }

    /// Release the session. Dropping the channel has the same effect.
    pub fn close(&mut self) {
        if self.session.take().is_some() {
            debug!("BIOS WMI session released");
        }
    }
}

fn decode<O: BiosOutput>(request: &BiosCommandRequest, out_data: &O) -> Result<BiosCommandResponse> {
    let return_code = out_data.return_code()?;
    match return_code {
        STATUS_COMMAND_NOT_SUPPORTED => {
            return Err(ThermalError::CommandNotSupported {
                command: request.command(),
                opcode: request.opcode(),
            })
        }
        STATUS_PAYLOAD_TOO_SMALL => {
            return Err(ThermalError::PayloadTooSmall {
                command: request.command(),
                opcode: request.opcode(),
            })
        }
        _ => {}
    }

    let response = BiosCommandResponse {
        original_data_type: out_data.class_name()?,
        active: out_data.active()?,
        data: out_data.data()?,
        instance_name: out_data.instance_name()?,
        return_code,
        signature: out_data.signature()?,
    };

    if let Some(data) = &response.data {
        if data.len() != request.expected_reply_size() as usize {
            warn!(
                "Opcode {}: {}",
                request.opcode(),
                ThermalError::ReplySizeMismatch {
                    expected: request.expected_reply_size(),
                    actual: data.len(),
                }
            );
        }
    }
    if !response.signature_matches() {
        debug!(
            "Opcode {}: reply signature {:?} does not echo SECU",
            request.opcode(),
            response.signature
        );
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bios::{opcode, BiosMethod, THERMAL_COMMAND};
    use crate::logging::capture;
    use crate::provider::fake::{FakeProvider, FakeReply};
    use log::Level;

    fn channel() -> (FakeProvider, FirmwareCommandChannel<FakeProvider>) {
        let provider = FakeProvider::new();
        (provider.clone(), FirmwareCommandChannel::new(provider))
    }

    #[test]
    fn test_session_opened_lazily_and_reused() {
        let (provider, mut channel) = channel();
        assert!(!channel.is_connected());
        assert_eq!(provider.state().opens, 0);

        channel.invoke(THERMAL_COMMAND, opcode::SET_FAN_MODE, 0, Some(&[255, 96])).unwrap();
        channel.invoke(THERMAL_COMMAND, opcode::SET_FAN_SPEED, 0, Some(&[100, 100])).unwrap();

        assert!(channel.is_connected());
        assert_eq!(provider.state().opens, 1);
        assert_eq!(provider.state().calls.len(), 2);
    }

    #[test]
    fn test_session_failure_propagates_and_retries() {
        let (provider, mut channel) = channel();
        provider.fail_next_opens(1);

        let err = channel.invoke(THERMAL_COMMAND, opcode::SET_PL1, 0, None).unwrap_err();
        assert!(matches!(err, ThermalError::SessionEstablishment(_)));
        assert!(!channel.is_connected());
        assert!(provider.state().calls.is_empty());

        channel.invoke(THERMAL_COMMAND, opcode::SET_PL1, 0, None).unwrap();
        assert_eq!(provider.state().opens, 2);
        assert!(channel.is_connected());
    }

    #[test]
    fn test_payload_length_field() {
        let (provider, mut channel) = channel();
        channel.invoke(THERMAL_COMMAND, opcode::SET_GPU_POWER, 0, Some(&[1, 0, 1])).unwrap();
        channel.invoke(THERMAL_COMMAND, opcode::READ_IR_SENSOR, 4, None).unwrap();

        let state = provider.state();
        let (method, first) = &state.calls[0];
        assert_eq!(*method, BiosMethod::Int0);
        assert_eq!(first.size, 3);
        assert_eq!(first.data, vec![1, 0, 1]);

        let (method, second) = &state.calls[1];
        assert_eq!(*method, BiosMethod::Int4);
        assert_eq!(second.size, 0);
        assert!(second.data.is_empty());
    }

    #[test]
    fn test_status_3_is_command_not_supported() {
        let (provider, mut channel) = channel();
        provider.reply(opcode::SET_GPU_POWER, FakeReply::status(3));

        let err = channel
            .invoke(THERMAL_COMMAND, opcode::SET_GPU_POWER, 0, Some(&[1, 0, 1]))
            .unwrap_err();
        assert_eq!(
            err,
            ThermalError::CommandNotSupported {
                command: THERMAL_COMMAND,
                opcode: opcode::SET_GPU_POWER
            }
        );
    }

    #[test]
    fn test_status_5_is_payload_too_small() {
        let (provider, mut channel) = channel();
        provider.reply(opcode::SET_PL1, FakeReply::status(5));

        let err = channel.invoke(THERMAL_COMMAND, opcode::SET_PL1, 0, Some(&[0x40])).unwrap_err();
        assert!(matches!(err, ThermalError::PayloadTooSmall { opcode: 41, .. }));
    }

    #[test]
    fn test_other_status_codes_pass_through_verbatim() {
        let (provider, mut channel) = channel();
        let reply = FakeReply {
            class_name: "hpqBDataOut128".to_string(),
            active: None,
            data: Some(vec![9, 8, 7, 6]),
            instance_name: "ACPI\\PNP0C14\\0_1".to_string(),
            return_code: 4,
            signature: b"XXXX".to_vec(),
        };
        provider.reply(opcode::READ_IR_SENSOR, reply.clone());

        let response = channel.invoke(THERMAL_COMMAND, opcode::READ_IR_SENSOR, 4, None).unwrap();
        assert_eq!(response.original_data_type, reply.class_name);
        assert_eq!(response.active, None);
        assert_eq!(response.data, reply.data);
        assert_eq!(response.instance_name, reply.instance_name);
        assert_eq!(response.return_code, 4);
        assert_eq!(response.signature, reply.signature);
    }

    #[test]
    fn test_missing_output_is_unresponsive() {
        for size in [0, 4, 128] {
            let (provider, mut channel) = channel();
            provider.no_output(opcode::READ_IR_SENSOR);

            let err = channel.invoke(THERMAL_COMMAND, opcode::READ_IR_SENSOR, size, None).unwrap_err();
            assert!(matches!(err, ThermalError::FirmwareUnresponsive { opcode: 35, .. }));
        }
    }

    #[test]
    fn test_size_mismatch_is_not_fatal() {
        let (provider, mut channel) = channel();
        provider.reply(
            opcode::READ_IR_SENSOR,
            FakeReply::status(0).with_data(Some(vec![42, 0])),
        );

        capture::start();
        let response = channel.invoke(THERMAL_COMMAND, opcode::READ_IR_SENSOR, 4, None).unwrap();
        assert_eq!(response.data(), &[42, 0]);

        let warnings = capture::at(Level::Warn);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Opcode 35"));
        assert!(warnings[0].contains("returned 2 data bytes, expected 4"));
    }

    #[test]
    fn test_matching_reply_size_logs_no_warning() {
        let (provider, mut channel) = channel();
        provider.reply(
            opcode::READ_IR_SENSOR,
            FakeReply::status(0).with_data(Some(vec![42, 0, 0, 0])),
        );

        capture::start();
        channel.invoke(THERMAL_COMMAND, opcode::READ_IR_SENSOR, 4, None).unwrap();
        assert!(capture::at(Level::Warn).is_empty());
    }

    #[test]
    fn test_unsupported_reply_size_never_reaches_provider() {
        let (provider, mut channel) = channel();
        let err = channel.invoke(THERMAL_COMMAND, opcode::READ_IR_SENSOR, 3, None).unwrap_err();
        assert_eq!(err, ThermalError::UnsupportedReplySize(3));
        assert_eq!(provider.state().opens, 0);
    }

    #[test]
    fn test_set_pl1_round_trip() {
        let (provider, mut channel) = channel();
        provider.reply(opcode::SET_PL1, FakeReply::status(0));

        let response = channel
            .invoke(131080, 41, 0, Some(&[0x40, 45, 0, 0]))
            .unwrap();
        assert_eq!(response.return_code, 0);
        assert!(response.data().is_empty());
    }

    #[test]
    fn test_read_sensor_returns_first_byte() {
        let (provider, mut channel) = channel();
        provider.reply(
            opcode::READ_IR_SENSOR,
            FakeReply::status(0).with_data(Some(vec![42, 0, 0, 0])),
        );

        let response = channel.invoke(131080, 35, 4, None).unwrap();
        assert_eq!(response.data()[0], 42);
    }

    #[test]
    fn test_output_released_once_on_every_path() {
        let (provider, mut channel) = channel();
        provider.reply(opcode::SET_GPU_POWER, FakeReply::status(3));
        provider.reply(opcode::SET_PL1, FakeReply::status(5));

        channel.invoke(THERMAL_COMMAND, opcode::SET_FAN_MODE, 0, Some(&[255, 96])).unwrap();
        channel.invoke(THERMAL_COMMAND, opcode::SET_GPU_POWER, 0, Some(&[1, 0, 1])).unwrap_err();
        channel.invoke(THERMAL_COMMAND, opcode::SET_PL1, 0, Some(&[0x40])).unwrap_err();

        let state = provider.state();
        assert_eq!(state.outputs_created, 3);
        assert_eq!(state.releases, 3);
        assert_eq!(state.in_flight, 0);
        assert!(!state.overlapped);
    }

    #[test]
    fn test_close_releases_session() {
        let (provider, mut channel) = channel();
        channel.invoke(THERMAL_COMMAND, opcode::SET_FAN_MODE, 0, Some(&[255, 96])).unwrap();

        channel.close();
        assert!(!channel.is_connected());
        assert_eq!(provider.state().sessions_dropped, 1);

        channel.invoke(THERMAL_COMMAND, opcode::SET_FAN_MODE, 0, Some(&[255, 96])).unwrap();
        assert_eq!(provider.state().opens, 2);

        drop(channel);
        assert_eq!(provider.state().sessions_dropped, 2);
    }
}
