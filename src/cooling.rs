//! Periodic reapplication of the power and fan policy

use crate::bios::{opcode, THERMAL_COMMAND};
use crate::channel::FirmwareCommandChannel;
use crate::errors::{Result, ThermalError};
use crate::host::HostLifetime;
use crate::provider::FirmwareProvider;
use log::{debug, error, info};
use std::time::Duration;
use tokio::time::sleep;

/// Fan mode value selecting the firmware's maximum cooling override
pub const FAN_MODE_PAYLOAD: [u8; 2] = [255, 96];
/// Both fan channels at 100 %
pub const FAN_SPEED_MAX_PAYLOAD: [u8; 2] = [100, 100];

const PL1_SELECTOR: u8 = 0x40;

/// Discrete GPU power envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuPowerMode {
    Max,
    Min,
}

impl GpuPowerMode {
    pub fn payload(self) -> [u8; 3] {
        match self {
            Self::Max => [1, 0, 1],
            Self::Min => [0, 0, 1],
        }
    }
}

/// Limits applied on every iteration, and how often
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoolingPolicy {
    pub pl1_watts: u8,
    pub gpu_power: GpuPowerMode,
    pub interval: Duration,
}

impl CoolingPolicy {
    /// 45 W PL1, full GPU power, reapplied every 5 seconds
    pub const fn performance() -> Self {
        Self {
            pl1_watts: 45,
            gpu_power: GpuPowerMode::Max,
            interval: Duration::from_secs(5),
        }
    }

    /// 45 W PL1, minimum GPU power, reapplied every 30 seconds
    pub const fn gpu_saver() -> Self {
        Self {
            pl1_watts: 45,
            gpu_power: GpuPowerMode::Min,
            interval: Duration::from_secs(30),
        }
    }
}

impl Default for CoolingPolicy {
    fn default() -> Self {
        Self::performance()
    }
}

/// Drives the fixed command sequence against the firmware
pub struct CoolingControlLoop<P: FirmwareProvider> {
    channel: FirmwareCommandChannel<P>,
    policy: CoolingPolicy,
}

impl<P: FirmwareProvider> CoolingControlLoop<P> {
    pub fn new(channel: FirmwareCommandChannel<P>, policy: CoolingPolicy) -> Self {
        Self { channel, policy }
    }

    pub fn policy(&self) -> &CoolingPolicy {
        &self.policy
    }

    /// Set the sustained CPU power limit (PL1)
    pub fn set_pl1(&mut self, watts: u8) -> Result<()> {
        let payload = [PL1_SELECTOR, watts, 0, 0];
        self.channel
            .invoke(THERMAL_COMMAND, opcode::SET_PL1, 0, Some(&payload))?;
        info!("Set PL1: Done");
        Ok(())
    }

    /// Set the discrete GPU power envelope (TGP)
    pub fn set_gpu_power(&mut self, mode: GpuPowerMode) -> Result<()> {
        let payload = mode.payload();
        self.channel
            .invoke(THERMAL_COMMAND, opcode::SET_GPU_POWER, 0, Some(&payload))?;
        info!("Set TGP: Done");
        Ok(())
    }

    pub fn set_fan_mode(&mut self) -> Result<()> {
        self.channel
            .invoke(THERMAL_COMMAND, opcode::SET_FAN_MODE, 0, Some(&FAN_MODE_PAYLOAD))?;
        info!("Set Fan Mode: Done");
        Ok(())
    }

    pub fn set_fan_speed_max(&mut self) -> Result<()> {
        self.channel
            .invoke(THERMAL_COMMAND, opcode::SET_FAN_SPEED, 0, Some(&FAN_SPEED_MAX_PAYLOAD))?;
        info!("Set Fan: Done");
        Ok(())
    }

    /// Read the IR sensor, in whole degrees Celsius
    pub fn read_ir_temperature(&mut self) -> Result<u8> {
        let response = self
            .channel
            .invoke(THERMAL_COMMAND, opcode::READ_IR_SENSOR, 4, None)?;
        response
            .data()
            .first()
            .copied()
            .ok_or(ThermalError::MissingSensorData)
    }

    /// Apply the policy once and return the IR temperature.
    ///
    /// Later steps assume the earlier ones took effect, so the order is
    /// fixed and the first failure ends the iteration.
    pub fn run_iteration(&mut self) -> Result<u8> {
        self.set_pl1(self.policy.pl1_watts)?;
        self.set_gpu_power(self.policy.gpu_power)?;
        self.set_fan_mode()?;
        self.set_fan_speed_max()?;

        let temperature = self.read_ir_temperature()?;
        info!("IR Temperature: {} C", temperature);
        Ok(temperature)
    }

    /// Wait for host startup, then apply the policy until a stop is requested
    /// between iterations or a step fails.
    pub async fn run(&mut self, lifetime: &HostLifetime) -> Result<()> {
        lifetime.started().await;
        info!("Setting power parameters");

        while !lifetime.is_stopping() {
            self.run_iteration()?;

            tokio::select! {
                _ = sleep(self.policy.interval) => {}
                _ = lifetime.stopping() => break,
            }
        }

        info!("Stop requested, leaving cooling loop");
        Ok(())
    }

    /// Run the loop as the application's worker: any failure is logged and,
    /// whatever the outcome, the session is released and the host is told to
    /// stop.
    pub async fn run_hosted(mut self, lifetime: HostLifetime) -> Result<()> {
        let result = self.run(&lifetime).await;
        if let Err(e) = &result {
            error!("Unhandled exception in cooling loop: {}", e);
            if e.is_firmware_status() {
                error!("The BIOS rejected a command; this policy does not fit this machine");
            }
        }

        self.channel.close();
        debug!("Cooling loop finished, requesting application stop");
        lifetime.request_stop();
        result
    }
}
