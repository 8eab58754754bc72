//! Daemon wiring: host lifetime, cooling worker and shutdown

use crate::{
    channel::FirmwareCommandChannel,
    cooling::{CoolingControlLoop, CoolingPolicy},
    errors::{Result, ThermalError},
    host::HostLifetime,
    provider::FirmwareProvider,
};
use log::{debug, info, warn};
use std::future::{self, Future};
use std::io;
use tokio::task::LocalSet;

/// Provider backing the daemon on this target
#[cfg(target_os = "windows")]
pub type PlatformProvider = crate::wmi::WmiProvider;
#[cfg(not(target_os = "windows"))]
pub type PlatformProvider = crate::provider::UnsupportedPlatform;

/// Main daemon structure
pub struct ThermalDaemon<P: FirmwareProvider> {
    provider: P,
    policy: CoolingPolicy,
    lifetime: HostLifetime,
}

impl ThermalDaemon<PlatformProvider> {
    /// Create a daemon talking to this machine's BIOS
    pub fn new(policy: CoolingPolicy) -> Self {
        Self::with_provider(PlatformProvider::default(), policy)
    }
}

impl<P: FirmwareProvider + 'static> ThermalDaemon<P> {
    pub fn with_provider(provider: P, policy: CoolingPolicy) -> Self {
        Self {
            provider,
            policy,
            lifetime: HostLifetime::new(),
        }
    }

    /// Lifetime handle, usable to stop the daemon from elsewhere
    pub fn lifetime(&self) -> HostLifetime {
        self.lifetime.clone()
    }

    /// Run the daemon until the cooling loop ends or Ctrl-C is received.
    ///
    /// Returns the loop's failure, if any, so the process can exit non-zero.
    pub async fn run(self) -> Result<()> {
        self.run_until_signal(tokio::signal::ctrl_c()).await
    }

    /// Like [`run`](Self::run), with `shutdown` standing in for Ctrl-C.
    ///
    /// A `shutdown` that resolves to an error is not a stop request: the
    /// daemon keeps running until the loop ends or the lifetime is stopped.
    pub async fn run_until_signal<S>(self, shutdown: S) -> Result<()>
    where
        S: Future<Output = io::Result<()>>,
    {
        info!("Starting thermal daemon with {:?}", self.policy);

        let lifetime = self.lifetime;
        let channel = FirmwareCommandChannel::new(self.provider);
        let cooling = CoolingControlLoop::new(channel, self.policy);

        let shutdown = async {
            match shutdown.await {
                Ok(()) => info!("Application is shutting down..."),
                Err(e) => {
                    warn!("Failed to listen for Ctrl+C, only a loop failure will stop the daemon: {}", e);
                    future::pending::<()>().await;
                }
            }
        };

        // Provider handles are not Send, so the worker stays on this thread.
        let local = LocalSet::new();
        local
            .run_until(async move {
                let worker = tokio::task::spawn_local(cooling.run_hosted(lifetime.clone()));

                lifetime.notify_started();
                info!("Application started. Press Ctrl+C to shut down.");

                tokio::select! {
                    _ = lifetime.stopping() => debug!("Cooling loop requested shutdown"),
                    _ = shutdown => lifetime.request_stop(),
                }

                let outcome = worker
                    .await
                    .map_err(|e| ThermalError::Worker(e.to_string()))?;
                info!("Thermal daemon stopped");
                outcome
            })
            .await
    }
}
