//! Background tasks for the pbxwatch server.
//!
//! Includes:
//! - The ingestion supervisor: connect, log in, bootstrap, feed every event
//!   to the normalizer, reconnect with exponential backoff.
//! - The reconciliation sweep ticker.

use std::sync::Arc;
use std::time::Duration;

use pbxwatch_ami::{
    run_bootstrap, AmiError, BootstrapPlan, ConnectOptions, EventStream, ManagerClient,
};
use pbxwatch_monitor::{sweep, Normalizer};

/// Reconnect delay that doubles on each consecutive failure.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        Self {
            initial,
            max: max.max(initial),
            current: initial,
        }
    }

    /// Returns the delay to wait now and doubles the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Starts over from the initial delay.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Settings for [`run_ingestion`].
#[derive(Debug, Clone)]
pub struct IngestionSettings {
    pub connect: ConnectOptions,
    pub bootstrap: BootstrapPlan,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
}

/// Keeps one manager connection alive for the life of the process and
/// feeds its events to the normalizer in wire order.
pub async fn run_ingestion(
    client: ManagerClient,
    normalizer: Arc<Normalizer>,
    settings: IngestionSettings,
) {
    let mut backoff = Backoff::new(settings.reconnect_initial, settings.reconnect_max);
    loop {
        match client.connect(&settings.connect).await {
            Ok(stream) => {
                normalizer.begin_session();
                let bootstrap = {
                    let client = client.clone();
                    let plan = settings.bootstrap;
                    tokio::spawn(async move {
                        if let Err(e) = run_bootstrap(&client, plan).await {
                            tracing::warn!(error = %e, "bootstrap queries failed");
                        }
                    })
                };

                let outcome = pump(stream, &normalizer, &mut backoff).await;
                bootstrap.abort();
                client.disconnect().await;
                match outcome {
                    Ok(()) => tracing::warn!("manager interface closed the connection"),
                    Err(AmiError::Authentication(message)) => {
                        tracing::error!(reason = %message, "manager interface rejected login");
                    }
                    Err(e) => tracing::warn!(error = %e, "manager interface read failed"),
                }
            }
            Err(e) => {
                tracing::warn!(
                    addr = %settings.connect.addr,
                    error = %e,
                    "manager interface connect failed"
                );
            }
        }

        let delay = backoff.next_delay();
        tracing::info!(delay_ms = delay.as_millis() as u64, "reconnecting to manager interface");
        tokio::time::sleep(delay).await;
    }
}

/// Reads events until the stream ends, applying each one before reading the
/// next. The backoff is reset once the first event arrives, which means the
/// login was accepted.
async fn pump(
    mut stream: EventStream,
    normalizer: &Arc<Normalizer>,
    backoff: &mut Backoff,
) -> Result<(), AmiError> {
    let mut first = true;
    while let Some(record) = stream.next_event().await? {
        if first {
            backoff.reset();
            first = false;
        }
        let normalizer = normalizer.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || normalizer.handle(&record)).await {
            tracing::error!("event handling task failed: {}", e);
        }
    }
    Ok(())
}

/// Starts the reconciliation sweep.
///
/// This task runs indefinitely, requesting a channel enumeration every
/// `interval_secs`; stale calls are removed when the enumeration completes
/// on the ingestion path.
pub async fn start_sweep_task(
    client: ManagerClient,
    normalizer: Arc<Normalizer>,
    interval_secs: u64,
) {
    if interval_secs == 0 {
        tracing::warn!("reconciliation sweep disabled (interval=0)");
        return;
    }

    tracing::info!(interval_secs, "starting reconciliation sweep");
    sweep::run_sweep(client, normalizer, Duration::from_secs(interval_secs)).await;
}
