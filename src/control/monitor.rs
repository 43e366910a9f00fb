use crate::control::health::HealthMonitor;
use crate::control::resources::ResourceSampler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// How long `stop` waits for the loop to exit before aborting it
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Background task that samples resources and ticks the health monitor
///
/// Runs on its own fixed interval so alerts can fire while no requests are
/// in flight.
pub struct MonitorTask {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl MonitorTask {
    pub fn spawn(
        monitor: Arc<HealthMonitor>,
        sampler: Arc<dyn ResourceSampler>,
        interval: Duration,
    ) -> Self {
        let shutdown = Arc::new(Notify::new());
        let signal = shutdown.clone();

        let handle = tokio::spawn(async move {
            tracing::debug!("Health monitor started, interval {:?}", interval);
            let mut ticker = tokio::time::interval(interval);
            let mut sampling_failed = false;

            loop {
                tokio::select! {
                    _ = signal.notified() => {
                        tracing::debug!("Health monitor stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        match sampler.sample() {
                            Ok(sample) => {
                                monitor.record_resources(sample.memory_mb, sample.cpu_percent);
                            }
                            Err(e) if !sampling_failed => {
                                tracing::warn!("Resource sampling unavailable: {}", e);
                                sampling_failed = true;
                            }
                            Err(_) => {}
                        }
                        monitor.tick();
                    }
                }
            }
        });

        Self { shutdown, handle }
    }

    /// Signals the loop to stop and waits briefly for it to finish
    pub async fn stop(self) {
        let Self {
            shutdown,
            mut handle,
        } = self;
        shutdown.notify_one();

        match tokio::time::timeout(STOP_GRACE, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Health monitor task failed: {}", e),
            Err(_) => {
                tracing::warn!("Health monitor did not stop within {:?}, aborting", STOP_GRACE);
                handle.abort();
            }
        }
    }
}
