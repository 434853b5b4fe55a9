//! Keepalive task
//!
//! Sends the configured payload at a fixed interval while a binding is live.
//! A failed send is logged and the next tick tries again; loss of the
//! connection itself is detected by the read loop, not here.

use crate::transport::LinkWriter;
use std::sync::Arc;
use tether_core::{log_trace, log_warn, HeartbeatConfig};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Handle to a running keepalive task
///
/// Stopping consumes the handle, so a task can be stopped at most once.
#[derive(Debug)]
pub struct Heartbeat {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Heartbeat {
    /// Start sending keepalives through `writer`, or `None` when disabled
    pub fn start(writer: Arc<dyn LinkWriter>, config: &HeartbeatConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }

        let (stop, mut stopped) = oneshot::channel();
        let interval = config.interval;
        let payload = config.payload.clone();

        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        match writer.send_text(payload.clone()).await {
                            Ok(()) => {
                                log_trace!("keepalive sent");
                                #[cfg(feature = "metrics")]
                                metrics::counter!("tether_client_heartbeats_total").increment(1);
                            }
                            Err(e) => {
                                log_warn!("keepalive send failed: {}", e);
                            }
                        }
                    }
                }
            }
        });

        Some(Self { stop, task })
    }

    /// Signal the task to stop without waiting for it
    pub fn cancel(self) {
        let _ = self.stop.send(());
    }

    /// Stop the task and wait until it can no longer send
    pub async fn stop(self) {
        // an Err means the task already exited
        let _ = self.stop.send(());
        let _ = self.task.await;
    }
}
