//! Snapshot stream replay
//!
//! A stream is one JSON [`SnapshotRecord`] per line. Records without a
//! foreground package are the producer's "no foreground app" signal and are
//! fed to every rule-set as such. Lines that do not parse are logged and
//! skipped.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use tf_core::SnapshotRecord;
use tf_engine::{RuleSetManager, SharedTriggerBus, TriggerEvent};

/// Counters of one replay run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    pub records: usize,
    pub absent: usize,
    pub skipped: usize,
    /// Triggers fired directly by snapshots; delayed fires are not counted
    pub triggers: usize,
}

/// Feed every line of `reader` to all active rule-sets
///
/// `interval` is slept between records so that delay timers get a chance
/// to run the way they would between live snapshots.
pub async fn replay<R>(
    manager: &RuleSetManager,
    reader: R,
    interval: Duration,
) -> std::io::Result<ReplayStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = ReplayStats::default();
    let mut lines = reader.lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let record: SnapshotRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping unparseable snapshot record");
                stats.skipped += 1;
                continue;
            }
        };
        stats.records += 1;

        if record.is_absent() {
            trace!(line = line_no, "No foreground app");
            stats.absent += 1;
            manager.process_absent_all().await;
        } else {
            match record.into_snapshot() {
                Ok(snapshot) => {
                    stats.triggers += manager.process_all(&snapshot).await.len();
                }
                Err(e) => {
                    warn!(line = line_no, error = %e, "Skipping invalid snapshot");
                    stats.skipped += 1;
                }
            }
        }

        if !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }

    debug!(?stats, "Replay finished");
    Ok(stats)
}

/// Writes every trigger on the bus to the log and, as JSON, to stdout
pub struct TriggerLogger {
    bus: SharedTriggerBus,
    shutdown: CancellationToken,
}

impl TriggerLogger {
    pub fn new(bus: SharedTriggerBus) -> Self {
        Self {
            bus,
            shutdown: CancellationToken::new(),
        }
    }

    /// Start listening; the task ends on [`TriggerLogger::stop`] or when the
    /// bus goes away, and returns the number of events seen
    pub fn start(&self) -> JoinHandle<usize> {
        self.start_with(|event| match serde_json::to_string(event) {
            Ok(json) => println!("{}", json),
            Err(e) => warn!(error = %e, "Failed to serialize trigger event"),
        })
    }

    fn start_with<F>(&self, sink: F) -> JoinHandle<usize>
    where
        F: Fn(&TriggerEvent) + Send + 'static,
    {
        let mut rx = self.bus.subscribe();
        let shutdown = self.shutdown.clone();
        let capacity = self.bus.capacity();

        tokio::spawn(async move {
            let mut seen = 0usize;
            loop {
                tokio::select! {
                    result = rx.recv() => match result {
                        Ok(event) => {
                            seen += 1;
                            info!(
                                rule_set = %event.rule_set_id,
                                rule = %event.rule_name,
                                group = %event.rule_group,
                                via_delay = event.via_delay,
                                "Trigger"
                            );
                            sink(&event);
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(capacity, "Trigger logger lagged by {} events", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = shutdown.cancelled() => {
                        // Flush what is already queued
                        while let Ok(event) = rx.try_recv() {
                            seen += 1;
                            sink(&event);
                        }
                        break;
                    }
                }
            }
            seen
        })
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

/// Build a manager publishing to `bus`
pub fn manager_for(bus: &SharedTriggerBus) -> RuleSetManager {
    RuleSetManager::new(Arc::clone(bus) as Arc<dyn tf_engine::Dispatcher>)
}
