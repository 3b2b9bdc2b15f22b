//! Telemetry dispatch - location reports and alerts off the hot path
//!
//! The engine enqueues requests via `try_send` and never waits on the network.
//! The worker starts requests strictly in enqueue order: each one is polled
//! until it first suspends before the next is dequeued, then finishes in its
//! own task so a slow backend never delays the next request. There is no
//! retry: failures are logged, counted, and dropped. The next position
//! produces a fresh report of the current state anyway.

use crate::domain::types::{Position, TransitionEvent, TransitionKind, UserId, ZoneStatus};
use crate::infra::metrics::Metrics;
use crate::io::backend::{AlertReport, BackendError, LocationReport, TelemetrySink};
use std::future::{poll_fn, Future};
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Log a failed dispatch (cold path)
#[cold]
fn log_dispatch_failed(kind: &'static str, user_id: UserId, e: &BackendError) {
    warn!(kind = kind, user_id = %user_id, error = %e, "telemetry_send_failed");
}

/// A request waiting to be issued by the worker
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryCmd {
    Location(LocationReport),
    Alert(AlertReport),
}

impl TelemetryCmd {
    pub fn kind(&self) -> &'static str {
        match self {
            TelemetryCmd::Location(_) => "location",
            TelemetryCmd::Alert(_) => "alert",
        }
    }
}

/// Sender half held by the engine
///
/// Non-blocking - if the queue is full, the request is dropped.
#[derive(Clone)]
pub struct TelemetryDispatcher {
    tx: mpsc::Sender<TelemetryCmd>,
    metrics: Arc<Metrics>,
}

impl TelemetryDispatcher {
    pub fn new(tx: mpsc::Sender<TelemetryCmd>, metrics: Arc<Metrics>) -> Self {
        Self { tx, metrics }
    }

    /// Queue a report of the latest position and classification
    pub fn report_location(&self, user_id: UserId, position: &Position, status: &ZoneStatus) {
        let report = LocationReport::new(user_id, position, status);
        if !self.enqueue(TelemetryCmd::Location(report)) {
            self.metrics.record_location_report_dropped();
        }
    }

    /// Queue an alert for a transition.
    ///
    /// Only exits go over the wire; the backend infers entries from the
    /// location stream.
    pub fn report_transition(&self, user_id: UserId, event: &TransitionEvent) {
        match event.kind {
            TransitionKind::Entered => {
                debug!(user_id = %user_id, "telemetry_entry_not_sent");
            }
            TransitionKind::Exited => {
                let alert = AlertReport::exit(user_id, event);
                if !self.enqueue(TelemetryCmd::Alert(alert)) {
                    self.metrics.record_alert_dropped();
                }
            }
        }
    }

    fn enqueue(&self, cmd: TelemetryCmd) -> bool {
        let kind = cmd.kind();
        match self.tx.try_send(cmd) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(kind = kind, "telemetry_dropped: queue full");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(kind = kind, "telemetry_dropped: worker stopped");
                false
            }
        }
    }

    /// Current queue depth (for metrics)
    pub fn queue_depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Worker that issues queued requests against the sink
pub struct TelemetryWorker {
    sink: Arc<dyn TelemetrySink>,
    rx: mpsc::Receiver<TelemetryCmd>,
    metrics: Arc<Metrics>,
}

impl TelemetryWorker {
    pub fn new(
        sink: Arc<dyn TelemetrySink>,
        rx: mpsc::Receiver<TelemetryCmd>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { sink, rx, metrics }
    }

    /// Run until the queue closes or shutdown is signalled.
    ///
    /// On shutdown, in-flight requests are aborted. When the queue simply
    /// closes, in-flight requests are allowed to finish.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("telemetry_worker_started");
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            let sink = self.sink.clone();
                            let metrics = self.metrics.clone();
                            let request = Box::pin(dispatch(sink, metrics, cmd, Instant::now()));
                            if let Some(pending) = start(request).await {
                                in_flight.spawn(pending);
                            }
                        }
                        None => {
                            while in_flight.join_next().await.is_some() {}
                            break;
                        }
                    }
                }
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        in_flight.shutdown().await;
                        break;
                    }
                }
            }
        }

        info!("telemetry_worker_stopped");
    }

    /// Pull everything currently queued without issuing it
    #[cfg(test)]
    pub(crate) fn drain_queued(&mut self) -> Vec<TelemetryCmd> {
        let mut out = Vec::new();
        while let Ok(cmd) = self.rx.try_recv() {
            out.push(cmd);
        }
        out
    }
}

/// Poll a request once so it is issued before anything queued behind it.
///
/// Returns the request if it has not finished yet.
async fn start<F>(mut request: Pin<Box<F>>) -> Option<Pin<Box<F>>>
where
    F: Future<Output = ()>,
{
    let first = poll_fn(|cx| Poll::Ready(request.as_mut().poll(cx))).await;
    first.is_pending().then_some(request)
}

async fn dispatch(
    sink: Arc<dyn TelemetrySink>,
    metrics: Arc<Metrics>,
    cmd: TelemetryCmd,
    issued_at: Instant,
) {
    match cmd {
        TelemetryCmd::Location(report) => {
            let result = sink.send_location(&report).await;
            metrics.record_location_report(result.is_ok());
            match result {
                Ok(()) => debug!(
                    user_id = %report.user_id,
                    inside_zone = ?report.inside_zone,
                    latency_us = %issued_at.elapsed().as_micros(),
                    "location_report_sent"
                ),
                Err(e) => log_dispatch_failed("location", report.user_id, &e),
            }
        }
        TelemetryCmd::Alert(alert) => {
            let result = sink.send_alert(&alert).await;
            metrics.record_alert(result.is_ok());
            match result {
                Ok(()) => info!(
                    user_id = %alert.user_id,
                    latitude = %alert.latitude,
                    longitude = %alert.longitude,
                    latency_us = %issued_at.elapsed().as_micros(),
                    "exit_alert_sent"
                ),
                Err(e) => log_dispatch_failed("alert", alert.user_id, &e),
            }
        }
    }
}

/// Create a dispatcher and its worker
///
/// Returns the sender (for the engine) and the worker (to be spawned)
pub fn create_telemetry_dispatcher(
    sink: Arc<dyn TelemetrySink>,
    metrics: Arc<Metrics>,
    queue_size: usize,
) -> (TelemetryDispatcher, TelemetryWorker) {
    let (tx, rx) = mpsc::channel(queue_size.max(1));
    let dispatcher = TelemetryDispatcher::new(tx, metrics.clone());
    let worker = TelemetryWorker::new(sink, rx, metrics);
    (dispatcher, worker)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Sink that records every request and optionally fails them
    #[derive(Default)]
    pub struct RecordingSink {
        pub sent: Mutex<Vec<TelemetryCmd>>,
        pub fail: bool,
    }

    impl RecordingSink {
        pub fn failing() -> Self {
            Self { sent: Mutex::new(Vec::new()), fail: true }
        }

        pub fn sent(&self) -> Vec<TelemetryCmd> {
            self.sent.lock().clone()
        }

        fn outcome(&self) -> Result<(), BackendError> {
            if self.fail {
                Err(BackendError::Status(503))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl TelemetrySink for RecordingSink {
        async fn send_location(&self, report: &LocationReport) -> Result<(), BackendError> {
            self.sent.lock().push(TelemetryCmd::Location(report.clone()));
            self.outcome()
        }

        async fn send_alert(&self, alert: &AlertReport) -> Result<(), BackendError> {
            self.sent.lock().push(TelemetryCmd::Alert(alert.clone()));
            self.outcome()
        }
    }
}
