//! Notification dispatch: rate limiting, link resolution, publishing.
//!
//! The gate check runs before anything else. A suppressed alert must cost
//! nothing: no archive traffic, no publish. Because link resolution can
//! block for the whole retry budget, dispatch runs on a single background
//! worker; detections arriving while it is busy are dropped, not queued,
//! since the gate would suppress them anyway.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::detection::DetectionEvent;
use crate::error::LookoutError;
use crate::gate::{GateStore, SendGate};
use crate::labels::Label;
use crate::resolver::{ArchiveClient, LinkResolver};
use crate::retry::Clock;

const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Outbound notification channel. Publish failures are logged and dropped;
/// the send gate has already been stamped by the time publishing happens.
pub trait AlertChannel: Send + Sync {
    fn publish(&self, alert: &Alert) -> Result<(), String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub topic: String,
    pub subject: String,
    pub body: String,
}

/// Builds the alert body. The link may be empty when resolution exhausted
/// its budget; the alert still goes out.
pub fn alert_body(label: Label, link: &str, description: &str) -> String {
    format!(
        "Detected {}, watch the stream at: {} (trigger: {})",
        label, link, description
    )
}

/// What the dispatcher decided for one detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyDecision {
    Sent,
    Suppressed { seconds_since_last: i64 },
}

impl fmt::Display for NotifyDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyDecision::Sent => f.write_str("sent"),
            NotifyDecision::Suppressed { seconds_since_last } => {
                write!(f, "suppressed ({}s since last send)", seconds_since_last)
            }
        }
    }
}

pub struct Dispatcher<S: GateStore, A: ArchiveClient, C: AlertChannel> {
    gate: SendGate<S>,
    resolver: LinkResolver<A>,
    alerts: C,
    config: PipelineConfig,
}

impl<S: GateStore, A: ArchiveClient, C: AlertChannel> Dispatcher<S, A, C> {
    pub fn new(
        gate: SendGate<S>,
        resolver: LinkResolver<A>,
        alerts: C,
        config: PipelineConfig,
    ) -> Self {
        Self {
            gate,
            resolver,
            alerts,
            config,
        }
    }

    /// Runs the full dispatch decision for one qualifying detection.
    ///
    /// Gate storage failures propagate; everything downstream of the gate
    /// degrades instead (missing link, failed publish both still count as
    /// sent). Only gate errors can abort, because an uncertain gate means
    /// an uncertain rate limit.
    pub fn maybe_notify(
        &self,
        event: &DetectionEvent,
        description: &str,
        clock: &dyn Clock,
        cancel: &AtomicBool,
    ) -> Result<NotifyDecision, LookoutError> {
        let elapsed = self.gate.seconds_since_last_send(clock.now())?;
        if elapsed < self.config.min_notify_interval_secs {
            debug!(
                seconds_since_last = elapsed,
                min_interval = self.config.min_notify_interval_secs,
                "Alert suppressed by send gate"
            );
            return Ok(NotifyDecision::Suppressed {
                seconds_since_last: elapsed,
            });
        }

        let link = self
            .resolver
            .resolve(clock, cancel, Some(event.observed_at))
            .unwrap_or_default();
        let alert = Alert {
            topic: self.config.alert_topic.clone(),
            subject: self.config.alert_subject.clone(),
            body: alert_body(event.label, &link, description),
        };
        match self.alerts.publish(&alert) {
            Ok(()) => info!(
                topic = %alert.topic,
                link_resolved = !link.is_empty(),
                "Alert published"
            ),
            Err(err) => warn!(error = %err, topic = %alert.topic, "Alert publish failed"),
        }
        Ok(NotifyDecision::Sent)
    }
}

/// Dispatch outcome counters, shared with whoever reports status.
#[derive(Debug, Default)]
pub struct DispatchStats {
    sent: AtomicU64,
    suppressed: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchCounts {
    pub sent: u64,
    pub suppressed: u64,
    pub dropped: u64,
    pub failed: u64,
}

impl DispatchStats {
    pub fn counts(&self) -> DispatchCounts {
        DispatchCounts {
            sent: self.sent.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

pub(crate) struct DispatchJob {
    pub(crate) event: DetectionEvent,
    pub(crate) description: String,
}

/// Cheap handle for offering detections to the worker.
#[derive(Clone)]
pub struct DispatchHandle {
    sender: SyncSender<DispatchJob>,
    stats: Arc<DispatchStats>,
}

impl DispatchHandle {
    pub(crate) fn new(sender: SyncSender<DispatchJob>, stats: Arc<DispatchStats>) -> Self {
        Self { sender, stats }
    }

    /// Offers a detection without blocking. Returns whether the worker
    /// accepted it; a busy worker drops the offer.
    pub fn offer(&self, event: DetectionEvent, description: String) -> bool {
        match self.sender.try_send(DispatchJob { event, description }) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(label = %event.label, "Dispatch busy; dropping detection offer");
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("Dispatch worker gone; dropping detection offer");
                false
            }
        }
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }
}

/// Owns the background dispatch thread. One worker per pipeline; the
/// single-slot channel is what serializes notification work.
pub struct DispatchWorker {
    handle: DispatchHandle,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl DispatchWorker {
    pub fn spawn<S, A, C>(dispatcher: Dispatcher<S, A, C>, clock: Arc<dyn Clock>) -> DispatchWorker
    where
        S: GateStore + 'static,
        A: ArchiveClient + 'static,
        C: AlertChannel + 'static,
    {
        let (sender, receiver) = sync_channel::<DispatchJob>(1);
        let cancel = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(DispatchStats::default());

        let worker_cancel = Arc::clone(&cancel);
        let worker_stats = Arc::clone(&stats);
        let worker = thread::spawn(move || {
            run_worker(dispatcher, clock, receiver, worker_cancel, worker_stats);
        });

        DispatchWorker {
            handle: DispatchHandle { sender, stats },
            cancel,
            worker: Some(worker),
        }
    }

    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    /// Requests shutdown and waits for the worker to finish. An in-flight
    /// link resolution notices the cancel flag at its next retry step.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Dispatch worker thread panicked");
            }
        }
    }
}

impl Drop for DispatchWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker<S, A, C>(
    dispatcher: Dispatcher<S, A, C>,
    clock: Arc<dyn Clock>,
    receiver: Receiver<DispatchJob>,
    cancel: Arc<AtomicBool>,
    stats: Arc<DispatchStats>,
) where
    S: GateStore,
    A: ArchiveClient,
    C: AlertChannel,
{
    loop {
        if cancel.load(Ordering::SeqCst) {
            break;
        }
        let job = match receiver.recv_timeout(WORKER_POLL_INTERVAL) {
            Ok(job) => job,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        match dispatcher.maybe_notify(&job.event, &job.description, clock.as_ref(), &cancel) {
            Ok(NotifyDecision::Sent) => {
                stats.sent.fetch_add(1, Ordering::Relaxed);
            }
            Ok(decision @ NotifyDecision::Suppressed { .. }) => {
                debug!(decision = %decision, label = %job.event.label, "Dispatch suppressed");
                stats.suppressed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                // Gate storage failure. The dispatch attempt aborts with no
                // alert; the rate-limit record is not trustworthy.
                error!(error = %err, "Notification dispatch aborted");
                stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    debug!("Dispatch worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::MemoryGateStore;
    use crate::resolver::{ArchiveApi, Fragment, PlaybackRequest, TimeWindow};
    use crate::retry::{ManualClock, SystemClock};
    use chrono::{DateTime, Utc};
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn at(timestamp: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(timestamp)
            .expect("parse timestamp")
            .with_timezone(&Utc)
    }

    fn person(timestamp: &str) -> DetectionEvent {
        DetectionEvent {
            label: Label::Person,
            confidence: 0.9,
            observed_at: at(timestamp),
        }
    }

    #[derive(Clone, Default)]
    struct HealthyArchive {
        endpoint_calls: Arc<Mutex<u32>>,
    }

    impl ArchiveClient for HealthyArchive {
        fn data_endpoint(&self, _api: ArchiveApi, _stream: &str) -> Result<String, String> {
            *self.endpoint_calls.lock().expect("lock") += 1;
            Ok("https://archive.test/data".to_string())
        }

        fn playback_url(
            &self,
            _endpoint: &str,
            stream: &str,
            _request: &PlaybackRequest,
        ) -> Result<String, String> {
            Ok(format!("https://archive.test/hls/{}", stream))
        }

        fn list_fragments(
            &self,
            _endpoint: &str,
            _stream: &str,
            _window: &TimeWindow,
        ) -> Result<Vec<Fragment>, String> {
            Ok(Vec::new())
        }
    }

    #[derive(Clone, Default)]
    struct FailingArchive;

    impl ArchiveClient for FailingArchive {
        fn data_endpoint(&self, _api: ArchiveApi, _stream: &str) -> Result<String, String> {
            Err("archive unreachable".to_string())
        }

        fn playback_url(
            &self,
            _endpoint: &str,
            _stream: &str,
            _request: &PlaybackRequest,
        ) -> Result<String, String> {
            Err("archive unreachable".to_string())
        }

        fn list_fragments(
            &self,
            _endpoint: &str,
            _stream: &str,
            _window: &TimeWindow,
        ) -> Result<Vec<Fragment>, String> {
            Err("archive unreachable".to_string())
        }
    }

    #[derive(Clone, Default)]
    struct CapturingAlerts {
        published: Arc<Mutex<Vec<Alert>>>,
    }

    impl CapturingAlerts {
        fn published(&self) -> Vec<Alert> {
            self.published.lock().expect("lock").clone()
        }
    }

    impl AlertChannel for CapturingAlerts {
        fn publish(&self, alert: &Alert) -> Result<(), String> {
            self.published.lock().expect("lock").push(alert.clone());
            Ok(())
        }
    }

    struct FailingAlerts;

    impl AlertChannel for FailingAlerts {
        fn publish(&self, _alert: &Alert) -> Result<(), String> {
            Err("notification service unavailable".to_string())
        }
    }

    struct FailingGateStore;

    impl GateStore for FailingGateStore {
        fn read(&self) -> crate::error::Result<Option<DateTime<Utc>>> {
            Err(LookoutError::GateRead {
                path: PathBuf::from("/dev/null/gate.json"),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk offline"),
            })
        }

        fn write(&self, _instant: DateTime<Utc>) -> crate::error::Result<()> {
            Ok(())
        }
    }

    fn dispatcher<A: ArchiveClient, C: AlertChannel>(
        archive: A,
        alerts: C,
        config: PipelineConfig,
    ) -> Dispatcher<MemoryGateStore, A, C> {
        Dispatcher::new(
            SendGate::new(MemoryGateStore::new()),
            LinkResolver::new(archive, config.clone()),
            alerts,
            config,
        )
    }

    #[test]
    fn first_alert_sends_with_resolved_link() {
        let alerts = CapturingAlerts::default();
        let dispatcher = dispatcher(
            HealthyArchive::default(),
            alerts.clone(),
            PipelineConfig::default(),
        );
        let clock = ManualClock::starting_at(at("2026-03-01T10:00:00Z"));
        let cancel = AtomicBool::new(false);

        let decision = dispatcher
            .maybe_notify(&person("2026-03-01T10:00:00Z"), "person 0.90", &clock, &cancel)
            .expect("dispatch");
        assert_eq!(decision, NotifyDecision::Sent);

        let published = alerts.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "lookout-alerts");
        assert_eq!(published[0].subject, "Lookout detection alert");
        assert!(published[0]
            .body
            .contains("https://archive.test/hls/LookoutCamera"));
        assert!(published[0].body.contains("person 0.90"));
    }

    #[test]
    fn burst_is_suppressed_without_touching_the_archive() {
        let alerts = CapturingAlerts::default();
        let archive = HealthyArchive::default();
        let dispatcher = dispatcher(archive.clone(), alerts.clone(), PipelineConfig::default());
        let clock = ManualClock::starting_at(at("2026-03-01T10:00:00Z"));
        let cancel = AtomicBool::new(false);

        dispatcher
            .maybe_notify(&person("2026-03-01T10:00:00Z"), "person 0.90", &clock, &cancel)
            .expect("first dispatch");
        let endpoints_after_first = *archive.endpoint_calls.lock().expect("lock");

        clock.advance(Duration::from_secs(5));
        let decision = dispatcher
            .maybe_notify(&person("2026-03-01T10:00:05Z"), "person 0.88", &clock, &cancel)
            .expect("second dispatch");
        assert_eq!(
            decision,
            NotifyDecision::Suppressed {
                seconds_since_last: 5
            }
        );
        assert_eq!(alerts.published().len(), 1);
        assert_eq!(
            *archive.endpoint_calls.lock().expect("lock"),
            endpoints_after_first
        );
    }

    #[test]
    fn suppressed_checks_keep_pushing_the_window_forward() {
        let alerts = CapturingAlerts::default();
        let dispatcher = dispatcher(
            HealthyArchive::default(),
            alerts.clone(),
            PipelineConfig::default(),
        );
        let clock = ManualClock::starting_at(at("2026-03-01T10:00:00Z"));
        let cancel = AtomicBool::new(false);

        dispatcher
            .maybe_notify(&person("2026-03-01T10:00:00Z"), "person", &clock, &cancel)
            .expect("send");

        // Checks every 20s: each is under the 30s minimum measured from the
        // previous check, so the gate never reopens while the burst lasts.
        for _ in 0..3 {
            clock.advance(Duration::from_secs(20));
            let decision = dispatcher
                .maybe_notify(&person("2026-03-01T10:00:00Z"), "person", &clock, &cancel)
                .expect("check");
            assert_eq!(
                decision,
                NotifyDecision::Suppressed {
                    seconds_since_last: 20
                }
            );
        }

        // Once the burst stops for a full interval, the next send goes out.
        clock.advance(Duration::from_secs(31));
        let decision = dispatcher
            .maybe_notify(&person("2026-03-01T10:00:00Z"), "person", &clock, &cancel)
            .expect("send after quiet");
        assert_eq!(decision, NotifyDecision::Sent);
        assert_eq!(alerts.published().len(), 2);
    }

    #[test]
    fn exhausted_resolution_sends_with_an_empty_link() {
        let alerts = CapturingAlerts::default();
        let dispatcher = dispatcher(FailingArchive, alerts.clone(), PipelineConfig::default());
        let clock = ManualClock::starting_at(at("2026-03-01T10:00:00Z"));
        let cancel = AtomicBool::new(false);

        let decision = dispatcher
            .maybe_notify(&person("2026-03-01T10:00:00Z"), "person 0.90", &clock, &cancel)
            .expect("dispatch");
        assert_eq!(decision, NotifyDecision::Sent);
        assert_eq!(clock.sleeps().len(), 14);

        let published = alerts.published();
        assert_eq!(published.len(), 1);
        assert_eq!(
            published[0].body,
            alert_body(Label::Person, "", "person 0.90")
        );
    }

    #[test]
    fn publish_failure_still_counts_as_sent() {
        let dispatcher = dispatcher(
            HealthyArchive::default(),
            FailingAlerts,
            PipelineConfig::default(),
        );
        let clock = ManualClock::starting_at(at("2026-03-01T10:00:00Z"));
        let cancel = AtomicBool::new(false);

        let decision = dispatcher
            .maybe_notify(&person("2026-03-01T10:00:00Z"), "person", &clock, &cancel)
            .expect("dispatch");
        assert_eq!(decision, NotifyDecision::Sent);
    }

    #[test]
    fn gate_failure_aborts_the_dispatch() {
        let dispatcher = Dispatcher::new(
            SendGate::new(FailingGateStore),
            LinkResolver::new(HealthyArchive::default(), PipelineConfig::default()),
            CapturingAlerts::default(),
            PipelineConfig::default(),
        );
        let clock = ManualClock::starting_at(at("2026-03-01T10:00:00Z"));
        let cancel = AtomicBool::new(false);

        let err = dispatcher
            .maybe_notify(&person("2026-03-01T10:00:00Z"), "person", &clock, &cancel)
            .unwrap_err();
        assert!(matches!(err, LookoutError::GateRead { .. }));
    }

    #[test]
    fn worker_sends_the_first_and_settles_the_rest_of_a_burst() {
        let alerts = CapturingAlerts::default();
        let dispatcher = dispatcher(
            HealthyArchive::default(),
            alerts.clone(),
            PipelineConfig::default(),
        );
        let worker = DispatchWorker::spawn(dispatcher, Arc::new(SystemClock));
        let handle = worker.handle();

        for _ in 0..3 {
            handle.offer(person("2026-03-01T10:00:00Z"), "person 0.90".to_string());
        }

        // Every offer ends up sent, suppressed, or dropped.
        let stats = handle.stats();
        for _ in 0..100 {
            let counts = stats.counts();
            if counts.sent + counts.suppressed + counts.dropped == 3 {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        let counts = stats.counts();
        assert_eq!(counts.sent, 1);
        assert_eq!(counts.sent + counts.suppressed + counts.dropped, 3);
        assert_eq!(alerts.published().len(), 1);

        worker.shutdown();
    }

    #[test]
    fn busy_worker_drops_excess_offers() {
        let mut config = PipelineConfig::default();
        // Keep the worker busy on the first job for a while.
        config.resolve_attempts = 1000;
        config.resolve_delay_ms = 50;
        let dispatcher = dispatcher(FailingArchive, CapturingAlerts::default(), config);
        let worker = DispatchWorker::spawn(dispatcher, Arc::new(SystemClock));
        let handle = worker.handle();

        assert!(handle.offer(person("2026-03-01T10:00:00Z"), "one".to_string()));
        thread::sleep(Duration::from_millis(30));
        // The worker is mid-resolution: one offer fits the channel slot,
        // the next is dropped on the floor.
        assert!(handle.offer(person("2026-03-01T10:00:01Z"), "two".to_string()));
        assert!(!handle.offer(person("2026-03-01T10:00:02Z"), "three".to_string()));
        assert_eq!(handle.stats().counts().dropped, 1);

        worker.shutdown();
    }

    #[test]
    fn shutdown_cancels_an_in_flight_resolution() {
        let mut config = PipelineConfig::default();
        config.resolve_attempts = 1000;
        config.resolve_delay_ms = 50;
        let dispatcher = dispatcher(FailingArchive, CapturingAlerts::default(), config);
        let worker = DispatchWorker::spawn(dispatcher, Arc::new(SystemClock));
        let handle = worker.handle();

        handle.offer(person("2026-03-01T10:00:00Z"), "person".to_string());
        thread::sleep(Duration::from_millis(100));

        // Joins promptly instead of waiting out the 1000-attempt budget.
        worker.shutdown();
        assert_eq!(handle.stats().counts().sent, 0);
    }

    #[test]
    fn worker_counts_gate_failures() {
        let dispatcher = Dispatcher::new(
            SendGate::new(FailingGateStore),
            LinkResolver::new(HealthyArchive::default(), PipelineConfig::default()),
            CapturingAlerts::default(),
            PipelineConfig::default(),
        );
        let worker = DispatchWorker::spawn(dispatcher, Arc::new(SystemClock));
        let handle = worker.handle();

        handle.offer(person("2026-03-01T10:00:00Z"), "person".to_string());
        let stats = handle.stats();
        for _ in 0..100 {
            if stats.counts().failed == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(stats.counts().failed, 1);
        assert_eq!(stats.counts().sent, 0);

        worker.shutdown();
    }
}
