//! Fakes and a harness shared by the orchestrator integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    AudioQuality, BackendEvent, BackendHandle, BridgeError, CacheHint, LicenseHint, MediaRequest,
    MetricsEmitter, MetricsRecord, NetworkFailure, PlayableDescriptor, PlaybackBackend,
    PlaybackInfoResolver, PlaybackMode, PlaybackMonitor, StreamKind,
};
use chrono::Utc;
use core_playback::{PlaybackOrchestrator, SessionId, Snapshot};
use core_runtime::config::{PlayerConfig, PlayerConfigBuilder};
use core_runtime::events::{CoreEvent, EngineState, Receiver};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub const TRACK_DURATION: Duration = Duration::from_secs(180);
pub const REPORTED_POSITION: Duration = Duration::from_millis(1_500);

/// Poll `$cond` until it holds, failing after two seconds.
#[macro_export]
macro_rules! eventually {
    ($cond:expr) => {{
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            if $cond {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for `{}`",
                stringify!($cond)
            );
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }};
}

// ============================================================================
// Journal
// ============================================================================

/// Ordered log shared by the fakes, for cross-collaborator ordering checks.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == entry)
    }
}

// ============================================================================
// Failure injection
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub enum FailMode {
    Network,
    Fatal,
    PrivilegesLost,
}

impl FailMode {
    pub fn error(self) -> BridgeError {
        match self {
            FailMode::Network => BridgeError::Network(NetworkFailure::TimedOut),
            FailMode::Fatal => BridgeError::OperationFailed("media not playable".into()),
            FailMode::PrivilegesLost => BridgeError::PrivilegesLost,
        }
    }
}

struct Failure {
    mode: FailMode,
    /// `None` fails forever.
    remaining: Option<u32>,
}

fn take_failure(failures: &mut HashMap<String, Failure>, product_id: &str) -> Option<FailMode> {
    let failure = failures.get_mut(product_id)?;
    let mode = failure.mode;
    if let Some(remaining) = failure.remaining.as_mut() {
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            failures.remove(product_id);
        }
    }
    Some(mode)
}

// ============================================================================
// Resolver
// ============================================================================

#[derive(Default)]
pub struct FakeResolver {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, Failure>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl FakeResolver {
    pub fn fail_once(&self, product_id: &str, mode: FailMode) {
        self.failures.lock().insert(
            product_id.to_string(),
            Failure {
                mode,
                remaining: Some(1),
            },
        );
    }

    pub fn fail_always(&self, product_id: &str, mode: FailMode) {
        self.failures
            .lock()
            .insert(product_id.to_string(), Failure { mode, remaining: None });
    }

    /// Block resolution of `product_id` until [`release`](Self::release).
    pub fn hold(&self, product_id: &str) {
        self.gates
            .lock()
            .insert(product_id.to_string(), Arc::new(Notify::new()));
    }

    pub fn release(&self, product_id: &str) {
        if let Some(gate) = self.gates.lock().remove(product_id) {
            gate.notify_one();
        }
    }

    pub fn calls_for(&self, product_id: &str) -> usize {
        self.calls.lock().iter().filter(|p| *p == product_id).count()
    }
}

pub fn descriptor(product_id: &str, mode: PlaybackMode) -> PlayableDescriptor {
    PlayableDescriptor {
        product_id: product_id.to_string(),
        url: format!("https://cdn.example.com/{product_id}.flac?sig=secret"),
        codec: "flac".into(),
        mime_type: "audio/flac".into(),
        quality: AudioQuality::High,
        stream_kind: StreamKind::OnDemand,
        mode,
        license_token: None,
        content_hash: Some(format!("hash-{product_id}")),
    }
}

#[async_trait]
impl PlaybackInfoResolver for FakeResolver {
    async fn resolve(
        &self,
        request: &MediaRequest,
        mode: PlaybackMode,
    ) -> BridgeResult<PlayableDescriptor> {
        let product_id = request.product_id.clone();
        self.calls.lock().push(product_id.clone());

        let gate = self.gates.lock().get(&product_id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if let Some(mode) = take_failure(&mut self.failures.lock(), &product_id) {
            return Err(mode.error());
        }
        Ok(descriptor(&product_id, mode))
    }
}

// ============================================================================
// Backend
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Load(String),
    Play(u64),
    Pause(u64),
    Seek(u64, Duration),
    Unload(u64),
}

#[derive(Default)]
struct BackendState {
    monitors: HashMap<u64, Arc<dyn PlaybackMonitor>>,
    handles: Vec<(u64, String)>,
    calls: Vec<BackendCall>,
    load_failures: HashMap<String, Failure>,
}

pub struct FakeBackend {
    requires_stall: AtomicBool,
    next_handle: AtomicU64,
    state: Mutex<BackendState>,
    journal: Journal,
}

impl FakeBackend {
    pub fn new(journal: Journal) -> Self {
        Self {
            requires_stall: AtomicBool::new(false),
            next_handle: AtomicU64::new(1),
            state: Mutex::new(BackendState::default()),
            journal,
        }
    }

    pub fn set_requires_stall_on_skip(&self, value: bool) {
        self.requires_stall.store(value, Ordering::SeqCst);
    }

    pub fn fail_load(&self, product_id: &str, mode: FailMode) {
        self.state.lock().load_failures.insert(
            product_id.to_string(),
            Failure {
                mode,
                remaining: Some(1),
            },
        );
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, call: &BackendCall) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == call).count()
    }

    pub fn loads_of(&self, product_id: &str) -> usize {
        self.count(&BackendCall::Load(product_id.to_string()))
    }

    /// Most recent handle handed out for `product_id`.
    pub fn handle_of(&self, product_id: &str) -> Option<u64> {
        self.state
            .lock()
            .handles
            .iter()
            .rev()
            .find(|(_, p)| p == product_id)
            .map(|(h, _)| *h)
    }

    /// Deliver `event` through the monitor of `product_id`'s latest handle.
    pub fn report(&self, product_id: &str, event: BackendEvent) {
        let handle = self
            .handle_of(product_id)
            .unwrap_or_else(|| panic!("no handle for {product_id}"));
        self.report_handle(handle, event);
    }

    pub fn report_handle(&self, handle: u64, event: BackendEvent) {
        let monitor = self
            .state
            .lock()
            .monitors
            .get(&handle)
            .cloned()
            .unwrap_or_else(|| panic!("no monitor for handle {handle}"));
        monitor.report(event);
    }

    fn record(&self, call: BackendCall) {
        let entry = match &call {
            BackendCall::Load(p) => format!("load:{p}"),
            BackendCall::Play(h) => format!("play:{h}"),
            BackendCall::Pause(h) => format!("pause:{h}"),
            BackendCall::Seek(h, _) => format!("seek:{h}"),
            BackendCall::Unload(h) => format!("unload:{h}"),
        };
        self.journal.push(entry);
        self.state.lock().calls.push(call);
    }
}

#[async_trait]
impl PlaybackBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn can_play(&self, _kind: StreamKind, codec: &str, _mime_type: &str, _is_offline: bool) -> bool {
        codec == "flac"
    }

    fn requires_stall_on_skip(&self) -> bool {
        self.requires_stall.load(Ordering::SeqCst)
    }

    async fn load(
        &self,
        descriptor: &PlayableDescriptor,
        _cache: CacheHint,
        _license: Option<LicenseHint>,
        monitor: Arc<dyn PlaybackMonitor>,
    ) -> BridgeResult<BackendHandle> {
        self.record(BackendCall::Load(descriptor.product_id.clone()));
        if let Some(mode) = take_failure(&mut self.state.lock().load_failures, &descriptor.product_id) {
            return Err(mode.error());
        }

        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        monitor.report(BackendEvent::Loaded {
            duration: Some(TRACK_DURATION),
        });
        let mut state = self.state.lock();
        state.monitors.insert(handle, monitor);
        state.handles.push((handle, descriptor.product_id.clone()));
        Ok(BackendHandle::new(handle))
    }

    async fn play(&self, handle: BackendHandle) -> BridgeResult<()> {
        self.record(BackendCall::Play(handle.raw()));
        Ok(())
    }

    async fn pause(&self, handle: BackendHandle) -> BridgeResult<()> {
        self.record(BackendCall::Pause(handle.raw()));
        Ok(())
    }

    async fn seek(&self, handle: BackendHandle, position: Duration) -> BridgeResult<()> {
        self.record(BackendCall::Seek(handle.raw(), position));
        Ok(())
    }

    async fn unload(&self, handle: BackendHandle) -> BridgeResult<()> {
        self.record(BackendCall::Unload(handle.raw()));
        Ok(())
    }

    async fn position(&self, _handle: BackendHandle) -> BridgeResult<Duration> {
        Ok(REPORTED_POSITION)
    }
}

// ============================================================================
// Metrics
// ============================================================================

pub struct RecordingMetrics {
    records: Mutex<Vec<MetricsRecord>>,
    journal: Journal,
}

impl RecordingMetrics {
    pub fn new(journal: Journal) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            journal,
        }
    }

    pub fn records(&self) -> Vec<MetricsRecord> {
        self.records.lock().clone()
    }

    /// Record kinds emitted for one session, in order.
    pub fn kinds_for(&self, session_id: SessionId) -> Vec<&'static str> {
        let id = session_id.to_string();
        self.records
            .lock()
            .iter()
            .filter(|r| r.session_id() == id)
            .map(|r| r.kind())
            .collect()
    }

    pub fn end_reason_for(&self, session_id: SessionId) -> Option<bridge_traits::EndReason> {
        let id = session_id.to_string();
        self.records.lock().iter().find_map(|r| match r {
            MetricsRecord::LifecycleEnd {
                session_id,
                end_reason,
                ..
            } if *session_id == id => Some(*end_reason),
            _ => None,
        })
    }
}

impl MetricsEmitter for RecordingMetrics {
    fn emit(&self, record: MetricsRecord) {
        self.journal.push(format!("metrics:{}", record.kind()));
        self.records.lock().push(record);
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub player: PlaybackOrchestrator,
    pub resolver: Arc<FakeResolver>,
    pub backend: Arc<FakeBackend>,
    pub metrics: Arc<RecordingMetrics>,
    pub journal: Journal,
    pub events: Receiver<CoreEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(|builder| builder)
    }

    pub fn with(customize: impl FnOnce(PlayerConfigBuilder) -> PlayerConfigBuilder) -> Self {
        let journal = Journal::default();
        let resolver = Arc::new(FakeResolver::default());
        let backend = Arc::new(FakeBackend::new(journal.clone()));
        let metrics = Arc::new(RecordingMetrics::new(journal.clone()));

        let builder = PlayerConfig::builder()
            .resolver(resolver.clone())
            .backend(backend.clone())
            .metrics(metrics.clone());
        let config = customize(builder).build().expect("valid test config");

        let player = PlaybackOrchestrator::new(config).expect("orchestrator starts");
        let events = player.subscribe();

        Self {
            player,
            resolver,
            backend,
            metrics,
            journal,
            events,
        }
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.player.snapshot().await.expect("orchestrator running")
    }

    /// Round-trip through the command queue so earlier reports are applied.
    pub async fn settle(&self) {
        let _ = self.snapshot().await;
    }

    pub async fn load(&self, product_id: &str) -> SessionId {
        self.player
            .load(MediaRequest::track(product_id), Utc::now(), false)
            .await
            .expect("load accepted")
    }

    pub async fn set_next(&self, product_id: &str) -> SessionId {
        self.player
            .set_next(Some(MediaRequest::track(product_id)))
            .await
            .expect("set_next accepted")
            .expect("next item created")
    }

    pub async fn wait_current_loaded(&self) {
        eventually!(self.snapshot().await.current.is_some_and(|c| c.loaded));
    }

    pub async fn wait_next_loaded(&self) {
        eventually!(self.snapshot().await.next.is_some_and(|n| n.loaded));
    }

    pub async fn wait_state(&self, state: EngineState) {
        eventually!(self.player.state() == state);
    }

    /// Load `product_id`, play it and drive it to `Playing`.
    pub async fn start_playing(&self, product_id: &str) -> SessionId {
        let id = self.load(product_id).await;
        self.wait_current_loaded().await;
        self.player.play(Utc::now()).await.expect("play accepted");
        self.backend.report(product_id, BackendEvent::Playing);
        self.wait_state(EngineState::Playing).await;
        id
    }

    /// Everything queued on the event receiver right now.
    pub fn drain_events(&mut self) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub async fn next_event(&mut self, predicate: impl Fn(&CoreEvent) -> bool) -> CoreEvent {
        let wait = async {
            loop {
                match self.events.recv().await {
                    Ok(event) if predicate(&event) => return event,
                    Ok(_) => continue,
                    Err(e) => panic!("event stream failed: {e}"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(2), wait)
            .await
            .expect("expected event was not emitted")
    }
}
