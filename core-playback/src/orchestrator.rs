//! # Playback Orchestrator
//!
//! Decides which request is current, which one is pre-loaded as the gapless
//! follow-on, and how loads, failures and collaborator calls are sequenced.
//!
//! ## Execution model
//!
//! ```text
//!  PlaybackOrchestrator (Clone)          actor task (single, FIFO)
//!  ───────────────────────────          ──────────────────────────
//!  load / set_next / skip ... ──cmd──>  ┌──────────────────────────┐
//!                                       │ current slot  next slot  │
//!  MonitorSink (weak) ──────report──>   │ reducer → side effects   │──> EventBus
//!  spawned load task (weak) ─finished─> └──────────────────────────┘──> MetricsEmitter
//! ```
//!
//! Every mutating operation is a [`Command`] processed to completion before
//! the next one starts. Resolution and backend loading run in spawned tasks
//! that post their result back onto the same queue, tagged with a
//! [`LoadToken`]; results and backend reports whose token no longer matches a
//! slot are discarded (and any handle they carry is unloaded).
//!
//! ## Usage
//!
//! ```ignore
//! let player = PlaybackOrchestrator::new(config)?;
//! let mut events = player.subscribe();
//!
//! player.load(MediaRequest::track("1"), Utc::now(), false).await?;
//! player.set_next(Some(MediaRequest::track("2"))).await?;
//! player.play(Utc::now()).await?;
//! ```

use crate::backend::LoadJob;
use crate::error::{FailureKind, PlaybackError, Result};
use crate::item::{millis, LoadToken, LoadedMedia, MetricsReporter, SessionId, SessionItem};
use crate::monitor::MonitorSink;
use crate::state::{self, CollabSync, Effect, Input};
use bridge_traits::metrics::{EndReason, StartReason};
use bridge_traits::session::{CrossDeviceNotice, InterruptionKind, PrivilegesLostNotice};
use bridge_traits::{BackendEvent, BackendHandle, BridgeError, MediaRequest, PlaybackBackend};
use chrono::{DateTime, Utc};
use core_runtime::config::{MetricsFlushPolicy, PlayerConfig, PreloadPolicy};
use core_runtime::events::{
    CoreEvent, EngineState, EventBus, EventStream, PlaybackEvent, Receiver, SessionEvent, Slot,
    TransitionReason,
};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendError, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

type Reply<T> = oneshot::Sender<Result<T>>;

/// Messages processed by the orchestrator task, in arrival order.
pub(crate) enum Command {
    Load {
        request: MediaRequest,
        start_timestamp: DateTime<Utc>,
        is_preload: bool,
        reply: Reply<SessionId>,
    },
    SetNext {
        request: Option<MediaRequest>,
        reply: Reply<Option<SessionId>>,
    },
    SkipToNext {
        reply: Reply<()>,
    },
    Play {
        timestamp: DateTime<Utc>,
        reply: Reply<()>,
    },
    Pause {
        reply: Reply<()>,
    },
    Seek {
        position: Duration,
        reply: Reply<()>,
    },
    Reset {
        reply: Reply<()>,
    },
    Unload {
        reply: Reply<()>,
    },
    Snapshot {
        reply: oneshot::Sender<Snapshot>,
    },
    LoadFinished {
        token: LoadToken,
        result: Result<LoadedMedia>,
    },
    Backend {
        token: LoadToken,
        event: BackendEvent,
    },
}

/// Point-in-time view of one slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemSnapshot {
    pub session_id: SessionId,
    pub request: MediaRequest,
    pub start_reason: StartReason,
    /// A backend handle exists.
    pub loaded: bool,
    pub loading: bool,
    pub duration: Option<Duration>,
    /// A failure is buffered for this slot.
    pub pending_error: bool,
}

/// Point-in-time view of the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub state: EngineState,
    pub current: Option<ItemSnapshot>,
    pub next: Option<ItemSnapshot>,
    /// A skip is waiting for the current item's initial load.
    pub pending_skip: bool,
}

// ============================================================================
// Public handle
// ============================================================================

/// Handle to a running orchestrator. Cheap to clone.
///
/// The orchestrator task stops after [`unload`](Self::unload) or once every
/// handle is dropped; later calls return
/// [`PlaybackError::OrchestratorClosed`].
#[derive(Clone)]
pub struct PlaybackOrchestrator {
    commands: UnboundedSender<Command>,
    state: watch::Receiver<EngineState>,
    events: EventBus,
}

impl PlaybackOrchestrator {
    /// Validate `config` and start the orchestrator task on the current Tokio
    /// runtime.
    pub fn new(config: PlayerConfig) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            PlaybackError::Internal("PlaybackOrchestrator must be created inside a Tokio runtime".into())
        })?;

        let (commands, receiver) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(EngineState::Idle);
        let events = EventBus::new(config.settings.event_buffer_size);

        let actor = Actor::new(config, events.clone(), state_tx, commands.downgrade());
        runtime.spawn(actor.run(receiver));

        Ok(Self {
            commands,
            state,
            events,
        })
    }

    /// Replace the current item and start resolving it. The state becomes
    /// `NotPlaying`; the pre-loaded next item is discarded.
    ///
    /// `is_preload` marks the item as queued by the SDK rather than the user.
    /// Its failures stay buffered until [`play`](Self::play).
    #[instrument(skip(self, request), fields(product_id = %request.product_id))]
    pub async fn load(
        &self,
        request: MediaRequest,
        start_timestamp: DateTime<Utc>,
        is_preload: bool,
    ) -> Result<SessionId> {
        self.request(|reply| Command::Load {
            request,
            start_timestamp,
            is_preload,
            reply,
        })
        .await
    }

    /// Replace the pre-loaded next item; `None` clears it. Ignored while
    /// `Idle`, in which case `Ok(None)` is returned.
    #[instrument(skip(self, request))]
    pub async fn set_next(&self, request: Option<MediaRequest>) -> Result<Option<SessionId>> {
        self.request(|reply| Command::SetNext { request, reply }).await
    }

    #[instrument(skip(self))]
    pub async fn skip_to_next(&self) -> Result<()> {
        self.request(|reply| Command::SkipToNext { reply }).await
    }

    #[instrument(skip(self))]
    pub async fn play(&self, timestamp: DateTime<Utc>) -> Result<()> {
        self.request(|reply| Command::Play { timestamp, reply }).await
    }

    #[instrument(skip(self))]
    pub async fn pause(&self) -> Result<()> {
        self.request(|reply| Command::Pause { reply }).await
    }

    #[instrument(skip(self))]
    pub async fn seek(&self, position: Duration) -> Result<()> {
        self.request(|reply| Command::Seek { position, reply }).await
    }

    /// Tear everything down and go `Idle`; the orchestrator stays usable.
    #[instrument(skip(self))]
    pub async fn reset(&self) -> Result<()> {
        self.request(|reply| Command::Reset { reply }).await
    }

    /// Tear everything down and stop the orchestrator task.
    #[instrument(skip(self))]
    pub async fn unload(&self) -> Result<()> {
        self.request(|reply| Command::Unload { reply }).await
    }

    pub async fn snapshot(&self) -> Result<Snapshot> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Snapshot { reply })
            .map_err(|_| PlaybackError::OrchestratorClosed)?;
        response.await.map_err(|_| PlaybackError::OrchestratorClosed)
    }

    /// Latest engine state, without a round-trip through the queue.
    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<EngineState> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> EventStream {
        EventStream::new(self.events.subscribe())
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| PlaybackError::OrchestratorClosed)?;
        response.await.map_err(|_| PlaybackError::OrchestratorClosed)?
    }
}

impl std::fmt::Debug for PlaybackOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackOrchestrator")
            .field("state", &self.state())
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

// ============================================================================
// Actor
// ============================================================================

/// A skip waiting for the current item's initial load. It targets the next
/// item present when it was issued; `set_next` calls made meanwhile are held
/// here and replace the next slot once the skip lands.
#[derive(Default)]
struct PendingSkip {
    follow_on: Option<Option<SessionItem>>,
}

struct Actor {
    config: PlayerConfig,
    reporter: MetricsReporter,
    events: EventBus,
    state_tx: watch::Sender<EngineState>,
    state: EngineState,
    current: Option<SessionItem>,
    next: Option<SessionItem>,
    current_error: Option<PlaybackError>,
    next_error: Option<PlaybackError>,
    /// Bumped on every load dispatch.
    generation: u64,
    pending_skip: Option<PendingSkip>,
    commands: WeakUnboundedSender<Command>,
    shutdown: CancellationToken,
}

impl Actor {
    fn new(
        config: PlayerConfig,
        events: EventBus,
        state_tx: watch::Sender<EngineState>,
        commands: WeakUnboundedSender<Command>,
    ) -> Self {
        let reporter = MetricsReporter {
            emitter: config.metrics.clone(),
            clock: Arc::clone(&config.clock),
        };
        Self {
            config,
            reporter,
            events,
            state_tx,
            state: EngineState::Idle,
            current: None,
            next: None,
            current_error: None,
            next_error: None,
            generation: 0,
            pending_skip: None,
            commands,
            shutdown: CancellationToken::new(),
        }
    }

    async fn run(mut self, mut commands: UnboundedReceiver<Command>) {
        let mut privileges = self
            .config
            .exclusivity
            .as_ref()
            .map(|arbiter| arbiter.notifications());
        info!(backends = self.config.backends.len(), "Playback orchestrator started");

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        debug!("All handles dropped");
                        break;
                    };
                    if self.handle(command).await.is_break() {
                        break;
                    }
                }
                notice = next_notice(&mut privileges) => {
                    self.on_privileges_lost(notice).await;
                }
            }
        }

        self.teardown().await;
        self.shutdown.cancel();
        info!("Playback orchestrator stopped");
    }

    async fn handle(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Load {
                request,
                start_timestamp,
                is_preload,
                reply,
            } => {
                let id = self.load(request, start_timestamp, is_preload).await;
                let _ = reply.send(Ok(id));
            }
            Command::SetNext { request, reply } => {
                let id = self.set_next(request).await;
                let _ = reply.send(Ok(id));
            }
            Command::SkipToNext { reply } => {
                self.skip_to_next().await;
                let _ = reply.send(Ok(()));
            }
            Command::Play { timestamp, reply } => {
                let _ = reply.send(self.play(timestamp).await);
            }
            Command::Pause { reply } => {
                let _ = reply.send(self.pause().await);
            }
            Command::Seek { position, reply } => {
                let _ = reply.send(self.seek(position).await);
            }
            Command::Reset { reply } => {
                info!("Resetting orchestrator");
                self.teardown().await;
                let _ = reply.send(Ok(()));
            }
            Command::Unload { reply } => {
                info!("Unloading orchestrator");
                self.teardown().await;
                let _ = reply.send(Ok(()));
                return ControlFlow::Break(());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::LoadFinished { token, result } => {
                self.on_load_finished(token, result).await;
            }
            Command::Backend { token, event } => {
                self.on_backend_event(token, event).await;
            }
        }
        ControlFlow::Continue(())
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    async fn load(
        &mut self,
        request: MediaRequest,
        start_timestamp: DateTime<Utc>,
        is_preload: bool,
    ) -> SessionId {
        self.drop_pending_skip().await;
        self.current_error = None;
        self.next_error = None;
        if let Some(item) = self.current.take() {
            self.retire(item, EndReason::Replaced).await;
        }
        if let Some(item) = self.next.take() {
            self.retire(item, EndReason::Discarded).await;
        }

        let start_reason = if is_preload {
            StartReason::Implicit
        } else {
            StartReason::Explicit
        };
        let item = SessionItem::new(request, start_reason, start_timestamp, self.reporter.clone());
        let id = item.id();
        info!(session_id = %id, product_id = %item.request().product_id, ?start_reason, "Loading current item");

        self.current = Some(item);
        self.apply(Input::LoadRequested).await;
        self.dispatch_load(Slot::Current);
        id
    }

    async fn set_next(&mut self, request: Option<MediaRequest>) -> Option<SessionId> {
        if self.state == EngineState::Idle {
            debug!("set_next ignored while idle");
            return None;
        }

        let item = request.map(|request| {
            SessionItem::new(
                request,
                StartReason::Implicit,
                self.reporter.now(),
                self.reporter.clone(),
            )
        });
        let id = item.as_ref().map(SessionItem::id);

        if let Some(skip) = self.pending_skip.as_mut() {
            debug!(session_id = ?id, "Holding next item until the pending skip lands");
            if let Some(Some(replaced)) = skip.follow_on.replace(item) {
                self.retire(replaced, EndReason::Discarded).await;
            }
            return id;
        }

        self.install_next(item).await;
        id
    }

    /// Replace the next slot and start its load when the current item allows.
    async fn install_next(&mut self, item: Option<SessionItem>) {
        self.next_error = None;
        if let Some(outgoing) = self.next.take() {
            self.retire(outgoing, EndReason::Discarded).await;
        }

        let Some(item) = item else {
            return;
        };
        if self.state == EngineState::Idle || self.current.is_none() {
            debug!(session_id = %item.id(), "No current item, discarding next");
            self.retire(item, EndReason::Discarded).await;
            return;
        }
        let id = item.id();
        self.next = Some(item);

        let buffered = self.current.as_ref().map_or(true, |item| item.downloaded);
        if buffered || self.config.settings.preload == PreloadPolicy::Eager {
            self.dispatch_load(Slot::Next);
        } else {
            debug!(session_id = %id, "Deferring next load until current item is buffered");
        }
    }

    async fn drop_pending_skip(&mut self) {
        let follow_on = self.pending_skip.take().and_then(|skip| skip.follow_on);
        if let Some(Some(item)) = follow_on {
            self.retire(item, EndReason::Discarded).await;
        }
    }

    async fn skip_to_next(&mut self) {
        let current_loading = self
            .current
            .as_ref()
            .is_some_and(|item| item.in_initial_load());
        if current_loading && self.next.is_some() {
            debug!("Skip deferred until the current load settles");
            self.pending_skip.get_or_insert_with(PendingSkip::default);
            return;
        }
        self.advance(TransitionReason::Skipped).await;
    }

    async fn play(&mut self, timestamp: DateTime<Utc>) -> Result<()> {
        let item = self.current.as_mut().ok_or(PlaybackError::NoItemLoaded)?;
        let resuming = item.pause_requested;
        item.request_play(timestamp);

        if let Some(error) = self.current_error.take() {
            info!(error = %error, "Surfacing buffered failure instead of playing");
            self.route_current_failure(error).await;
            return Ok(());
        }

        let state = self.state;
        let Some(item) = self.current.as_mut() else {
            return Err(PlaybackError::NoItemLoaded);
        };

        if item.needs_reload {
            if !item.is_loading() {
                info!(session_id = %item.id(), "Reloading current item");
                self.dispatch_load(Slot::Current);
            }
            return Ok(());
        }

        match (item.backend().cloned(), item.handle()) {
            (Some(backend), Some(handle)) if resuming || state != EngineState::Playing => backend
                .play(handle)
                .await
                .map_err(|e| PlaybackError::backend(backend.name(), e)),
            (Some(_), Some(_)) => Ok(()),
            _ => {
                debug!(session_id = %item.id(), "Play requested before handle exists");
                Ok(())
            }
        }
    }

    async fn pause(&mut self) -> Result<()> {
        let state = self.state;
        let item = self.current.as_mut().ok_or(PlaybackError::NoItemLoaded)?;
        item.play_when_loaded = false;

        if state == EngineState::Paused || item.pause_requested {
            debug!("Already paused");
            return Ok(());
        }
        item.pause_requested = true;

        let (Some(backend), Some(handle)) = (item.backend().cloned(), item.handle()) else {
            return Ok(());
        };
        backend
            .pause(handle)
            .await
            .map_err(|e| PlaybackError::backend(backend.name(), e))
    }

    async fn seek(&mut self, position: Duration) -> Result<()> {
        let item = self.current.as_mut().ok_or(PlaybackError::NoItemLoaded)?;
        let (Some(backend), Some(handle)) = (item.backend().cloned(), item.handle()) else {
            debug!("Seek before handle exists ignored");
            return Ok(());
        };

        backend
            .seek(handle, position)
            .await
            .map_err(|e| PlaybackError::backend(backend.name(), e))?;
        item.record_seek(position);
        Ok(())
    }

    fn snapshot(&self) -> Snapshot {
        let view = |item: &SessionItem, pending_error: bool| ItemSnapshot {
            session_id: item.id(),
            request: item.request().clone(),
            start_reason: item.start_reason(),
            loaded: item.has_handle(),
            loading: item.is_loading(),
            duration: item.duration(),
            pending_error,
        };

        Snapshot {
            state: self.state,
            current: self
                .current
                .as_ref()
                .map(|item| view(item, self.current_error.is_some())),
            next: self
                .next
                .as_ref()
                .map(|item| view(item, self.next_error.is_some())),
            pending_skip: self.pending_skip.is_some(),
        }
    }

    /// Promote the next item, or go idle when there is none. A `set_next`
    /// held by a pending skip then fills the new next slot.
    async fn advance(&mut self, reason: TransitionReason) {
        let follow_on = self.pending_skip.take().and_then(|skip| skip.follow_on);
        self.promote(reason).await;
        if let Some(item) = follow_on {
            self.install_next(item).await;
        }
    }

    async fn promote(&mut self, reason: TransitionReason) {
        let end_reason = match reason {
            TransitionReason::Skipped => EndReason::Skipped,
            TransitionReason::Completed => EndReason::Completed,
        };

        let Some(mut next) = self.next.take() else {
            info!(?reason, "No next item, going idle");
            self.current_error = None;
            self.next_error = None;
            if let Some(item) = self.current.take() {
                self.retire(item, end_reason).await;
            }
            self.apply(Input::Cleared).await;
            return;
        };

        next.play_when_loaded = true;
        next.pause_requested = false;
        let outgoing = self.current.replace(next);
        self.current_error = self.next_error.take();

        let from_session = outgoing.as_ref().map(|item| item.id().to_string());
        if let Some(item) = outgoing {
            self.retire(item, end_reason).await;
        }

        let Some(current) = self.current.as_ref() else {
            return;
        };
        let to_session = current.id();
        let ready = current.backend().cloned().zip(current.handle());
        info!(session_id = %to_session, ?reason, loaded = ready.is_some(), "Promoted next item");
        self.emit(PlaybackEvent::Transitioned {
            from_session,
            to_session: to_session.to_string(),
            reason,
        });

        match self.current_error.take() {
            Some(error) if !error.is_network_error() => {
                self.route_current_failure(error).await;
                return;
            }
            Some(error) => {
                info!(error = %error, "Reissuing load after network failure on next item");
            }
            None => {
                if let Some((backend, handle)) = ready {
                    if backend.requires_stall_on_skip() {
                        self.apply(Input::SkipStalled).await;
                    }
                    self.start_handle(backend, handle).await;
                    return;
                }
            }
        }

        self.apply(Input::SkipStalled).await;
        if self.current.as_ref().is_some_and(|item| !item.is_loading()) {
            self.dispatch_load(Slot::Current);
        }
    }

    async fn teardown(&mut self) {
        self.drop_pending_skip().await;
        self.current_error = None;
        self.next_error = None;
        if let Some(item) = self.current.take() {
            self.retire(item, EndReason::Stopped).await;
        }
        if let Some(item) = self.next.take() {
            self.retire(item, EndReason::Discarded).await;
        }
        self.apply(Input::Cleared).await;
    }

    // ------------------------------------------------------------------------
    // Loads
    // ------------------------------------------------------------------------

    fn dispatch_load(&mut self, slot: Slot) {
        let resolver = Arc::clone(&self.config.resolver);
        let backends = self.config.backends.clone();
        let mode = self.config.settings.playback_mode;
        let commands = self.commands.clone();
        let cancel = self.shutdown.child_token();
        self.generation += 1;
        let generation = self.generation;

        let Some(item) = self.item_mut(slot) else {
            return;
        };
        item.begin_load(generation, cancel.clone());
        let token = LoadToken {
            session_id: item.id(),
            generation,
        };
        debug!(session_id = %token.session_id, %slot, generation, "Dispatching load");

        let job = LoadJob {
            resolver,
            backends,
            mode,
            request: item.request().clone(),
            monitor: Arc::new(MonitorSink::new(token, commands.clone())),
        };
        tokio::spawn(run_load(job, token, cancel, commands));
    }

    async fn on_load_finished(&mut self, token: LoadToken, result: Result<LoadedMedia>) {
        let Some(slot) = self.slot_for_load(&token) else {
            match result {
                Ok(media) => {
                    debug!(session_id = %token.session_id, "Load finished for a retired item, unloading");
                    release(media.backend, media.handle).await;
                }
                Err(e) => trace!(session_id = %token.session_id, error = %e, "Stale load failed"),
            }
            return;
        };

        match result {
            Ok(media) => self.on_loaded(slot, media).await,
            Err(error) => self.on_load_failed(slot, error).await,
        }
    }

    async fn on_loaded(&mut self, slot: Slot, media: LoadedMedia) {
        let Some(item) = self.item_mut(slot) else {
            return;
        };
        info!(session_id = %item.id(), %slot, backend = media.backend.name(), "Item loaded");
        if let Some((backend, handle)) = item.attach(media) {
            release(backend, handle).await;
        }
        if item.take_loaded_notification() {
            self.notify_loaded(slot);
        }

        if slot == Slot::Current {
            if self.pending_skip.is_some() {
                self.advance(TransitionReason::Skipped).await;
                return;
            }
            self.start_if_requested().await;
        }
    }

    async fn on_load_failed(&mut self, slot: Slot, error: PlaybackError) {
        if let Some(item) = self.item_mut(slot) {
            item.load_failed();
        }

        match slot {
            Slot::Current => {
                if self.pending_skip.is_some() {
                    warn!(error = %error, "Current item failed while a skip was pending");
                    self.advance(TransitionReason::Skipped).await;
                    return;
                }
                self.route_current_failure(error).await;
            }
            Slot::Next => self.store_next_failure(error).await,
        }
    }

    async fn start_if_requested(&mut self) {
        let state = self.state;
        let Some(item) = self.current.as_ref() else {
            return;
        };
        if !item.play_when_loaded || item.pause_requested || state == EngineState::Playing {
            return;
        }
        if let Some((backend, handle)) = item.backend().cloned().zip(item.handle()) {
            self.start_handle(backend, handle).await;
        }
    }

    async fn start_handle(&mut self, backend: Arc<dyn PlaybackBackend>, handle: BackendHandle) {
        if let Err(e) = backend.play(handle).await {
            let error = PlaybackError::backend(backend.name(), e);
            self.route_current_failure(error).await;
        }
    }

    // ------------------------------------------------------------------------
    // Backend reports
    // ------------------------------------------------------------------------

    async fn on_backend_event(&mut self, token: LoadToken, event: BackendEvent) {
        let Some(slot) = self.slot_for_report(&token) else {
            trace!(session_id = %token.session_id, event = event.name(), "Ignoring stale backend report");
            return;
        };
        trace!(session_id = %token.session_id, %slot, event = event.name(), "Backend report");

        match (slot, event) {
            (_, BackendEvent::Loaded { duration }) => {
                let notify = self
                    .item_mut(slot)
                    .is_some_and(|item| item.mark_backend_ready(duration));
                if notify {
                    self.notify_loaded(slot);
                }
            }
            (_, BackendEvent::MetadataLoaded { tags }) => {
                self.emit(PlaybackEvent::MetadataLoaded {
                    session_id: token.session_id.to_string(),
                    tags,
                });
            }
            (_, BackendEvent::Failed(source)) => {
                let backend = self
                    .item_mut(slot)
                    .and_then(|item| item.backend().map(|b| b.name().to_string()))
                    .unwrap_or_else(|| "unknown".to_string());
                let error = PlaybackError::backend(backend, source);
                match slot {
                    Slot::Current => self.route_current_failure(error).await,
                    Slot::Next => self.store_next_failure(error).await,
                }
            }
            (Slot::Current, BackendEvent::Downloaded) => {
                if let Some(item) = self.current.as_mut() {
                    item.downloaded = true;
                }
                let waiting = self.next_error.is_none()
                    && self
                        .next
                        .as_ref()
                        .is_some_and(|next| !next.is_loading() && !next.has_handle());
                if waiting {
                    debug!("Current item buffered, starting deferred next load");
                    self.dispatch_load(Slot::Next);
                }
            }
            (Slot::Next, BackendEvent::Downloaded) => {
                if let Some(item) = self.next.as_mut() {
                    item.downloaded = true;
                }
            }
            (Slot::Current, BackendEvent::Playing) => self.on_playing().await,
            (Slot::Current, BackendEvent::Paused) => {
                if let Some(item) = self.current.as_mut() {
                    let position = item.position().await;
                    item.record_paused(position);
                }
                self.apply(Input::BackendPaused).await;
            }
            (Slot::Current, BackendEvent::Stalled) => {
                if let Some(item) = self.current.as_mut() {
                    let position = item.position().await;
                    item.record_stalled(position);
                }
                self.apply(Input::BackendStalled).await;
            }
            (Slot::Current, BackendEvent::Completed) => {
                self.advance(TransitionReason::Completed).await;
            }
            (Slot::Next, event) => {
                debug!(event = event.name(), "Ignoring playback report for next item");
            }
        }
    }

    async fn on_playing(&mut self) {
        let Some(item) = self.current.as_mut() else {
            return;
        };
        let position = item.position().await;
        item.pause_requested = false;
        item.record_playing(position);

        self.apply(Input::BackendPlaying).await;

        let Some(item) = self.current.as_mut() else {
            return;
        };
        if item.collab_started {
            return;
        }
        item.collab_started = true;
        let request = item.request().clone();
        if let Some(collab) = self.config.collaborative_session.clone() {
            if let Err(e) = collab.start(&request, position).await {
                self.collab_failed(e);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Failures
    // ------------------------------------------------------------------------

    async fn route_current_failure(&mut self, error: PlaybackError) {
        let kind = error.classify();
        if kind == FailureKind::Cancellation {
            debug!("Cancelled load swallowed");
            return;
        }

        let Some(item) = self.current.as_mut() else {
            warn!(error = %error, "Failure reported without a current item");
            return;
        };
        let session_id = item.id().to_string();
        let product_id = item.request().product_id.clone();

        if kind == FailureKind::PrivilegesLost {
            let unloaded = !item.has_handle();
            if unloaded {
                info!(session_id = %session_id, "Privileges lost before the item loaded, reload on play");
                item.needs_reload = true;
            }
            self.on_privileges_lost(PrivilegesLostNotice { taken_by: None })
                .await;
            if unloaded {
                self.apply(Input::Failed).await;
            }
            return;
        }

        item.cancel_load();
        if let Some((backend, handle)) = item.detach() {
            release(backend, handle).await;
        }

        if item.start_reason() == StartReason::Implicit && !item.play_when_loaded {
            debug!(session_id = %session_id, error = %error, "Buffering failure until play");
            item.needs_reload = error.is_network_error();
            self.current_error = Some(error);
            return;
        }

        match kind {
            FailureKind::TransientNetwork => {
                warn!(session_id = %session_id, error = %error, "Transient network failure on current item");
                item.needs_reload = true;
                self.apply(Input::Failed).await;
                self.emit(PlaybackEvent::Error {
                    session_id,
                    product_id,
                    message: error.to_string(),
                    recoverable: true,
                });
            }
            FailureKind::Fatal => {
                error!(session_id = %session_id, error = %error, "Fatal failure on current item");
                let message = error.to_string();
                item.collab_started = false;
                self.apply(Input::Failed).await;
                self.emit(PlaybackEvent::Error {
                    session_id,
                    product_id,
                    message: message.clone(),
                    recoverable: false,
                });

                self.drop_pending_skip().await;
                self.current_error = None;
                self.next_error = None;
                if let Some(item) = self.current.take() {
                    self.retire(item, EndReason::Failed).await;
                }
                if let Some(item) = self.next.take() {
                    self.retire(item, EndReason::Discarded).await;
                }
                if let Some(collab) = self.config.collaborative_session.clone() {
                    if let Err(e) = collab.reset(&message).await {
                        self.collab_failed(e);
                    }
                }
            }
            FailureKind::Cancellation | FailureKind::PrivilegesLost => {}
        }
    }

    async fn store_next_failure(&mut self, error: PlaybackError) {
        if error.classify() == FailureKind::Cancellation {
            return;
        }
        if let Some(item) = self.next.as_mut() {
            debug!(session_id = %item.id(), error = %error, "Buffering next-item failure until promotion");
            item.cancel_load();
            if let Some((backend, handle)) = item.detach() {
                release(backend, handle).await;
            }
        }
        self.next_error = Some(error);
    }

    async fn on_privileges_lost(&mut self, notice: PrivilegesLostNotice) {
        let state = self.state;
        warn!(taken_by = ?notice.taken_by, "Streaming privileges lost");

        let mut session_id = None;
        if let Some(item) = self.current.as_mut() {
            session_id = Some(item.id().to_string());
            item.play_when_loaded = false;
            if state != EngineState::Paused && !item.pause_requested {
                if let Some((backend, handle)) = item.backend().cloned().zip(item.handle()) {
                    item.pause_requested = true;
                    if let Err(e) = backend.pause(handle).await {
                        warn!(error = %e, "Pause after privileges loss failed");
                    }
                }
            }
        }

        self.emit_session(SessionEvent::PrivilegesLost {
            session_id,
            taken_by: notice.taken_by,
        });
    }

    // ------------------------------------------------------------------------
    // State & side effects
    // ------------------------------------------------------------------------

    async fn apply(&mut self, input: Input) {
        let transition = state::reduce(self.state, input);
        if !transition.changed(self.state) {
            return;
        }
        self.state = transition.state;
        self.state_tx.send_replace(self.state);

        for effect in transition.effects {
            match effect {
                Effect::NotifyStateChanged { from, to } => {
                    debug!(%from, %to, "Engine state changed");
                    self.emit(PlaybackEvent::StateChanged { from, to });
                }
                Effect::Collab(sync) => self.sync_collab(sync).await,
                Effect::CrossDeviceInterrupted(kind) => self.notify_cross_device(kind).await,
            }
        }
    }

    async fn sync_collab(&mut self, sync: CollabSync) {
        let Some(collab) = self.config.collaborative_session.clone() else {
            return;
        };
        let Some(item) = self.current.as_ref().filter(|item| item.collab_started) else {
            return;
        };
        let position = item.position().await;
        let request = item.request().clone();

        let result = match sync {
            CollabSync::Resume => collab.play(&request, position).await,
            CollabSync::Pause => collab.pause(&request, position).await,
        };
        if let Err(e) = result {
            self.collab_failed(e);
        }
    }

    async fn notify_cross_device(&self, kind: InterruptionKind) {
        let (Some(hook), Some(credentials)) = (
            self.config.cross_device_hook.clone(),
            self.config.credentials.clone(),
        ) else {
            return;
        };
        let Some(item) = self.current.as_ref() else {
            return;
        };

        let position = item.position().await;
        let session_id = item.id().to_string();
        let request = item.request().clone();
        let clock = Arc::clone(&self.config.clock);

        tokio::spawn(async move {
            let token = match credentials.get_token().await {
                Ok(token) if !token.is_expired(clock.now()) => token,
                Ok(_) => {
                    warn!(session_id = %session_id, "Access token expired, skipping cross-device hook");
                    return;
                }
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "No access token, skipping cross-device hook");
                    return;
                }
            };
            let notice = CrossDeviceNotice {
                session_id,
                request,
                kind,
                position,
                token,
            };
            if let Err(e) = hook.playback_interrupted(notice).await {
                warn!(error = %e, "Cross-device hook failed");
            }
        });
    }

    /// Take an item out of service: cancel its load, close the collaborative
    /// session, record the end, unload the handle and flush its metrics.
    async fn retire(&self, mut item: SessionItem, reason: EndReason) {
        item.cancel_load();
        let position = item.position().await;
        debug!(session_id = %item.id(), ?reason, position_ms = millis(position), "Retiring item");

        if item.collab_started {
            if let Some(collab) = &self.config.collaborative_session {
                if let Err(e) = collab.stop(item.request(), position).await {
                    self.collab_failed(e);
                }
            }
        }

        item.finish(reason, position);
        let handle = item.detach();
        match self.config.settings.metrics_flush {
            MetricsFlushPolicy::Immediate => {
                item.flush();
                if let Some((backend, handle)) = handle {
                    release(backend, handle).await;
                }
            }
            MetricsFlushPolicy::OnTeardown => {
                if let Some((backend, handle)) = handle {
                    release(backend, handle).await;
                }
                drop(item);
            }
        }
    }

    fn notify_loaded(&self, slot: Slot) {
        let item = match slot {
            Slot::Current => self.current.as_ref(),
            Slot::Next => self.next.as_ref(),
        };
        if let Some(item) = item {
            self.emit(PlaybackEvent::ItemLoaded {
                session_id: item.id().to_string(),
                product_id: item.request().product_id.clone(),
                duration_ms: item.duration().map(millis),
                slot,
            });
        }
    }

    fn collab_failed(&self, error: BridgeError) {
        warn!(error = %error, "Collaborative session call failed");
        self.emit_session(SessionEvent::CollaborativeSyncFailed {
            message: error.to_string(),
        });
    }

    fn emit(&self, event: PlaybackEvent) {
        let _ = self.events.emit(CoreEvent::Playback(event));
    }

    fn emit_session(&self, event: SessionEvent) {
        let _ = self.events.emit(CoreEvent::Session(event));
    }

    // ------------------------------------------------------------------------
    // Slot lookup
    // ------------------------------------------------------------------------

    fn item_mut(&mut self, slot: Slot) -> Option<&mut SessionItem> {
        match slot {
            Slot::Current => self.current.as_mut(),
            Slot::Next => self.next.as_mut(),
        }
    }

    fn slot_for_load(&self, token: &LoadToken) -> Option<Slot> {
        if self.current.as_ref().is_some_and(|item| item.matches_load(token)) {
            Some(Slot::Current)
        } else if self.next.as_ref().is_some_and(|item| item.matches_load(token)) {
            Some(Slot::Next)
        } else {
            None
        }
    }

    fn slot_for_report(&self, token: &LoadToken) -> Option<Slot> {
        if self.current.as_ref().is_some_and(|item| item.matches_report(token)) {
            Some(Slot::Current)
        } else if self.next.as_ref().is_some_and(|item| item.matches_report(token)) {
            Some(Slot::Next)
        } else {
            None
        }
    }
}

/// Run a load in its own task and post the result back to the orchestrator.
async fn run_load(
    job: LoadJob,
    token: LoadToken,
    cancel: CancellationToken,
    commands: WeakUnboundedSender<Command>,
) {
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PlaybackError::Cancelled),
        result = job.run() => result,
    };

    let result = match result {
        Ok(media) if cancel.is_cancelled() => {
            release(media.backend, media.handle).await;
            Err(PlaybackError::Cancelled)
        }
        other => other,
    };

    let Some(sender) = commands.upgrade() else {
        if let Ok(media) = result {
            release(media.backend, media.handle).await;
        }
        return;
    };
    if let Err(SendError(Command::LoadFinished {
        result: Ok(media), ..
    })) = sender.send(Command::LoadFinished { token, result })
    {
        release(media.backend, media.handle).await;
    }
}

async fn release(backend: Arc<dyn PlaybackBackend>, handle: BackendHandle) {
    if let Err(e) = backend.unload(handle).await {
        warn!(backend = backend.name(), handle = handle.raw(), error = %e, "Unload failed");
    }
}

async fn next_notice(
    stream: &mut Option<BoxStream<'static, PrivilegesLostNotice>>,
) -> PrivilegesLostNotice {
    loop {
        let Some(notifications) = stream.as_mut() else {
            return std::future::pending().await;
        };
        match notifications.next().await {
            Some(notice) => return notice,
            None => {
                debug!("Exclusivity notifications ended");
                *stream = None;
            }
        }
    }
}
