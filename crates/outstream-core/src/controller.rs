//! Lifecycle controller - orchestrates one outstream placement
//!
//! Coordinates:
//! - SDK loading, engine construction and plugin attachment
//! - The single ad request
//! - Ads-manager subscriptions
//! - Break start and the autoplay fallback timer
//! - Teardown
//!
//! Every input (init step results, SDK callbacks, timer expiry, `start_ad`, teardown) goes through
//! one dispatch queue. A single caller drains the queue at a time; an input raised while the queue
//! is being drained (for example an SDK callback fired from inside `play_ad_break`) is queued
//! behind the current one instead of re-entering the session.

use crate::bridge::{AdBridge, AdBridgeConfig, AdsManager, RequestOutcome};
use crate::best_effort::best_effort;
use crate::diagnostics::{DiagnosticEvent, Diagnostics, OnEvent};
use crate::engine::{EngineHandle, EngineOptions, PlaybackHost};
use crate::error::ErrorInfo;
use crate::events::{AdEvent, AdEventType, PluginEvent, SubscriptionSet};
use crate::machine::{transition, Effect, FallbackState, Input, SessionState};
use crate::sdk::{AdSdk, SdkLoader};
use crate::timer::FallbackTimer;
use crate::types::{LifecyclePhase, MediaElementRef, PlacementConfig, PlacementSnapshot, SessionId};
use crate::{Error, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Collaborators a placement is built from
#[derive(Clone)]
pub struct PlacementDeps {
    /// Page-wide SDK loader, shared by every placement
    pub loader: Arc<SdkLoader>,
    pub host: PlaybackHost,
}

/// Diagnostics-only view of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub phase: LifecyclePhase,
    pub snapshot: PlacementSnapshot,
    pub ad_break_started: bool,
    pub last_error: Option<ErrorInfo>,
    pub fallback: FallbackState,
    /// SDK listeners still registered by this session
    pub active_subscriptions: usize,
    /// An engine exists and has not been disposed
    pub engine_live: bool,
    pub disposed: bool,
}

/// SDK handles that travel with an input
enum Attachment {
    Sdk(Arc<dyn AdSdk>),
    Manager(Arc<dyn AdsManager>),
}

struct Envelope {
    input: Input,
    attachment: Option<Attachment>,
}

impl From<Input> for Envelope {
    fn from(input: Input) -> Self {
        Self {
            input,
            attachment: None,
        }
    }
}

#[derive(Default)]
struct DispatchQueue {
    pending: VecDeque<Envelope>,
    draining: bool,
}

/// Everything the session owns; only touched by the queue drainer
struct Session {
    state: SessionState,
    sdk: Option<Arc<dyn AdSdk>>,
    engine: Option<EngineHandle>,
    bridge: Option<AdBridge>,
    manager: Option<Arc<dyn AdsManager>>,
    subscriptions: SubscriptionSet,
    timer: FallbackTimer,
}

struct Inner {
    id: SessionId,
    config: PlacementConfig,
    bridge_config: AdBridgeConfig,
    media: MediaElementRef,
    deps: PlacementDeps,
    diagnostics: Diagnostics,
    queue: Mutex<DispatchQueue>,
    session: Mutex<Session>,
    snapshot_tx: watch::Sender<PlacementSnapshot>,
    report_tx: watch::Sender<SessionReport>,
    mounted: AtomicBool,
    /// Runtime captured at mount; timers and the SDK load run here whatever thread dispatches
    runtime: OnceLock<Handle>,
    init_task: Mutex<Option<JoinHandle<()>>>,
}

/// Drives a single outstream placement from mount to teardown
///
/// Dropping the controller tears the session down.
pub struct LifecycleController {
    inner: Arc<Inner>,
}

impl LifecycleController {
    /// Create a controller for a validated placement config
    pub fn new(
        config: PlacementConfig,
        media: MediaElementRef,
        deps: PlacementDeps,
        on_event: Option<OnEvent>,
    ) -> Result<Self> {
        config.validate()?;
        let bridge_config = AdBridgeConfig::from_placement(&config)
            .ok_or_else(|| Error::InvalidConfig("ad_tag is required".into()))?;
        // The loader is shared by the page, so it decides which script gets injected
        if deps.loader.script_url() != &config.sdk_script_url {
            return Err(Error::InvalidConfig(format!(
                "sdk_script_url {} does not match the shared loader's {}",
                config.sdk_script_url,
                deps.loader.script_url()
            )));
        }

        let id = SessionId::new();
        let state = SessionState::new();
        let (snapshot_tx, _) = watch::channel(state.snapshot());
        let session = Session {
            state,
            sdk: None,
            engine: None,
            bridge: None,
            manager: None,
            subscriptions: SubscriptionSet::new(),
            timer: FallbackTimer::new(config.fallback_delay()),
        };
        let (report_tx, _) = watch::channel(report_for(id, &session));

        info!(session_id = %id, element = %media, tag = %bridge_config.ad_tag, "Placement created");

        Ok(Self {
            inner: Arc::new(Inner {
                id,
                config,
                bridge_config,
                media,
                deps,
                diagnostics: Diagnostics::new(id, on_event),
                queue: Mutex::new(DispatchQueue::default()),
                session: Mutex::new(session),
                snapshot_tx,
                report_tx,
                mounted: AtomicBool::new(false),
                runtime: OnceLock::new(),
                init_task: Mutex::new(None),
            }),
        })
    }

    /// Get session ID
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn config(&self) -> &PlacementConfig {
        &self.inner.config
    }

    pub fn media_element(&self) -> &MediaElementRef {
        &self.inner.media
    }

    /// Start initialization. Calling it again does nothing.
    ///
    /// Outside a Tokio runtime the session fails with an internal init error.
    #[instrument(skip(self), fields(session_id = %self.inner.id))]
    pub fn mount(&self) {
        if self.inner.mounted.swap(true, Ordering::SeqCst) {
            debug!("Placement already mounted");
            return;
        }
        info!("Mounting placement");
        if let Ok(runtime) = Handle::try_current() {
            let _ = self.inner.runtime.set(runtime);
        }
        self.inner.dispatch(Input::Mount.into());
    }

    /// Start the ad break, from a user gesture or programmatically
    ///
    /// Before ads are ready the start is deferred until they are. Once an ad has started, or
    /// the session has ended, the call is ignored.
    pub fn start_ad(&self) {
        debug!(session_id = %self.inner.id, "start_ad requested");
        self.inner.dispatch(Input::StartRequested.into());
    }

    /// Release listeners, cancel the timer and dispose the engine. Idempotent.
    pub fn teardown(&self) {
        if let Some(task) = self.inner.init_task.lock().take() {
            task.abort();
        }
        self.inner.dispatch(Input::TearDown.into());
    }

    /// Current observable state
    pub fn snapshot(&self) -> PlacementSnapshot {
        *self.inner.snapshot_tx.borrow()
    }

    /// Subscribe to observable state changes
    pub fn subscribe(&self) -> watch::Receiver<PlacementSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.inner.report_tx.borrow().phase
    }

    pub fn last_error(&self) -> Option<ErrorInfo> {
        self.inner.report_tx.borrow().last_error.clone()
    }

    pub fn report(&self) -> SessionReport {
        self.inner.report_tx.borrow().clone()
    }

    /// Subscribe to report changes
    pub fn subscribe_report(&self) -> watch::Receiver<SessionReport> {
        self.inner.report_tx.subscribe()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.inner.diagnostics
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("id", &self.inner.id)
            .field("media", &self.inner.media)
            .field("phase", &self.phase())
            .finish()
    }
}

impl Inner {
    fn runtime(&self) -> Option<Handle> {
        self.runtime
            .get()
            .cloned()
            .or_else(|| Handle::try_current().ok())
    }

    /// Queue an input and drain the queue unless someone else already is
    fn dispatch(self: &Arc<Self>, envelope: Envelope) {
        {
            let mut queue = self.queue.lock();
            queue.pending.push_back(envelope);
            if queue.draining {
                return;
            }
            queue.draining = true;
        }

        loop {
            let next = {
                let mut queue = self.queue.lock();
                match queue.pending.pop_front() {
                    Some(envelope) => envelope,
                    None => {
                        queue.draining = false;
                        return;
                    }
                }
            };

            let follow_ups = match catch_unwind(AssertUnwindSafe(|| self.process(next))) {
                Ok(follow_ups) => follow_ups,
                Err(panic) => {
                    error!(
                        session_id = %self.id,
                        reason = %crate::best_effort::panic_message(panic.as_ref()),
                        "Placement input handler panicked"
                    );
                    Vec::new()
                }
            };

            // Results of this step's own effects run before anything queued meanwhile
            if !follow_ups.is_empty() {
                let mut queue = self.queue.lock();
                for envelope in follow_ups.into_iter().rev() {
                    queue.pending.push_front(envelope);
                }
            }
        }
    }

    /// Apply one input; returns inputs produced by its effects
    fn process(self: &Arc<Self>, envelope: Envelope) -> Vec<Envelope> {
        let mut session = self.session.lock();

        if let Some(attachment) = envelope.attachment {
            if !session.state.disposed {
                match attachment {
                    Attachment::Sdk(sdk) => session.sdk = Some(sdk),
                    Attachment::Manager(manager) if session.manager.is_none() => {
                        session.manager = Some(manager)
                    }
                    Attachment::Manager(_) => debug!("Duplicate ads-manager handle dropped"),
                }
            }
        }

        let before = session.state.phase;
        let auto_start = self.bridge_config.auto_start_break;
        let step = transition(&session.state, &envelope.input, auto_start);
        if step.is_noop(&session.state) {
            return Vec::new();
        }

        session.state = step.state;
        let after = session.state.phase;
        if before != after {
            if let Err(e) = check_phase_change(before, after) {
                error!(session_id = %self.id, error = %e, "Unexpected lifecycle transition");
            }
            info!(session_id = %self.id, from = %before, to = %after, "Placement phase changed");
        }
        if let Input::InitFailed(info) = &envelope.input {
            error!(session_id = %self.id, code = %info.code, message = %info.message, "Placement initialization failed");
        }
        if let Input::AdError(message) = &envelope.input {
            warn!(session_id = %self.id, message = ?message, "Ad error; session ended");
        }

        self.publish(&session);

        let mut follow_ups = Vec::new();
        for effect in step.effects {
            self.run_effect(&mut session, effect, &mut follow_ups);
        }

        self.publish(&session);
        follow_ups
    }

    fn run_effect(self: &Arc<Self>, session: &mut Session, effect: Effect, follow_ups: &mut Vec<Envelope>) {
        match effect {
            Effect::LoadSdk => self.spawn_sdk_load(follow_ups),
            Effect::CreateEngine => {
                match self.deps.host.create(&self.media, &EngineOptions::outstream()) {
                    Ok(handle) => {
                        session.engine = Some(handle);
                        follow_ups.push(Input::EngineCreated.into());
                    }
                    Err(e) => follow_ups.push(Input::InitFailed(e.info()).into()),
                }
            }
            Effect::AttachBridge => self.attach_bridge(session, follow_ups),
            Effect::RequestAds => {
                let Some(bridge) = &session.bridge else {
                    warn!(session_id = %self.id, "Ad request without a bridge");
                    return;
                };
                bridge.mark_loader_ready();
                match bridge.request_ads(&self.bridge_config.ad_tag) {
                    Ok(RequestOutcome::Issued) => {}
                    Ok(outcome) => debug!(?outcome, "Ad request not issued"),
                    Err(e) => follow_ups.push(Input::AdError(Some(e.to_string())).into()),
                }
            }
            Effect::SubscribeAdsManager => self.subscribe_manager(session),
            Effect::InitializeDisplayContainer => {
                if let Some(bridge) = &session.bridge {
                    if let Err(failure) = best_effort("initialize_display_container", || {
                        bridge.initialize_display_container()
                    }) {
                        self.diagnostics.emit(DiagnosticEvent::BestEffortFailed {
                            operation: failure.operation.to_string(),
                            reason: failure.reason,
                        });
                    }
                }
            }
            Effect::PlayAdBreak => {
                if let Some(bridge) = &session.bridge {
                    // A blocked start surfaces through the fallback timer
                    if let Err(failure) = best_effort("play_ad_break", || bridge.play_ad_break()) {
                        self.diagnostics.emit(DiagnosticEvent::BestEffortFailed {
                            operation: failure.operation.to_string(),
                            reason: failure.reason,
                        });
                    }
                }
            }
            Effect::ArmFallback { generation } => {
                let Some(runtime) = self.runtime() else {
                    // Nothing could ever fire the timer; offer the manual start right away
                    warn!(session_id = %self.id, generation, "No Tokio runtime; fallback expires now");
                    follow_ups.push(Input::FallbackElapsed { generation }.into());
                    return;
                };
                let weak = Arc::downgrade(self);
                session.timer.arm(&runtime, generation, move |generation| {
                    if let Some(inner) = weak.upgrade() {
                        inner.dispatch(Input::FallbackElapsed { generation }.into());
                    }
                });
            }
            Effect::DisarmFallback => {
                session.timer.disarm();
            }
            Effect::Emit(event) => self.diagnostics.emit(event),
            Effect::ReleaseSubscriptions => {
                let released = session.subscriptions.release_all();
                debug!(session_id = %self.id, released, "Subscriptions released");
            }
            Effect::DisposeEngine => {
                session.manager = None;
                session.bridge = None;
                session.sdk = None;
                if let Some(engine) = &session.engine {
                    engine.dispose();
                }
                info!(session_id = %self.id, "Placement torn down");
            }
        }
    }

    fn spawn_sdk_load(self: &Arc<Self>, follow_ups: &mut Vec<Envelope>) {
        let Some(runtime) = self.runtime() else {
            let e = Error::Internal("mount requires a Tokio runtime".into());
            follow_ups.push(Input::InitFailed(e.info()).into());
            return;
        };

        let loader = self.deps.loader.clone();
        let weak = Arc::downgrade(self);
        let task = runtime.spawn(async move {
            let result = loader.ensure_loaded().await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match result {
                Ok(sdk) => inner.dispatch(Envelope {
                    input: Input::SdkLoaded,
                    attachment: Some(Attachment::Sdk(sdk)),
                }),
                Err(e) => inner.dispatch(Input::InitFailed(e.info()).into()),
            }
        });
        *self.init_task.lock() = Some(task);
    }

    fn attach_bridge(self: &Arc<Self>, session: &mut Session, follow_ups: &mut Vec<Envelope>) {
        let (Some(engine), Some(sdk)) = (&session.engine, &session.sdk) else {
            let e = Error::AdBridgeAttach("engine or SDK missing".into());
            follow_ups.push(Input::InitFailed(e.info()).into());
            return;
        };

        let bridge = match AdBridge::attach(engine, sdk, self.bridge_config.clone()) {
            Ok(bridge) => bridge,
            Err(e) => {
                follow_ups.push(Input::InitFailed(e.info()).into());
                return;
            }
        };

        let weak = Arc::downgrade(self);
        let subscription = bridge.subscribe(Box::new(move |event| on_plugin_event(&weak, event)));
        session.subscriptions.push(subscription);
        session.bridge = Some(bridge);
        follow_ups.push(Input::BridgeAttached.into());
    }

    fn subscribe_manager(self: &Arc<Self>, session: &mut Session) {
        let Some(manager) = session.manager.clone() else {
            warn!(session_id = %self.id, "Ads-manager handle missing");
            return;
        };

        for kind in AdEventType::SUBSCRIBED {
            let weak = Arc::downgrade(self);
            let subscription = manager.add_event_listener(
                kind,
                Box::new(move |event| on_ad_event(&weak, event)),
            );
            session.subscriptions.push(subscription);
        }
        debug!(session_id = %self.id, count = AdEventType::SUBSCRIBED.len(), "Ads-manager listeners registered");
    }

    fn publish(&self, session: &Session) {
        let snapshot = session.state.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });

        let report = report_for(self.id, session);
        self.report_tx.send_if_modified(|current| {
            if *current == report {
                return false;
            }
            *current = report;
            true
        });
    }
}

fn on_plugin_event(weak: &Weak<Inner>, event: PluginEvent) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    debug!(session_id = %inner.id, event = event.name(), "Plugin event");

    let envelope = match event {
        PluginEvent::LoaderReady => Input::LoaderReady.into(),
        PluginEvent::AdsManager(manager) => Envelope {
            input: Input::AdsManagerCreated,
            attachment: Some(Attachment::Manager(manager)),
        },
        PluginEvent::AdsReady => Input::AdsReady.into(),
        PluginEvent::AdStarted => Input::AdStarted.into(),
        PluginEvent::AdEnded => Input::AdComplete.into(),
        PluginEvent::AdError(err) => Input::AdError(err.message().map(str::to_string)).into(),
    };
    inner.dispatch(envelope);
}

fn on_ad_event(weak: &Weak<Inner>, event: AdEvent) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    debug!(session_id = %inner.id, kind = ?event.event_type(), "Ads-manager event");

    let input = match event {
        AdEvent::Loaded => Input::CreativeLoaded,
        AdEvent::Started => Input::AdStarted,
        AdEvent::Complete | AdEvent::AllAdsCompleted => Input::AdComplete,
        AdEvent::AdError(err) => Input::AdError(err.message().map(str::to_string)),
    };
    inner.dispatch(input.into());
}

fn report_for(session_id: SessionId, session: &Session) -> SessionReport {
    SessionReport {
        session_id,
        phase: session.state.phase,
        snapshot: session.state.snapshot(),
        ad_break_started: session.state.ad_break_started,
        last_error: session.state.last_error.clone(),
        fallback: session.state.fallback,
        active_subscriptions: session.subscriptions.active(),
        engine_live: session.engine.as_ref().is_some_and(|e| !e.is_disposed()),
        disposed: session.state.disposed,
    }
}

fn check_phase_change(from: LifecyclePhase, to: LifecyclePhase) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
