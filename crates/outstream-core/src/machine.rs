//! Placement state machine
//!
//! Transitions are pure: [`transition`] takes the current [`SessionState`] and an [`Input`]
//! and returns the next state together with the [`Effect`]s the controller must perform.
//! Nothing here touches the SDK, the clock, or a runtime.
//!
//! Inputs that arrive out of order or twice leave the state unchanged and produce no effects.

use crate::diagnostics::{DiagnosticEvent, StartTrigger};
use crate::error::ErrorInfo;
use crate::types::{LifecyclePhase, PlacementSnapshot, SessionFlags};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Fallback timer status as seen by the state machine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FallbackState {
    #[default]
    Disarmed,
    Armed { generation: u64 },
    Fired,
}

/// State owned by one placement session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub phase: LifecyclePhase,
    pub sdk_loaded: bool,
    pub player_ready: bool,
    pub ads_requested: bool,
    pub ads_manager_ready: bool,
    pub ads_ready: bool,
    pub ad_break_started: bool,
    pub needs_gesture: bool,
    pub last_error: Option<ErrorInfo>,
    /// `start_ad()` arrived before ads were ready
    pub start_pending: bool,
    pub fallback: FallbackState,
    next_generation: u64,
    /// Torn down; every further input is ignored
    pub disposed: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            phase: LifecyclePhase::Idle,
            sdk_loaded: false,
            player_ready: false,
            ads_requested: false,
            ads_manager_ready: false,
            ads_ready: false,
            ad_break_started: false,
            needs_gesture: false,
            last_error: None,
            start_pending: false,
            fallback: FallbackState::Disarmed,
            next_generation: 1,
            disposed: false,
        }
    }

    pub fn flags(&self) -> SessionFlags {
        SessionFlags {
            request_ads_called: self.ads_requested,
            ads_manager_loaded: self.ads_manager_ready,
            ads_ready: self.ads_ready,
        }
    }

    pub fn snapshot(&self) -> PlacementSnapshot {
        PlacementSnapshot {
            flags: self.flags(),
            needs_gesture: self.needs_gesture,
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Something that happened to a placement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// View mounted the placement
    Mount,
    /// SDK capability became available
    SdkLoaded,
    /// Playback engine constructed
    EngineCreated,
    /// Ad plugin attached and subscribed
    BridgeAttached,
    /// SDK load, engine construction, or plugin attach failed
    InitFailed(ErrorInfo),
    /// Plugin's ads loader exists
    LoaderReady,
    /// Ads-manager created
    AdsManagerCreated,
    /// Creative loaded
    CreativeLoaded,
    /// Break can be started
    AdsReady,
    /// Ad playback confirmed
    AdStarted,
    /// Ad, break, or all ads completed
    AdComplete,
    /// Ad-level error with the SDK's message
    AdError(Option<String>),
    /// Fallback timer expired
    FallbackElapsed { generation: u64 },
    /// `start_ad()` called
    StartRequested,
    /// View unmounted the placement
    TearDown,
}

/// Side effect the controller performs after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    LoadSdk,
    CreateEngine,
    AttachBridge,
    RequestAds,
    SubscribeAdsManager,
    InitializeDisplayContainer,
    PlayAdBreak,
    ArmFallback { generation: u64 },
    DisarmFallback,
    Emit(DiagnosticEvent),
    ReleaseSubscriptions,
    DisposeEngine,
}

/// Next state plus the effects to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: SessionState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn unchanged(state: &SessionState) -> Self {
        Self {
            state: state.clone(),
            effects: Vec::new(),
        }
    }

    /// Whether the input changed anything
    pub fn is_noop(&self, before: &SessionState) -> bool {
        self.effects.is_empty() && self.state == *before
    }
}

/// Compute the transition for `input`.
///
/// `auto_start` starts the break as soon as ads are ready.
pub fn transition(state: &SessionState, input: &Input, auto_start: bool) -> Transition {
    if state.disposed {
        debug!(?input, "Input after teardown ignored");
        return Transition::unchanged(state);
    }

    let mut next = state.clone();
    let mut effects = Vec::new();

    use LifecyclePhase as P;
    match input {
        Input::Mount if state.phase == P::Idle => {
            next.phase = P::SdkLoading;
            effects.push(Effect::LoadSdk);
        }
        Input::SdkLoaded if state.phase == P::SdkLoading && !state.sdk_loaded => {
            next.sdk_loaded = true;
            effects.push(Effect::Emit(DiagnosticEvent::SdkLoaded));
            effects.push(Effect::CreateEngine);
        }
        Input::EngineCreated
            if state.phase == P::SdkLoading && state.sdk_loaded && !state.player_ready =>
        {
            next.player_ready = true;
            effects.push(Effect::AttachBridge);
        }
        Input::BridgeAttached if state.phase == P::SdkLoading && state.player_ready => {
            next.phase = P::EngineReady;
            effects.push(Effect::Emit(DiagnosticEvent::EngineReady));
        }
        Input::InitFailed(info) if !state.phase.is_terminal() => {
            enter_error(&mut next, &mut effects, info.clone());
            effects.push(Effect::Emit(DiagnosticEvent::InitFailed {
                code: info.code.clone(),
                message: info.message.clone(),
            }));
        }
        Input::LoaderReady if state.phase == P::EngineReady && !state.ads_requested => {
            next.ads_requested = true;
            next.phase = P::AdsRequested;
            effects.push(Effect::RequestAds);
            effects.push(Effect::Emit(DiagnosticEvent::RequestAds));
        }
        Input::AdsManagerCreated if state.phase == P::AdsRequested => {
            next.ads_manager_ready = true;
            next.phase = P::ManagerReady;
            effects.push(Effect::SubscribeAdsManager);
            effects.push(Effect::Emit(DiagnosticEvent::AdsManager));
        }
        Input::CreativeLoaded
            if matches!(state.phase, P::ManagerReady | P::AdsReady | P::AdBreakStarted) =>
        {
            effects.push(Effect::Emit(DiagnosticEvent::AdLoaded));
        }
        Input::AdsReady if state.phase == P::ManagerReady => {
            next.ads_ready = true;
            next.phase = P::AdsReady;
            effects.push(Effect::Emit(DiagnosticEvent::AdsReady));

            if state.start_pending || auto_start {
                let trigger = if state.start_pending {
                    StartTrigger::Deferred
                } else {
                    StartTrigger::Auto
                };
                next.start_pending = false;
                begin_break(&mut next, &mut effects, trigger);
            }
        }
        Input::AdStarted if state.phase == P::AdsReady => {
            next.ad_break_started = true;
            next.needs_gesture = false;
            next.phase = P::AdBreakStarted;
            disarm(&mut next, &mut effects);
            effects.push(Effect::Emit(DiagnosticEvent::AdStarted));
        }
        Input::AdComplete if state.phase == P::AdBreakStarted => {
            next.phase = P::Complete;
            effects.push(Effect::Emit(DiagnosticEvent::AdDone));
        }
        Input::AdError(message) if !state.phase.is_terminal() => {
            enter_error(&mut next, &mut effects, ErrorInfo::ad_serving(message.as_deref()));
            effects.push(Effect::Emit(DiagnosticEvent::AdError {
                message: message.clone(),
            }));
        }
        Input::FallbackElapsed { generation }
            if state.fallback == (FallbackState::Armed { generation: *generation })
                && state.phase == P::AdsReady
                && !state.ad_break_started =>
        {
            next.fallback = FallbackState::Fired;
            next.needs_gesture = true;
            effects.push(Effect::Emit(DiagnosticEvent::NeedsGesture));
        }
        Input::StartRequested => start_requested(state, &mut next, &mut effects),
        Input::TearDown => {
            next.disposed = true;
            next.needs_gesture = false;
            next.start_pending = false;
            next.fallback = FallbackState::Disarmed;
            effects.push(Effect::DisarmFallback);
            effects.push(Effect::ReleaseSubscriptions);
            effects.push(Effect::DisposeEngine);
            effects.push(Effect::Emit(DiagnosticEvent::Teardown));
        }
        other => {
            debug!(input = ?other, phase = %state.phase, "Out-of-order or duplicate input ignored");
        }
    }

    Transition {
        state: next,
        effects,
    }
}

fn start_requested(state: &SessionState, next: &mut SessionState, effects: &mut Vec<Effect>) {
    use LifecyclePhase as P;

    if state.phase.is_terminal() || state.ad_break_started {
        let reason = if state.ad_break_started {
            "ad break already started"
        } else {
            "session ended"
        };
        effects.push(Effect::Emit(DiagnosticEvent::StartIgnored {
            reason: reason.to_string(),
        }));
        return;
    }

    if state.phase == P::AdsReady {
        begin_break(next, effects, StartTrigger::Manual);
        return;
    }

    if !state.start_pending {
        next.start_pending = true;
        effects.push(Effect::Emit(DiagnosticEvent::StartDeferred));
    }
}

/// Display-container handshake, break start, and fallback arming
fn begin_break(next: &mut SessionState, effects: &mut Vec<Effect>, trigger: StartTrigger) {
    effects.push(Effect::InitializeDisplayContainer);
    effects.push(Effect::PlayAdBreak);
    effects.push(Effect::Emit(DiagnosticEvent::PlayAdBreak { trigger }));

    // A running or already fired fallback stays as it is
    if next.fallback == FallbackState::Disarmed {
        let generation = next.next_generation;
        next.next_generation += 1;
        next.fallback = FallbackState::Armed { generation };
        effects.push(Effect::ArmFallback { generation });
    }
}

fn disarm(next: &mut SessionState, effects: &mut Vec<Effect>) {
    if matches!(next.fallback, FallbackState::Armed { .. }) {
        effects.push(Effect::DisarmFallback);
    }
    next.fallback = FallbackState::Disarmed;
}

fn enter_error(next: &mut SessionState, effects: &mut Vec<Effect>, info: ErrorInfo) {
    next.phase = LifecyclePhase::Error;
    next.needs_gesture = false;
    next.start_pending = false;
    next.last_error = Some(info);
    disarm(next, effects);
}
