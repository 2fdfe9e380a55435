//! In-process ad SDK simulator
//!
//! [`SimulatedSdk`] implements every capability trait a placement needs (SDK provider, engine
//! factory, ad plugin, ads-manager) and plays a [`SimScript`] timeline on the Tokio clock:
//!
//! ```text
//! subscribe ──loader_ready_delay──▶ LoaderReady
//! request_ads ──ads_manager_delay──▶ AdsManager ──ads_ready_delay──▶ AdsReady
//! play_ad_break ──▶ Loaded ──ad_start_delay──▶ Started ──ad_duration──▶ Complete
//! ```
//!
//! Under [`AutoplayPolicy::GestureRequired`] a break only starts once the display container
//! was initialized inside [`SimulatedSdk::with_user_gesture`].

use crate::bridge::{AdPlugin, AdsManager, PluginOptions};
use crate::engine::{EngineFactory, EngineOptions, PlaybackEngine};
use crate::events::{AdError, AdEvent, AdEventType, Listener, PluginEvent, Subscription};
use crate::sdk::{AdSdk, AdSdkProvider};
use crate::types::{AdTagRef, MediaElementRef};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use url::Url;

type SharedListener<E> = Arc<dyn Fn(E) + Send + Sync>;

/// Browser autoplay policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoplayPolicy {
    /// Programmatic starts play
    #[default]
    Allowed,
    /// Starts need a display container initialized inside a user gesture
    GestureRequired,
}

/// Where an injected ad error is raised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStage {
    /// Plugin error instead of an ads-manager
    Request,
    /// Ads-manager error instead of the ad starting
    Playback,
}

/// Injected ad error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimAdError {
    pub stage: ErrorStage,
    pub error: AdError,
}

/// Timeline and failure script for a simulated SDK
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimScript {
    /// SDK already on the page
    pub preinstalled: bool,
    pub script_load_delay: Duration,
    pub script_fails: bool,
    /// From the first plugin subscription
    pub loader_ready_delay: Duration,
    /// From the ad request
    pub ads_manager_delay: Duration,
    /// From ads-manager creation
    pub ads_ready_delay: Duration,
    pub autoplay: AutoplayPolicy,
    /// From a break start that was allowed to play
    pub ad_start_delay: Duration,
    pub ad_duration: Duration,
    pub ad_error: Option<SimAdError>,
    /// The engine rejects the ad plugin
    pub refuse_plugin: bool,
    /// Engine construction fails
    pub engine_fails: bool,
    pub version: String,
}

impl Default for SimScript {
    fn default() -> Self {
        Self {
            preinstalled: false,
            script_load_delay: Duration::from_millis(20),
            script_fails: false,
            loader_ready_delay: Duration::from_millis(50),
            ads_manager_delay: Duration::from_millis(50),
            ads_ready_delay: Duration::from_millis(50),
            autoplay: AutoplayPolicy::Allowed,
            ad_start_delay: Duration::from_millis(150),
            ad_duration: Duration::from_secs(15),
            ad_error: None,
            refuse_plugin: false,
            engine_fails: false,
            version: "3.0-sim".to_string(),
        }
    }
}

impl SimScript {
    pub fn preinstalled(mut self) -> Self {
        self.preinstalled = true;
        self
    }

    pub fn with_autoplay(mut self, policy: AutoplayPolicy) -> Self {
        self.autoplay = policy;
        self
    }

    pub fn with_ad_start_delay(mut self, delay: Duration) -> Self {
        self.ad_start_delay = delay;
        self
    }

    pub fn with_ad_error(mut self, stage: ErrorStage, message: &str) -> Self {
        self.ad_error = Some(SimAdError {
            stage,
            error: AdError::new(Some(1009), message),
        });
        self
    }
}

/// Calls observed by the simulator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimStats {
    pub script_injections: usize,
    pub engines_created: usize,
    pub engines_disposed: usize,
    pub plugins_attached: usize,
    pub change_ad_tag: usize,
    pub request_ads: usize,
    pub display_inits: usize,
    pub play_ad_break: usize,
    /// Break starts refused by the autoplay policy
    pub blocked_starts: usize,
    /// Listeners currently registered on plugins and ads-managers
    pub active_listeners: usize,
}

/// Listener list with removable entries
struct ListenerRegistry<E> {
    label: &'static str,
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, SharedListener<E>)>>,
}

impl<E: Clone + 'static> ListenerRegistry<E> {
    fn new(label: &'static str) -> Arc<Self> {
        Arc::new(Self {
            label,
            next_id: AtomicU64::new(0),
            entries: Mutex::new(Vec::new()),
        })
    }

    fn add(self: &Arc<Self>, listener: Listener<E>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().push((id, Arc::from(listener)));

        let registry: Weak<Self> = Arc::downgrade(self);
        Subscription::new(self.label, move || {
            if let Some(registry) = registry.upgrade() {
                registry.entries.lock().retain(|(entry, _)| *entry != id);
            }
        })
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Call every listener; the lock is not held while they run
    fn emit(&self, event: E) {
        let listeners: Vec<_> = self.entries.lock().iter().map(|(_, l)| l.clone()).collect();
        trace!(label = self.label, listeners = listeners.len(), "Simulated event");
        for listener in listeners {
            listener(event.clone());
        }
    }
}

struct SimInner {
    script: SimScript,
    installed: AtomicBool,
    gesture_depth: AtomicUsize,
    stats: Mutex<SimStats>,
    /// Plugins still owned by an engine or bridge
    plugins: Mutex<Vec<Weak<PluginCore>>>,
}

impl SimInner {
    fn in_gesture(&self) -> bool {
        self.gesture_depth.load(Ordering::SeqCst) > 0
    }

    fn bump(&self, f: impl FnOnce(&mut SimStats)) {
        f(&mut *self.stats.lock());
    }
}

/// Scripted stand-in for the ad SDK and playback engine
#[derive(Clone)]
pub struct SimulatedSdk {
    inner: Arc<SimInner>,
}

impl SimulatedSdk {
    pub fn new(script: SimScript) -> Self {
        Self {
            inner: Arc::new(SimInner {
                installed: AtomicBool::new(script.preinstalled),
                script,
                gesture_depth: AtomicUsize::new(0),
                stats: Mutex::new(SimStats::default()),
                plugins: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn script(&self) -> &SimScript {
        &self.inner.script
    }

    pub fn provider(&self) -> Arc<dyn AdSdkProvider> {
        Arc::new(SimProvider {
            sim: self.inner.clone(),
        })
    }

    pub fn engine_factory(&self) -> Arc<dyn EngineFactory> {
        Arc::new(SimEngineFactory {
            sim: self.inner.clone(),
        })
    }

    pub fn stats(&self) -> SimStats {
        let mut stats = self.inner.stats.lock().clone();
        stats.active_listeners = self
            .plugins()
            .iter()
            .map(|plugin| plugin.listener_count())
            .sum();
        stats
    }

    /// Run `f` as if inside a user gesture
    pub fn with_user_gesture<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.gesture_depth.fetch_add(1, Ordering::SeqCst);
        let result = f();
        self.inner.gesture_depth.fetch_sub(1, Ordering::SeqCst);
        result
    }

    /// Deliver a plugin event to every attached plugin's listeners right now
    pub fn fire_plugin_event(&self, event: PluginEvent) {
        for plugin in self.plugins() {
            plugin.listeners.emit(event.clone());
        }
    }

    /// Deliver an ads-manager event to every attached plugin's manager right now
    pub fn fire_ad_event(&self, event: AdEvent) {
        for plugin in self.plugins() {
            plugin.manager.emit(event.clone());
        }
    }

    /// Ads-manager of the most recently attached plugin
    pub fn ads_manager(&self) -> Option<Arc<dyn AdsManager>> {
        self.plugins()
            .last()
            .map(|plugin| plugin.manager.clone() as Arc<dyn AdsManager>)
    }

    /// Registration options of the most recently attached plugin
    pub fn plugin_options(&self) -> Option<PluginOptions> {
        self.plugins().last().map(|plugin| plugin.options.clone())
    }

    fn plugins(&self) -> Vec<Arc<PluginCore>> {
        self.inner
            .plugins
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }
}

struct SimCapability {
    version: String,
}

impl AdSdk for SimCapability {
    fn version(&self) -> String {
        self.version.clone()
    }
}

struct SimProvider {
    sim: Arc<SimInner>,
}

#[async_trait]
impl AdSdkProvider for SimProvider {
    fn capability(&self) -> Option<Arc<dyn AdSdk>> {
        self.sim.installed.load(Ordering::SeqCst).then(|| {
            Arc::new(SimCapability {
                version: self.sim.script.version.clone(),
            }) as Arc<dyn AdSdk>
        })
    }

    async fn inject_script(&self, src: &Url) -> std::result::Result<(), String> {
        self.sim.bump(|s| s.script_injections += 1);
        debug!(src = %src, "Simulated script injected");
        tokio::time::sleep(self.sim.script.script_load_delay).await;

        if self.sim.script.script_fails {
            return Err(format!("{src}: net::ERR_BLOCKED_BY_CLIENT"));
        }
        self.sim.installed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct SimEngineFactory {
    sim: Arc<SimInner>,
}

impl EngineFactory for SimEngineFactory {
    fn create(
        &self,
        element: &MediaElementRef,
        options: &EngineOptions,
    ) -> std::result::Result<Arc<dyn PlaybackEngine>, String> {
        if self.sim.script.engine_fails {
            return Err(format!("{element} is not a media element"));
        }
        self.sim.bump(|s| s.engines_created += 1);
        debug!(element = %element, ?options, "Simulated engine created");

        Ok(Arc::new(SimEngine {
            sim: self.sim.clone(),
            plugins: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }))
    }
}

struct SimEngine {
    sim: Arc<SimInner>,
    plugins: Mutex<Vec<Arc<PluginCore>>>,
    disposed: AtomicBool,
}

impl PlaybackEngine for SimEngine {
    fn attach_ad_plugin(
        &self,
        _sdk: &Arc<dyn AdSdk>,
        options: &PluginOptions,
    ) -> std::result::Result<Arc<dyn AdPlugin>, String> {
        if self.sim.script.refuse_plugin || self.disposed.load(Ordering::SeqCst) {
            return Err("ads plugin is not registered on this engine".into());
        }
        self.sim.bump(|s| s.plugins_attached += 1);

        let core = Arc::new(PluginCore {
            sim: self.sim.clone(),
            options: options.clone(),
            listeners: ListenerRegistry::new("plugin"),
            manager: Arc::new(SimManager::new()),
            tag: Mutex::new(options.ad_tag.clone()),
            timeline_started: AtomicBool::new(false),
            manager_created: AtomicBool::new(false),
            display_in_gesture: AtomicBool::new(false),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        });
        self.plugins.lock().push(core.clone());
        self.sim.plugins.lock().push(Arc::downgrade(&core));

        Ok(Arc::new(SimPlugin { core }))
    }

    fn dispose(&self) -> std::result::Result<(), String> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Err("engine already disposed".into());
        }
        for plugin in self.plugins.lock().drain(..) {
            plugin.abort_tasks();
        }
        self.sim.bump(|s| s.engines_disposed += 1);
        Ok(())
    }
}

struct PluginCore {
    sim: Arc<SimInner>,
    options: PluginOptions,
    listeners: Arc<ListenerRegistry<PluginEvent>>,
    manager: Arc<SimManager>,
    tag: Mutex<Option<AdTagRef>>,
    timeline_started: AtomicBool,
    manager_created: AtomicBool,
    display_in_gesture: AtomicBool,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PluginCore {
    fn listener_count(&self) -> usize {
        self.listeners.len() + self.manager.listener_count()
    }

    fn spawn(&self, task: impl std::future::Future<Output = ()> + Send + 'static) {
        self.tasks.lock().push(tokio::spawn(task));
    }

    fn abort_tasks(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

struct SimPlugin {
    core: Arc<PluginCore>,
}

impl AdPlugin for SimPlugin {
    fn subscribe(&self, listener: Listener<PluginEvent>) -> Subscription {
        let subscription = self.core.listeners.add(listener);

        if !self.core.timeline_started.swap(true, Ordering::SeqCst) {
            let core = self.core.clone();
            self.core.spawn(async move {
                tokio::time::sleep(core.sim.script.loader_ready_delay).await;
                core.listeners.emit(PluginEvent::LoaderReady);
            });
        }
        subscription
    }

    fn change_ad_tag(&self, tag: &AdTagRef) {
        self.core.sim.bump(|s| s.change_ad_tag += 1);
        *self.core.tag.lock() = Some(tag.clone());
    }

    fn request_ads(&self) -> std::result::Result<(), String> {
        self.core.sim.bump(|s| s.request_ads += 1);
        if self.core.tag.lock().is_none() {
            return Err("no ad tag set".into());
        }

        let core = self.core.clone();
        self.core.spawn(async move {
            let script = &core.sim.script;
            tokio::time::sleep(script.ads_manager_delay).await;

            if let Some(SimAdError {
                stage: ErrorStage::Request,
                error,
            }) = &script.ad_error
            {
                core.listeners.emit(PluginEvent::AdError(error.clone()));
                return;
            }

            core.manager_created.store(true, Ordering::SeqCst);
            core.listeners
                .emit(PluginEvent::AdsManager(core.manager.clone() as Arc<dyn AdsManager>));

            tokio::time::sleep(script.ads_ready_delay).await;
            core.listeners.emit(PluginEvent::AdsReady);
        });
        Ok(())
    }

    fn initialize_display_container(&self) -> std::result::Result<(), String> {
        self.core.sim.bump(|s| s.display_inits += 1);
        if self.core.sim.in_gesture() {
            self.core.display_in_gesture.store(true, Ordering::SeqCst);
            return Ok(());
        }
        match self.core.sim.script.autoplay {
            AutoplayPolicy::Allowed => Ok(()),
            AutoplayPolicy::GestureRequired => {
                Err("display container must be initialized by a user action".into())
            }
        }
    }

    fn play_ad_break(&self) -> std::result::Result<(), String> {
        self.core.sim.bump(|s| s.play_ad_break += 1);
        if !self.core.manager_created.load(Ordering::SeqCst) {
            return Err("ads manager not loaded".into());
        }

        let allowed = match self.core.sim.script.autoplay {
            AutoplayPolicy::Allowed => true,
            AutoplayPolicy::GestureRequired => self.core.display_in_gesture.load(Ordering::SeqCst),
        };
        if !allowed {
            self.core.sim.bump(|s| s.blocked_starts += 1);
            debug!("Simulated break start blocked by autoplay policy");
            return Ok(());
        }
        if self.core.started.swap(true, Ordering::SeqCst) {
            debug!("Simulated break already playing");
            return Ok(());
        }

        let core = self.core.clone();
        self.core.spawn(async move {
            let script = &core.sim.script;
            core.manager.emit(AdEvent::Loaded);
            tokio::time::sleep(script.ad_start_delay).await;

            if let Some(SimAdError {
                stage: ErrorStage::Playback,
                error,
            }) = &script.ad_error
            {
                core.manager.emit(AdEvent::AdError(error.clone()));
                return;
            }

            core.manager.emit(AdEvent::Started);
            core.listeners.emit(PluginEvent::AdStarted);

            tokio::time::sleep(script.ad_duration).await;
            core.manager.emit(AdEvent::Complete);
            core.manager.emit(AdEvent::AllAdsCompleted);
            core.listeners.emit(PluginEvent::AdEnded);
        });
        Ok(())
    }
}

struct SimManager {
    registries: HashMap<AdEventType, Arc<ListenerRegistry<AdEvent>>>,
}

impl SimManager {
    fn new() -> Self {
        Self {
            registries: AdEventType::SUBSCRIBED
                .into_iter()
                .map(|kind| (kind, ListenerRegistry::new("ads-manager")))
                .collect(),
        }
    }

    fn listener_count(&self) -> usize {
        self.registries.values().map(|r| r.len()).sum()
    }

    fn emit(&self, event: AdEvent) {
        if let Some(registry) = self.registries.get(&event.event_type()) {
            registry.emit(event);
        }
    }
}

impl AdsManager for SimManager {
    fn add_event_listener(&self, kind: AdEventType, listener: Listener<AdEvent>) -> Subscription {
        match self.registries.get(&kind) {
            Some(registry) => registry.add(listener),
            None => Subscription::new("ads-manager", || {}),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_gesture_required_blocks_programmatic_start() {
        let sim = SimulatedSdk::new(
            SimScript::default()
                .preinstalled()
                .with_autoplay(AutoplayPolicy::GestureRequired),
        );
        let factory = sim.engine_factory();
        let engine = factory
            .create(&MediaElementRef::new("ad-video"), &EngineOptions::outstream())
            .unwrap();
        let sdk = sim.provider().capability().unwrap();
        let options = crate::bridge::AdBridgeConfig {
            ad_tag: AdTagRef::parse("https://ads.example.com/vast.xml").unwrap(),
            auto_start_break: true,
            suppress_builtin_ui: true,
            timeout: Duration::from_secs(8),
        }
        .plugin_options(sdk.as_ref());
        let plugin = engine.attach_ad_plugin(&sdk, &options).unwrap();

        plugin.change_ad_tag(&AdTagRef::parse("https://ads.example.com/vast.xml").unwrap());
        plugin.request_ads().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(plugin.initialize_display_container().is_err());
        plugin.play_ad_break().unwrap();
        assert_eq!(sim.stats().blocked_starts, 1);

        sim.with_user_gesture(|| {
            plugin.initialize_display_container().unwrap();
            plugin.play_ad_break().unwrap();
        });
        assert_eq!(sim.stats().blocked_starts, 1);
        assert_eq!(sim.stats().play_ad_break, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_subscription_stops_delivery() {
        let sim = SimulatedSdk::new(SimScript::default());
        let engine = sim
            .engine_factory()
            .create(&MediaElementRef::new("ad-video"), &EngineOptions::outstream())
            .unwrap();
        let sdk: Arc<dyn AdSdk> = Arc::new(SimCapability {
            version: "test".into(),
        });
        let plugin = engine
            .attach_ad_plugin(&sdk, &PluginOptions {
                ad_tag: None,
                auto_play_ad_breaks: false,
                show_countdown: false,
                player_mode: crate::bridge::PlayerMode::Outstream,
                timeout: Duration::from_secs(8),
                rendering: None,
            })
            .unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let subscription = plugin.subscribe(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(sim.stats().active_listeners, 1);

        sim.fire_plugin_event(PluginEvent::AdsReady);
        subscription.release();
        sim.fire_plugin_event(PluginEvent::AdsReady);

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(sim.stats().active_listeners, 0);
        assert!(engine.dispose().is_ok());
        assert!(engine.dispose().is_err());
        assert_eq!(sim.stats().engines_disposed, 1);
    }
}
