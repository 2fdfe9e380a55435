//! Integration tests for Outstream Core
//!
//! Placements run against the simulated SDK on a paused Tokio clock, so every timing below is
//! exact virtual time since mount.

use outstream_core::sim::{AutoplayPolicy, ErrorStage, SimScript, SimulatedSdk};
use outstream_core::{
    AdEvent, AdTagRef, FallbackState, LifecycleController, LifecyclePhase, MediaElementRef,
    OnEvent, PlacementConfig, PlacementDeps, PlaybackHost, PluginEvent, SdkLoader, SessionFlags,
    ViewBinding,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TAG: &str = "https://ads.example.com/vast.xml?unit=outstream";

fn config() -> PlacementConfig {
    PlacementConfig::new(AdTagRef::parse(TAG).unwrap())
}

fn deps(sim: &SimulatedSdk, config: &PlacementConfig) -> PlacementDeps {
    PlacementDeps {
        loader: Arc::new(SdkLoader::new(sim.provider(), config.sdk_script_url.clone())),
        host: PlaybackHost::new(sim.engine_factory()),
    }
}

fn placement(script: SimScript, config: PlacementConfig) -> (SimulatedSdk, LifecycleController) {
    placement_with_sink(script, config, None)
}

fn placement_with_sink(
    script: SimScript,
    config: PlacementConfig,
    on_event: Option<OnEvent>,
) -> (SimulatedSdk, LifecycleController) {
    let sim = SimulatedSdk::new(script);
    let deps = deps(&sim, &config);
    let controller =
        LifecycleController::new(config, MediaElementRef::new("ad-video"), deps, on_event)
            .unwrap();
    (sim, controller)
}

async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

fn all_flags() -> SessionFlags {
    SessionFlags {
        request_ads_called: true,
        ads_manager_loaded: true,
        ads_ready: true,
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_blocked_autoplay_offers_manual_start() {
    let script = SimScript::default()
        .preinstalled()
        .with_autoplay(AutoplayPolicy::GestureRequired);
    let (sim, controller) = placement(script, config());
    controller.mount();

    advance(1349).await;
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.flags, all_flags());
    assert!(!snapshot.needs_gesture);
    assert_eq!(sim.stats().blocked_starts, 1);

    advance(2).await;
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.flags, all_flags());
    assert!(snapshot.needs_gesture);
    assert_eq!(controller.phase(), LifecyclePhase::AdsReady);
    assert_eq!(controller.report().fallback, FallbackState::Fired);
}

#[tokio::test(start_paused = true)]
async fn test_ad_start_before_fallback_never_needs_gesture() {
    let (sim, controller) = placement(SimScript::default().preinstalled(), config());
    let mut updates = controller.subscribe();
    controller.mount();

    let watcher = tokio::spawn(async move {
        let mut saw_gesture = false;
        while updates.changed().await.is_ok() {
            saw_gesture |= updates.borrow().needs_gesture;
        }
        saw_gesture
    });

    advance(299).await;
    assert_eq!(controller.phase(), LifecyclePhase::AdsReady);
    assert_eq!(controller.report().fallback, FallbackState::Armed { generation: 1 });

    advance(2).await;
    assert_eq!(controller.phase(), LifecyclePhase::AdBreakStarted);
    assert_eq!(controller.report().fallback, FallbackState::Disarmed);

    advance(3000).await;
    assert!(!controller.snapshot().needs_gesture);
    assert_eq!(sim.stats().play_ad_break, 1);
    assert_eq!(
        controller.diagnostics().names(),
        vec![
            "sdk_loaded",
            "engine_ready",
            "request_ads",
            "ads_manager",
            "ads_ready",
            "play_ad_break",
            "ad_loaded",
            "ad_started",
        ]
    );

    drop(controller);
    assert!(!watcher.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_sdk_load_failure_ends_session() {
    let script = SimScript {
        script_fails: true,
        ..Default::default()
    };
    let (sim, controller) = placement(script, config());
    controller.mount();

    advance(100).await;
    assert_eq!(controller.phase(), LifecyclePhase::Error);
    assert_eq!(controller.snapshot().flags, SessionFlags::default());
    assert!(!controller.snapshot().needs_gesture);

    let error = controller.last_error().unwrap();
    assert_eq!(error.code, "SDK_LOAD");
    assert!(error.fatal);
    assert_eq!(sim.stats().script_injections, 1);
    assert_eq!(sim.stats().engines_created, 0);
    assert!(controller.diagnostics().names().contains(&"init_failed"));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_start_ad_is_safe() {
    let (sim, controller) = placement(
        SimScript::default().preinstalled(),
        config().with_auto_start(false),
    );
    controller.mount();

    advance(200).await;
    assert_eq!(controller.phase(), LifecyclePhase::AdsReady);
    assert_eq!(sim.stats().play_ad_break, 0);

    controller.start_ad();
    controller.start_ad();
    assert!(sim.stats().play_ad_break <= 2);
    assert_eq!(controller.phase(), LifecyclePhase::AdsReady);

    advance(200).await;
    assert_eq!(controller.phase(), LifecyclePhase::AdBreakStarted);

    let before = sim.stats().play_ad_break;
    controller.start_ad();
    assert_eq!(sim.stats().play_ad_break, before);
    assert_eq!(controller.phase(), LifecyclePhase::AdBreakStarted);
    assert_eq!(controller.snapshot().flags, all_flags());
    assert!(controller.diagnostics().names().contains(&"start_ignored"));
}

#[tokio::test(start_paused = true)]
async fn test_ads_ready_on_sdk_thread_still_offers_manual_start() {
    let script = SimScript {
        ads_ready_delay: Duration::from_secs(3600),
        ..SimScript::default()
            .preinstalled()
            .with_autoplay(AutoplayPolicy::GestureRequired)
    };
    let (sim, controller) = placement(script, config());
    controller.mount();
    advance(150).await;
    assert_eq!(controller.phase(), LifecyclePhase::ManagerReady);

    let sdk = sim.clone();
    std::thread::spawn(move || sdk.fire_plugin_event(PluginEvent::AdsReady))
        .join()
        .unwrap();
    assert_eq!(controller.phase(), LifecyclePhase::AdsReady);
    assert_eq!(sim.stats().blocked_starts, 1);
    assert!(matches!(controller.report().fallback, FallbackState::Armed { .. }));

    advance(1199).await;
    assert!(!controller.snapshot().needs_gesture);
    advance(2).await;
    assert!(controller.snapshot().needs_gesture);
    assert_eq!(controller.report().fallback, FallbackState::Fired);
}

// =============================================================================
// Start Handling
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_start_before_ready_is_deferred() {
    let (sim, controller) = placement(
        SimScript::default().preinstalled(),
        config().with_auto_start(false),
    );
    controller.mount();
    controller.start_ad();

    advance(120).await;
    assert_eq!(sim.stats().play_ad_break, 0);

    advance(40).await;
    assert_eq!(sim.stats().play_ad_break, 1);
    assert_eq!(sim.stats().display_inits, 1);

    let trigger = controller
        .diagnostics()
        .history()
        .into_iter()
        .find(|record| record.event.name() == "play_ad_break")
        .map(|record| record.event.payload()["trigger"].clone());
    assert_eq!(trigger, Some(serde_json::json!("deferred")));
    assert!(controller.diagnostics().names().contains(&"start_deferred"));
}

#[tokio::test(start_paused = true)]
async fn test_deferred_start_with_auto_start_plays_once() {
    let (sim, controller) = placement(SimScript::default().preinstalled(), config());
    controller.mount();
    controller.start_ad();
    controller.start_ad();

    advance(400).await;
    assert_eq!(sim.stats().play_ad_break, 1);
    assert_eq!(controller.phase(), LifecyclePhase::AdBreakStarted);
}

#[tokio::test(start_paused = true)]
async fn test_gesture_click_starts_blocked_ad() {
    let script = SimScript::default()
        .preinstalled()
        .with_autoplay(AutoplayPolicy::GestureRequired);
    let (sim, controller) = placement(script, config());
    let binding = ViewBinding::new(&controller);
    controller.mount();

    advance(1000).await;
    assert!(!binding.click_manual_start());

    advance(400).await;
    let view = binding.render();
    assert!(view.show_manual_start);
    assert_eq!(view.manual_start_label(), Some("Play Ad"));

    assert!(sim.with_user_gesture(|| binding.click_manual_start()));
    assert_eq!(sim.stats().blocked_starts, 1);

    advance(200).await;
    let view = binding.render();
    assert!(!view.show_manual_start);
    assert_eq!(controller.phase(), LifecyclePhase::AdBreakStarted);
    assert_eq!(controller.report().fallback, FallbackState::Disarmed);
    assert_eq!(
        view.debug_badge(),
        "requestAds: true · adsManagerLoaded: true · adsReady: true · needsGesture: false"
    );
}

// =============================================================================
// Idempotency
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_loader_ready_redelivery_requests_once() {
    let (sim, controller) = placement(SimScript::default().preinstalled(), config());
    controller.mount();

    advance(60).await;
    sim.fire_plugin_event(PluginEvent::LoaderReady);
    sim.fire_plugin_event(PluginEvent::LoaderReady);

    advance(500).await;
    sim.fire_plugin_event(PluginEvent::LoaderReady);

    assert_eq!(sim.stats().request_ads, 1);
    assert_eq!(sim.stats().change_ad_tag, 1);
    assert!(controller.snapshot().flags.request_ads_called);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_events_are_ignored() {
    let (sim, controller) = placement(SimScript::default().preinstalled(), config());
    controller.mount();

    advance(400).await;
    assert_eq!(controller.phase(), LifecyclePhase::AdBreakStarted);

    sim.fire_plugin_event(PluginEvent::AdsReady);
    sim.fire_ad_event(AdEvent::Started);
    if let Some(manager) = sim.ads_manager() {
        sim.fire_plugin_event(PluginEvent::AdsManager(manager));
    }

    assert_eq!(controller.phase(), LifecyclePhase::AdBreakStarted);
    assert_eq!(sim.stats().play_ad_break, 1);
    let names = controller.diagnostics().names();
    assert_eq!(names.iter().filter(|n| **n == "ads_manager").count(), 1);
    assert_eq!(names.iter().filter(|n| **n == "ad_started").count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_double_mount_initializes_once() {
    let (sim, controller) = placement(SimScript::default(), config());
    controller.mount();
    controller.mount();

    advance(300).await;
    controller.mount();

    let stats = sim.stats();
    assert_eq!(stats.script_injections, 1);
    assert_eq!(stats.engines_created, 1);
    assert_eq!(stats.plugins_attached, 1);
    assert_eq!(stats.request_ads, 1);
}

#[tokio::test(start_paused = true)]
async fn test_placements_share_one_script_load() {
    let sim = SimulatedSdk::new(SimScript::default());
    let config = config();
    let deps = deps(&sim, &config);
    let first = LifecycleController::new(
        config.clone(),
        MediaElementRef::new("ad-top"),
        deps.clone(),
        None,
    )
    .unwrap();
    let second =
        LifecycleController::new(config, MediaElementRef::new("ad-bottom"), deps, None).unwrap();

    first.mount();
    second.mount();
    advance(250).await;

    assert_eq!(sim.stats().script_injections, 1);
    assert_eq!(sim.stats().engines_created, 2);
    assert!(first.snapshot().flags.ads_ready);
    assert!(second.snapshot().flags.ads_ready);
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_teardown_at_any_point_releases_everything() {
    for at in [0, 30, 75, 125, 175, 400] {
        let (sim, controller) = placement(SimScript::default().preinstalled(), config());
        controller.mount();
        advance(at).await;

        controller.teardown();
        controller.teardown();

        let stats = sim.stats();
        assert_eq!(stats.active_listeners, 0, "listeners left after teardown at {at}ms");
        assert_eq!(stats.engines_disposed, stats.engines_created, "teardown at {at}ms");

        let report = controller.report();
        assert!(report.disposed);
        assert!(!report.engine_live);
        assert_eq!(report.active_subscriptions, 0);

        let snapshot = controller.snapshot();
        let phase = controller.phase();
        sim.fire_plugin_event(PluginEvent::AdsReady);
        sim.fire_ad_event(AdEvent::Started);
        advance(2000).await;

        assert_eq!(controller.snapshot(), snapshot, "state changed after teardown at {at}ms");
        assert_eq!(controller.phase(), phase);
        assert!(!controller.snapshot().needs_gesture);
    }
}

#[tokio::test(start_paused = true)]
async fn test_teardown_cancels_armed_fallback() {
    let script = SimScript::default()
        .preinstalled()
        .with_autoplay(AutoplayPolicy::GestureRequired);
    let (_sim, controller) = placement(script, config());
    controller.mount();

    advance(200).await;
    assert!(matches!(controller.report().fallback, FallbackState::Armed { .. }));

    controller.teardown();
    advance(2000).await;
    assert!(!controller.snapshot().needs_gesture);
    assert!(!controller.diagnostics().names().contains(&"needs_gesture"));
}

#[tokio::test(start_paused = true)]
async fn test_drop_tears_down() {
    let (sim, controller) = placement(SimScript::default().preinstalled(), config());
    controller.mount();
    advance(200).await;
    assert!(sim.stats().active_listeners > 0);

    drop(controller);
    assert_eq!(sim.stats().active_listeners, 0);
    assert_eq!(sim.stats().engines_disposed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_while_loading_keeps_sibling_on_one_script() {
    let sim = SimulatedSdk::new(SimScript {
        script_load_delay: Duration::from_millis(40),
        ..Default::default()
    });
    let config = config();
    let deps = deps(&sim, &config);
    let first = LifecycleController::new(
        config.clone(),
        MediaElementRef::new("ad-top"),
        deps.clone(),
        None,
    )
    .unwrap();
    let second =
        LifecycleController::new(config, MediaElementRef::new("ad-bottom"), deps, None).unwrap();

    first.mount();
    second.mount();
    advance(10).await;
    first.teardown();
    assert_eq!(first.phase(), LifecyclePhase::SdkLoading);

    advance(300).await;
    assert_eq!(sim.stats().script_injections, 1);
    assert!(second.snapshot().flags.ads_ready);
    assert_eq!(first.phase(), LifecyclePhase::SdkLoading);
    assert!(first.report().disposed);
    assert_eq!(sim.stats().engines_created, 1);
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_ad_request_error_is_terminal() {
    let script = SimScript::default()
        .preinstalled()
        .with_ad_error(ErrorStage::Request, "VAST response was empty");
    let (sim, controller) = placement(script, config());
    controller.mount();

    advance(2000).await;
    assert_eq!(controller.phase(), LifecyclePhase::Error);
    let snapshot = controller.snapshot();
    assert!(snapshot.flags.request_ads_called);
    assert!(!snapshot.flags.ads_manager_loaded);
    assert!(!snapshot.needs_gesture);

    let error = controller.last_error().unwrap();
    assert_eq!(error.code, "AD_SERVING");
    assert!(!error.fatal);
    assert_eq!(sim.stats().play_ad_break, 0);
}

#[tokio::test(start_paused = true)]
async fn test_script_url_must_match_shared_loader() {
    let sim = SimulatedSdk::new(SimScript::default());
    let loader_config = config();
    let deps = deps(&sim, &loader_config);
    let mut config = config();
    config.sdk_script_url = url::Url::parse("https://cdn.example.com/other-sdk.js").unwrap();

    let err = LifecycleController::new(config, MediaElementRef::new("ad-video"), deps, None)
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_CONFIG");
}

#[tokio::test(start_paused = true)]
async fn test_playback_error_disarms_fallback() {
    let script = SimScript::default()
        .preinstalled()
        .with_ad_error(ErrorStage::Playback, "Media file could not be played");
    let (_sim, controller) = placement(script, config());
    controller.mount();

    advance(2000).await;
    assert_eq!(controller.phase(), LifecyclePhase::Error);
    assert!(!controller.snapshot().needs_gesture);
    assert_eq!(controller.report().fallback, FallbackState::Disarmed);

    let payload = controller
        .diagnostics()
        .history()
        .into_iter()
        .find(|record| record.event.name() == "ad_error")
        .map(|record| record.event.payload());
    assert_eq!(
        payload.unwrap()["message"],
        "Media file could not be played"
    );
}

#[tokio::test(start_paused = true)]
async fn test_engine_failure_is_fatal() {
    let script = SimScript {
        engine_fails: true,
        ..SimScript::default().preinstalled()
    };
    let (sim, controller) = placement(script, config());
    controller.mount();

    advance(100).await;
    assert_eq!(controller.phase(), LifecyclePhase::Error);
    assert_eq!(controller.last_error().unwrap().code, "ENGINE_CREATE");

    controller.teardown();
    assert_eq!(sim.stats().engines_disposed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_plugin_refusal_is_fatal_and_engine_disposed() {
    let script = SimScript {
        refuse_plugin: true,
        ..SimScript::default().preinstalled()
    };
    let (sim, controller) = placement(script, config());
    controller.mount();

    advance(100).await;
    assert_eq!(controller.last_error().unwrap().code, "ADBRIDGE_ATTACH");
    assert_eq!(controller.snapshot().flags, SessionFlags::default());

    controller.teardown();
    assert_eq!(sim.stats().engines_created, 1);
    assert_eq!(sim.stats().engines_disposed, 1);
}

// =============================================================================
// Completion, Plugin Wiring and Diagnostics
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_break_completes() {
    let script = SimScript {
        ad_duration: Duration::from_secs(1),
        ..SimScript::default().preinstalled()
    };
    let (_sim, controller) = placement(script, config());
    controller.mount();

    advance(1500).await;
    assert_eq!(controller.phase(), LifecyclePhase::Complete);
    let names = controller.diagnostics().names();
    assert_eq!(names.iter().filter(|n| **n == "ad_done").count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_plugin_registered_for_manual_control() {
    let (sim, controller) = placement(SimScript::default().preinstalled(), config());
    controller.mount();
    advance(10).await;

    let options = sim.plugin_options().unwrap();
    assert!(options.ad_tag.is_none());
    assert!(!options.auto_play_ad_breaks);
    assert!(!options.show_countdown);
    let rendering = options.rendering.unwrap();
    assert!(!rendering.use_styled_linear_ads);
    assert!(rendering.ui_elements.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_view_binding_sees_request_flag() {
    let (_sim, controller) = placement(SimScript::default().preinstalled(), config());
    let mut binding = ViewBinding::new(&controller);
    controller.mount();

    let view = binding.next().await.unwrap();
    assert!(view.snapshot.flags.request_ads_called);
    assert!(!view.show_manual_start);
    assert_eq!(view.media_element.id, "ad-video");
}

#[tokio::test(start_paused = true)]
async fn test_panicking_sink_does_not_stop_placement() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();
    let sink: OnEvent = Arc::new(move |name, _payload| {
        record.lock().unwrap().push(name.to_string());
        if name == "ads_ready" {
            panic!("analytics overlay crashed");
        }
    });

    let (_sim, controller) =
        placement_with_sink(SimScript::default().preinstalled(), config(), Some(sink));
    controller.mount();

    advance(400).await;
    assert_eq!(controller.phase(), LifecyclePhase::AdBreakStarted);
    let seen = seen.lock().unwrap();
    assert!(seen.contains(&"ads_ready".to_string()));
    assert!(seen.contains(&"ad_started".to_string()));
}
