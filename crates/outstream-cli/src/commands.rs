//! CLI command implementations

use crate::output::{self, OutputFormat, SimulationOutput};
use crate::{AdErrorAt, Autoplay, SimulateArgs};
use anyhow::Context;
use outstream_core::sim::{AutoplayPolicy, ErrorStage, SimScript, SimulatedSdk};
use outstream_core::{
    AdTagRef, LifecycleController, MediaElementRef, PlacementConfig, PlacementDeps,
    PlaybackHost, SdkLoader, ViewBinding,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Ad tag used when neither a flag nor a config file supplies one
const DEMO_TAG: &str = "https://pubads.g.doubleclick.net/gampad/ads?iu=/21775744923/external/single_ad_samples&sz=640x480&output=vast&env=vp&gdfp_req=1&unviewed_position_start=1";

enum Action {
    Click,
    Start,
}

/// Load the placement config from a file and/or flags
fn load_config(path: Option<PathBuf>, tag: Option<String>) -> anyhow::Result<PlacementConfig> {
    let mut config = match path {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<PlacementConfig>(&json)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => PlacementConfig::default(),
    };

    if let Some(tag) = tag {
        config.ad_tag = Some(AdTagRef::parse(&tag)?);
    }
    if config.ad_tag.is_none() {
        config.ad_tag = Some(AdTagRef::parse(DEMO_TAG)?);
    }

    config.validate()?;
    Ok(config)
}

fn script(args: &SimulateArgs) -> SimScript {
    let script = SimScript {
        preinstalled: args.preinstalled,
        script_fails: args.script_fails,
        engine_fails: args.engine_fails,
        refuse_plugin: args.refuse_plugin,
        ad_start_delay: Duration::from_millis(args.ad_start_delay),
        ad_duration: Duration::from_millis(args.ad_duration),
        autoplay: match args.autoplay {
            Autoplay::Allowed => AutoplayPolicy::Allowed,
            Autoplay::GestureRequired => AutoplayPolicy::GestureRequired,
        },
        ..Default::default()
    };

    match args.ad_error {
        Some(AdErrorAt::Request) => {
            script.with_ad_error(ErrorStage::Request, "VAST response was empty")
        }
        Some(AdErrorAt::Playback) => {
            script.with_ad_error(ErrorStage::Playback, "Media file could not be played")
        }
        None => script,
    }
}

/// Run a placement against the simulated SDK
pub async fn simulate(args: SimulateArgs, format: &str) -> anyhow::Result<()> {
    let config = load_config(args.config.clone(), args.tag.clone())?
        .with_auto_start(!args.manual);
    let sim = SimulatedSdk::new(script(&args));

    let deps = PlacementDeps {
        loader: Arc::new(SdkLoader::new(sim.provider(), config.sdk_script_url.clone())),
        host: PlaybackHost::new(sim.engine_factory()),
    };
    let controller = LifecycleController::new(
        config.clone(),
        MediaElementRef::new("outstream-ad"),
        deps,
        None,
    )?;
    let binding = ViewBinding::new(&controller);

    let mut actions: Vec<(u64, Action)> = Vec::new();
    if let Some(at) = args.click_at {
        actions.push((at, Action::Click));
    }
    if let Some(at) = args.start_at {
        actions.push((at, Action::Start));
    }
    actions.sort_by_key(|(at, _)| *at);

    let started = Instant::now();
    let started_at = chrono::Utc::now();
    let deadline = started + Duration::from_millis(args.run_for);
    info!(session_id = %controller.id(), tag = ?config.ad_tag.as_ref().map(|t| t.as_str()), "Simulating placement");
    controller.mount();

    let mut clicks = Vec::new();
    for (at, action) in actions {
        tokio::time::sleep_until(started + Duration::from_millis(at)).await;
        match action {
            Action::Click => {
                let shown = sim.with_user_gesture(|| binding.click_manual_start());
                clicks.push((at, shown));
            }
            Action::Start => controller.start_ad(),
        }
    }

    let mut reports = controller.subscribe_report();
    let ended = tokio::time::timeout_at(deadline, async {
        loop {
            if reports.borrow_and_update().phase.is_terminal() {
                return;
            }
            if reports.changed().await.is_err() {
                return;
            }
        }
    })
    .await
    .is_ok();

    let out = SimulationOutput {
        view: binding.render(),
        report: controller.report(),
        stats: sim.stats(),
        clicks,
        ended,
        timeline: controller.diagnostics().history(),
    };
    controller.teardown();

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", output::format_output(&out, format)),
        OutputFormat::Text => output::print_simulation(&out, started_at),
    }
    Ok(())
}

/// Print the effective configuration
pub fn show_config(path: Option<PathBuf>, tag: Option<String>, format: &str) -> anyhow::Result<()> {
    let config = load_config(path, tag)?;

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", output::format_output(&config, format)),
        OutputFormat::Text => {
            println!("Placement configuration:");
            if let Some(tag) = &config.ad_tag {
                println!("  Ad tag: {}", tag);
            }
            println!("  Auto start: {}", config.auto_start);
            println!("  Suppress built-in UI: {}", config.suppress_builtin_ui);
            println!("  Ads timeout: {}ms", config.ads_timeout_ms);
            println!("  Fallback delay: {}ms", config.fallback_delay_ms);
            println!("  SDK script: {}", config.sdk_script_url);
        }
    }
    Ok(())
}
