//! Outstream Core - Video-ad placement lifecycle
//!
//! This crate drives an outstream ad placement, a player that exists only to show an ad:
//! - Loading the ad SDK once per page
//! - Building a content-less playback engine
//! - Attaching the SDK's ad plugin with manual break control
//! - Requesting ads exactly once and starting the break
//! - Offering a manual start when autoplay is blocked
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Outstream Core                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │     SDK      │  │   Playback   │  │      Ad      │          │
//! │  │    Loader    │  │     Host     │  │    Bridge    │          │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘          │
//! │         │                 │                 │                   │
//! │         └─────────────────┼─────────────────┘                   │
//! │                           │                                     │
//! │                    ┌──────┴──────┐                              │
//! │                    │  Lifecycle  │                              │
//! │                    │ Controller  │                              │
//! │                    └──────┬──────┘                              │
//! │                           │                                     │
//! │  ┌──────────────┐  ┌──────┴──────┐  ┌──────────────┐           │
//! │  │  Diagnostics │  │    State    │  │   Fallback   │           │
//! │  │   Emitter    │  │   Machine   │  │    Timer     │           │
//! │  └──────────────┘  └─────────────┘  └──────────────┘           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod types;
pub mod events;
pub mod sdk;
pub mod engine;
pub mod bridge;
pub mod best_effort;
pub mod diagnostics;
pub mod timer;
pub mod machine;
pub mod controller;
pub mod view;
#[cfg(feature = "sim")]
pub mod sim;

pub use error::{Error, ErrorInfo, Result};
pub use types::*;
pub use events::{AdError, AdEvent, AdEventType, PluginEvent, Subscription};
pub use sdk::{AdSdk, AdSdkProvider, SdkLoader};
pub use engine::{EngineFactory, EngineHandle, EngineOptions, PlaybackEngine, PlaybackHost};
pub use bridge::{AdBridge, AdBridgeConfig, AdPlugin, AdsManager, RequestOutcome};
pub use diagnostics::{DiagnosticEvent, DiagnosticRecord, OnEvent, StartTrigger};
pub use machine::{FallbackState, SessionState};
pub use controller::{LifecycleController, PlacementDeps, SessionReport};
pub use view::{PlacementView, ViewBinding};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the placement library with default configuration
pub fn init() {
    tracing::info!(version = VERSION, "Outstream Core initialized");
}
