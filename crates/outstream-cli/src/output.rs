//! Output formatting for CLI

use chrono::{DateTime, Utc};
use console::style;
use outstream_core::sim::SimStats;
use outstream_core::{DiagnosticRecord, LifecyclePhase, PlacementView, SessionReport};
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// Output format options
pub enum OutputFormat {
    Text,
    Json,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }
}

/// Format output based on selected format
pub fn format_output<T: Serialize>(data: &T, format: &str) -> String {
    match OutputFormat::from(format) {
        OutputFormat::Json => {
            serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Text => {
            format!("{:?}", serde_json::to_value(data).unwrap_or_default())
        }
    }
}

/// Everything a simulation run reports
#[derive(Serialize)]
pub struct SimulationOutput {
    pub view: PlacementView,
    pub report: SessionReport,
    pub stats: SimStats,
    /// `(offset_ms, control_shown)` for each simulated click
    pub clicks: Vec<(u64, bool)>,
    /// Session reached a terminal phase before the run ended
    pub ended: bool,
    pub timeline: Vec<DiagnosticRecord>,
}

#[derive(Tabled)]
struct TimelineRow {
    #[tabled(rename = "#")]
    sequence: u64,
    #[tabled(rename = "+ms")]
    offset: i64,
    event: &'static str,
    detail: String,
}

fn timeline_rows(timeline: &[DiagnosticRecord], started_at: DateTime<Utc>) -> Vec<TimelineRow> {
    timeline
        .iter()
        .map(|record| {
            let payload = record.event.payload();
            TimelineRow {
                sequence: record.sequence,
                offset: (record.timestamp - started_at).num_milliseconds(),
                event: record.event.name(),
                detail: if payload.is_null() {
                    String::new()
                } else {
                    payload.to_string()
                },
            }
        })
        .collect()
}

fn phase_label(phase: LifecyclePhase) -> String {
    match phase {
        LifecyclePhase::Complete | LifecyclePhase::AdBreakStarted => {
            style(phase).green().bold().to_string()
        }
        LifecyclePhase::Error => style(phase).red().bold().to_string(),
        other => style(other).yellow().to_string(),
    }
}

/// Print a simulation run as text
pub fn print_simulation(out: &SimulationOutput, started_at: DateTime<Utc>) {
    println!("Placement {} on {}", out.report.session_id, out.view.media_element);
    println!("\nTimeline:");
    let mut table = Table::new(timeline_rows(&out.timeline, started_at));
    table.with(Style::rounded());
    println!("{}", table);

    for (at, shown) in &out.clicks {
        if *shown {
            println!("Clicked \"Play Ad\" at +{}ms", at);
        } else {
            println!("Click at +{}ms ignored: manual-start control not shown", at);
        }
    }

    println!("\nResult:");
    println!("  Phase: {}", phase_label(out.report.phase));
    if !out.ended {
        println!("  {}", style("Run ended before the session finished").dim());
    }
    println!("  Flags: {}", out.view.debug_badge());
    if let Some(label) = out.view.manual_start_label() {
        println!("  Manual start offered: {}", style(label).cyan().bold());
    }
    if let Some(error) = &out.report.last_error {
        println!("  Error: {}", style(error).red());
    }

    println!("\nSDK calls:");
    println!("  Script injections: {}", out.stats.script_injections);
    println!("  Ad requests: {}", out.stats.request_ads);
    println!("  Display container inits: {}", out.stats.display_inits);
    println!(
        "  Break starts: {} ({} blocked)",
        out.stats.play_ad_break, out.stats.blocked_starts
    );
}
