//! Text and JSON rendering of command results

use crate::error::Result;
use evener_core::{BatchSummary, CheckReport, LevelMetrics, TargetLevel, WaveLayout};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::PathBuf;

const PROGRESS_WIDTH: usize = 30;

/// Layout and level of one opened file
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub path: PathBuf,
    pub layout: WaveLayout,
    pub metrics: LevelMetrics,
    pub duration_seconds: Option<f64>,
}

/// Level as a percentage of full scale with its dBFS value
pub fn format_level(level: f64) -> String {
    if level > 0.0 {
        format!("{:.2}% ({:+.2} dBFS)", level * 100.0, 20.0 * level.log10())
    } else {
        "0.00% (-inf dBFS)".to_string()
    }
}

pub fn format_target(target: TargetLevel) -> String {
    match target {
        TargetLevel::Individual { factor } => format!("{:.3}x each file's own level", factor),
        TargetLevel::Shared { target } => format!("shared level {}", format_level(target)),
    }
}

pub fn format_info(info: &FileInfo) -> String {
    let layout = &info.layout;
    let mut out = String::new();
    let _ = writeln!(out, "{}", info.path.display());
    let _ = writeln!(
        out,
        "  format:   {} Hz, {} ch, {} bit, {}",
        layout.sample_rate,
        layout.channels,
        layout.bits_per_sample,
        layout.byte_order.as_str()
    );
    if let Some(seconds) = info.duration_seconds {
        let _ = writeln!(out, "  duration: {:.2} s", seconds);
    }
    let _ = writeln!(out, "  samples:  {}", info.metrics.sample_count);
    let _ = writeln!(out, "  average:  {}", format_level(info.metrics.weighted_average));
    let _ = writeln!(out, "  peak:     {}", format_level(info.metrics.peak));
    let _ = write!(
        out,
        "  headroom: up to {:.3}x without clipping",
        info.metrics.max_linear_factor()
    );
    out
}

/// Single-line progress bar, e.g. `[#######.......]  50%`
pub fn format_progress(fraction: f64) -> String {
    let fraction = fraction.clamp(0.0, 1.0);
    let filled = (fraction * PROGRESS_WIDTH as f64).round() as usize;
    format!(
        "[{}{}] {:>3.0}%",
        "#".repeat(filled),
        ".".repeat(PROGRESS_WIDTH - filled),
        fraction * 100.0
    )
}

pub fn format_check(report: &CheckReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Target: {}", format_target(report.target));
    for path in &report.overmodulating {
        let _ = writeln!(out, "  overmodulates: {}", path.display());
    }
    let _ = write!(
        out,
        "{} of {} files would clip{}",
        report.overmodulating.len(),
        report.checked,
        if report.cancelled { " (cancelled)" } else { "" }
    );
    out
}

pub fn format_summary(summary: &BatchSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Target: {}", format_target(summary.target));
    for failure in &summary.failed {
        let _ = writeln!(out, "  failed: {}: {}", failure.path.display(), failure.error);
    }
    let _ = write!(
        out,
        "{} adjusted, {} failed in {:.2} s{}",
        summary.succeeded.len(),
        summary.failed.len(),
        summary.duration_seconds,
        if summary.cancelled { " (cancelled)" } else { "" }
    );
    out
}

pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
