//! Frame timing.
//!
//! Preferred source: `dumpsys SurfaceFlinger --latency <layer>`, which
//! yields per-frame presentation timestamps. Fallback: the cumulative
//! `dumpsys gfxinfo <pkg>` summary, which only counts total and janky
//! frames (no live fps).

use std::sync::Arc;
use std::time::Duration;

use ad_shell::Shell;

use super::{BIG_JANK_THRESHOLD_MS, JANK_THRESHOLD_MS};
use crate::sample::FpsMetrics;

/// Placeholder the compositor emits for frames still in flight.
const PENDING_FENCE: i64 = i64::MAX;

/// Presentation timestamps (ns) out of a `--latency` report. The first line
/// is the refresh period; each following line is a desired/actual/ready
/// triple, of which the middle column matters.
pub fn parse_latency(text: &str) -> Vec<i64> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let _desired = cols.next()?;
            let actual: i64 = cols.next()?.parse().ok()?;
            let _ready = cols.next()?;
            (actual > 0 && actual != PENDING_FENCE).then_some(actual)
        })
        .collect()
}

/// Windowed frame statistics from a run of presentation timestamps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameWindow {
    pub fps: Option<f64>,
    pub jank_count: u32,
    pub big_jank_count: u32,
    pub intervals_ms: Vec<f64>,
}

pub fn analyze_timestamps(timestamps: &[i64]) -> FrameWindow {
    if timestamps.len() < 2 {
        return FrameWindow::default();
    }
    let intervals_ms: Vec<f64> = timestamps
        .windows(2)
        .map(|w| (w[1] - w[0]) as f64 / 1_000_000.0)
        .collect();
    let jank_count = intervals_ms.iter().filter(|i| **i > JANK_THRESHOLD_MS).count() as u32;
    let big_jank_count = intervals_ms
        .iter()
        .filter(|i| **i > BIG_JANK_THRESHOLD_MS)
        .count() as u32;
    let elapsed_s = (timestamps[timestamps.len() - 1] - timestamps[0]) as f64 / 1e9;
    let fps = (elapsed_s > 0.0).then(|| (timestamps.len() - 1) as f64 / elapsed_s);
    FrameWindow {
        fps,
        jank_count,
        big_jank_count,
        intervals_ms,
    }
}

/// `(total frames, janky frames)` out of a gfxinfo summary.
pub fn parse_gfxinfo(text: &str) -> Option<(u64, u64)> {
    let mut total = None;
    let mut janky = None;
    for line in text.lines() {
        let line = line.trim_start();
        if let Some(rest) = line.strip_prefix("Total frames rendered:") {
            total = rest.trim().parse().ok();
        } else if let Some(rest) = line.strip_prefix("Janky frames:") {
            janky = rest.trim().split_whitespace().next().and_then(|v| v.parse().ok());
        }
    }
    Some((total?, janky?))
}

pub struct FpsCollector {
    shell: Arc<dyn Shell>,
    target: Option<String>,
    layer: Option<String>,
    last_timestamp: i64,
    fps_sum: f64,
    fps_reads: u32,
    prev_gfx: Option<(u64, u64)>,
}

impl FpsCollector {
    pub fn new(shell: Arc<dyn Shell>, target: Option<String>) -> Self {
        Self {
            shell,
            target,
            layer: None,
            last_timestamp: 0,
            fps_sum: 0.0,
            fps_reads: 0,
            prev_gfx: None,
        }
    }

    /// Find the compositor layer belonging to the target surface.
    async fn resolve_layer(&mut self) -> Option<String> {
        if self.layer.is_some() {
            return self.layer.clone();
        }
        let target = self.target.as_deref()?;
        let out = self
            .shell
            .run("dumpsys SurfaceFlinger --list", false, Duration::from_secs(5))
            .await
            .ok()
            .filter(|o| o.success())?;
        let layer = out
            .stdout
            .lines()
            .map(str::trim)
            .find(|l| l.contains(target))?
            .to_string();
        self.layer = Some(layer);
        self.layer.clone()
    }

    pub async fn collect(&mut self) -> Option<FpsMetrics> {
        if let Some(window) = self.collect_latency().await {
            if let Some(fps) = window.fps {
                self.fps_sum += fps;
                self.fps_reads += 1;
            }
            let avg_fps =
                (self.fps_reads > 0).then(|| self.fps_sum / f64::from(self.fps_reads));
            return Some(FpsMetrics {
                fps: window.fps,
                avg_fps,
                jank_count: window.jank_count,
                big_jank_count: window.big_jank_count,
                frame_intervals_ms: window.intervals_ms,
            });
        }
        self.collect_gfxinfo().await
    }

    async fn collect_latency(&mut self) -> Option<FrameWindow> {
        let layer = self.resolve_layer().await?;
        let out = self
            .shell
            .run(
                &format!("dumpsys SurfaceFlinger --latency \"{layer}\""),
                false,
                Duration::from_secs(5),
            )
            .await
            .ok()
            .filter(|o| o.success())?;
        let timestamps: Vec<i64> = parse_latency(&out.stdout)
            .into_iter()
            .filter(|t| *t > self.last_timestamp)
            .collect();
        if let Some(last) = timestamps.last() {
            self.last_timestamp = *last;
        }
        if timestamps.len() < 2 {
            return None;
        }
        Some(analyze_timestamps(&timestamps))
    }

    /// Cumulative jank counters only; no live fps in this mode.
    async fn collect_gfxinfo(&mut self) -> Option<FpsMetrics> {
        let target = self.target.as_deref()?;
        let out = self
            .shell
            .run(&format!("dumpsys gfxinfo {target}"), false, Duration::from_secs(5))
            .await
            .ok()
            .filter(|o| o.success())?;
        let (total, janky) = parse_gfxinfo(&out.stdout)?;
        let jank_delta = match self.prev_gfx {
            Some((_, prev_janky)) => janky.saturating_sub(prev_janky),
            None => 0,
        };
        self.prev_gfx = Some((total, janky));
        Some(FpsMetrics {
            fps: None,
            avg_fps: None,
            jank_count: jank_delta as u32,
            big_jank_count: 0,
            frame_intervals_ms: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_report_yields_actual_present_times() {
        let text = "\
16666666
1000000000 1016666666 1020000000
1016666666 1033333332 1040000000
1033333332 9223372036854775807 0
1050000000 0 0
";
        let ts = parse_latency(text);
        assert_eq!(ts, vec![1_016_666_666, 1_033_333_332]);
    }

    #[test]
    fn analyze_counts_jank_and_big_jank() {
        // Intervals: 16.67ms, 50ms (jank), 100ms (jank + big jank).
        let base = 1_000_000_000i64;
        let ts = [
            base,
            base + 16_670_000,
            base + 66_670_000,
            base + 166_670_000,
        ];
        let w = analyze_timestamps(&ts);
        assert_eq!(w.jank_count, 2);
        assert_eq!(w.big_jank_count, 1);
        assert_eq!(w.intervals_ms.len(), 3);
        // 3 frames over ~166.7ms → ~18 fps.
        let fps = w.fps.unwrap();
        assert!((fps - 18.0).abs() < 0.1, "got {fps}");
    }

    #[test]
    fn analyze_needs_two_frames() {
        assert_eq!(analyze_timestamps(&[1]), FrameWindow::default());
        assert!(analyze_timestamps(&[]).fps.is_none());
    }

    #[test]
    fn gfxinfo_summary_parses_counters() {
        let text = "\
Stats since: 76271391550ns
Total frames rendered: 20391
Janky frames: 1271 (6.23%)
50th percentile: 6ms
";
        assert_eq!(parse_gfxinfo(text), Some((20_391, 1_271)));
        assert!(parse_gfxinfo("nothing here").is_none());
    }
}
