//! Sample and summary shapes. A sample carries exactly the metric
//! subobjects its session requested; absent metrics serialize as nothing.

use serde::{Deserialize, Serialize};

/// The requestable metric set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Cpu,
    Memory,
    Fps,
    Network,
    Battery,
}

impl MetricKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cpu" => Some(Self::Cpu),
            "memory" => Some(Self::Memory),
            "fps" => Some(Self::Fps),
            "network" => Some(Self::Network),
            "battery" => Some(Self::Battery),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Fps => "fps",
            Self::Network => "network",
            Self::Battery => "battery",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuMetrics {
    /// Whole-system busy percentage over the last interval.
    pub system_percent: f64,
    /// Target-process percentage, when a target is set and resolvable.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target_percent: Option<f64>,
    /// Per-core busy percentages, in core order.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub per_core: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryMetrics {
    pub total_kb: u64,
    pub available_kb: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pss_total_kb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pss_native_kb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pss_dalvik_kb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pss_other_kb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub heap_used_kb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub heap_max_kb: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FpsMetrics {
    /// Instantaneous fps from the latest frame window.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fps: Option<f64>,
    /// Running average over the session.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub avg_fps: Option<f64>,
    /// Frames slower than 33.34 ms in this window.
    pub jank_count: u32,
    /// Frames slower than 66.68 ms in this window.
    pub big_jank_count: u32,
    /// Recent frame-to-frame intervals, milliseconds.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub frame_intervals_ms: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMetrics {
    /// Cumulative bytes across non-loopback interfaces.
    pub rx_total_bytes: u64,
    pub tx_total_bytes: u64,
    /// Smoothed bytes/second against the prior sample (zero on first read).
    pub rx_bytes_per_sec: u64,
    pub tx_bytes_per_sec: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryMetrics {
    pub level_percent: i32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub temperature_c: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub voltage_mv: Option<i64>,
    pub charging: bool,
    /// Instantaneous current, microamps; sign follows the kernel convention.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub current_ua: Option<i64>,
}

/// One tick's worth of measurements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerfSample {
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cpu: Option<CpuMetrics>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub memory: Option<MemoryMetrics>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fps: Option<FpsMetrics>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub network: Option<NetworkMetrics>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub battery: Option<BatteryMetrics>,
}

/// Aggregates computed when a session stops.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfSummary {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cpu_avg_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cpu_min_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cpu_max_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub memory_avg_pss_kb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub memory_max_pss_kb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fps_avg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fps_min: Option<f64>,
    pub total_jank_count: u32,
}

impl PerfSummary {
    /// Fold a slice of samples into the stop-time summary.
    pub fn from_samples(samples: &[PerfSample]) -> Self {
        let mut out = Self::default();

        let cpu: Vec<f64> = samples
            .iter()
            .filter_map(|s| s.cpu.as_ref())
            .map(|c| c.system_percent)
            .collect();
        if !cpu.is_empty() {
            out.cpu_avg_percent = Some(cpu.iter().sum::<f64>() / cpu.len() as f64);
            out.cpu_min_percent = cpu.iter().copied().reduce(f64::min);
            out.cpu_max_percent = cpu.iter().copied().reduce(f64::max);
        }

        let pss: Vec<u64> = samples
            .iter()
            .filter_map(|s| s.memory.as_ref())
            .filter_map(|m| m.pss_total_kb)
            .collect();
        if !pss.is_empty() {
            out.memory_avg_pss_kb =
                Some(pss.iter().sum::<u64>() as f64 / pss.len() as f64);
            out.memory_max_pss_kb = pss.iter().copied().max();
        }

        let fps: Vec<f64> = samples
            .iter()
            .filter_map(|s| s.fps.as_ref())
            .filter_map(|f| f.fps)
            .collect();
        if !fps.is_empty() {
            out.fps_avg = Some(fps.iter().sum::<f64>() / fps.len() as f64);
            out.fps_min = fps.iter().copied().reduce(f64::min);
        }

        out.total_jank_count = samples
            .iter()
            .filter_map(|s| s.fps.as_ref())
            .map(|f| f.jank_count)
            .sum();

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_serializes_only_present_metrics() {
        let sample = PerfSample {
            timestamp: 1_700_000_000_000,
            cpu: Some(CpuMetrics {
                system_percent: 12.5,
                target_percent: None,
                per_core: vec![10.0, 15.0],
            }),
            memory: Some(MemoryMetrics {
                total_kb: 8_000_000,
                available_kb: 2_000_000,
                ..Default::default()
            }),
            ..Default::default()
        };
        let v = serde_json::to_value(&sample).unwrap();
        let obj = v.as_object().unwrap();
        assert!(obj.contains_key("cpu"));
        assert!(obj.contains_key("memory"));
        assert!(!obj.contains_key("fps"));
        assert!(!obj.contains_key("network"));
        assert!(!obj.contains_key("battery"));
        assert_eq!(v["cpu"]["systemPercent"], 12.5);
    }

    #[test]
    fn metric_kind_parses_the_closed_set() {
        for (name, kind) in [
            ("cpu", MetricKind::Cpu),
            ("memory", MetricKind::Memory),
            ("fps", MetricKind::Fps),
            ("network", MetricKind::Network),
            ("battery", MetricKind::Battery),
        ] {
            assert_eq!(MetricKind::parse(name), Some(kind));
            assert_eq!(kind.as_str(), name);
        }
        assert_eq!(MetricKind::parse("disk"), None);
    }

    #[test]
    fn summary_aggregates_cpu_memory_fps_and_jank() {
        let mk = |cpu: f64, pss: u64, fps: f64, jank: u32| PerfSample {
            timestamp: 0,
            cpu: Some(CpuMetrics {
                system_percent: cpu,
                ..Default::default()
            }),
            memory: Some(MemoryMetrics {
                pss_total_kb: Some(pss),
                ..Default::default()
            }),
            fps: Some(FpsMetrics {
                fps: Some(fps),
                jank_count: jank,
                ..Default::default()
            }),
            ..Default::default()
        };
        let samples = vec![mk(10.0, 100, 60.0, 1), mk(30.0, 300, 30.0, 2)];
        let s = PerfSummary::from_samples(&samples);
        assert_eq!(s.cpu_avg_percent, Some(20.0));
        assert_eq!(s.cpu_min_percent, Some(10.0));
        assert_eq!(s.cpu_max_percent, Some(30.0));
        assert_eq!(s.memory_avg_pss_kb, Some(200.0));
        assert_eq!(s.memory_max_pss_kb, Some(300));
        assert_eq!(s.fps_avg, Some(45.0));
        assert_eq!(s.fps_min, Some(30.0));
        assert_eq!(s.total_jank_count, 3);
    }

    #[test]
    fn summary_of_empty_input_is_all_absent() {
        let s = PerfSummary::from_samples(&[]);
        assert!(s.cpu_avg_percent.is_none());
        assert!(s.memory_max_pss_kb.is_none());
        assert!(s.fps_avg.is_none());
        assert_eq!(s.total_jank_count, 0);
    }
}
