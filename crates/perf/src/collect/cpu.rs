//! CPU usage from `/proc/stat` and `/proc/<pid>/stat` deltas.

use std::sync::Arc;
use std::time::Duration;

use ad_shell::Shell;

use crate::sample::CpuMetrics;

/// Cumulative jiffy counters for one `cpu` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreTimes {
    pub total: u64,
    pub idle: u64,
}

/// Parse `/proc/stat`: the aggregate line first, then one entry per core.
pub fn parse_proc_stat(text: &str) -> Vec<CoreTimes> {
    let mut out = Vec::new();
    for line in text.lines() {
        let mut fields = line.split_whitespace();
        let Some(label) = fields.next() else { continue };
        if !label.starts_with("cpu") {
            continue;
        }
        let values: Vec<u64> = fields.filter_map(|f| f.parse().ok()).collect();
        if values.len() < 4 {
            continue;
        }
        // idle + iowait count as idle time.
        let idle = values[3] + values.get(4).copied().unwrap_or(0);
        out.push(CoreTimes {
            total: values.iter().sum(),
            idle,
        });
    }
    out
}

/// Parse `/proc/<pid>/stat` into utime+stime ticks for the thread group.
pub fn parse_proc_pid_stat(text: &str) -> Option<u64> {
    // The comm field is parenthesized and may contain spaces; split after it.
    let after_comm = text.rsplit_once(')')?.1;
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    // After the closing paren: state is field 0, utime is field 11, stime 12.
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}

/// Busy percentage from two cumulative readings.
pub fn busy_percent(prev: CoreTimes, cur: CoreTimes) -> f64 {
    let total = cur.total.saturating_sub(prev.total);
    if total == 0 {
        return 0.0;
    }
    let idle = cur.idle.saturating_sub(prev.idle);
    100.0 * (1.0 - idle as f64 / total as f64)
}

pub struct CpuCollector {
    shell: Arc<dyn Shell>,
    target: Option<String>,
    pid: Option<i32>,
    prev: Option<Vec<CoreTimes>>,
    prev_proc_ticks: Option<u64>,
}

impl CpuCollector {
    pub fn new(shell: Arc<dyn Shell>, target: Option<String>) -> Self {
        Self {
            shell,
            target,
            pid: None,
            prev: None,
            prev_proc_ticks: None,
        }
    }

    async fn resolve_pid(&mut self) -> Option<i32> {
        if self.pid.is_some() {
            return self.pid;
        }
        let target = self.target.as_deref()?;
        let out = self
            .shell
            .run(&format!("pidof {target}"), false, Duration::from_secs(2))
            .await
            .ok()?;
        let pid = out.stdout.split_whitespace().next()?.parse().ok()?;
        self.pid = Some(pid);
        self.pid
    }

    pub async fn collect(&mut self) -> Option<CpuMetrics> {
        let stat = tokio::fs::read_to_string("/proc/stat").await.ok()?;
        let cores = parse_proc_stat(&stat);
        if cores.is_empty() {
            return None;
        }

        let proc_ticks = match self.resolve_pid().await {
            Some(pid) => tokio::fs::read_to_string(format!("/proc/{pid}/stat"))
                .await
                .ok()
                .and_then(|t| parse_proc_pid_stat(&t)),
            None => None,
        };

        let metrics = match &self.prev {
            None => CpuMetrics::default(), // first read yields zero
            Some(prev) => {
                let system_percent = busy_percent(prev[0], cores[0]);
                let per_core = prev[1..]
                    .iter()
                    .zip(cores[1..].iter())
                    .map(|(p, c)| busy_percent(*p, *c))
                    .collect();
                let target_percent = match (self.prev_proc_ticks, proc_ticks) {
                    (Some(p), Some(c)) => {
                        let total = cores[0].total.saturating_sub(prev[0].total);
                        (total > 0)
                            .then(|| 100.0 * c.saturating_sub(p) as f64 / total as f64)
                    }
                    _ => None,
                };
                CpuMetrics {
                    system_percent,
                    target_percent,
                    per_core,
                }
            }
        };

        self.prev = Some(cores);
        self.prev_proc_ticks = proc_ticks;
        Some(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT_A: &str = "\
cpu  100 0 100 700 100 0 0 0 0 0
cpu0 50 0 50 350 50 0 0 0 0 0
cpu1 50 0 50 350 50 0 0 0 0 0
intr 12345
ctxt 999
";
    const STAT_B: &str = "\
cpu  200 0 200 750 150 0 0 0 0 0
cpu0 150 0 100 350 75 0 0 0 0 0
cpu1 50 0 100 400 75 0 0 0 0 0
";

    #[test]
    fn parses_aggregate_and_per_core_lines() {
        let cores = parse_proc_stat(STAT_A);
        assert_eq!(cores.len(), 3);
        assert_eq!(cores[0].total, 1000);
        assert_eq!(cores[0].idle, 800);
    }

    #[test]
    fn busy_percent_from_deltas() {
        let a = parse_proc_stat(STAT_A);
        let b = parse_proc_stat(STAT_B);
        // Δtotal = 300, Δidle = 100 → 66.7% busy.
        let pct = busy_percent(a[0], b[0]);
        assert!((pct - 66.666).abs() < 0.01, "got {pct}");
    }

    #[test]
    fn busy_percent_is_zero_without_progress() {
        let a = parse_proc_stat(STAT_A);
        assert_eq!(busy_percent(a[0], a[0]), 0.0);
    }

    #[test]
    fn parses_pid_stat_with_spaces_in_comm() {
        let line = "4242 (Web Content) S 1 4242 4242 0 -1 4194560 \
                    1000 0 0 0 350 150 0 0 20 0 30 0 12345 0 0";
        assert_eq!(parse_proc_pid_stat(line), Some(500));
    }

    #[test]
    fn pid_stat_rejects_garbage() {
        assert_eq!(parse_proc_pid_stat("not a stat line"), None);
    }
}
