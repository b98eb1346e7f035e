//! Memory totals from `/proc/meminfo`; per-process PSS from
//! `dumpsys meminfo <package>` keyword matching.

use std::sync::Arc;
use std::time::Duration;

use ad_shell::Shell;

use crate::sample::MemoryMetrics;

/// `MemTotal` / `MemAvailable` in kB.
pub fn parse_meminfo(text: &str) -> Option<(u64, u64)> {
    let mut total = None;
    let mut available = None;
    for line in text.lines() {
        let mut fields = line.split_whitespace();
        match fields.next() {
            Some("MemTotal:") => total = fields.next().and_then(|v| v.parse().ok()),
            Some("MemAvailable:") => available = fields.next().and_then(|v| v.parse().ok()),
            _ => {}
        }
        if total.is_some() && available.is_some() {
            break;
        }
    }
    Some((total?, available?))
}

/// PSS breakdown pulled out of a `dumpsys meminfo <pkg>` report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PssBreakdown {
    pub total_kb: u64,
    pub native_kb: u64,
    pub dalvik_kb: u64,
    /// Dalvik heap size / alloc, when the heap columns are present.
    pub heap_max_kb: Option<u64>,
    pub heap_used_kb: Option<u64>,
}

/// First number on the first line whose trimmed text starts with `keyword`.
fn first_number_after(text: &str, keyword: &str) -> Option<u64> {
    numbers_after(text, keyword)?.into_iter().next()
}

fn numbers_after(text: &str, keyword: &str) -> Option<Vec<u64>> {
    let line = text
        .lines()
        .map(str::trim_start)
        .find(|l| l.starts_with(keyword))?;
    Some(
        line[keyword.len()..]
            .split_whitespace()
            .filter_map(|f| f.parse().ok())
            .collect(),
    )
}

/// Keyword-match the interesting rows of the meminfo report. The report's
/// exact column set varies by platform release; only the leading "Pss Total"
/// column and the Dalvik heap columns are relied upon.
pub fn parse_dumpsys_meminfo(text: &str) -> Option<PssBreakdown> {
    let total_kb = first_number_after(text, "TOTAL")?;
    let native_kb = first_number_after(text, "Native Heap").unwrap_or(0);
    let dalvik = numbers_after(text, "Dalvik Heap").unwrap_or_default();
    let dalvik_kb = dalvik.first().copied().unwrap_or(0);
    // Trailing columns of the Dalvik Heap row are Heap Size / Alloc / Free.
    let (heap_max_kb, heap_used_kb) = if dalvik.len() >= 3 {
        let n = dalvik.len();
        (Some(dalvik[n - 3]), Some(dalvik[n - 2]))
    } else {
        (None, None)
    };
    Some(PssBreakdown {
        total_kb,
        native_kb,
        dalvik_kb,
        heap_max_kb,
        heap_used_kb,
    })
}

pub struct MemoryCollector {
    shell: Arc<dyn Shell>,
    target: Option<String>,
}

impl MemoryCollector {
    pub fn new(shell: Arc<dyn Shell>, target: Option<String>) -> Self {
        Self { shell, target }
    }

    pub async fn collect(&mut self) -> Option<MemoryMetrics> {
        let meminfo = tokio::fs::read_to_string("/proc/meminfo").await.ok()?;
        let (total_kb, available_kb) = parse_meminfo(&meminfo)?;
        let mut metrics = MemoryMetrics {
            total_kb,
            available_kb,
            ..Default::default()
        };

        if let Some(target) = &self.target {
            let report = self
                .shell
                .run(
                    &format!("dumpsys meminfo {target}"),
                    false,
                    Duration::from_secs(5),
                )
                .await
                .ok();
            if let Some(pss) = report
                .filter(|o| o.success())
                .and_then(|o| parse_dumpsys_meminfo(&o.stdout))
            {
                metrics.pss_total_kb = Some(pss.total_kb);
                metrics.pss_native_kb = Some(pss.native_kb);
                metrics.pss_dalvik_kb = Some(pss.dalvik_kb);
                metrics.pss_other_kb = Some(
                    pss.total_kb
                        .saturating_sub(pss.native_kb)
                        .saturating_sub(pss.dalvik_kb),
                );
                metrics.heap_used_kb = pss.heap_used_kb;
                metrics.heap_max_kb = pss.heap_max_kb;
            }
        }
        Some(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meminfo_extracts_total_and_available() {
        let text = "\
MemTotal:        7894560 kB
MemFree:          301234 kB
MemAvailable:    4123456 kB
Buffers:          123456 kB
";
        assert_eq!(parse_meminfo(text), Some((7_894_560, 4_123_456)));
    }

    #[test]
    fn meminfo_without_required_rows_is_none() {
        assert_eq!(parse_meminfo("MemFree: 1 kB\n"), None);
    }

    const MEMINFO_REPORT: &str = "\
Applications Memory Usage (in Kilobytes):
Uptime: 123456 Realtime: 654321

** MEMINFO in pid 4242 [com.example.app] **
                   Pss  Private  Private  SwapPss      Rss     Heap     Heap     Heap
                 Total    Dirty    Clean    Dirty    Total     Size    Alloc     Free
                ------   ------   ------   ------   ------   ------   ------   ------
  Native Heap    24516    24440        0       12    25720    38912    21480     1020
  Dalvik Heap     8114     7964        0        3    12040    14124     7062     7062
 Dalvik Other     2214     1788        0        0     3124
        Stack      812      812        0        0      820
        TOTAL    52340    41230      400      150    78120    53036    28542     8082
";

    #[test]
    fn dumpsys_meminfo_keyword_breakdown() {
        let pss = parse_dumpsys_meminfo(MEMINFO_REPORT).unwrap();
        assert_eq!(pss.total_kb, 52_340);
        assert_eq!(pss.native_kb, 24_516);
        assert_eq!(pss.dalvik_kb, 8_114);
        assert_eq!(pss.heap_max_kb, Some(14_124));
        assert_eq!(pss.heap_used_kb, Some(7_062));
    }

    #[test]
    fn dumpsys_meminfo_without_total_is_none() {
        assert!(parse_dumpsys_meminfo("no such process\n").is_none());
    }
}
