//! Battery state from the power-supply sysfs tree, with a `dumpsys battery`
//! text fallback. Kernel units: temperature in tenths of °C, voltage in µV.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ad_shell::Shell;

use crate::sample::BatteryMetrics;

const SYSFS_BATTERY: &str = "/sys/class/power_supply/battery";

/// Parse a `dumpsys battery` report.
pub fn parse_dumpsys_battery(text: &str) -> Option<BatteryMetrics> {
    let mut level = None;
    let mut temperature = None;
    let mut voltage = None;
    let mut charging = false;
    for line in text.lines() {
        let line = line.trim();
        if let Some(v) = line.strip_prefix("level:") {
            level = v.trim().parse().ok();
        } else if let Some(v) = line.strip_prefix("temperature:") {
            // Tenths of a degree Celsius.
            temperature = v.trim().parse::<f64>().ok().map(|t| t / 10.0);
        } else if let Some(v) = line.strip_prefix("voltage:") {
            // dumpsys reports millivolts directly.
            voltage = v.trim().parse().ok();
        } else if let Some(v) = line.strip_prefix("status:") {
            // 2 = charging, 5 = full.
            charging = matches!(v.trim(), "2" | "5");
        } else if line == "AC powered: true" || line == "USB powered: true" {
            charging = true;
        }
    }
    Some(BatteryMetrics {
        level_percent: level?,
        temperature_c: temperature,
        voltage_mv: voltage,
        charging,
        current_ua: None,
    })
}

async fn read_sysfs<T: std::str::FromStr>(dir: &Path, file: &str) -> Option<T> {
    let text = tokio::fs::read_to_string(dir.join(file)).await.ok()?;
    text.trim().parse().ok()
}

pub struct BatteryCollector {
    shell: Arc<dyn Shell>,
    sysfs_dir: std::path::PathBuf,
}

impl BatteryCollector {
    pub fn new(shell: Arc<dyn Shell>) -> Self {
        Self {
            shell,
            sysfs_dir: SYSFS_BATTERY.into(),
        }
    }

    pub async fn collect(&mut self) -> Option<BatteryMetrics> {
        if let Some(metrics) = self.collect_sysfs().await {
            return Some(metrics);
        }
        let out = self
            .shell
            .run("dumpsys battery", false, Duration::from_secs(3))
            .await
            .ok()
            .filter(|o| o.success())?;
        parse_dumpsys_battery(&out.stdout)
    }

    async fn collect_sysfs(&self) -> Option<BatteryMetrics> {
        let dir = self.sysfs_dir.as_path();
        let level: i32 = read_sysfs(dir, "capacity").await?;
        let temperature_c = read_sysfs::<f64>(dir, "temp").await.map(|t| t / 10.0);
        let voltage_mv = read_sysfs::<i64>(dir, "voltage_now").await.map(|uv| uv / 1000);
        let current_ua = read_sysfs::<i64>(dir, "current_now").await;
        let status: Option<String> = read_sysfs(dir, "status").await;
        let charging = matches!(status.as_deref(), Some("Charging") | Some("Full"));
        Some(BatteryMetrics {
            level_percent: level,
            temperature_c,
            voltage_mv,
            charging,
            current_ua,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dumpsys_battery_report_parses() {
        let text = "\
Current Battery Service state:
  AC powered: false
  USB powered: true
  status: 2
  level: 85
  voltage: 4123
  temperature: 312
";
        let b = parse_dumpsys_battery(text).unwrap();
        assert_eq!(b.level_percent, 85);
        assert_eq!(b.temperature_c, Some(31.2));
        assert_eq!(b.voltage_mv, Some(4123));
        assert!(b.charging);
        assert!(b.current_ua.is_none());
    }

    #[test]
    fn discharging_status_is_not_charging() {
        let text = "status: 3\nlevel: 40\n";
        let b = parse_dumpsys_battery(text).unwrap();
        assert!(!b.charging);
    }

    #[test]
    fn missing_level_is_unknown() {
        assert!(parse_dumpsys_battery("status: 2\n").is_none());
    }
}
