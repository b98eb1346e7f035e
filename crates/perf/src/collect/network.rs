//! Cumulative traffic from `/proc/net/dev`, summed across non-loopback
//! interfaces; speeds are divided differences against the prior read.

use std::time::Instant;

use crate::sample::NetworkMetrics;

/// `(rx_bytes, tx_bytes)` summed over every interface except `lo`.
pub fn parse_proc_net_dev(text: &str) -> (u64, u64) {
    let mut rx = 0u64;
    let mut tx = 0u64;
    for line in text.lines().skip(2) {
        let Some((name, rest)) = line.split_once(':') else { continue };
        if name.trim() == "lo" {
            continue;
        }
        let fields: Vec<u64> = rest
            .split_whitespace()
            .filter_map(|f| f.parse().ok())
            .collect();
        // Receive bytes is column 0; transmit bytes is column 8.
        if fields.len() >= 9 {
            rx += fields[0];
            tx += fields[8];
        }
    }
    (rx, tx)
}

pub struct NetworkCollector {
    prev: Option<(u64, u64, Instant)>,
}

impl NetworkCollector {
    pub fn new() -> Self {
        Self { prev: None }
    }

    pub async fn collect(&mut self) -> Option<NetworkMetrics> {
        let text = tokio::fs::read_to_string("/proc/net/dev").await.ok()?;
        let now = Instant::now();
        let (rx, tx) = parse_proc_net_dev(&text);
        let (rx_rate, tx_rate) = match self.prev {
            Some((prev_rx, prev_tx, at)) => {
                let secs = now.duration_since(at).as_secs_f64();
                if secs > 0.0 {
                    (
                        (rx.saturating_sub(prev_rx) as f64 / secs) as u64,
                        (tx.saturating_sub(prev_tx) as f64 / secs) as u64,
                    )
                } else {
                    (0, 0)
                }
            }
            None => (0, 0),
        };
        self.prev = Some((rx, tx, now));
        Some(NetworkMetrics {
            rx_total_bytes: rx,
            tx_total_bytes: tx,
            rx_bytes_per_sec: rx_rate,
            tx_bytes_per_sec: tx_rate,
        })
    }
}

impl Default for NetworkCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NET_DEV: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 1000000    1000    0    0    0     0          0         0  1000000    1000    0    0    0     0       0          0
 wlan0: 5000000    4000    0    0    0     0          0         0  2000000    3000    0    0    0     0       0          0
rmnet0:  300000     200    0    0    0     0          0         0   100000     150    0    0    0     0       0          0
";

    #[test]
    fn sums_non_loopback_interfaces() {
        let (rx, tx) = parse_proc_net_dev(NET_DEV);
        assert_eq!(rx, 5_300_000);
        assert_eq!(tx, 2_100_000);
    }

    #[test]
    fn empty_table_sums_to_zero() {
        assert_eq!(parse_proc_net_dev("header\nheader\n"), (0, 0));
    }
}
