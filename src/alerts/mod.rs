//! Alert Engine (C4): turns snapshot deltas into typed threshold events.
//!
//! Rules are evaluated independently — a single delta can produce more than
//! one alert (e.g. a crash alongside a volume spike).

use crate::core::config::AlertConfig;
use crate::snapshot::Delta;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlertKind {
    Crash,
    Spike,
    VolumeSpike,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alert {
    pub kind: AlertKind,
    pub token: u32,
    pub price_hundredths: i64,
    pub pct: f64,
    pub ratio: Option<f64>,
    pub elapsed: Duration,
}

impl Alert {
    /// Plain-text rendering posted to the alert sink channel.
    pub fn render(&self, display_name: &str) -> String {
        let price = crate::price::Price(self.price_hundredths);
        match self.kind {
            AlertKind::Crash => format!(
                "CRASH {display_name}: {price} ({:+.2}% over {}s)",
                self.pct,
                self.elapsed.as_secs()
            ),
            AlertKind::Spike => format!(
                "SPIKE {display_name}: {price} ({:+.2}% over {}s)",
                self.pct,
                self.elapsed.as_secs()
            ),
            AlertKind::VolumeSpike => format!(
                "VOLUME_SPIKE {display_name}: {price} (volume x{:.2} over {}s)",
                self.ratio.unwrap_or(0.0),
                self.elapsed.as_secs()
            ),
        }
    }
}

/// Evaluates every rule against one delta and returns however many alerts fire.
pub fn evaluate(delta: &Delta, config: &AlertConfig) -> Vec<Alert> {
    let mut alerts = Vec::new();
    let elapsed = delta.elapsed();
    let within_window = elapsed <= config.window;

    let Some(pct) = delta.pct_change() else {
        return alerts;
    };

    if within_window && pct <= -config.crash_pct {
        alerts.push(Alert {
            kind: AlertKind::Crash,
            token: delta.new.token,
            price_hundredths: delta.new.last_price.hundredths(),
            pct,
            ratio: None,
            elapsed,
        });
    }

    if within_window && pct >= config.spike_pct {
        alerts.push(Alert {
            kind: AlertKind::Spike,
            token: delta.new.token,
            price_hundredths: delta.new.last_price.hundredths(),
            pct,
            ratio: None,
            elapsed,
        });
    }

    if let (Some(old_vol), Some(new_vol)) = (delta.old.volume, delta.new.volume) {
        if old_vol > 0 {
            let ratio = new_vol as f64 / old_vol as f64;
            let gate_ok = !config.gate_volume_spike_by_window || within_window;
            if gate_ok && ratio >= config.volume_ratio {
                alerts.push(Alert {
                    kind: AlertKind::VolumeSpike,
                    token: delta.new.token,
                    price_hundredths: delta.new.last_price.hundredths(),
                    pct,
                    ratio: Some(ratio),
                    elapsed,
                });
            }
        }
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::price::Price;
    use crate::snapshot::Entry;
    use std::time::Instant;

    fn entry(token: u32, price: i64, volume: u32, at: Instant) -> Entry {
        Entry {
            token,
            last_price: Price(price),
            change: None,
            volume: Some(volume),
            ohlc: None,
            depth: None,
            buy_qty: None,
            sell_qty: None,
            avg_price: None,
            last_qty: None,
            observed_at: at,
        }
    }

    #[test]
    fn crash_alert_fires_within_window() {
        let t0 = Instant::now();
        let delta = Delta {
            old: entry(1, 250_000, 1000, t0),
            new: entry(1, 240_000, 1000, t0 + Duration::from_secs(60)),
        };
        let alerts = evaluate(&delta, &AlertConfig::default());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::Crash);
        assert!((alerts[0].pct - (-4.0)).abs() < 1e-9);
        assert_eq!(alerts[0].elapsed, Duration::from_secs(60));
    }

    #[test]
    fn no_alert_outside_window() {
        let t0 = Instant::now();
        let mut config = AlertConfig::default();
        config.window = Duration::from_secs(10);
        let delta = Delta {
            old: entry(1, 250_000, 1000, t0),
            new: entry(1, 240_000, 1000, t0 + Duration::from_secs(60)),
        };
        assert!(evaluate(&delta, &config).is_empty());
    }

    #[test]
    fn volume_spike_without_price_movement() {
        let t0 = Instant::now();
        let delta = Delta {
            old: entry(1, 100_00, 100_000, t0),
            new: entry(1, 100_00, 300_000, t0 + Duration::from_secs(10)),
        };
        let alerts = evaluate(&delta, &AlertConfig::default());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::VolumeSpike);
        assert_eq!(alerts[0].ratio, Some(3.0));
    }

    #[test]
    fn volume_spike_gated_by_window_when_configured() {
        let t0 = Instant::now();
        let mut config = AlertConfig::default();
        config.window = Duration::from_secs(5);
        config.gate_volume_spike_by_window = true;
        let delta = Delta {
            old: entry(1, 100_00, 100_000, t0),
            new: entry(1, 100_00, 300_000, t0 + Duration::from_secs(10)),
        };
        assert!(evaluate(&delta, &config).is_empty());
    }

    #[test]
    fn spike_and_volume_spike_can_both_fire() {
        let t0 = Instant::now();
        let delta = Delta {
            old: entry(1, 100_00, 100_000, t0),
            new: entry(1, 104_00, 300_000, t0 + Duration::from_secs(1)),
        };
        let alerts = evaluate(&delta, &AlertConfig::default());
        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().any(|a| a.kind == AlertKind::Spike));
        assert!(alerts.iter().any(|a| a.kind == AlertKind::VolumeSpike));
    }

    #[test]
    fn zero_old_volume_never_triggers_volume_spike() {
        let t0 = Instant::now();
        let delta = Delta {
            old: entry(1, 100_00, 0, t0),
            new: entry(1, 100_00, 10, t0 + Duration::from_secs(1)),
        };
        assert!(evaluate(&delta, &AlertConfig::default()).is_empty());
    }
}
