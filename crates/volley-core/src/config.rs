use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How the gap between consecutive sends is drawn. Both observed profiles
/// ship as presets; the scheduler draws fresh randomness every tick.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "profile", rename_all = "snake_case")]
pub enum DelayPolicy {
    /// `base` plus a uniform jitter in `[-variance, +variance]`, never below
    /// `floor`.
    Spread {
        base: Duration,
        variance: Duration,
        floor: Duration,
    },
    /// Uniform draw from `[min, max]`.
    Uniform { min: Duration, max: Duration },
}

impl DelayPolicy {
    /// 50s ± 20s with a 30s floor.
    pub fn spread_default() -> Self {
        DelayPolicy::Spread {
            base: Duration::from_secs(50),
            variance: Duration::from_secs(20),
            floor: Duration::from_secs(30),
        }
    }

    /// Uniform 60–125s.
    pub fn uniform_default() -> Self {
        DelayPolicy::Uniform {
            min: Duration::from_secs(60),
            max: Duration::from_secs(125),
        }
    }

    /// Draw one inter-send gap.
    pub fn sample(&self, rng: &mut impl Rng) -> Duration {
        match self {
            DelayPolicy::Spread {
                base,
                variance,
                floor,
            } => {
                let base_ms = base.as_millis() as i64;
                let variance_ms = variance.as_millis() as i64;
                let jitter = if variance_ms == 0 {
                    0
                } else {
                    rng.gen_range(-variance_ms..=variance_ms)
                };
                let ms = (base_ms + jitter).max(floor.as_millis() as i64);
                Duration::from_millis(ms as u64)
            }
            DelayPolicy::Uniform { min, max } => {
                let lo = min.as_millis() as u64;
                let hi = (max.as_millis() as u64).max(lo);
                Duration::from_millis(rng.gen_range(lo..=hi))
            }
        }
    }
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self::uniform_default()
    }
}

/// Local-time window during which sending is allowed; outside it the
/// scheduler defers and reports quiet hours. The window may wrap midnight;
/// `start_hour == end_hour` means the gate is effectively off.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SendWindow {
    pub start_hour: u32,
    pub end_hour: u32,
    /// How long a deferred tick waits before re-checking the clock.
    pub recheck: Duration,
}

impl SendWindow {
    /// True when `hour` falls inside the allowed sending window
    /// `[start_hour, end_hour)`.
    pub fn allows(&self, hour: u32) -> bool {
        if self.start_hour == self.end_hour {
            true
        } else if self.start_hour < self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

impl Default for SendWindow {
    fn default() -> Self {
        Self {
            start_hour: 8,
            end_hour: 21,
            recheck: Duration::from_secs(60),
        }
    }
}

/// Long pause inserted after every `every` consecutive sends.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Cooldown {
    pub every: u32,
    pub pause: Duration,
}

impl Default for Cooldown {
    fn default() -> Self {
        Self {
            every: 40,
            pause: Duration::from_secs(15 * 60),
        }
    }
}

/// Scheduler pacing: the delay profile plus the optional gates.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PacingConfig {
    pub delay: DelayPolicy,
    pub send_window: Option<SendWindow>,
    pub cooldown: Option<Cooldown>,
}

/// Reconnect behavior after a non-terminal disconnect. The default retries
/// immediately and forever; a terminal logout is never retried regardless of
/// these knobs.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub retry_delay: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            retry_delay: Duration::ZERO,
            max_attempts: None,
        }
    }
}

/// Top-level configuration: the fixed session set plus pacing, reconnect,
/// and fan-out knobs.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatcherConfig {
    pub sessions: Vec<String>,
    pub pacing: PacingConfig,
    pub reconnect: ReconnectPolicy,
    /// Events buffered per observer before new ones are dropped.
    pub subscriber_buffer: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            sessions: vec!["main".to_string()],
            pacing: PacingConfig::default(),
            reconnect: ReconnectPolicy::default(),
            subscriber_buffer: 64,
        }
    }
}
