//! Temporal Jitter Injector
//!
//! Sleeps a cryptographically random interval before each response so that
//! response timing cannot be used as a covert channel, and watches each
//! agent's observed intervals for machine-regular patterns. The coefficient
//! of variation over recent intervals classifies the agent's timing:
//! below 0.15 is steganographic, below 0.4 suspicious, otherwise clean.

use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Timing classification for an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimingVerdict {
    /// Interval CV below 0.15: timing is a probable covert channel
    Steganographic,
    /// Interval CV below 0.4
    Suspicious,
    /// Organic-looking timing
    Clean,
    /// Fewer than 3 intervals recorded
    Insufficient,
}

/// Jitter bounds and sample retention.
#[derive(Debug, Clone)]
pub struct JitterConfig {
    /// Minimum injected delay in milliseconds
    pub min_ms: u64,
    /// Maximum injected delay in milliseconds
    pub max_ms: u64,
    /// Interval samples kept per agent
    pub max_samples: usize,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            min_ms: 5,
            max_ms: 50,
            max_samples: 64,
        }
    }
}

/// The jitter injector and timing analyzer.
pub struct JitterInjector {
    config: JitterConfig,
    /// Recent response intervals per agent, milliseconds
    intervals: RwLock<HashMap<String, VecDeque<f64>>>,
    /// Last response instant per agent, epoch milliseconds
    last_response: RwLock<HashMap<String, u64>>,
}

impl JitterInjector {
    /// Create an injector with the given bounds.
    pub fn new(config: JitterConfig) -> Self {
        Self {
            config,
            intervals: RwLock::new(HashMap::new()),
            last_response: RwLock::new(HashMap::new()),
        }
    }

    /// Pick a random delay in `[min_ms, max_ms]`.
    ///
    /// `ThreadRng` is a CSPRNG, so delays are not predictable from
    /// previous observations.
    pub fn pick_delay(&self) -> Duration {
        let (min, max) = (self.config.min_ms, self.config.max_ms.max(self.config.min_ms));
        let ms = rand::rng().random_range(min..=max);
        Duration::from_millis(ms)
    }

    /// Sleep the random delay and record the agent's response interval.
    pub async fn inject(&self, agent_id: &str) -> Duration {
        let delay = self.pick_delay();
        tokio::time::sleep(delay).await;
        self.record_response(agent_id);
        tracing::trace!(agent_id = %agent_id, delay_ms = delay.as_millis() as u64, "Jitter injected");
        delay
    }

    /// Record a response instant for interval tracking.
    pub fn record_response(&self, agent_id: &str) {
        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let previous = self
            .last_response
            .write()
            .insert(agent_id.to_string(), now_ms);

        if let Some(prev) = previous {
            let interval = now_ms.saturating_sub(prev) as f64;
            let mut intervals = self.intervals.write();
            let samples = intervals.entry(agent_id.to_string()).or_default();
            if samples.len() == self.config.max_samples {
                samples.pop_front();
            }
            samples.push_back(interval);
        }
    }

    /// Recorded intervals for an agent.
    pub fn intervals(&self, agent_id: &str) -> Vec<f64> {
        self.intervals
            .read()
            .get(agent_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Classify an agent's response timing.
    pub fn analyze(&self, agent_id: &str) -> TimingVerdict {
        let samples = self.intervals(agent_id);
        Self::classify(&samples)
    }

    /// Classify a set of intervals directly.
    pub fn classify(samples: &[f64]) -> TimingVerdict {
        if samples.len() < 3 {
            return TimingVerdict::Insufficient;
        }

        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        if mean <= 0.0 {
            return TimingVerdict::Steganographic;
        }
        let variance =
            samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / samples.len() as f64;
        let cv = variance.sqrt() / mean;

        if cv < 0.15 {
            TimingVerdict::Steganographic
        } else if cv < 0.4 {
            TimingVerdict::Suspicious
        } else {
            TimingVerdict::Clean
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_stays_in_bounds() {
        let injector = JitterInjector::new(JitterConfig {
            min_ms: 10,
            max_ms: 20,
            max_samples: 16,
        });
        for _ in 0..100 {
            let delay = injector.pick_delay().as_millis() as u64;
            assert!((10..=20).contains(&delay), "delay {delay} out of bounds");
        }
    }

    #[test]
    fn test_classify_metronomic_as_steganographic() {
        let samples = vec![100.0, 100.5, 99.5, 100.0, 100.2];
        assert_eq!(
            JitterInjector::classify(&samples),
            TimingVerdict::Steganographic
        );
    }

    #[test]
    fn test_classify_moderate_variance_as_suspicious() {
        // CV around 0.25.
        let samples = vec![100.0, 130.0, 75.0, 110.0, 90.0];
        assert_eq!(JitterInjector::classify(&samples), TimingVerdict::Suspicious);
    }

    #[test]
    fn test_classify_organic_as_clean() {
        let samples = vec![50.0, 400.0, 120.0, 900.0, 60.0];
        assert_eq!(JitterInjector::classify(&samples), TimingVerdict::Clean);
    }

    #[test]
    fn test_insufficient_samples() {
        assert_eq!(
            JitterInjector::classify(&[100.0, 101.0]),
            TimingVerdict::Insufficient
        );
    }

    #[tokio::test]
    async fn test_inject_records_intervals() {
        let injector = JitterInjector::new(JitterConfig {
            min_ms: 1,
            max_ms: 2,
            max_samples: 16,
        });

        for _ in 0..4 {
            injector.inject("agent-1").await;
        }

        // N responses produce N-1 intervals.
        assert_eq!(injector.intervals("agent-1").len(), 3);
        assert!(injector.intervals("agent-2").is_empty());
    }

    #[test]
    fn test_sample_window_bounded() {
        let injector = JitterInjector::new(JitterConfig {
            min_ms: 1,
            max_ms: 2,
            max_samples: 4,
        });
        for _ in 0..10 {
            injector.record_response("agent-1");
        }
        assert!(injector.intervals("agent-1").len() <= 4);
    }
}
