//! Local Shannon Entropy Analyzer
//!
//! Fallback for the remote signal validator: classifies a payload as
//! CLEAN, SUSPICIOUS or ENCRYPTED from its byte-level Shannon entropy.

use serde::{Deserialize, Serialize};

/// Signal verdict for a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntropyVerdict {
    /// Plain structured data
    Clean,
    /// Elevated entropy, possible obfuscation
    Suspicious,
    /// Entropy consistent with encryption or compression
    Encrypted,
}

impl EntropyVerdict {
    /// Only CLEAN payloads pass the signal factor.
    pub fn approves(&self) -> bool {
        matches!(self, Self::Clean)
    }
}

/// Shannon entropy analyzer with configurable verdict thresholds.
#[derive(Debug, Clone)]
pub struct EntropyAnalyzer {
    /// Entropy at or below this is CLEAN (bits per byte)
    clean_threshold: f64,
    /// Entropy at or below this is SUSPICIOUS; above is ENCRYPTED
    suspicious_threshold: f64,
}

impl Default for EntropyAnalyzer {
    fn default() -> Self {
        Self {
            clean_threshold: 6.0,
            suspicious_threshold: 7.5,
        }
    }
}

impl EntropyAnalyzer {
    /// Create an analyzer with the default 6.0 / 7.5 thresholds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the verdict thresholds.
    pub fn with_thresholds(mut self, clean: f64, suspicious: f64) -> Self {
        self.clean_threshold = clean;
        self.suspicious_threshold = suspicious;
        self
    }

    /// Shannon entropy of the payload in bits per byte.
    ///
    /// Empty payloads carry zero information.
    pub fn entropy(&self, payload: &[u8]) -> f64 {
        if payload.is_empty() {
            return 0.0;
        }

        let mut counts = [0u64; 256];
        for &byte in payload {
            counts[byte as usize] += 1;
        }

        let len = payload.len() as f64;
        counts
            .iter()
            .filter(|&&c| c > 0)
            .map(|&c| {
                let p = c as f64 / len;
                -p * p.log2()
            })
            .sum()
    }

    /// Classify a payload.
    pub fn analyze(&self, payload: &[u8]) -> EntropyVerdict {
        let entropy = self.entropy(payload);
        let verdict = if entropy <= self.clean_threshold {
            EntropyVerdict::Clean
        } else if entropy <= self.suspicious_threshold {
            EntropyVerdict::Suspicious
        } else {
            EntropyVerdict::Encrypted
        };

        tracing::debug!(entropy, verdict = ?verdict, bytes = payload.len(), "Local entropy analysis");
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_payload_is_clean() {
        let analyzer = EntropyAnalyzer::new();
        assert_eq!(analyzer.entropy(b""), 0.0);
        assert_eq!(analyzer.analyze(b""), EntropyVerdict::Clean);
    }

    #[test]
    fn test_repetitive_payload_is_clean() {
        let analyzer = EntropyAnalyzer::new();
        let payload = vec![b'a'; 1024];
        assert!(analyzer.entropy(&payload) < 0.1);
        assert_eq!(analyzer.analyze(&payload), EntropyVerdict::Clean);
    }

    #[test]
    fn test_text_payload_is_clean() {
        let analyzer = EntropyAnalyzer::new();
        let payload = b"{\"rows\": [{\"id\": 1, \"name\": \"alice\"}, {\"id\": 2, \"name\": \"bob\"}]}";
        let entropy = analyzer.entropy(payload);
        assert!(entropy > 0.0 && entropy <= 6.0, "entropy was {entropy}");
        assert_eq!(analyzer.analyze(payload), EntropyVerdict::Clean);
    }

    #[test]
    fn test_uniform_bytes_look_encrypted() {
        let analyzer = EntropyAnalyzer::new();
        // Every byte value equally likely: entropy = 8 bits/byte.
        let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let entropy = analyzer.entropy(&payload);
        assert!((entropy - 8.0).abs() < 1e-9);
        assert_eq!(analyzer.analyze(&payload), EntropyVerdict::Encrypted);
    }

    #[test]
    fn test_threshold_override() {
        let analyzer = EntropyAnalyzer::new().with_thresholds(0.5, 1.0);
        let payload = b"hello world hello world";
        assert_eq!(analyzer.analyze(payload), EntropyVerdict::Encrypted);
    }

    #[test]
    fn test_verdict_approval() {
        assert!(EntropyVerdict::Clean.approves());
        assert!(!EntropyVerdict::Suspicious.approves());
        assert!(!EntropyVerdict::Encrypted.approves());
    }
}
