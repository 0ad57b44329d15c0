//! Per-Tenant Metering State
//!
//! Created lazily on a tenant's first frame; burn rate is recalculated
//! every 100 frames from the cost accumulated since the last recalc.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Frames between burn-rate recalculations.
pub(crate) const BURN_RATE_WINDOW_FRAMES: u64 = 100;

/// Metering state for one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantMeter {
    /// Tenant id
    pub tenant_id: String,
    /// Frames metered
    pub frame_count: u64,
    /// Cumulative cost in credits
    pub total_cost: f64,
    /// Cumulative governance tax in credits
    pub total_tax: f64,
    /// Credits per second over the last recalc window
    pub burn_rate: f64,
    /// Last frame timestamp
    pub last_frame_at: DateTime<Utc>,
    /// Cost accumulated since the last recalc
    window_cost: f64,
    /// Frames since the last recalc
    window_frames: u64,
    /// Start of the current recalc window
    window_started_at: DateTime<Utc>,
}

impl TenantMeter {
    /// Fresh meter for a tenant's first frame.
    pub fn new(tenant_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            tenant_id: tenant_id.into(),
            frame_count: 0,
            total_cost: 0.0,
            total_tax: 0.0,
            burn_rate: 0.0,
            last_frame_at: now,
            window_cost: 0.0,
            window_frames: 0,
            window_started_at: now,
        }
    }

    /// Record one frame's charge.
    pub fn record(&mut self, total_cost: f64, governance_tax: f64) {
        let now = Utc::now();
        self.frame_count += 1;
        self.total_cost += total_cost;
        self.total_tax += governance_tax;
        self.last_frame_at = now;

        self.window_cost += total_cost;
        self.window_frames += 1;

        if self.window_frames >= BURN_RATE_WINDOW_FRAMES {
            let elapsed = now
                .signed_duration_since(self.window_started_at)
                .num_milliseconds()
                .max(1) as f64
                / 1000.0;
            self.burn_rate = self.window_cost / elapsed;
            self.window_cost = 0.0;
            self.window_frames = 0;
            self.window_started_at = now;

            tracing::debug!(
                tenant_id = %self.tenant_id,
                burn_rate = self.burn_rate,
                "Burn rate recalculated"
            );
        }
    }

    /// Seconds since the tenant's last frame.
    pub fn idle_seconds(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.last_frame_at)
            .num_seconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accumulates() {
        let mut meter = TenantMeter::new("tenant-a");
        meter.record(0.002, 0.001);
        meter.record(0.004, 0.003);

        assert_eq!(meter.frame_count, 2);
        assert!((meter.total_cost - 0.006).abs() < 1e-12);
        assert!((meter.total_tax - 0.004).abs() < 1e-12);
    }

    #[test]
    fn test_burn_rate_recalcs_every_hundred_frames() {
        let mut meter = TenantMeter::new("tenant-a");
        for _ in 0..99 {
            meter.record(0.001, 0.0005);
        }
        assert_eq!(meter.burn_rate, 0.0);

        meter.record(0.001, 0.0005);
        assert!(meter.burn_rate > 0.0);
    }

    #[test]
    fn test_fresh_meter_is_not_idle() {
        let meter = TenantMeter::new("tenant-a");
        assert!(meter.idle_seconds() < 2);
    }
}
