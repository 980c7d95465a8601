//! Tunables for the dispatch core. Every field has a default so partial
//! configuration files deserialize cleanly.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::VehicleClass;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub pricing: PricingConfig,
    pub matching: MatchingConfig,
    pub scheduler: SchedulerConfig,
    pub tracking: TrackingConfig,
    pub simulator: SimulatorConfig,
}

/// Half-open hour window `[start, end)`; wraps past midnight when `start > end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourWindow {
    pub start: u32,
    pub end: u32,
}

impl HourWindow {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            hour >= self.start && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub base_fare: f64,
    pub per_km_rates: BTreeMap<VehicleClass, f64>,
    /// Class whose rate is used when a class has no entry in `per_km_rates`.
    pub default_class: VehicleClass,
    pub night_multiplier: f64,
    pub night_window: HourWindow,
    pub peak_multiplier: f64,
    pub peak_windows: Vec<HourWindow>,
    pub weekend_multiplier: f64,
    /// Offset applied to UTC before reading hour-of-day and weekday.
    pub utc_offset_minutes: i32,
}

impl Default for PricingConfig {
    fn default() -> Self {
        let per_km_rates = BTreeMap::from([
            (VehicleClass::Sedan, 1.5),
            (VehicleClass::Suv, 2.0),
            (VehicleClass::Van, 2.5),
            (VehicleClass::Truck, 3.0),
        ]);
        Self {
            base_fare: 5.0,
            per_km_rates,
            default_class: VehicleClass::Sedan,
            night_multiplier: 1.5,
            night_window: HourWindow::new(22, 6),
            peak_multiplier: 1.3,
            peak_windows: vec![HourWindow::new(7, 10), HourWindow::new(16, 19)],
            weekend_multiplier: 1.2,
            utc_offset_minutes: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// H3 resolution of the driver index (7 is ~1.2 km edge).
    pub index_resolution: u8,
    pub default_radius_m: f64,
    /// Candidates tried, nearest first, before giving up on a contested match.
    pub max_candidate_attempts: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            index_resolution: 7,
            default_radius_m: 10_000.0,
            max_candidate_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_secs: u64,
    pub lookahead_secs: u64,
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }

    pub fn lookahead(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lookahead_secs as i64)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: 60,
            lookahead_secs: 5 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Buffered updates per topic before a slow subscriber starts skipping.
    pub topic_capacity: usize,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
}

impl TrackingConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            topic_capacity: 64,
            cache_ttl_secs: 6 * 60 * 60,
            cache_capacity: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub speed_kmh: f64,
    pub tick_millis: u64,
    /// Degrees; both axes must be within this of the destination to arrive.
    pub arrival_tolerance_deg: f64,
}

impl SimulatorConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis.max(1))
    }

    /// Distance covered per tick at the configured speed.
    pub fn step_km(&self) -> f64 {
        self.speed_kmh * self.tick().as_secs_f64() / 3600.0
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            speed_kmh: 60.0,
            tick_millis: 2 * 60 * 1000,
            arrival_tolerance_deg: 0.0001,
        }
    }
}
