//! Fare calculation: distance, vehicle class, time of day, weekday and demand.
//!
//! `fare = (base + km * per_km[class]) * time * day * demand`, rounded to cents.
//! The demand level comes from a [`DemandSource`] so tests can pin it.

use std::sync::Arc;

use chrono::{DateTime, Datelike, FixedOffset, Offset, Timelike, Utc, Weekday};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::PricingConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::model::VehicleClass;

/// Current market load, as a percentage surcharge (`0` = none, `50` = +50%).
pub trait DemandSource: Send + Sync {
    fn current_demand(&self) -> f64;
}

/// Uniform demand in `[0, 50)`, like a placeholder market feed.
pub struct RandomDemand {
    rng: Mutex<StdRng>,
}

impl RandomDemand {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng: Mutex::new(rng) }
    }
}

impl DemandSource for RandomDemand {
    fn current_demand(&self) -> f64 {
        f64::from(self.rng.lock().gen_range(0u32..50))
    }
}

/// Constant demand level.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedDemand(pub f64);

impl DemandSource for FixedDemand {
    fn current_demand(&self) -> f64 {
        self.0
    }
}

pub fn round_to_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Pure fare table. Holds configuration only.
#[derive(Debug, Clone, Default)]
pub struct PricingEngine {
    config: PricingConfig,
}

impl PricingEngine {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    /// Per-km rate for `class`; classes missing from the table use the default class.
    pub fn per_km_rate(&self, class: VehicleClass) -> f64 {
        self.config
            .per_km_rates
            .get(&class)
            .or_else(|| self.config.per_km_rates.get(&self.config.default_class))
            .copied()
            .unwrap_or(0.0)
    }

    fn local_time(&self, at: DateTime<Utc>) -> DateTime<FixedOffset> {
        let offset = FixedOffset::east_opt(self.config.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix());
        at.with_timezone(&offset)
    }

    pub fn time_multiplier(&self, at: DateTime<Utc>) -> f64 {
        let hour = self.local_time(at).hour();
        if self.config.night_window.contains(hour) {
            self.config.night_multiplier
        } else if self.config.peak_windows.iter().any(|w| w.contains(hour)) {
            self.config.peak_multiplier
        } else {
            1.0
        }
    }

    pub fn day_multiplier(&self, at: DateTime<Utc>) -> f64 {
        match self.local_time(at).weekday() {
            Weekday::Sat | Weekday::Sun => self.config.weekend_multiplier,
            _ => 1.0,
        }
    }

    pub fn demand_multiplier(demand_level: f64) -> f64 {
        1.0 + demand_level / 100.0
    }

    /// Fare for a trip of `distance_km`. Never fails; callers validate the distance.
    pub fn price(
        &self,
        distance_km: f64,
        class: VehicleClass,
        demand_level: f64,
        at: DateTime<Utc>,
    ) -> f64 {
        let subtotal = self.config.base_fare + distance_km * self.per_km_rate(class);
        round_to_cents(
            subtotal
                * self.time_multiplier(at)
                * self.day_multiplier(at)
                * Self::demand_multiplier(demand_level),
        )
    }

    /// Final booking price: the larger of the caller's offer and the computed floor.
    pub fn settle(&self, offered: Option<f64>, floor: f64) -> DispatchResult<f64> {
        match offered {
            None => Ok(floor),
            Some(price) if !price.is_finite() || price <= 0.0 => Err(DispatchError::validation(
                format!("price {price} must be a positive amount"),
            )),
            Some(price) => Ok(round_to_cents(price.max(floor))),
        }
    }
}

pub type SharedDemand = Arc<dyn DemandSource>;
