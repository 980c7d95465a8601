//! Spatial operations: H3-based driver indexing and distance calculations.
//!
//! This module provides:
//!
//! - **GeoIndex**: Wrapper for H3 resolution configuration
//! - **Grid disk queries**: Find cells within K grid distance, LRU cached
//! - **Distance calculations**: Haversine (great-circle) distance between points
//! - **DriverIndex**: H3 cell → driver mappings for radius-bounded candidate lookup

use std::collections::HashMap;
use std::num::NonZeroUsize;

use h3o::{CellIndex, Resolution};
use lru::LruCache;
use parking_lot::Mutex;

use crate::error::{DispatchError, DispatchResult};
use crate::model::{GeoPoint, UserId};

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Kilometres per degree used by the flat fare-distance approximation.
pub const KM_PER_DEGREE: f64 = 111.0;

/// Beyond this ring count a radius query scans every indexed driver instead.
const MAX_DISK_K: u32 = 48;

/// Great-circle distance in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lng.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lng.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    haversine_km(a, b) * 1000.0
}

/// Straight-line distance in degree space scaled by [`KM_PER_DEGREE`].
///
/// Fares are quoted on this approximation rather than the geodesic distance.
pub fn fare_distance_km(pickup: GeoPoint, dropoff: GeoPoint) -> f64 {
    let dlat = dropoff.lat - pickup.lat;
    let dlng = dropoff.lng - pickup.lng;
    (dlat * dlat + dlng * dlng).sqrt() * KM_PER_DEGREE
}

#[derive(Debug, Clone, Copy)]
pub struct GeoIndex {
    resolution: Resolution,
}

impl GeoIndex {
    pub fn new(resolution: Resolution) -> Self {
        Self { resolution }
    }

    pub fn from_level(level: u8) -> DispatchResult<Self> {
        Resolution::try_from(level)
            .map(Self::new)
            .map_err(|_| DispatchError::validation(format!("invalid H3 resolution {level}")))
    }

    pub fn cell(&self, point: GeoPoint) -> DispatchResult<CellIndex> {
        Ok(point.to_lat_lng()?.to_cell(self.resolution))
    }

    pub fn grid_disk(&self, origin: CellIndex, k: u32) -> Vec<CellIndex> {
        debug_assert_eq!(
            origin.resolution(),
            self.resolution,
            "origin resolution must match GeoIndex resolution"
        );
        origin.grid_disk::<Vec<_>>(k)
    }

    /// Ring count whose disk covers every point within `radius_m` of the origin cell.
    ///
    /// Rings are closest together along the hexagon corners (1.5 edge lengths);
    /// the 0.8 factor allows for cells smaller than the resolution average.
    pub fn rings_for_radius(&self, radius_m: f64) -> u32 {
        let spacing_m = self.resolution.edge_length_m() * 1.5 * 0.8;
        ((radius_m.max(0.0) / spacing_m).ceil() as u32).saturating_add(1)
    }
}

impl Default for GeoIndex {
    fn default() -> Self {
        Self {
            resolution: Resolution::Seven,
        }
    }
}

/// Grid disk cache for radius queries around popular pickup cells.
struct GridDiskCache {
    cache: Mutex<LruCache<(CellIndex, u32), Vec<CellIndex>>>,
}

impl GridDiskCache {
    fn new() -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(1_000).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    fn get_or_compute(&self, origin: CellIndex, k: u32, geo: &GeoIndex) -> Vec<CellIndex> {
        self.cache
            .lock()
            .get_or_insert((origin, k), || geo.grid_disk(origin, k))
            .clone()
    }
}

/// Spatial index of drivers by H3 cell.
///
/// Maintains a forward (cell → drivers) and reverse (driver → cell, position)
/// mapping so position updates move a driver between cells in O(cell size).
/// Insertion order within a cell is preserved, which keeps equal-distance
/// tie-breaks stable.
pub struct DriverIndex {
    geo: GeoIndex,
    drivers_by_cell: HashMap<CellIndex, Vec<UserId>>,
    driver_to_cell: HashMap<UserId, (CellIndex, GeoPoint)>,
    disk_cache: GridDiskCache,
}

impl DriverIndex {
    pub fn new(geo: GeoIndex) -> Self {
        Self {
            geo,
            drivers_by_cell: HashMap::new(),
            driver_to_cell: HashMap::new(),
            disk_cache: GridDiskCache::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.driver_to_cell.len()
    }

    pub fn is_empty(&self) -> bool {
        self.driver_to_cell.is_empty()
    }

    /// Insert or move a driver.
    pub fn upsert(&mut self, driver: UserId, position: GeoPoint) -> DispatchResult<()> {
        let cell = self.geo.cell(position)?;
        if let Some((old_cell, _)) = self.driver_to_cell.get(&driver).copied() {
            if old_cell != cell {
                self.detach(driver, old_cell);
                self.drivers_by_cell.entry(cell).or_default().push(driver);
            }
        } else {
            self.drivers_by_cell.entry(cell).or_default().push(driver);
        }
        self.driver_to_cell.insert(driver, (cell, position));
        Ok(())
    }

    fn detach(&mut self, driver: UserId, cell: CellIndex) {
        if let Some(drivers) = self.drivers_by_cell.get_mut(&cell) {
            drivers.retain(|&d| d != driver);
            if drivers.is_empty() {
                self.drivers_by_cell.remove(&cell);
            }
        }
    }

    /// Drivers within `radius_m` of `origin`, nearest first, with their distance in metres.
    ///
    /// Candidates come from the covering grid disk; the exact cut is made on
    /// haversine distance. The sort is stable, so equidistant drivers keep
    /// index order.
    pub fn within_radius(
        &self,
        origin: GeoPoint,
        radius_m: f64,
    ) -> DispatchResult<Vec<(UserId, f64)>> {
        let origin_cell = self.geo.cell(origin)?;
        let k = self.geo.rings_for_radius(radius_m);

        let candidates: Vec<UserId> = if k > MAX_DISK_K {
            self.driver_to_cell.keys().copied().collect()
        } else {
            let cells = self.disk_cache.get_or_compute(origin_cell, k, &self.geo);
            cells
                .iter()
                .filter_map(|cell| self.drivers_by_cell.get(cell))
                .flat_map(|drivers| drivers.iter().copied())
                .collect()
        };

        let mut hits: Vec<(UserId, f64)> = candidates
            .into_iter()
            .filter_map(|driver| {
                let (_, position) = self.driver_to_cell.get(&driver)?;
                let distance_m = haversine_m(origin, *position);
                (distance_m <= radius_m).then_some((driver, distance_m))
            })
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let d = haversine_km(GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 0.0));
        assert!((d - 111.19).abs() < 0.01, "got {d}");
    }

    #[test]
    fn fare_distance_uses_flat_degrees() {
        let d = fare_distance_km(GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 1.0));
        assert!((d - 111.0).abs() < 1e-9);
    }

    #[test]
    fn grid_disk_returns_neighbors_within_k() {
        let geo = GeoIndex::new(Resolution::Ten);
        let origin = CellIndex::try_from(0x8a1fb46622dffff).expect("valid cell");
        let cells = geo.grid_disk(origin, 1);

        assert!(cells.contains(&origin));
        for cell in cells {
            let distance = origin.grid_distance(cell).expect("grid distance");
            assert!(distance <= 1);
        }
    }

    #[test]
    fn radius_query_orders_by_distance_and_cuts_at_radius() {
        let mut index = DriverIndex::new(GeoIndex::default());
        let near = UserId::new();
        let mid = UserId::new();
        let far = UserId::new();
        index.upsert(far, GeoPoint::new(52.60, 13.40)).expect("far");
        index.upsert(near, GeoPoint::new(52.5205, 13.4050)).expect("near");
        index.upsert(mid, GeoPoint::new(52.53, 13.41)).expect("mid");

        let hits = index
            .within_radius(GeoPoint::new(52.52, 13.405), 5_000.0)
            .expect("query");
        let ids: Vec<UserId> = hits.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![near, mid]);
        assert!(hits[0].1 <= hits[1].1);
    }

    #[test]
    fn moving_a_driver_updates_its_cell() {
        let mut index = DriverIndex::new(GeoIndex::default());
        let driver = UserId::new();
        index.upsert(driver, GeoPoint::new(52.52, 13.405)).expect("insert");
        index.upsert(driver, GeoPoint::new(48.85, 2.35)).expect("move");

        let berlin = index
            .within_radius(GeoPoint::new(52.52, 13.405), 2_000.0)
            .expect("query");
        assert!(berlin.is_empty());
        let paris = index
            .within_radius(GeoPoint::new(48.85, 2.35), 2_000.0)
            .expect("query");
        assert_eq!(paris.len(), 1);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn huge_radius_falls_back_to_full_scan() {
        let mut index = DriverIndex::new(GeoIndex::default());
        let driver = UserId::new();
        index.upsert(driver, GeoPoint::new(-33.86, 151.2)).expect("insert");
        let hits = index
            .within_radius(GeoPoint::new(52.52, 13.405), 20_000_000.0)
            .expect("query");
        assert_eq!(hits.len(), 1);
    }
}
