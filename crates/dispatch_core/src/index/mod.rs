//! Live driver index: H3 cell buckets over a sharded driver table.
//!
//! - **Records**: one [`DriverState`] per driver, last-write-wins by timestamp.
//! - **Available partition**: cell → driver ids, holding only drivers that are
//!   online and available. Radius queries read nothing else, so an offline or
//!   busy driver can never surface as a candidate.
//!
//! Both maps are `DashMap`s, so writers only lock the shards they touch.
//! Whenever both are locked, the record is locked first.

mod search;
mod state;
mod sweeper;

use std::collections::HashSet;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use h3o::{CellIndex, Resolution};
use tracing::debug;

use crate::config::IndexConfig;
use crate::geo::{haversine_km, resolution_from_u8, Coordinates, GeoError};
use crate::types::{DriverId, VehicleClass};

use search::{plan_search, SearchPlan};

pub use state::{DriverState, DriverUpdate, NearbyDriver, UpsertOutcome};
pub use sweeper::StalenessSweeper;

#[derive(Debug)]
pub struct GeoIndex {
    resolution: Resolution,
    max_search_rings: u32,
    stale_after_ms: u64,
    default_rating: f64,
    drivers: DashMap<DriverId, DriverState>,
    available_by_cell: DashMap<CellIndex, HashSet<DriverId>>,
}

impl GeoIndex {
    pub fn new(config: &IndexConfig) -> Result<Self, GeoError> {
        Ok(Self {
            resolution: resolution_from_u8(config.resolution)?,
            max_search_rings: config.max_search_rings,
            stale_after_ms: config.stale_after_ms(),
            default_rating: config.default_rating,
            drivers: DashMap::new(),
            available_by_cell: DashMap::new(),
        })
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn stale_after_ms(&self) -> u64 {
        self.stale_after_ms
    }

    /// Inserts or replaces a driver record if `update` is strictly newer than
    /// what is stored, moving the driver between cell buckets as needed.
    pub fn upsert(&self, update: DriverUpdate) -> Result<UpsertOutcome, GeoError> {
        let cell = update.position.cell(self.resolution)?;
        let driver_id = update.driver_id;
        match self.drivers.entry(driver_id) {
            Entry::Occupied(mut entry) => {
                let current = entry.get_mut();
                if update.timestamp_ms <= current.last_update_ms {
                    return Ok(UpsertOutcome::Superseded);
                }
                let listed_in = current.is_dispatchable().then_some(current.cell);
                current.apply(update, cell);
                let listed_out = current.is_dispatchable().then_some(cell);
                self.relist(driver_id, listed_in, listed_out);
                Ok(UpsertOutcome::Updated)
            }
            Entry::Vacant(entry) => {
                let state = DriverState::from_update(update, cell, self.default_rating);
                if state.is_dispatchable() {
                    self.list(driver_id, cell);
                }
                entry.insert(state);
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    /// Removes a driver entirely (sign-off or eviction).
    pub fn remove(&self, driver_id: DriverId) -> Option<DriverState> {
        match self.drivers.entry(driver_id) {
            Entry::Occupied(entry) => {
                if entry.get().is_dispatchable() {
                    self.unlist(driver_id, entry.get().cell);
                }
                Some(entry.remove())
            }
            Entry::Vacant(_) => None,
        }
    }

    pub fn get(&self, driver_id: DriverId) -> Option<DriverState> {
        self.drivers.get(&driver_id).map(|state| state.clone())
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// Number of drivers currently in the available partition.
    pub fn available_count(&self) -> usize {
        self.available_by_cell
            .iter()
            .map(|bucket| bucket.value().len())
            .sum()
    }

    /// Online, available drivers within `radius_km` of `center`, nearest first
    /// (ties broken by driver id).
    pub fn query_radius(
        &self,
        center: Coordinates,
        radius_km: f64,
        vehicle_class: Option<&VehicleClass>,
    ) -> Result<Vec<NearbyDriver>, GeoError> {
        let center = center.validate()?;
        if !(radius_km >= 0.0) || !radius_km.is_finite() {
            return Err(GeoError::InvalidRadius(radius_km));
        }
        let center_cell = center.cell(self.resolution)?;

        let mut candidate_ids = Vec::new();
        match plan_search(center, center_cell, radius_km, self.max_search_rings) {
            SearchPlan::Cells(cells) => {
                for cell in &cells {
                    if let Some(bucket) = self.available_by_cell.get(cell) {
                        candidate_ids.extend(bucket.iter().copied());
                    }
                }
            }
            SearchPlan::FullScan => {
                debug!(radius_km, "radius exceeds ring cap, scanning available partition");
                for bucket in self.available_by_cell.iter() {
                    candidate_ids.extend(bucket.value().iter().copied());
                }
            }
        }

        // A driver moving between cells mid-query can be seen in both buckets.
        candidate_ids.sort_unstable();
        candidate_ids.dedup();

        let mut hits: Vec<NearbyDriver> = candidate_ids
            .into_iter()
            .filter_map(|driver_id| {
                let state = self.drivers.get(&driver_id)?;
                if !state.is_dispatchable() {
                    return None;
                }
                if vehicle_class.is_some_and(|class| *class != state.vehicle_class) {
                    return None;
                }
                let distance_km = haversine_km(center, state.position);
                (distance_km <= radius_km).then(|| NearbyDriver {
                    state: state.clone(),
                    distance_km,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            a.distance_km
                .total_cmp(&b.distance_km)
                .then_with(|| a.state.driver_id.cmp(&b.state.driver_id))
        });
        Ok(hits)
    }

    /// Takes a dispatchable driver out of the available partition for an
    /// assignment. Returns false if someone else got there first. The claim
    /// survives later location pings.
    pub fn claim(&self, driver_id: DriverId) -> bool {
        let Some(mut state) = self.drivers.get_mut(&driver_id) else {
            return false;
        };
        if !state.is_dispatchable() {
            return false;
        }
        state.claimed = true;
        self.unlist(driver_id, state.cell);
        true
    }

    /// Drops a claim, returning the driver to the available partition if it
    /// is still online and available.
    pub fn release(&self, driver_id: DriverId) -> bool {
        let Some(mut state) = self.drivers.get_mut(&driver_id) else {
            return false;
        };
        if !state.claimed {
            return false;
        }
        state.claimed = false;
        if state.is_dispatchable() {
            self.list(driver_id, state.cell);
        }
        true
    }

    /// Evicts every driver whose last update is older than the staleness
    /// window. Staleness is re-checked under the record lock, so an upsert
    /// racing with the sweep always wins.
    pub fn evict_stale(&self, now_ms: u64) -> Vec<DriverId> {
        let cutoff = now_ms.saturating_sub(self.stale_after_ms);
        let stale: Vec<DriverId> = self
            .drivers
            .iter()
            .filter(|entry| entry.value().last_update_ms < cutoff)
            .map(|entry| *entry.key())
            .collect();

        let mut evicted = Vec::with_capacity(stale.len());
        for driver_id in stale {
            if let Entry::Occupied(entry) = self.drivers.entry(driver_id) {
                if entry.get().last_update_ms >= cutoff {
                    continue;
                }
                if entry.get().is_dispatchable() {
                    self.unlist(driver_id, entry.get().cell);
                }
                entry.remove();
                evicted.push(driver_id);
            }
        }
        evicted
    }

    fn relist(&self, driver_id: DriverId, from: Option<CellIndex>, to: Option<CellIndex>) {
        if from == to {
            return;
        }
        if let Some(old_cell) = from {
            self.unlist(driver_id, old_cell);
        }
        if let Some(new_cell) = to {
            self.list(driver_id, new_cell);
        }
    }

    fn list(&self, driver_id: DriverId, cell: CellIndex) {
        self.available_by_cell
            .entry(cell)
            .or_default()
            .insert(driver_id);
    }

    fn unlist(&self, driver_id: DriverId, cell: CellIndex) {
        if let Entry::Occupied(mut bucket) = self.available_by_cell.entry(cell) {
            bucket.get_mut().remove(&driver_id);
            if bucket.get().is_empty() {
                bucket.remove();
            }
        }
    }
}
