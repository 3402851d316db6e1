//! Cell coverage for radius searches.
//!
//! Expands H3 grid rings around the cell containing the query center until the
//! outermost ring provably holds no point within the radius. Any continuous
//! path from the center to a point crosses every intermediate ring, so once a
//! whole ring is out of reach, nothing beyond it can be in reach either.

use h3o::CellIndex;

use crate::geo::{cell_center, cell_circumradius_km, haversine_km, Coordinates};

/// Relative and absolute slack on cell circumradii. Cell edges are not exact
/// geodesics, so the bound is widened slightly.
const CIRCUMRADIUS_SLACK: f64 = 1.02;
const CIRCUMRADIUS_SLACK_KM: f64 = 0.005;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SearchPlan {
    /// Every cell that may contain a point within the radius.
    Cells(Vec<CellIndex>),
    /// Ring expansion would exceed the configured cap.
    FullScan,
}

/// Lower bound on the distance from `center` to any point of `cell`.
fn min_distance_to_cell_km(center: Coordinates, cell: CellIndex) -> f64 {
    let reach = cell_circumradius_km(cell) * CIRCUMRADIUS_SLACK + CIRCUMRADIUS_SLACK_KM;
    haversine_km(center, cell_center(cell)) - reach
}

fn initial_rings(center_cell: CellIndex, radius_km: f64) -> u32 {
    // Adjacent hexagon centers sit ~1.7 edge lengths apart; the circumradius
    // is about one edge length.
    let spacing_km = cell_circumradius_km(center_cell) * 1.5;
    if spacing_km <= 0.0 {
        return 1;
    }
    ((radius_km / spacing_km).ceil() as u32).saturating_add(1)
}

pub(crate) fn plan_search(
    center: Coordinates,
    center_cell: CellIndex,
    radius_km: f64,
    max_rings: u32,
) -> SearchPlan {
    let mut rings = initial_rings(center_cell, radius_km).max(1);
    loop {
        if rings > max_rings {
            return SearchPlan::FullScan;
        }
        let disk: Vec<(CellIndex, u32)> = center_cell.grid_disk_distances(rings);
        let outer_ring_reachable = disk
            .iter()
            .filter(|(_, distance)| *distance == rings)
            .any(|(cell, _)| min_distance_to_cell_km(center, *cell) <= radius_km);
        if !outer_ring_reachable {
            return SearchPlan::Cells(disk.into_iter().map(|(cell, _)| cell).collect());
        }
        rings = rings.saturating_mul(2);
    }
}
