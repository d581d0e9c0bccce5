//! Zone partition model.
//!
//! Static description of the world's division into rectangular zones
//! with an overlapping aura margin, plus the geometry queries the
//! handoff and aura layers are built on. Pure data: no runtime state.
//!
//! Each zone has two nested rectangles. The *bounds* are the full box
//! a shard simulates, expanded by the aura margin on every interior
//! edge so that adjacent boxes overlap exactly within the margin. The
//! *core* is the box shrunk back by the margin on those same edges;
//! core regions are disjoint and define single ownership. A position is
//! in exactly one core (or none, on the measure-zero seam between two
//! cores), but may be inside as many as four boxes near a corner.

use crate::config::ShardConfig;
use crate::error::ShardError;
use crate::types::{Vec3, ZoneId};
use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle on the X/Z plane with vertical bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneBounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_z: f64,
    pub max_z: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl ZoneBounds {
    /// Planar containment check, inclusive on all edges.
    pub fn contains(&self, x: f64, z: f64) -> bool {
        x >= self.min_x && x <= self.max_x && z >= self.min_z && z <= self.max_z
    }
}

/// Immutable definition of one zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneDefinition {
    pub id: ZoneId,
    pub name: String,

    /// Full simulated box, including the aura margin on interior edges.
    pub bounds: ZoneBounds,
    /// Ownership region: `bounds` shrunk by the aura margin on interior
    /// edges. Always a subset of `bounds`.
    pub core: ZoneBounds,

    pub center_x: f64,
    pub center_z: f64,

    /// Zones whose boxes overlap this one's (4-connectivity in a grid).
    pub adjacent: Vec<ZoneId>,

    /// Network address of the shard that owns this zone.
    pub host: String,
    pub port: u16,
}

impl ZoneDefinition {
    /// True if the position lies in this zone's core region.
    ///
    /// Edges the margin was subtracted from (interior edges) are
    /// exclusive, so the seam between two adjacent cores belongs to
    /// neither; world-boundary edges are inclusive.
    pub fn contains_core(&self, x: f64, z: f64) -> bool {
        let in_min_x = if self.core.min_x > self.bounds.min_x {
            x > self.core.min_x
        } else {
            x >= self.core.min_x
        };
        let in_max_x = if self.core.max_x < self.bounds.max_x {
            x < self.core.max_x
        } else {
            x <= self.core.max_x
        };
        let in_min_z = if self.core.min_z > self.bounds.min_z {
            z > self.core.min_z
        } else {
            z >= self.core.min_z
        };
        let in_max_z = if self.core.max_z < self.bounds.max_z {
            z < self.core.max_z
        } else {
            z <= self.core.max_z
        };
        in_min_x && in_max_x && in_min_z && in_max_z
    }

    /// True if the position is inside the box but outside the core,
    /// i.e. within the shared overlap region.
    pub fn in_aura_buffer(&self, x: f64, z: f64) -> bool {
        self.bounds.contains(x, z) && !self.contains_core(x, z)
    }

    /// Signed distance from the position to the nearest edge of this
    /// zone's box: negative when inside (magnitude = distance to the
    /// closest edge), positive Euclidean distance when outside.
    ///
    /// The sign lets callers distinguish "approaching the boundary from
    /// inside" from "already past it".
    pub fn distance_to_edge(&self, x: f64, z: f64) -> f64 {
        let b = &self.bounds;
        if b.contains(x, z) {
            let min_dist = (x - b.min_x)
                .min(b.max_x - x)
                .min(z - b.min_z)
                .min(b.max_z - z);
            -min_dist
        } else {
            let dx = if x < b.min_x {
                b.min_x - x
            } else if x > b.max_x {
                x - b.max_x
            } else {
                0.0
            };
            let dz = if z < b.min_z {
                b.min_z - z
            } else if z > b.max_z {
                z - b.max_z
            } else {
                0.0
            };
            (dx * dx + dz * dz).sqrt()
        }
    }

    /// How far inside the box the position sits, clamped at zero for
    /// positions outside. This is the depth the ownership hysteresis
    /// compares against the transfer threshold.
    pub fn interior_depth(&self, x: f64, z: f64) -> f64 {
        (-self.distance_to_edge(x, z)).max(0.0)
    }

    /// Planar unit vector from the position toward the zone center.
    pub fn direction_to_center(&self, x: f64, z: f64) -> Vec3 {
        Vec3::new(self.center_x - x, 0.0, self.center_z - z).normalized_planar()
    }

    /// Intersection of this zone's box with another's, if any.
    pub fn overlap_with(&self, other: &ZoneDefinition) -> Option<ZoneBounds> {
        let min_x = self.bounds.min_x.max(other.bounds.min_x);
        let max_x = self.bounds.max_x.min(other.bounds.max_x);
        let min_z = self.bounds.min_z.max(other.bounds.min_z);
        let max_z = self.bounds.max_z.min(other.bounds.max_z);
        if min_x < max_x && min_z < max_z {
            Some(ZoneBounds {
                min_x,
                max_x,
                min_z,
                max_z,
                min_y: self.bounds.min_y.max(other.bounds.min_y),
                max_y: self.bounds.max_y.min(other.bounds.max_y),
            })
        } else {
            None
        }
    }
}

/// The world's static division into zones.
#[derive(Debug, Clone)]
pub struct WorldPartition {
    zones: Vec<ZoneDefinition>,
}

impl WorldPartition {
    /// Builds a `cols` x `rows` grid of rectangular zones over the
    /// given world bounds.
    ///
    /// Boxes are expanded by the aura margin on interior edges only,
    /// so zones at the world boundary do not extend past it. Zone ids
    /// are 1-based; each zone's shard listens on `base_port + id`.
    pub fn create_grid(
        cols: u32,
        rows: u32,
        world: ZoneBounds,
        config: &ShardConfig,
    ) -> Result<Self, ShardError> {
        if cols == 0 || rows == 0 {
            return Err(ShardError::Config(
                "partition grid must have at least one zone".to_string(),
            ));
        }
        let width = (world.max_x - world.min_x) / cols as f64;
        let height = (world.max_z - world.min_z) / rows as f64;
        let margin = config.aura_margin;
        if width <= 2.0 * margin || height <= 2.0 * margin {
            return Err(ShardError::Config(format!(
                "zone size {width:.0}x{height:.0} too small for a {margin:.0} unit aura margin"
            )));
        }

        let mut zones = Vec::with_capacity((cols * rows) as usize);
        for row in 0..rows {
            for col in 0..cols {
                let id = ZoneId(row * cols + col + 1);

                let core = ZoneBounds {
                    min_x: world.min_x + col as f64 * width,
                    max_x: world.min_x + (col + 1) as f64 * width,
                    min_z: world.min_z + row as f64 * height,
                    max_z: world.min_z + (row + 1) as f64 * height,
                    min_y: world.min_y,
                    max_y: world.max_y,
                };
                let bounds = ZoneBounds {
                    min_x: core.min_x - if col > 0 { margin } else { 0.0 },
                    max_x: core.max_x + if col < cols - 1 { margin } else { 0.0 },
                    min_z: core.min_z - if row > 0 { margin } else { 0.0 },
                    max_z: core.max_z + if row < rows - 1 { margin } else { 0.0 },
                    min_y: world.min_y,
                    max_y: world.max_y,
                };

                let mut adjacent = Vec::new();
                if col > 0 {
                    adjacent.push(ZoneId(id.0 - 1));
                }
                if col < cols - 1 {
                    adjacent.push(ZoneId(id.0 + 1));
                }
                if row > 0 {
                    adjacent.push(ZoneId(id.0 - cols));
                }
                if row < rows - 1 {
                    adjacent.push(ZoneId(id.0 + cols));
                }

                zones.push(ZoneDefinition {
                    id,
                    name: format!("zone-{}", id.0),
                    bounds,
                    core,
                    center_x: (bounds.min_x + bounds.max_x) / 2.0,
                    center_z: (bounds.min_z + bounds.max_z) / 2.0,
                    adjacent,
                    host: "127.0.0.1".to_string(),
                    port: config.base_port.wrapping_add(id.0 as u16),
                });
            }
        }

        Ok(Self { zones })
    }

    /// Builds a partition from explicit zone definitions, checking the
    /// core-within-bounds invariant.
    pub fn from_zones(zones: Vec<ZoneDefinition>) -> Result<Self, ShardError> {
        for zone in &zones {
            let b = &zone.bounds;
            let c = &zone.core;
            if c.min_x < b.min_x || c.max_x > b.max_x || c.min_z < b.min_z || c.max_z > b.max_z {
                return Err(ShardError::Config(format!(
                    "zone {} core region exceeds its bounds",
                    zone.id
                )));
            }
            if b.min_x >= b.max_x || b.min_z >= b.max_z {
                return Err(ShardError::Config(format!(
                    "zone {} has degenerate bounds",
                    zone.id
                )));
            }
        }
        Ok(Self { zones })
    }

    pub fn zones(&self) -> &[ZoneDefinition] {
        &self.zones
    }

    pub fn zone(&self, id: ZoneId) -> Option<&ZoneDefinition> {
        self.zones.iter().find(|zone| zone.id == id)
    }

    /// Returns the zone whose *core* contains the position. Cores are
    /// disjoint, so at most one zone matches; positions inside an
    /// overlap region (or outside the world) return `None`.
    pub fn find_zone_for_position(&self, x: f64, z: f64) -> Option<&ZoneDefinition> {
        self.zones.iter().find(|zone| zone.contains_core(x, z))
    }

    /// Returns every zone whose full box (core + margin) contains the
    /// position: one zone well inside a core, two along a shared edge,
    /// up to four near a corner.
    pub fn find_zones_with_aura_overlap(&self, x: f64, z: f64) -> Vec<ZoneId> {
        self.zones
            .iter()
            .filter(|zone| zone.bounds.contains(x, z))
            .map(|zone| zone.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world_1000() -> ZoneBounds {
        ZoneBounds {
            min_x: -1000.0,
            max_x: 1000.0,
            min_z: -500.0,
            max_z: 500.0,
            min_y: -100.0,
            max_y: 500.0,
        }
    }

    fn grid_2x1() -> WorldPartition {
        WorldPartition::create_grid(2, 1, world_1000(), &ShardConfig::default()).unwrap()
    }

    #[test]
    fn grid_expands_interior_edges_only() {
        let partition = grid_2x1();
        let left = partition.zone(ZoneId(1)).unwrap();
        let right = partition.zone(ZoneId(2)).unwrap();

        assert_eq!(left.bounds.min_x, -1000.0);
        assert_eq!(left.bounds.max_x, 50.0);
        assert_eq!(right.bounds.min_x, -50.0);
        assert_eq!(right.bounds.max_x, 1000.0);

        // Boxes overlap exactly within the margin
        let overlap = left.overlap_with(right).unwrap();
        assert_eq!(overlap.min_x, -50.0);
        assert_eq!(overlap.max_x, 50.0);
    }

    #[test]
    fn grid_adjacency_is_4_connected() {
        let partition =
            WorldPartition::create_grid(2, 2, world_1000(), &ShardConfig::default()).unwrap();
        let bottom_left = partition.zone(ZoneId(1)).unwrap();
        assert_eq!(bottom_left.adjacent, vec![ZoneId(2), ZoneId(3)]);
        let top_right = partition.zone(ZoneId(4)).unwrap();
        assert_eq!(top_right.adjacent, vec![ZoneId(3), ZoneId(2)]);
    }

    #[test]
    fn ports_follow_zone_ids() {
        let partition = grid_2x1();
        for zone in partition.zones() {
            assert_eq!(zone.port, 7777 + zone.id.0 as u16);
        }
    }

    #[test]
    fn core_lookup_guarantees_single_ownership() {
        let partition = grid_2x1();

        assert_eq!(
            partition.find_zone_for_position(-400.0, 0.0).unwrap().id,
            ZoneId(1)
        );
        assert_eq!(
            partition.find_zone_for_position(400.0, 0.0).unwrap().id,
            ZoneId(2)
        );
        // The seam between the two cores belongs to neither
        assert!(partition.find_zone_for_position(0.0, 0.0).is_none());
        // Outside the world entirely
        assert!(partition.find_zone_for_position(2000.0, 0.0).is_none());
        // World-boundary edge is owned (no margin subtracted there)
        assert!(partition.find_zone_for_position(-1000.0, 0.0).is_some());
    }

    #[test]
    fn aura_overlap_spans_both_boxes() {
        let partition = grid_2x1();

        let overlap = partition.find_zones_with_aura_overlap(25.0, 0.0);
        assert_eq!(overlap, vec![ZoneId(1), ZoneId(2)]);

        let single = partition.find_zones_with_aura_overlap(-400.0, 0.0);
        assert_eq!(single, vec![ZoneId(1)]);
    }

    #[test]
    fn corner_position_overlaps_four_zones() {
        let partition =
            WorldPartition::create_grid(2, 2, world_1000(), &ShardConfig::default()).unwrap();
        let corner = partition.find_zones_with_aura_overlap(0.0, 0.0);
        assert_eq!(corner.len(), 4);
    }

    #[test]
    fn distance_to_edge_is_signed() {
        let partition = grid_2x1();
        let left = partition.zone(ZoneId(1)).unwrap();

        // Inside: negative, magnitude = distance to nearest edge
        assert_eq!(left.distance_to_edge(0.0, 0.0), -50.0);
        // Outside: positive Euclidean distance
        assert_eq!(left.distance_to_edge(150.0, 0.0), 100.0);
        assert_eq!(left.interior_depth(0.0, 0.0), 50.0);
        assert_eq!(left.interior_depth(150.0, 0.0), 0.0);
    }

    #[test]
    fn direction_to_center_points_inward() {
        let partition = grid_2x1();
        let left = partition.zone(ZoneId(1)).unwrap();
        let dir = left.direction_to_center(40.0, 0.0);
        assert!(dir.x < 0.0); // center of zone 1 is west of x=40
    }

    #[test]
    fn rejects_zone_smaller_than_margin() {
        let config = ShardConfig::default();
        let result = WorldPartition::create_grid(30, 1, world_1000(), &config);
        assert!(matches!(result, Err(ShardError::Config(_))));
    }

    #[test]
    fn from_zones_rejects_core_outside_bounds() {
        let partition = grid_2x1();
        let mut zone = partition.zone(ZoneId(1)).unwrap().clone();
        zone.core.max_x = zone.bounds.max_x + 1.0;
        assert!(WorldPartition::from_zones(vec![zone]).is_err());
    }
}
