//! Approximate a [`Region`] with a set of quadtree cells.

use crate::{CellId, LEAF_LEVEL, Region};

/// Produces cell coverings for regions.
///
/// A covering must be a superset of the region: every leaf cell that holds
/// a point inside the region must descend from some covering cell.
pub trait Coverer {
    /// Cells whose union contains `region`, sorted and free of overlaps.
    fn covering(&self, region: &Region) -> Vec<CellId>;
}

/// Breadth-first quadtree coverer.
///
/// Cells overlapping the region are subdivided one level at a time until
/// either `max_level` is reached or the next level would exceed
/// `max_cells`, at which point the current level is returned.
///
/// # Examples
///
/// ```
/// use atlas_core::{CellId, Coverer, Location, QuadCoverer, Region, RegionFormat};
///
/// let region = Region::parse(RegionFormat::Bbox, "0.0,0.0,0.01,0.01").expect("valid bbox");
/// let cells = QuadCoverer::default().covering(&region);
/// let inside = CellId::leaf(Location::new(50_000, 50_000));
/// assert!(cells.iter().any(|cell| cell.contains(inside)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuadCoverer {
    /// Upper bound on the number of cells returned.
    pub max_cells: usize,
    /// Finest level that cells are refined to.
    pub max_level: u8,
}

impl Default for QuadCoverer {
    fn default() -> Self {
        Self {
            max_cells: 1024,
            max_level: LEAF_LEVEL,
        }
    }
}

impl Coverer for QuadCoverer {
    fn covering(&self, region: &Region) -> Vec<CellId> {
        let mut current = vec![CellId::ROOT];
        let max_level = self.max_level.min(LEAF_LEVEL);
        for _ in 0..max_level {
            let next: Vec<CellId> = current
                .iter()
                .flat_map(|cell| cell.children())
                .filter(|cell| region.intersects_rect(&cell.bounds()))
                .collect();
            if next.len() > self.max_cells {
                break;
            }
            current = next;
        }
        current
    }
}
