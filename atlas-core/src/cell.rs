//! Hierarchical quadtree cell identifiers.
//!
//! The lon/lat plane is split recursively into four quadrants. A cell id
//! stores the Morton-interleaved quadrant path followed by a single marker
//! bit, so every descendant of a cell at any finer level falls inside one
//! contiguous id range. Points are always indexed at [`LEAF_LEVEL`]; coarser
//! cells in a covering resolve to a single range scan over leaf ids.

use geo::{Coord, Rect};

use crate::Location;

/// Deepest level representable by a [`CellId`].
pub const MAX_LEVEL: u8 = 30;

/// Level at which every point is indexed.
pub const LEAF_LEVEL: u8 = 16;

const AXIS_CELLS: u64 = 1 << MAX_LEVEL;
const LON_SPAN: u64 = 3_600_000_000;
const LAT_SPAN: u64 = 1_800_000_000;

/// Identifier of one quadtree cell.
///
/// # Examples
///
/// ```
/// use atlas_core::{CellId, LEAF_LEVEL, Location};
///
/// let leaf = CellId::leaf(Location::new(0, 0));
/// assert_eq!(leaf.level(), LEAF_LEVEL);
/// let parent = leaf.parent(4);
/// assert!(parent.contains(leaf));
/// assert!(parent.child_begin(LEAF_LEVEL) <= leaf && leaf < parent.child_end(LEAF_LEVEL));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CellId(u64);

const fn lsb_for_level(level: u8) -> u64 {
    1 << (2 * (MAX_LEVEL - level))
}

impl CellId {
    /// The single level-zero cell covering the whole plane.
    pub const ROOT: Self = Self(lsb_for_level(0));

    /// Wrap a raw id without validation.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw id used as the index key.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Cell containing `location` at `level`.
    ///
    /// Levels deeper than [`MAX_LEVEL`] are clamped.
    #[must_use]
    pub fn from_location(location: Location, level: u8) -> Self {
        let i = axis_position(location.lon, 1_800_000_000, LON_SPAN);
        let j = axis_position(location.lat, 900_000_000, LAT_SPAN);
        let leaf = Self((interleave(i, j) << 1) | 1);
        leaf.parent(level.min(MAX_LEVEL))
    }

    /// Cell containing `location` at [`LEAF_LEVEL`].
    #[must_use]
    pub fn leaf(location: Location) -> Self {
        Self::from_location(location, LEAF_LEVEL)
    }

    /// Whether the id carries a valid marker bit.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0 && self.0.trailing_zeros() % 2 == 0 && self.0 <= (AXIS_CELLS * AXIS_CELLS) << 1
    }

    /// Lowest set bit, the marker that encodes the level.
    #[must_use]
    pub const fn lsb(self) -> u64 {
        self.0 & self.0.wrapping_neg()
    }

    /// Subdivision depth of this cell.
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "trailing zeros of a valid id never exceed 60"
    )]
    pub const fn level(self) -> u8 {
        MAX_LEVEL - (self.0.trailing_zeros() >> 1) as u8
    }

    /// Ancestor at `level`; `level` must not exceed [`CellId::level`].
    #[must_use]
    pub const fn parent(self, level: u8) -> Self {
        let lsb = lsb_for_level(level);
        Self((self.0 & lsb.wrapping_neg()) | lsb)
    }

    /// The four children one level down, in id order.
    #[must_use]
    pub const fn children(self) -> [Self; 4] {
        let lsb = self.lsb();
        let child = lsb >> 2;
        let first = self.0 - lsb + child;
        [
            Self(first),
            Self(first + 2 * child),
            Self(first + 4 * child),
            Self(first + 6 * child),
        ]
    }

    /// First descendant at `level` (inclusive).
    #[must_use]
    pub const fn child_begin(self, level: u8) -> Self {
        Self(self.0 - self.lsb() + lsb_for_level(level))
    }

    /// One past the last descendant at `level` (exclusive).
    #[must_use]
    pub const fn child_end(self, level: u8) -> Self {
        Self(self.0 + self.lsb() + lsb_for_level(level))
    }

    /// Smallest id of any descendant.
    #[must_use]
    pub const fn range_min(self) -> u64 {
        self.0 - (self.lsb() - 1)
    }

    /// Largest id of any descendant.
    #[must_use]
    pub const fn range_max(self) -> u64 {
        self.0 + (self.lsb() - 1)
    }

    /// Whether `other` is this cell or one of its descendants.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        other.0 >= self.range_min() && other.0 <= self.range_max()
    }

    /// Column and row of the cell at its own level.
    fn grid_position(self) -> (u32, u32) {
        let shift = 2 * u32::from(MAX_LEVEL - self.level()) + 1;
        let path = self.0 >> shift;
        (compact(path >> 1), compact(path))
    }

    /// Bounds in degrees with `x = longitude` and `y = latitude`.
    #[must_use]
    #[expect(
        clippy::float_arithmetic,
        reason = "cell edges are converted from grid steps into degrees"
    )]
    pub fn bounds(self) -> Rect<f64> {
        let (i, j) = self.grid_position();
        let cells = f64::from(1_u32 << self.level());
        let width = 360.0 / cells;
        let height = 180.0 / cells;
        let min = Coord {
            x: f64::from(i).mul_add(width, -180.0),
            y: f64::from(j).mul_add(height, -90.0),
        };
        Rect::new(
            min,
            Coord {
                x: min.x + width,
                y: min.y + height,
            },
        )
    }
}

/// Map a fixed-point coordinate onto `[0, 2^30)`.
#[expect(
    clippy::integer_division,
    reason = "grid positions truncate towards the containing cell"
)]
fn axis_position(value: i32, offset: i64, span: u64) -> u32 {
    let shifted = u64::try_from(i64::from(value) + offset).unwrap_or(0).min(span);
    let position = (shifted * AXIS_CELLS / span).min(AXIS_CELLS - 1);
    u32::try_from(position).unwrap_or(u32::MAX >> 2)
}

/// Spread the low 30 bits of `value` onto the even bit positions of a `u64`.
const fn spread(value: u32) -> u64 {
    let mut x = value as u64 & 0x3fff_ffff;
    x = (x | (x << 16)) & 0x0000_ffff_0000_ffff;
    x = (x | (x << 8)) & 0x00ff_00ff_00ff_00ff;
    x = (x | (x << 4)) & 0x0f0f_0f0f_0f0f_0f0f;
    x = (x | (x << 2)) & 0x3333_3333_3333_3333;
    (x | (x << 1)) & 0x5555_5555_5555_5555
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "compaction leaves at most 32 significant bits"
)]
const fn compact(value: u64) -> u32 {
    let mut x = value & 0x5555_5555_5555_5555;
    x = (x | (x >> 1)) & 0x3333_3333_3333_3333;
    x = (x | (x >> 2)) & 0x0f0f_0f0f_0f0f_0f0f;
    x = (x | (x >> 4)) & 0x00ff_00ff_00ff_00ff;
    x = (x | (x >> 8)) & 0x0000_ffff_0000_ffff;
    x = (x | (x >> 16)) & 0x0000_0000_ffff_ffff;
    x as u32
}

const fn interleave(i: u32, j: u32) -> u64 {
    (spread(i) << 1) | spread(j)
}
