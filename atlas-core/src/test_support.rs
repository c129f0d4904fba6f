//! Builders for entities used by unit and behaviour tests.

use crate::{Collection, EntityKind, Location, MemberRef, Point, Sequence, Tags};

/// Point at `(lon, lat)` degrees; panics on out-of-range input.
///
/// # Panics
///
/// Panics when the coordinate is outside the valid ranges.
#[must_use]
#[expect(clippy::expect_used, reason = "test fixtures fail fast on bad input")]
pub fn point_at(id: u64, lon: f64, lat: f64) -> Point {
    Point::new(
        id,
        Location::from_degrees(lon, lat).expect("fixture coordinate in range"),
    )
}

/// Point at `(lon, lat)` degrees carrying a single tag.
///
/// # Panics
///
/// Panics when the coordinate is outside the valid ranges.
#[must_use]
pub fn tagged_point_at(id: u64, lon: f64, lat: f64, key: &str, value: &str) -> Point {
    let mut point = point_at(id, lon, lat);
    point.tags = Tags::from_pairs([(key, value)]);
    point
}

/// Untagged sequence over `members`.
#[must_use]
pub fn sequence(id: u64, members: &[u64]) -> Sequence {
    Sequence::new(id, members.to_vec())
}

/// Collection whose members are `(kind, id)` pairs with empty roles.
#[must_use]
pub fn collection(id: u64, members: &[(EntityKind, u64)]) -> Collection {
    Collection::new(
        id,
        members
            .iter()
            .map(|(kind, member)| MemberRef::new(*kind, *member, ""))
            .collect(),
    )
}

/// Collection tagged `type=multipolygon` over sequence members.
#[must_use]
pub fn multipolygon(id: u64, outer: &[u64]) -> Collection {
    let mut relation = Collection::new(
        id,
        outer
            .iter()
            .map(|member| MemberRef::new(EntityKind::Sequence, *member, "outer"))
            .collect(),
    );
    relation.tags = Tags::from_pairs([("type", "multipolygon")]);
    relation
}
