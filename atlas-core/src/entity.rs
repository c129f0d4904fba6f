//! Entity model: points, sequences of points and collections of members.
//!
//! Each kind lives in its own id space. Sequences reference points by id;
//! collections reference any kind through [`MemberRef`].

use std::fmt;

use crate::Location;

/// Ordered key/value tag pairs.
///
/// # Examples
///
/// ```
/// use atlas_core::Tags;
///
/// let tags = Tags::from_pairs([("type", "multipolygon"), ("name", "Lake")]);
/// assert_eq!(tags.get("type"), Some("multipolygon"));
/// assert!(tags.has("name", "Lake"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct Tags(Vec<(String, String)>);

impl Tags {
    /// Build tags from borrowed or owned pairs, preserving order.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }

    /// Append a pair.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /// Value of the first pair with `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, value)| value.as_str())
    }

    /// Whether a pair `key=value` is present.
    #[must_use]
    pub fn has(&self, key: &str, value: &str) -> bool {
        self.get(key) == Some(value)
    }

    /// Whether there are no pairs.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of pairs.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

/// Edit metadata attached to an entity version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Revision {
    /// Version number, starting at one.
    pub version: u32,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    /// Changeset that produced this version.
    pub changeset: u64,
    /// Numeric user id of the editor.
    pub uid: u32,
    /// Display name of the editor.
    pub user: String,
}

/// The three entity kinds, in bulk-load order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EntityKind {
    /// A located point.
    Point,
    /// An ordered list of points.
    Sequence,
    /// A group of references to other entities.
    Collection,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Point => "point",
            Self::Sequence => "sequence",
            Self::Collection => "collection",
        })
    }
}

/// A located point with optional attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Point {
    /// Identifier within the point table.
    pub id: u64,
    /// Fixed-point coordinate.
    pub location: Location,
    /// Attributes.
    pub tags: Tags,
    /// Edit metadata, if known.
    pub revision: Option<Revision>,
}

impl Point {
    /// Create an untagged point.
    #[must_use]
    pub fn new(id: u64, location: Location) -> Self {
        Self {
            id,
            location,
            tags: Tags::default(),
            revision: None,
        }
    }

    /// Whether the point needs a payload record alongside its coordinate.
    #[must_use]
    pub const fn is_tagged(&self) -> bool {
        !self.tags.is_empty()
    }

    /// Attributes stored in the payload table.
    #[must_use]
    pub fn body(&self) -> PointBody {
        PointBody {
            tags: self.tags.clone(),
            revision: self.revision.clone(),
        }
    }
}

/// Payload record of a tagged point; the coordinate is stored separately.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PointBody {
    /// Attributes.
    pub tags: Tags,
    /// Edit metadata, if known.
    pub revision: Option<Revision>,
}

/// An ordered path of point ids.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sequence {
    /// Identifier within the sequence table.
    pub id: u64,
    /// Point ids in path order; repeats are allowed.
    pub members: Vec<u64>,
    /// Attributes.
    pub tags: Tags,
    /// Edit metadata, if known.
    pub revision: Option<Revision>,
}

impl Sequence {
    /// Create an untagged sequence.
    #[must_use]
    pub fn new(id: u64, members: Vec<u64>) -> Self {
        Self {
            id,
            members,
            tags: Tags::default(),
            revision: None,
        }
    }

    /// Whether the first and last member are the same point.
    ///
    /// # Examples
    ///
    /// ```
    /// use atlas_core::Sequence;
    ///
    /// assert!(Sequence::new(1, vec![1, 2, 3, 1]).is_closed());
    /// assert!(!Sequence::new(2, vec![1, 2, 3]).is_closed());
    /// ```
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.members.len() > 1 && self.members.first() == self.members.last()
    }
}

/// A typed reference from a collection to another entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MemberRef {
    /// Reference to a point.
    Point {
        /// Referenced point id.
        id: u64,
        /// Role of the member within the collection.
        role: String,
    },
    /// Reference to a sequence.
    Sequence {
        /// Referenced sequence id.
        id: u64,
        /// Role of the member within the collection.
        role: String,
    },
    /// Reference to a collection.
    Collection {
        /// Referenced collection id.
        id: u64,
        /// Role of the member within the collection.
        role: String,
    },
}

impl MemberRef {
    /// Referenced id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        match self {
            Self::Point { id, .. } | Self::Sequence { id, .. } | Self::Collection { id, .. } => {
                *id
            }
        }
    }

    /// Kind of the referenced entity.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Point { .. } => EntityKind::Point,
            Self::Sequence { .. } => EntityKind::Sequence,
            Self::Collection { .. } => EntityKind::Collection,
        }
    }

    /// Role string.
    #[must_use]
    pub fn role(&self) -> &str {
        match self {
            Self::Point { role, .. } | Self::Sequence { role, .. } | Self::Collection { role, .. } => {
                role
            }
        }
    }

    /// Build a reference of the given kind.
    #[must_use]
    pub fn new(kind: EntityKind, id: u64, role: impl Into<String>) -> Self {
        match kind {
            EntityKind::Point => Self::Point {
                id,
                role: role.into(),
            },
            EntityKind::Sequence => Self::Sequence {
                id,
                role: role.into(),
            },
            EntityKind::Collection => Self::Collection {
                id,
                role: role.into(),
            },
        }
    }
}

/// A named group of references.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Collection {
    /// Identifier within the collection table.
    pub id: u64,
    /// Members in order.
    pub members: Vec<MemberRef>,
    /// Attributes.
    pub tags: Tags,
    /// Edit metadata, if known.
    pub revision: Option<Revision>,
}

impl Collection {
    /// Create an untagged collection.
    #[must_use]
    pub fn new(id: u64, members: Vec<MemberRef>) -> Self {
        Self {
            id,
            members,
            tags: Tags::default(),
            revision: None,
        }
    }

    /// Ids of members of `kind`, in member order.
    pub fn member_ids(&self, kind: EntityKind) -> impl Iterator<Item = u64> + '_ {
        self.members
            .iter()
            .filter(move |member| member.kind() == kind)
            .map(MemberRef::id)
    }
}

/// Any stored entity.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Entity {
    /// A point.
    Point(Point),
    /// A sequence.
    Sequence(Sequence),
    /// A collection.
    Collection(Collection),
}

impl Entity {
    /// Kind of the entity.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Point(_) => EntityKind::Point,
            Self::Sequence(_) => EntityKind::Sequence,
            Self::Collection(_) => EntityKind::Collection,
        }
    }

    /// Identifier within the entity's table.
    #[must_use]
    pub const fn id(&self) -> u64 {
        match self {
            Self::Point(point) => point.id,
            Self::Sequence(sequence) => sequence.id,
            Self::Collection(collection) => collection.id,
        }
    }
}

impl From<Point> for Entity {
    fn from(point: Point) -> Self {
        Self::Point(point)
    }
}

impl From<Sequence> for Entity {
    fn from(sequence: Sequence) -> Self {
        Self::Sequence(sequence)
    }
}

impl From<Collection> for Entity {
    fn from(collection: Collection) -> Self {
        Self::Collection(collection)
    }
}

/// One record of a change batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// A new entity.
    Create(Entity),
    /// A replacement body for an existing entity.
    Modify(Entity),
    /// Removal of an entity.
    Delete {
        /// Kind of the removed entity.
        kind: EntityKind,
        /// Identifier of the removed entity.
        id: u64,
    },
}

impl Change {
    /// Kind of the entity affected.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Create(entity) | Self::Modify(entity) => entity.kind(),
            Self::Delete { kind, .. } => *kind,
        }
    }

    /// Id of the entity affected.
    #[must_use]
    pub const fn id(&self) -> u64 {
        match self {
            Self::Create(entity) | Self::Modify(entity) => entity.id(),
            Self::Delete { id, .. } => *id,
        }
    }
}
