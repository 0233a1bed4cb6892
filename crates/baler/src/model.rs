//! Domain entities of the reconciliation pipeline.
//!
//! An [`ObjectSet`] is a named pipeline partition identified by (bucket,
//! prefix). Its rows are [`SourceObject`]s, remote objects that will be
//! concatenated, and [`DestinationObject`]s, the blocks produced by
//! concatenation. Every row carries its parent set, because primary-key
//! derivation strips the set's prefix from full keys.

use std::fmt;

use baler_core::storage::RemoteObject;
use baler_store::RowId;

/// Lifecycle state of a source or destination object.
///
/// Encoded on disk as a little-endian u16, on the wire as the exact strings
/// below. Unknown strings parse to [`ObjectState::Unknown`]; `Unknown`
/// never appears on a persisted row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ObjectState {
    /// State of an object that has just been instantiated.
    #[default]
    Unknown,
    /// The object is ready to be placed into a destination.
    New,
    /// The object changed after it was last seen; if it has a destination,
    /// that destination needs to be expired.
    Dirty,
    /// The object is mapped to its destination, or the destination has been
    /// written.
    InSync,
    /// The object is ready for deletion.
    Expired,
    /// The object has been deleted.
    Deleted,
}

impl ObjectState {
    /// All states with an on-disk representation.
    pub const ALL: [Self; 6] = [
        Self::Unknown,
        Self::New,
        Self::Dirty,
        Self::InSync,
        Self::Expired,
        Self::Deleted,
    ];

    /// The numeric encoding of this state.
    #[must_use]
    pub fn as_u16(self) -> u16 {
        match self {
            Self::Unknown => 0,
            Self::New => 1,
            Self::Dirty => 2,
            Self::InSync => 3,
            Self::Expired => 4,
            Self::Deleted => 5,
        }
    }

    /// Decodes a numeric state; anything outside the closed set is
    /// [`ObjectState::Unknown`].
    #[must_use]
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => Self::New,
            2 => Self::Dirty,
            3 => Self::InSync,
            4 => Self::Expired,
            5 => Self::Deleted,
            _ => Self::Unknown,
        }
    }

    /// The on-disk little-endian encoding.
    #[must_use]
    pub fn to_le_bytes(self) -> [u8; 2] {
        self.as_u16().to_le_bytes()
    }

    /// The wire string for this state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::New => "NEW",
            Self::Dirty => "DIRTY",
            Self::InSync => "IN_SYNC",
            Self::Expired => "EXPIRED",
            Self::Deleted => "DELETED",
        }
    }

    /// Parses a wire string; unknown strings yield
    /// [`ObjectState::Unknown`].
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "NEW" => Self::New,
            "DIRTY" => Self::Dirty,
            "IN_SYNC" => Self::InSync,
            "EXPIRED" => Self::Expired,
            "DELETED" => Self::Deleted,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ObjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pipeline partition: which prefix is packed, and where the blocks go.
///
/// The destination configuration is mutable and overwrites prior values on
/// every put. The set's table name is the path-join of bucket and prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSet {
    /// Source bucket.
    pub bucket: String,
    /// Source key prefix.
    pub prefix: String,
    /// Bucket the merged blocks are written to.
    pub destination_bucket: String,
    /// Key prefix of merged blocks; always stored with a trailing `/`.
    pub destination_path: String,
    /// Raw bytes inserted after each source body during concatenation.
    pub delimiter: Vec<u8>,
    /// Target block size in bytes.
    pub block_size: i64,

    table_name: String,
}

impl ObjectSet {
    /// Instantiates a set from its primary-key values. Destination
    /// configuration is not loaded.
    #[must_use]
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        let bucket = bucket.into();
        let prefix = prefix.into();
        let table_name = join_path(&bucket, &prefix);
        Self {
            bucket,
            prefix,
            destination_bucket: String::new(),
            destination_path: String::new(),
            delimiter: Vec::new(),
            block_size: 0,
            table_name,
        }
    }

    /// The set's table name in the row store.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// The full key of a destination block named `name` under this set's
    /// destination path.
    #[must_use]
    pub fn destination_key(&self, name: &str) -> String {
        join_path(&self.destination_path, name)
    }
}

/// Joins path segments, collapsing redundant slashes.
fn join_path(left: &str, right: &str) -> String {
    let mut joined = String::new();
    for segment in left.split('/').chain(right.split('/')) {
        if segment.is_empty() {
            continue;
        }
        if !joined.is_empty() {
            joined.push('/');
        }
        joined.push_str(segment);
    }
    joined
}

/// The attributes shared by both row kinds: the remote object, its
/// lifecycle state, and the set it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    /// The set this object belongs to.
    pub parent: ObjectSet,
    /// Lifecycle state.
    pub state: ObjectState,
    /// The remote object's attributes.
    pub remote: RemoteObject,
}

impl Object {
    /// Instantiates an object as a member of `parent`, in state
    /// [`ObjectState::Unknown`].
    #[must_use]
    pub fn new(parent: ObjectSet) -> Self {
        Self {
            parent,
            state: ObjectState::Unknown,
            remote: RemoteObject::default(),
        }
    }

    /// Compares etags with `other`; when they differ, flags this object
    /// [`ObjectState::Dirty`] and returns true.
    pub fn mark_dirty_against(&mut self, other: &Object) -> bool {
        let mine = self.remote.etag.as_deref().unwrap_or("");
        let theirs = other.remote.etag.as_deref().unwrap_or("");
        if mine == theirs {
            return false;
        }
        self.state = ObjectState::Dirty;
        true
    }
}

/// A remote object that is an input to concatenation.
///
/// Carries a nullable reference to the destination block it has been
/// assigned to.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceObject {
    /// The shared object attributes.
    pub object: Object,
    /// The block this source is planned into, once assigned.
    pub destination_object_id: Option<RowId>,
}

impl SourceObject {
    /// Instantiates a source object as a member of `parent`.
    #[must_use]
    pub fn new(parent: ObjectSet) -> Self {
        Self {
            object: Object::new(parent),
            destination_object_id: None,
        }
    }
}

/// A block produced by concatenating many sources with a delimiter.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationObject {
    /// The shared object attributes.
    pub object: Object,
}

impl DestinationObject {
    /// Instantiates a destination object as a member of `parent`.
    #[must_use]
    pub fn new(parent: ObjectSet) -> Self {
        Self {
            object: Object::new(parent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_strings_roundtrip() {
        for state in ObjectState::ALL {
            assert_eq!(ObjectState::parse(state.as_str()), state);
            assert_eq!(ObjectState::from_u16(state.as_u16()), state);
        }
    }

    #[test]
    fn unknown_strings_parse_to_unknown() {
        assert_eq!(ObjectState::parse("GONE"), ObjectState::Unknown);
        assert_eq!(ObjectState::parse("new"), ObjectState::Unknown);
        assert_eq!(ObjectState::from_u16(99), ObjectState::Unknown);
    }

    #[test]
    fn table_name_joins_bucket_and_prefix() {
        assert_eq!(ObjectSet::new("b", "logs/app/").table_name(), "b/logs/app");
        assert_eq!(ObjectSet::new("b", "").table_name(), "b");
        assert_eq!(ObjectSet::new("b", "/doubled//x").table_name(), "b/doubled/x");
    }

    #[test]
    fn destination_key_joins_cleanly() {
        let mut set = ObjectSet::new("b", "p/");
        set.destination_path = "merged/".to_string();
        assert_eq!(set.destination_key("abc"), "merged/abc");
    }

    #[test]
    fn dirty_flagging_is_etag_driven() {
        let set = ObjectSet::new("b", "p/");
        let mut mine = Object::new(set.clone());
        mine.remote.etag = Some("\"aa\"".to_string());
        let mut theirs = Object::new(set);
        theirs.remote.etag = Some("\"aa\"".to_string());

        assert!(!mine.mark_dirty_against(&theirs));
        assert_eq!(mine.state, ObjectState::Unknown);

        theirs.remote.etag = Some("\"bb\"".to_string());
        assert!(mine.mark_dirty_against(&theirs));
        assert_eq!(mine.state, ObjectState::Dirty);
    }
}
