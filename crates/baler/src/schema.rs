//! Row-store bindings for the domain entities.
//!
//! Column layout, marshal/unmarshal, markers, and primary keys. Numeric
//! cells are little-endian: 64-bit for `size`, `block_size`, and
//! `last_modified` (nanoseconds since epoch), 16-bit for `state`. Boolean
//! marker cells are the single byte `0x01`. A marshaled `None` is an
//! explicit null: the row store deletes the cell on update and elides it on
//! append.

use chrono::TimeZone;
use chrono::Utc;

use baler_core::storage::Owner;
use baler_store::{Keyed, PrimaryKey, Result, Row, RowId, StoreError, TableSpec, Values};

use crate::model::{DestinationObject, Object, ObjectSet, ObjectState, SourceObject};

/// Index over source keys (relative to the set prefix).
pub const IDX_SOURCE_KEY: &str = "idx_source_key";
/// Index over source states.
pub const IDX_SOURCE_STATE: &str = "idx_source_state";
/// Index over the destination block a source is assigned to.
pub const IDX_DESTINATION: &str = "idx_destination";
/// Index over destination keys (relative to the destination path).
pub const IDX_DESTINATION_KEY: &str = "idx_destination_key";
/// Index over destination states.
pub const IDX_DESTINATION_STATE: &str = "idx_destination_state";

const TRUE: &[u8] = &[0x01];

const OBJECT_COLUMNS: &[&str] = &[
    "etag",
    "key",
    "storage_class",
    "last_modified",
    "owner_id",
    "owner_display_name",
    "size",
    "state",
];

const SOURCE_OBJECT_COLUMNS: &[&str] = &[
    "etag",
    "key",
    "storage_class",
    "last_modified",
    "owner_id",
    "owner_display_name",
    "size",
    "state",
    "destination_object",
    "is_source_object",
];

const SOURCE_OBJECT_INDEXES: &[(&str, &str)] = &[
    ("destination_object", IDX_DESTINATION),
    ("state", IDX_SOURCE_STATE),
    ("key", IDX_SOURCE_KEY),
];

const DESTINATION_OBJECT_COLUMNS: &[&str] = &[
    "etag",
    "key",
    "storage_class",
    "last_modified",
    "owner_id",
    "owner_display_name",
    "size",
    "state",
    "is_destination_object",
];

const DESTINATION_OBJECT_INDEXES: &[(&str, &str)] = &[
    ("state", IDX_DESTINATION_STATE),
    ("key", IDX_DESTINATION_KEY),
];

const OBJECT_SET_CONFIG_COLUMNS: &[&str] = &[
    "block_size",
    "destination_bucket",
    "destination_path",
    "delimiter",
];

const SET_TABLE_COLUMNS: &[&str] = &[
    "etag",
    "key",
    "storage_class",
    "last_modified",
    "owner_id",
    "owner_display_name",
    "size",
    "state",
    "destination_object",
    "is_source_object",
    "is_destination_object",
];

const SET_TABLE_INDEXES: &[&str] = &[
    IDX_DESTINATION,
    IDX_SOURCE_STATE,
    IDX_SOURCE_KEY,
    IDX_DESTINATION_STATE,
    IDX_DESTINATION_KEY,
];

fn i64_le(value: i64) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

pub(crate) fn decode_i64(cell: &[u8]) -> Result<i64> {
    cell.try_into().map(i64::from_le_bytes).map_err(|_| {
        StoreError::SchemaViolation(format!("malformed 64-bit cell of {} bytes", cell.len()))
    })
}

pub(crate) fn decode_u16(cell: &[u8]) -> Result<u16> {
    cell.try_into().map(u16::from_le_bytes).map_err(|_| {
        StoreError::SchemaViolation(format!("malformed 16-bit cell of {} bytes", cell.len()))
    })
}

fn cell<'v>(values: &'v Values, column: &str) -> Option<&'v Vec<u8>> {
    values.get(column).and_then(|v| v.as_ref())
}

fn string_cell(values: &Values, column: &str) -> Option<String> {
    cell(values, column).map(|v| String::from_utf8_lossy(v).into_owned())
}

/// Marshals the shared object columns. Absent attributes become explicit
/// nulls; `state` is always written.
fn marshal_object(object: &Object) -> Values {
    let mut values = Values::new();
    for &column in OBJECT_COLUMNS {
        values.insert(column, None);
    }

    let remote = &object.remote;
    if let Some(etag) = &remote.etag {
        values.insert("etag", Some(etag.clone().into_bytes()));
    }
    if let Some(key) = &remote.key {
        values.insert("key", Some(key.clone().into_bytes()));
    }
    if let Some(storage_class) = &remote.storage_class {
        values.insert("storage_class", Some(storage_class.clone().into_bytes()));
    }
    if let Some(last_modified) = &remote.last_modified {
        let nanos = last_modified.timestamp_nanos_opt().unwrap_or_default();
        values.insert("last_modified", Some(i64_le(nanos)));
    }
    if let Some(owner) = &remote.owner {
        if let Some(id) = &owner.id {
            values.insert("owner_id", Some(id.clone().into_bytes()));
        }
        if let Some(display_name) = &owner.display_name {
            values.insert("owner_display_name", Some(display_name.clone().into_bytes()));
        }
    }
    if let Some(size) = remote.size {
        values.insert("size", Some(i64_le(size)));
    }
    values.insert("state", Some(object.state.to_le_bytes().to_vec()));

    values
}

/// Rebuilds the shared object columns. Owner presence is inferred: the
/// owner exists when either owner column is non-null.
fn unmarshal_object(object: &mut Object, values: &Values) -> Result<()> {
    object.remote.etag = string_cell(values, "etag");
    object.remote.key = string_cell(values, "key");
    object.remote.storage_class = string_cell(values, "storage_class");

    object.remote.last_modified = match cell(values, "last_modified") {
        Some(v) => Some(Utc.timestamp_nanos(decode_i64(v)?)),
        None => None,
    };

    let owner_id = string_cell(values, "owner_id");
    let owner_display_name = string_cell(values, "owner_display_name");
    object.remote.owner = if owner_id.is_some() || owner_display_name.is_some() {
        Some(Owner {
            id: owner_id,
            display_name: owner_display_name,
        })
    } else {
        None
    };

    object.remote.size = match cell(values, "size") {
        Some(v) => Some(decode_i64(v)?),
        None => None,
    };

    object.state = match cell(values, "state") {
        Some(v) => ObjectState::from_u16(decode_u16(v)?),
        None => ObjectState::Unknown,
    };

    Ok(())
}

impl Row for ObjectSet {
    fn schema(&self) -> &'static [&'static str] {
        OBJECT_SET_CONFIG_COLUMNS
    }

    fn marshal(&self) -> Result<Values> {
        let mut values = Values::new();
        values.insert("block_size", Some(i64_le(self.block_size)));
        values.insert(
            "destination_bucket",
            Some(self.destination_bucket.clone().into_bytes()),
        );
        values.insert(
            "destination_path",
            Some(self.destination_path.clone().into_bytes()),
        );
        values.insert("delimiter", Some(self.delimiter.clone()));
        Ok(values)
    }

    fn unmarshal(&mut self, values: Values) -> Result<()> {
        if let Some(v) = cell(&values, "block_size") {
            self.block_size = decode_i64(v)?;
        }
        if let Some(v) = string_cell(&values, "destination_bucket") {
            self.destination_bucket = v;
        }
        if let Some(v) = string_cell(&values, "destination_path") {
            self.destination_path = v;
        }
        if let Some(v) = cell(&values, "delimiter") {
            self.delimiter = v.clone();
        }
        Ok(())
    }
}

impl TableSpec for ObjectSet {
    fn table_name(&self) -> &str {
        self.table_name()
    }

    fn columns(&self) -> &'static [&'static str] {
        SET_TABLE_COLUMNS
    }

    fn index_names(&self) -> &'static [&'static str] {
        SET_TABLE_INDEXES
    }
}

impl Row for SourceObject {
    fn schema(&self) -> &'static [&'static str] {
        SOURCE_OBJECT_COLUMNS
    }

    fn indexes(&self) -> &'static [(&'static str, &'static str)] {
        SOURCE_OBJECT_INDEXES
    }

    fn marshal(&self) -> Result<Values> {
        let mut values = marshal_object(&self.object);
        if self.object.remote.key.is_some() {
            values.insert("key", Some(self.primary_key().prefix));
        }
        values.insert(
            "destination_object",
            self.destination_object_id.map(|id| id.as_slice().to_vec()),
        );
        values.insert("is_source_object", Some(TRUE.to_vec()));
        Ok(values)
    }

    fn unmarshal(&mut self, values: Values) -> Result<()> {
        match cell(&values, "is_source_object") {
            Some(v) if v.as_slice() == TRUE => {}
            _ => return Err(StoreError::WrongKind { expected: "source object" }),
        }

        unmarshal_object(&mut self.object, &values)?;

        // Keys are stored relative to the set prefix; restore the full key.
        self.object.remote.key = cell(&values, "key")
            .map(|v| format!("{}{}", self.object.parent.prefix, String::from_utf8_lossy(v)));

        self.destination_object_id = match cell(&values, "destination_object") {
            Some(v) => Some(RowId::from_slice(v)?),
            None => None,
        };

        Ok(())
    }
}

impl Keyed for SourceObject {
    fn primary_key(&self) -> PrimaryKey {
        let key = self.object.remote.key.as_deref().unwrap_or("");
        let relative = key
            .strip_prefix(self.object.parent.prefix.as_str())
            .unwrap_or(key);
        PrimaryKey {
            index: IDX_SOURCE_KEY,
            prefix: relative.as_bytes().to_vec(),
        }
    }
}

impl SourceObject {
    /// A by-value clone obtained by marshal + unmarshal, for use as the
    /// prior image in diff updates.
    ///
    /// # Errors
    ///
    /// Propagates marshal/unmarshal failures.
    pub fn copy(&self) -> Result<Self> {
        let mut copied = Self::new(self.object.parent.clone());
        copied.unmarshal(self.marshal()?)?;
        Ok(copied)
    }
}

impl Row for DestinationObject {
    fn schema(&self) -> &'static [&'static str] {
        DESTINATION_OBJECT_COLUMNS
    }

    fn indexes(&self) -> &'static [(&'static str, &'static str)] {
        DESTINATION_OBJECT_INDEXES
    }

    fn marshal(&self) -> Result<Values> {
        let mut values = marshal_object(&self.object);
        if self.object.remote.key.is_some() {
            values.insert("key", Some(self.primary_key().prefix));
        }
        values.insert("is_destination_object", Some(TRUE.to_vec()));
        Ok(values)
    }

    fn unmarshal(&mut self, values: Values) -> Result<()> {
        match cell(&values, "is_destination_object") {
            Some(v) if v.as_slice() == TRUE => {}
            _ => {
                return Err(StoreError::WrongKind {
                    expected: "destination object",
                })
            }
        }

        unmarshal_object(&mut self.object, &values)?;

        self.object.remote.key = cell(&values, "key").map(|v| {
            format!(
                "{}{}",
                self.object.parent.destination_path,
                String::from_utf8_lossy(v)
            )
        });

        Ok(())
    }
}

impl Keyed for DestinationObject {
    fn primary_key(&self) -> PrimaryKey {
        let key = self.object.remote.key.as_deref().unwrap_or("");
        let relative = key
            .strip_prefix(self.object.parent.destination_path.as_str())
            .unwrap_or(key);
        PrimaryKey {
            index: IDX_DESTINATION_KEY,
            prefix: relative.as_bytes().to_vec(),
        }
    }
}

impl DestinationObject {
    /// A by-value clone obtained by marshal + unmarshal, for use as the
    /// prior image in diff updates.
    ///
    /// # Errors
    ///
    /// Propagates marshal/unmarshal failures.
    pub fn copy(&self) -> Result<Self> {
        let mut copied = Self::new(self.object.parent.clone());
        copied.unmarshal(self.marshal()?)?;
        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baler_core::storage::RemoteObject;

    fn test_set() -> ObjectSet {
        let mut set = ObjectSet::new("src-bucket", "logs/");
        set.destination_bucket = "dst-bucket".to_string();
        set.destination_path = "merged/".to_string();
        set.delimiter = b"\n".to_vec();
        set.block_size = 100;
        set
    }

    fn test_remote(key: &str) -> RemoteObject {
        RemoteObject {
            etag: Some("\"abc123\"".to_string()),
            key: Some(key.to_string()),
            last_modified: Some(Utc.timestamp_nanos(1_700_000_000_123_456_789)),
            owner: Some(Owner {
                id: Some("owner-1".to_string()),
                display_name: None,
            }),
            size: Some(42),
            storage_class: Some("STANDARD".to_string()),
        }
    }

    #[test]
    fn source_object_roundtrips() {
        let mut source = SourceObject::new(test_set());
        source.object.remote = test_remote("logs/2024/app.log");
        source.object.state = ObjectState::New;
        source.destination_object_id = Some(RowId::from_sequence(7));

        let copied = source.copy().unwrap();
        assert_eq!(copied, source);
    }

    #[test]
    fn destination_object_roundtrips() {
        let mut dest = DestinationObject::new(test_set());
        dest.object.remote = test_remote("merged/some-block");
        dest.object.state = ObjectState::InSync;

        let copied = dest.copy().unwrap();
        assert_eq!(copied, dest);
    }

    #[test]
    fn marshal_is_stable_through_a_roundtrip() {
        let mut source = SourceObject::new(test_set());
        source.object.remote = test_remote("logs/a");
        source.object.state = ObjectState::New;

        let first = source.marshal().unwrap();
        let copied = source.copy().unwrap();
        let second = copied.marshal().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn key_cell_is_stored_relative_to_the_prefix() {
        let mut source = SourceObject::new(test_set());
        source.object.remote = test_remote("logs/2024/app.log");

        let values = source.marshal().unwrap();
        assert_eq!(
            values.get("key").unwrap().as_deref(),
            Some(b"2024/app.log".as_slice())
        );
    }

    #[test]
    fn absent_owner_columns_infer_no_owner() {
        let mut source = SourceObject::new(test_set());
        source.object.remote = test_remote("logs/a");
        source.object.remote.owner = None;

        let copied = source.copy().unwrap();
        assert_eq!(copied.object.remote.owner, None);
    }

    #[test]
    fn single_owner_column_infers_owner() {
        let mut source = SourceObject::new(test_set());
        source.object.remote = test_remote("logs/a");
        source.object.remote.owner = Some(Owner {
            id: None,
            display_name: Some("display".to_string()),
        });

        let copied = source.copy().unwrap();
        assert_eq!(
            copied.object.remote.owner,
            Some(Owner {
                id: None,
                display_name: Some("display".to_string()),
            })
        );
    }

    #[test]
    fn missing_marker_is_a_wrong_kind_error() {
        let mut source = SourceObject::new(test_set());
        source.object.remote = test_remote("logs/a");
        let values = source.marshal().unwrap();

        let mut dest = DestinationObject::new(test_set());
        let err = dest.unmarshal(values).unwrap_err();
        assert!(matches!(
            err,
            StoreError::WrongKind {
                expected: "destination object"
            }
        ));
    }

    #[test]
    fn null_cells_are_explicit_in_the_marshaled_map() {
        let source = SourceObject::new(test_set());
        let values = source.marshal().unwrap();

        assert_eq!(values.get("etag"), Some(&None));
        assert_eq!(values.get("destination_object"), Some(&None));
        assert_eq!(
            values.get("state").unwrap().as_deref(),
            Some([0u8, 0u8].as_slice())
        );
    }
}
