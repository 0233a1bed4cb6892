//! The table/column/index/row model over the flat ordered engine.
//!
//! A *table* is a family of keyspaces in the engine's namespace:
//!
//! - `set:{table}`: the root keyspace, holding table-level configuration at
//!   well-known keys plus the row-id sequence,
//! - `col:{table}:{column}`: one keyspace per column, keyed by row id,
//! - `idx:{table}:{index}`: one keyspace per secondary index, holding
//!   entries of the form `value ‖ id` with empty payload.
//!
//! Column and index identifiers never contain `:`, so the flattening is
//! collision-free. Row ids are exactly [`ID_SIZE`] trailing bytes of every
//! index entry, which keeps entries unambiguous even when the indexed value
//! itself ends in id-like bytes.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use redb::{Database, ReadableTable, TableDefinition};

use crate::error::{Result, StoreError};

/// Size in bytes of a row identifier.
pub const ID_SIZE: usize = 8;

/// Root-keyspace key holding the row-id sequence.
const SEQUENCE_KEY: &[u8] = b"__sequence";

/// Root-keyspace key marking the table as created and recording its columns.
const COLUMNS_KEY: &[u8] = b"__columns";

type Def<'a> = TableDefinition<'a, &'static [u8], &'static [u8]>;

fn def(name: &str) -> Def<'_> {
    TableDefinition::new(name)
}

fn root_keyspace(table: &str) -> String {
    format!("set:{table}")
}

fn column_keyspace(table: &str, column: &str) -> String {
    format!("col:{table}:{column}")
}

fn index_keyspace(table: &str, index: &str) -> String {
    format!("idx:{table}:{index}")
}

/// An opaque row identifier: the little-endian encoding of a monotonically
/// increasing per-table sequence. Stable for the life of the row, never
/// reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId([u8; ID_SIZE]);

impl RowId {
    /// Builds an id from a sequence number.
    #[must_use]
    pub fn from_sequence(seq: u64) -> Self {
        Self(seq.to_le_bytes())
    }

    /// Builds an id from its exact byte representation.
    #[must_use]
    pub fn from_bytes(bytes: [u8; ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Builds an id from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidId`] unless the slice is exactly
    /// [`ID_SIZE`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; ID_SIZE] = bytes
            .try_into()
            .map_err(|_| StoreError::InvalidId(format!("expected {ID_SIZE} bytes, got {}", bytes.len())))?;
        Ok(Self(bytes))
    }

    /// The id's bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// The sequence number this id encodes.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        u64::from_le_bytes(self.0)
    }
}

impl fmt::Debug for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowId({})", self.sequence())
    }
}

/// A marshaled row: column name to cell bytes. `Some` writes the cell,
/// explicit `None` is a null that *deletes* the cell on update, and a
/// column absent from the map is neither written nor deleted.
pub type Values = HashMap<&'static str, Option<Vec<u8>>>;

/// The primary key of a row: the index probed and the prefix bytes used to
/// look up the single row id.
#[derive(Debug, Clone)]
pub struct PrimaryKey {
    /// Name of the index holding the key.
    pub index: &'static str,
    /// Prefix bytes of the entry.
    pub prefix: Vec<u8>,
}

/// Capability set every storable row kind provides.
pub trait Row {
    /// Columns this row kind declares.
    fn schema(&self) -> &'static [&'static str];

    /// Indexed columns, as (column, index name) pairs.
    fn indexes(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    /// Produces the column map for this row.
    ///
    /// # Errors
    ///
    /// Returns an error when the row cannot be represented as cells.
    fn marshal(&self) -> Result<Values>;

    /// Rebuilds the row from a column map. Absent cells arrive as `None`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WrongKind`] when the cells belong to a
    /// different row kind.
    fn unmarshal(&mut self, values: Values) -> Result<()>;
}

/// A row kind with a primary key.
pub trait Keyed: Row {
    /// The index name and prefix bytes identifying this row.
    fn primary_key(&self) -> PrimaryKey;
}

/// Declares the keyspaces a table owns, for creation.
pub trait TableSpec {
    /// The table name.
    fn table_name(&self) -> &str;

    /// All column keyspaces of the table.
    fn columns(&self) -> &'static [&'static str];

    /// All index keyspaces of the table.
    fn index_names(&self) -> &'static [&'static str];
}

/// Builds the index-keyspace entry key for a value and row id.
#[must_use]
pub fn make_index(value: &[u8], id: RowId) -> Vec<u8> {
    let mut key = Vec::with_capacity(value.len() + ID_SIZE);
    key.extend_from_slice(value);
    key.extend_from_slice(id.as_slice());
    key
}

fn index_for(
    indexes: &'static [(&'static str, &'static str)],
    column: &str,
) -> Option<&'static str> {
    indexes
        .iter()
        .find(|(col, _)| *col == column)
        .map(|(_, index)| *index)
}

/// Null-tolerant cell comparison: an absent cell and an empty cell compare
/// equal, matching the byte semantics of the engine's empty values.
fn cell_eq(a: Option<&Vec<u8>>, b: Option<&Vec<u8>>) -> bool {
    a.map_or(&[][..], |v| v.as_slice()) == b.map_or(&[][..], |v| v.as_slice())
}

fn get_cell<T>(table: &T, key: &[u8]) -> Result<Option<Vec<u8>>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    Ok(table.get(key)?.map(|guard| guard.value().to_vec()))
}

fn scan_ids<T>(
    table: &T,
    prefix: &[u8],
    limit: usize,
    exclusive_start: Option<&[u8]>,
) -> Result<Vec<RowId>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let mut rows = Vec::new();
    let start: &[u8] = exclusive_start.unwrap_or(prefix);
    let mut skip_exact = exclusive_start;

    for entry in table.range::<&[u8]>(start..)? {
        let (key_guard, _) = entry?;
        let key = key_guard.value();
        if let Some(es) = skip_exact.take() {
            if key == es {
                continue;
            }
        }
        if !key.starts_with(prefix) {
            break;
        }
        if key.len() < ID_SIZE {
            return Err(StoreError::SchemaViolation(format!(
                "index entry shorter than a row id: {} bytes",
                key.len()
            )));
        }
        rows.push(RowId::from_slice(&key[key.len() - ID_SIZE..])?);
        if rows.len() == limit {
            break;
        }
    }
    Ok(rows)
}

/// An open database file.
///
/// The engine enforces single-writer multi-reader access with a file lock;
/// one invocation owns the file exclusively.
pub struct Store {
    db: Database,
    path: PathBuf,
}

impl Store {
    /// Opens (or creates) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an engine error when the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = Database::create(&path)?;
        Ok(Self { db, path })
    }

    /// The on-disk path of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Closes the database and hands back the file path.
    ///
    /// All transactions have committed by the time this returns, so the
    /// file is a consistent snapshot suitable for whole-object upload.
    #[must_use]
    pub fn close(self) -> PathBuf {
        drop(self.db);
        self.path
    }

    /// Begins a read-only transaction.
    ///
    /// # Errors
    ///
    /// Returns an engine error when the transaction cannot start.
    pub fn begin_read(&self) -> Result<ReadTxn> {
        Ok(ReadTxn {
            inner: self.db.begin_read()?,
        })
    }

    /// Begins a read-write transaction. The caller must call
    /// [`WriteTxn::commit`]; dropping the transaction rolls it back.
    ///
    /// # Errors
    ///
    /// Returns an engine error when the transaction cannot start.
    pub fn begin_write(&self) -> Result<WriteTxn> {
        Ok(WriteTxn {
            inner: self.db.begin_write()?,
        })
    }

    /// Creates a table's keyspaces: the root, one per column, one per
    /// index. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an engine error when creation fails; the transaction rolls
    /// back as a whole.
    pub fn ensure_table(&self, spec: &dyn TableSpec) -> Result<()> {
        let name = spec.table_name();
        let txn = self.db.begin_write()?;
        {
            let mut root = txn.open_table(def(&root_keyspace(name)))?;
            root.insert(COLUMNS_KEY, spec.columns().join(",").as_bytes())?;
        }
        for &column in spec.columns() {
            txn.open_table(def(&column_keyspace(name, column)))?;
        }
        for &index in spec.index_names() {
            txn.open_table(def(&index_keyspace(name, index)))?;
        }
        txn.commit()?;
        Ok(())
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").field("path", &self.path).finish()
    }
}

/// A read-only transaction.
pub struct ReadTxn {
    inner: redb::ReadTransaction,
}

impl ReadTxn {
    /// A read handle on one table.
    #[must_use]
    pub fn table<'t>(&'t self, name: &str) -> TableRead<'t> {
        TableRead {
            txn: &self.inner,
            name: name.to_string(),
        }
    }
}

/// A read-write transaction. Must be committed explicitly.
pub struct WriteTxn {
    inner: redb::WriteTransaction,
}

impl WriteTxn {
    /// A write handle on one table.
    #[must_use]
    pub fn table<'t>(&'t self, name: &str) -> TableWrite<'t> {
        TableWrite {
            txn: &self.inner,
            name: name.to_string(),
        }
    }

    /// Commits every write made through this transaction, atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TransactionFailed`] when the engine rejects
    /// the commit; nothing is applied.
    pub fn commit(self) -> Result<()> {
        self.inner.commit()?;
        Ok(())
    }
}

/// Read operations on one table within a read-only transaction.
pub struct TableRead<'t> {
    txn: &'t redb::ReadTransaction,
    name: String,
}

type ReadOnly = redb::ReadOnlyTable<&'static [u8], &'static [u8]>;

impl TableRead<'_> {
    fn open(&self, keyspace: &str, missing: StoreError) -> Result<ReadOnly> {
        match self.txn.open_table(def(keyspace)) {
            Ok(table) => Ok(table),
            Err(redb::TableError::TableDoesNotExist(_)) => Err(missing),
            Err(err) => Err(err.into()),
        }
    }

    fn open_root(&self) -> Result<ReadOnly> {
        self.open(
            &root_keyspace(&self.name),
            StoreError::TableMissing(self.name.clone()),
        )
    }

    fn open_column(&self, column: &str) -> Result<ReadOnly> {
        self.open(
            &column_keyspace(&self.name, column),
            StoreError::SchemaViolation(format!("missing column keyspace: {column}")),
        )
    }

    fn open_index(&self, index: &str) -> Result<ReadOnly> {
        self.open(
            &index_keyspace(&self.name, index),
            StoreError::SchemaViolation(format!("missing index keyspace: {index}")),
        )
    }

    /// Hydrates `row` from the cells stored at `id`. Absent cells are
    /// passed to `unmarshal` as null.
    ///
    /// # Errors
    ///
    /// Propagates engine failures and the row's unmarshal errors.
    pub fn lookup_row<R: Row>(&self, id: RowId, row: &mut R) -> Result<()> {
        let mut values = Values::new();
        for &column in row.schema() {
            let table = self.open_column(column)?;
            values.insert(column, get_cell(&table, id.as_slice())?);
        }
        row.unmarshal(values)
    }

    /// Ordered scan of an index: emits the row ids of entries starting with
    /// `prefix`, beginning one past `exclusive_start` when it is given and
    /// matches, up to `limit` hits.
    ///
    /// When the returned length equals `limit`, the caller resumes with
    /// `exclusive_start = make_index(prefix, last_id)`.
    ///
    /// # Errors
    ///
    /// Propagates engine failures; a missing index keyspace is a schema
    /// violation.
    pub fn prefix_query(
        &self,
        index: &str,
        prefix: &[u8],
        limit: usize,
        exclusive_start: Option<&[u8]>,
    ) -> Result<Vec<RowId>> {
        let table = self.open_index(index)?;
        scan_ids(&table, prefix, limit, exclusive_start)
    }

    /// Resolves a row's id through its primary key, if the row exists.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn lookup_id<R: Keyed>(&self, row: &R) -> Result<Option<RowId>> {
        let pk = row.primary_key();
        Ok(self
            .prefix_query(pk.index, &pk.prefix, 1, None)?
            .into_iter()
            .next())
    }

    /// Hydrates a configuration row from the table's root keyspace, where
    /// cells live at the schema-column keys rather than under a row id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TableMissing`] when the table has never been
    /// created.
    pub fn read_config<R: Row>(&self, row: &mut R) -> Result<()> {
        let table = self.open_root()?;
        let mut values = Values::new();
        for &column in row.schema() {
            values.insert(column, get_cell(&table, column.as_bytes())?);
        }
        row.unmarshal(values)
    }

    /// All row ids holding a cell in `column`, in id order.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn column_ids(&self, column: &str) -> Result<Vec<RowId>> {
        let table = self.open_column(column)?;
        let mut ids = Vec::new();
        for entry in table.range::<&[u8]>(..)? {
            let (key, _) = entry?;
            ids.push(RowId::from_slice(key.value())?);
        }
        Ok(ids)
    }

    /// Reads one cell directly.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn cell(&self, column: &str, id: RowId) -> Result<Option<Vec<u8>>> {
        let table = self.open_column(column)?;
        get_cell(&table, id.as_slice())
    }
}

/// Read and write operations on one table within a read-write transaction.
pub struct TableWrite<'t> {
    txn: &'t redb::WriteTransaction,
    name: String,
}

impl TableWrite<'_> {
    fn open(&self, keyspace: &str) -> Result<redb::Table<'_, &'static [u8], &'static [u8]>> {
        Ok(self.txn.open_table(def(keyspace))?)
    }

    fn open_root(&self) -> Result<redb::Table<'_, &'static [u8], &'static [u8]>> {
        self.open(&root_keyspace(&self.name))
    }

    fn open_column(&self, column: &str) -> Result<redb::Table<'_, &'static [u8], &'static [u8]>> {
        self.open(&column_keyspace(&self.name, column))
    }

    fn open_index(&self, index: &str) -> Result<redb::Table<'_, &'static [u8], &'static [u8]>> {
        self.open(&index_keyspace(&self.name, index))
    }

    /// Fails unless the table was created by
    /// [`Store::ensure_table`].
    fn require_created(&self) -> Result<()> {
        let root = self.open_root()?;
        if get_cell(&root, COLUMNS_KEY)?.is_none() {
            return Err(StoreError::TableMissing(self.name.clone()));
        }
        Ok(())
    }

    fn next_sequence(&self) -> Result<u64> {
        let mut root = self.open_root()?;
        let current = get_cell(&root, SEQUENCE_KEY)?
            .and_then(|v| v.try_into().ok().map(u64::from_le_bytes))
            .unwrap_or(0);
        let next = current + 1;
        root.insert(SEQUENCE_KEY, next.to_le_bytes().as_slice())?;
        Ok(next)
    }

    fn read_cells(&self, schema: &'static [&'static str], id: RowId) -> Result<Values> {
        let mut values = Values::new();
        for &column in schema {
            let table = self.open_column(column)?;
            values.insert(column, get_cell(&table, id.as_slice())?);
        }
        Ok(values)
    }

    /// Appends a row: allocates the next id, writes every non-null cell,
    /// and inserts `value ‖ id` into each indexed column's keyspace.
    /// Null cells are elided.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SchemaViolation`] when the marshaled map names
    /// a column the schema does not declare, [`StoreError::TableMissing`]
    /// when the table was never created.
    pub fn append_row<R: Row>(&self, row: &R) -> Result<RowId> {
        self.require_created()?;
        let id = RowId::from_sequence(self.next_sequence()?);

        let values = row.marshal()?;
        let schema = row.schema();
        let indexes = row.indexes();

        for (&column, value) in &values {
            let Some(value) = value else { continue };
            if !schema.contains(&column) {
                return Err(StoreError::SchemaViolation(format!(
                    "column not declared in schema: {column}"
                )));
            }

            {
                let mut table = self.open_column(column)?;
                table.insert(id.as_slice(), value.as_slice())?;
            }
            if let Some(index) = index_for(indexes, column) {
                let mut table = self.open_index(index)?;
                table.insert(make_index(value, id).as_slice(), b"".as_slice())?;
            }
        }

        Ok(id)
    }

    /// Updates a row's cells and maintains its indexes.
    ///
    /// When `current` is omitted the prior image is read from the store.
    /// Per column: a byte-equal cell is skipped; a null deletes the cell
    /// and its old index entry (no new entry); otherwise the cell is
    /// written, the old index entry deleted, and the new one inserted, in
    /// that order, so no index entry ever points at a value that is not
    /// current and no id ever has two entries in one index.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`TableWrite::append_row`].
    pub fn update_row<R: Row>(&self, id: RowId, row: &R, current: Option<&R>) -> Result<()> {
        self.require_created()?;

        let new_values = row.marshal()?;
        let current_values = match current {
            Some(current) => current.marshal()?,
            None => self.read_cells(row.schema(), id)?,
        };

        let schema = row.schema();
        let indexes = row.indexes();

        for (&column, value) in &new_values {
            if !schema.contains(&column) {
                return Err(StoreError::SchemaViolation(format!(
                    "column not declared in schema: {column}"
                )));
            }
            let current_value = current_values.get(column).and_then(|v| v.as_ref());
            if cell_eq(value.as_ref(), current_value) {
                continue;
            }

            {
                let mut table = self.open_column(column)?;
                match value {
                    Some(value) => {
                        table.insert(id.as_slice(), value.as_slice())?;
                    }
                    None => {
                        table.remove(id.as_slice())?;
                    }
                }
            }

            if let Some(index) = index_for(indexes, column) {
                let mut table = self.open_index(index)?;
                let old_entry = make_index(current_value.map_or(&[][..], |v| v.as_slice()), id);
                table.remove(old_entry.as_slice())?;
                if let Some(value) = value {
                    table.insert(make_index(value, id).as_slice(), b"".as_slice())?;
                }
            }
        }

        Ok(())
    }

    /// Writes a configuration row into the table's root keyspace at the
    /// schema-column keys, overwriting prior values. Null cells are
    /// removed.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`TableWrite::append_row`].
    pub fn put_config<R: Row>(&self, row: &R) -> Result<()> {
        let values = row.marshal()?;
        let schema = row.schema();

        let mut root = self.open_root()?;
        for (&column, value) in &values {
            if !schema.contains(&column) {
                return Err(StoreError::SchemaViolation(format!(
                    "column not declared in schema: {column}"
                )));
            }
            match value {
                Some(value) => {
                    root.insert(column.as_bytes(), value.as_slice())?;
                }
                None => {
                    root.remove(column.as_bytes())?;
                }
            }
        }
        Ok(())
    }

    /// See [`TableRead::lookup_row`].
    ///
    /// # Errors
    ///
    /// Propagates engine failures and the row's unmarshal errors.
    pub fn lookup_row<R: Row>(&self, id: RowId, row: &mut R) -> Result<()> {
        let values = self.read_cells(row.schema(), id)?;
        row.unmarshal(values)
    }

    /// See [`TableRead::prefix_query`].
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn prefix_query(
        &self,
        index: &str,
        prefix: &[u8],
        limit: usize,
        exclusive_start: Option<&[u8]>,
    ) -> Result<Vec<RowId>> {
        let table = self.open_index(index)?;
        scan_ids(&table, prefix, limit, exclusive_start)
    }

    /// See [`TableRead::lookup_id`].
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn lookup_id<R: Keyed>(&self, row: &R) -> Result<Option<RowId>> {
        let pk = row.primary_key();
        Ok(self
            .prefix_query(pk.index, &pk.prefix, 1, None)?
            .into_iter()
            .next())
    }

    /// See [`TableRead::read_config`].
    ///
    /// # Errors
    ///
    /// Propagates engine failures and the row's unmarshal errors.
    pub fn read_config<R: Row>(&self, row: &mut R) -> Result<()> {
        let mut values = Values::new();
        {
            let root = self.open_root()?;
            for &column in row.schema() {
                values.insert(column, get_cell(&root, column.as_bytes())?);
            }
        }
        row.unmarshal(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Widget {
        key: Option<Vec<u8>>,
        tag: Option<Vec<u8>>,
        note: Option<Vec<u8>>,
    }

    const WIDGET_COLUMNS: &[&str] = &["key", "tag", "note"];
    const WIDGET_INDEXES: &[(&str, &str)] = &[("key", "idx_key"), ("tag", "idx_tag")];

    impl Row for Widget {
        fn schema(&self) -> &'static [&'static str] {
            WIDGET_COLUMNS
        }

        fn indexes(&self) -> &'static [(&'static str, &'static str)] {
            WIDGET_INDEXES
        }

        fn marshal(&self) -> Result<Values> {
            let mut values = Values::new();
            values.insert("key", self.key.clone());
            values.insert("tag", self.tag.clone());
            values.insert("note", self.note.clone());
            Ok(values)
        }

        fn unmarshal(&mut self, mut values: Values) -> Result<()> {
            self.key = values.remove("key").flatten();
            self.tag = values.remove("tag").flatten();
            self.note = values.remove("note").flatten();
            Ok(())
        }
    }

    impl Keyed for Widget {
        fn primary_key(&self) -> PrimaryKey {
            PrimaryKey {
                index: "idx_key",
                prefix: self.key.clone().unwrap_or_default(),
            }
        }
    }

    struct Widgets;

    impl TableSpec for Widgets {
        fn table_name(&self) -> &str {
            "widgets"
        }

        fn columns(&self) -> &'static [&'static str] {
            WIDGET_COLUMNS
        }

        fn index_names(&self) -> &'static [&'static str] {
            &["idx_key", "idx_tag"]
        }
    }

    fn widget(key: &[u8], tag: &[u8]) -> Widget {
        Widget {
            key: Some(key.to_vec()),
            tag: Some(tag.to_vec()),
            note: None,
        }
    }

    fn open_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("test.redb")).unwrap();
        store.ensure_table(&Widgets).unwrap();
        (dir, store)
    }

    #[test]
    fn append_then_lookup_roundtrips() {
        let (_dir, store) = open_store();

        let row = widget(b"alpha", b"red");
        let txn = store.begin_write().unwrap();
        let id = txn.table("widgets").append_row(&row).unwrap();
        txn.commit().unwrap();
        assert_eq!(id.sequence(), 1);

        let txn = store.begin_read().unwrap();
        let mut loaded = Widget::default();
        txn.table("widgets").lookup_row(id, &mut loaded).unwrap();
        assert_eq!(loaded, row);
    }

    #[test]
    fn ids_are_monotonic_across_transactions() {
        let (_dir, store) = open_store();
        for expected in 1..=3u64 {
            let txn = store.begin_write().unwrap();
            let id = txn
                .table("widgets")
                .append_row(&widget(format!("k{expected}").as_bytes(), b"t"))
                .unwrap();
            txn.commit().unwrap();
            assert_eq!(id.sequence(), expected);
        }
    }

    #[test]
    fn ensure_table_is_idempotent() {
        let (_dir, store) = open_store();
        store.ensure_table(&Widgets).unwrap();

        let txn = store.begin_write().unwrap();
        txn.table("widgets").append_row(&widget(b"a", b"t")).unwrap();
        txn.commit().unwrap();
    }

    #[test]
    fn append_into_missing_table_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("test.redb")).unwrap();

        let txn = store.begin_write().unwrap();
        let err = txn
            .table("widgets")
            .append_row(&widget(b"a", b"t"))
            .unwrap_err();
        assert!(matches!(err, StoreError::TableMissing(_)));
    }

    #[test]
    fn undeclared_column_is_a_schema_violation() {
        struct Rogue;

        impl Row for Rogue {
            fn schema(&self) -> &'static [&'static str] {
                &["key"]
            }

            fn marshal(&self) -> Result<Values> {
                let mut values = Values::new();
                values.insert("key", Some(b"k".to_vec()));
                values.insert("undeclared", Some(b"v".to_vec()));
                Ok(values)
            }

            fn unmarshal(&mut self, _values: Values) -> Result<()> {
                Ok(())
            }
        }

        let (_dir, store) = open_store();
        let txn = store.begin_write().unwrap();
        let err = txn.table("widgets").append_row(&Rogue).unwrap_err();
        assert!(matches!(err, StoreError::SchemaViolation(_)));
    }

    #[test]
    fn lookup_id_probes_the_key_index() {
        let (_dir, store) = open_store();

        let row = widget(b"needle", b"t");
        let txn = store.begin_write().unwrap();
        let id = txn.table("widgets").append_row(&row).unwrap();
        txn.commit().unwrap();

        let txn = store.begin_read().unwrap();
        let table = txn.table("widgets");
        assert_eq!(table.lookup_id(&row).unwrap(), Some(id));
        assert_eq!(table.lookup_id(&widget(b"absent", b"t")).unwrap(), None);
    }

    #[test]
    fn update_moves_the_index_entry() {
        let (_dir, store) = open_store();

        let mut row = widget(b"a", b"old");
        let txn = store.begin_write().unwrap();
        let id = txn.table("widgets").append_row(&row).unwrap();
        txn.commit().unwrap();

        let prior = row.clone();
        row.tag = Some(b"new".to_vec());
        let txn = store.begin_write().unwrap();
        txn.table("widgets")
            .update_row(id, &row, Some(&prior))
            .unwrap();
        txn.commit().unwrap();

        let txn = store.begin_read().unwrap();
        let table = txn.table("widgets");
        assert!(table.prefix_query("idx_tag", b"old", 10, None).unwrap().is_empty());
        assert_eq!(
            table.prefix_query("idx_tag", b"new", 10, None).unwrap(),
            [id]
        );
    }

    #[test]
    fn update_without_prior_image_loads_it() {
        let (_dir, store) = open_store();

        let mut row = widget(b"a", b"old");
        let txn = store.begin_write().unwrap();
        let id = txn.table("widgets").append_row(&row).unwrap();
        txn.commit().unwrap();

        row.tag = Some(b"new".to_vec());
        let txn = store.begin_write().unwrap();
        txn.table("widgets").update_row(id, &row, None).unwrap();
        txn.commit().unwrap();

        let txn = store.begin_read().unwrap();
        let table = txn.table("widgets");
        assert!(table.prefix_query("idx_tag", b"old", 10, None).unwrap().is_empty());
        assert_eq!(
            table.prefix_query("idx_tag", b"new", 10, None).unwrap(),
            [id]
        );
    }

    #[test]
    fn null_update_deletes_cell_and_index_entry() {
        let (_dir, store) = open_store();

        let mut row = widget(b"a", b"t");
        let txn = store.begin_write().unwrap();
        let id = txn.table("widgets").append_row(&row).unwrap();
        txn.commit().unwrap();

        let prior = row.clone();
        row.tag = None;
        let txn = store.begin_write().unwrap();
        txn.table("widgets")
            .update_row(id, &row, Some(&prior))
            .unwrap();
        txn.commit().unwrap();

        let txn = store.begin_read().unwrap();
        let table = txn.table("widgets");
        assert!(table.prefix_query("idx_tag", b"t", 10, None).unwrap().is_empty());
        let mut loaded = Widget::default();
        table.lookup_row(id, &mut loaded).unwrap();
        assert_eq!(loaded.tag, None);
        assert_eq!(loaded.key, Some(b"a".to_vec()));
    }

    #[test]
    fn prefix_query_paginates_without_repeats_or_skips() {
        let (_dir, store) = open_store();

        let txn = store.begin_write().unwrap();
        let table = txn.table("widgets");
        let mut ids = Vec::new();
        for i in 0..5u8 {
            ids.push(table.append_row(&widget(&[b'k', i], b"same")).unwrap());
        }
        drop(table);
        txn.commit().unwrap();

        let txn = store.begin_read().unwrap();
        let table = txn.table("widgets");

        let mut seen = Vec::new();
        let mut exclusive_start: Option<Vec<u8>> = None;
        loop {
            let page = table
                .prefix_query("idx_tag", b"same", 2, exclusive_start.as_deref())
                .unwrap();
            let full = page.len() == 2;
            seen.extend(page.iter().copied());
            if !full {
                break;
            }
            exclusive_start = Some(make_index(b"same", *page.last().unwrap()));
        }
        assert_eq!(seen, ids);
    }

    #[test]
    fn index_values_with_nul_bytes_roundtrip() {
        let (_dir, store) = open_store();

        let value = b"\x00mid\x00dle\x00".to_vec();
        let row = widget(b"a", &value);
        let txn = store.begin_write().unwrap();
        let id = txn.table("widgets").append_row(&row).unwrap();
        txn.commit().unwrap();

        let txn = store.begin_read().unwrap();
        assert_eq!(
            txn.table("widgets")
                .prefix_query("idx_tag", &value, 10, None)
                .unwrap(),
            [id]
        );
    }

    #[test]
    fn config_row_roundtrips_through_root_keyspace() {
        #[derive(Debug, Default, PartialEq)]
        struct Config {
            limit: Option<Vec<u8>>,
        }

        impl Row for Config {
            fn schema(&self) -> &'static [&'static str] {
                &["key"]
            }

            fn marshal(&self) -> Result<Values> {
                let mut values = Values::new();
                values.insert("key", self.limit.clone());
                Ok(values)
            }

            fn unmarshal(&mut self, mut values: Values) -> Result<()> {
                self.limit = values.remove("key").flatten();
                Ok(())
            }
        }

        let (_dir, store) = open_store();

        let txn = store.begin_write().unwrap();
        txn.table("widgets")
            .put_config(&Config {
                limit: Some(b"42".to_vec()),
            })
            .unwrap();
        txn.commit().unwrap();

        let txn = store.begin_read().unwrap();
        let mut loaded = Config::default();
        txn.table("widgets").read_config(&mut loaded).unwrap();
        assert_eq!(loaded.limit, Some(b"42".to_vec()));
    }

    #[test]
    fn read_config_on_missing_table_reports_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("test.redb")).unwrap();

        let txn = store.begin_read().unwrap();
        let mut loaded = Widget::default();
        let err = txn.table("widgets").read_config(&mut loaded).unwrap_err();
        assert!(matches!(err, StoreError::TableMissing(_)));
    }

    #[test]
    fn close_returns_a_reopenable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.redb");

        let store = Store::open(&path).unwrap();
        store.ensure_table(&Widgets).unwrap();
        let txn = store.begin_write().unwrap();
        let id = txn.table("widgets").append_row(&widget(b"a", b"t")).unwrap();
        txn.commit().unwrap();
        let returned = store.close();
        assert_eq!(returned, path);

        let store = Store::open(&path).unwrap();
        let txn = store.begin_read().unwrap();
        let mut loaded = Widget::default();
        txn.table("widgets").lookup_row(id, &mut loaded).unwrap();
        assert_eq!(loaded.key, Some(b"a".to_vec()));
    }

    proptest! {
        // For any sequence of tag values (arbitrary bytes, nuls included),
        // after every update the tag index holds exactly one entry for the
        // row and that entry carries the current value.
        #[test]
        fn index_tracks_current_value_exactly(values in prop::collection::vec(
            prop::collection::vec(any::<u8>(), 0..24),
            1..6,
        )) {
            let (_dir, store) = open_store();

            let mut row = widget(b"pk", &values[0]);
            let txn = store.begin_write().unwrap();
            let id = txn.table("widgets").append_row(&row).unwrap();
            txn.commit().unwrap();

            for value in &values[1..] {
                let prior = row.clone();
                row.tag = Some(value.clone());
                let txn = store.begin_write().unwrap();
                txn.table("widgets").update_row(id, &row, Some(&prior)).unwrap();
                txn.commit().unwrap();
            }

            let current = values.last().unwrap();
            let txn = store.begin_read().unwrap();
            let table = txn.table("widgets");

            // A stale leftover would show up as a second entry for the id.
            let all = table.prefix_query("idx_tag", b"", usize::MAX, None).unwrap();
            prop_assert_eq!(all.iter().filter(|hit| **hit == id).count(), 1);

            // The one entry leads with the current value.
            let hits = table.prefix_query("idx_tag", current, usize::MAX, None).unwrap();
            prop_assert!(hits.contains(&id));

            let mut loaded = Widget::default();
            table.lookup_row(id, &mut loaded).unwrap();
            prop_assert_eq!(loaded.tag.as_ref(), Some(current));
        }
    }
}
