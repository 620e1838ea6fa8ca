//! Purpose: Orchestrate lazy, bounded-cost access to a partitioned delimited file.
//! Exports: `LazyTable`, `ParsedPartition`, `Table`.
//! Role: Owns the plan and the partition cache; drives `reader` one partition at a time.
//! Invariants: All partition reads, for preview and materialize alike, run
//! strictly sequentially on the caller's thread, in ascending index order.
//! Peak memory is one in-flight partition plus the already-parsed cache,
//! never a worker-count multiple. A partition read is an atomic unit of work;
//! cache entries are inserted only after a complete parse.
//! Invariants: The cache only grows; a parsed partition is never evicted or
//! re-parsed for the table's lifetime.
//! Invariants: Row order equals the file's physical record order.
use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::core::error::{Error, ErrorKind};
use crate::core::plan::{Partition, plan_partitions};
use crate::core::reader::{ReadOptions, read_partition};
use crate::core::schema::{Row, Schema, TableOptions};

/// The rows of one partition, immutable once produced. Owned exclusively by
/// the cache entry for its partition index.
#[derive(Clone, Debug)]
pub struct ParsedPartition {
    rows: Vec<Row>,
    skipped: u64,
}

impl ParsedPartition {
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

/// The fully materialized table: every row of the file, in physical order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Table {
    schema: Schema,
    rows: Vec<Row>,
}

impl Table {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug)]
pub struct LazyTable {
    path: PathBuf,
    file: File,
    schema: Schema,
    options: TableOptions,
    partitions: Vec<Partition>,
    cache: BTreeMap<usize, ParsedPartition>,
    parses: u64,
}

impl LazyTable {
    /// Open the source file, take a shared advisory lock for the table's
    /// lifetime, and plan partitions eagerly (offsets only; nothing is
    /// parsed yet).
    pub fn open(path: impl AsRef<Path>, schema: Schema, options: TableOptions) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).map_err(|err| open_error(err, &path))?;
        file.lock_shared().map_err(|err| {
            Error::new(lock_error_kind(&err))
                .with_message("failed to lock source file")
                .with_path(&path)
                .with_source(err)
        })?;
        let partitions = plan_partitions(&mut file, options.target_partition_bytes)
            .map_err(|err| err.with_path(&path))?;
        tracing::debug!(
            path = %path.display(),
            partitions = partitions.len(),
            target_bytes = options.target_partition_bytes,
            "planned lazy table"
        );
        Ok(Self {
            path,
            file,
            schema,
            options,
            partitions,
            cache: BTreeMap::new(),
            parses: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// Skipped-record count across every partition parsed so far.
    pub fn skipped_row_count(&self) -> u64 {
        self.cache.values().map(ParsedPartition::skipped).sum()
    }

    pub fn cached_partition_count(&self) -> usize {
        self.cache.len()
    }

    /// Total partition parses performed over the table's lifetime. Never
    /// exceeds the partition count: the cache is append-only.
    pub fn partitions_parsed(&self) -> u64 {
        self.parses
    }

    /// First `n` rows in physical order, parsing only the minimal prefix of
    /// partitions needed. Cost is O(bytes of partitions touched), independent
    /// of total file size. Deterministic across calls; repeat calls are never
    /// more expensive because parsed partitions stay cached.
    pub fn preview(&mut self, n: usize) -> Result<Vec<Row>, Error> {
        let mut rows: Vec<Row> = Vec::new();
        for index in 0..self.partitions.len() {
            if rows.len() >= n {
                break;
            }
            let parsed = self.ensure_partition(index)?;
            let need = n - rows.len();
            rows.extend(parsed.rows().iter().take(need).cloned());
        }
        Ok(rows)
    }

    /// Every row of the file as one table. The only operation whose time and
    /// memory cost are O(file size); it is never triggered implicitly by
    /// `preview`. Idempotent: a second call re-parses zero partitions and
    /// returns a content-equal table.
    pub fn materialize(&mut self) -> Result<Table, Error> {
        for index in 0..self.partitions.len() {
            self.ensure_partition(index)?;
        }

        let total: usize = self.cache.values().map(|parsed| parsed.rows().len()).sum();
        let mut rows: Vec<Row> = Vec::new();
        rows.try_reserve_exact(total).map_err(|_| {
            Error::new(ErrorKind::OutOfMemory)
                .with_message(format!("failed to allocate table of {total} rows"))
                .with_path(&self.path)
        })?;
        for parsed in self.cache.values() {
            rows.extend(parsed.rows().iter().cloned());
        }
        Ok(Table { schema: self.schema.clone(), rows })
    }

    fn ensure_partition(&mut self, index: usize) -> Result<&ParsedPartition, Error> {
        if !self.cache.contains_key(&index) {
            let partition = self.partitions[index];
            let read_options = ReadOptions {
                delimiter: self.options.delimiter,
                bad_rows: self.options.bad_rows,
                drop_leading_record: self.options.has_header && index == 0,
            };
            let outcome = read_partition(&mut self.file, partition, &self.schema, read_options)
                .map_err(|err| err.with_path(&self.path))?;
            tracing::debug!(
                partition = index,
                rows = outcome.rows.len(),
                skipped = outcome.skipped,
                "parsed partition"
            );
            self.parses += 1;
            self.cache.insert(index, ParsedPartition { rows: outcome.rows, skipped: outcome.skipped });
        }
        Ok(&self.cache[&index])
    }
}

impl Drop for LazyTable {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn open_error(err: io::Error, path: &Path) -> Error {
    let kind = match err.kind() {
        io::ErrorKind::NotFound => ErrorKind::NotFound,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Io,
    };
    Error::new(kind)
        .with_message("failed to open source file")
        .with_path(path)
        .with_source(err)
}

fn lock_error_kind(err: &io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Io,
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::LazyTable;
    use crate::core::error::ErrorKind;
    use crate::core::schema::{BadRowPolicy, Schema, TableOptions};

    fn schema2() -> Schema {
        Schema::new(vec!["id".to_string(), "value".to_string()]).expect("schema")
    }

    fn write_fixture(dir: &tempfile::TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).expect("write fixture");
        path
    }

    /// Six 10-byte records then four 5-byte records; a 25-byte target plans
    /// this as partitions of 3, 3, and 4 lines.
    fn ten_line_fixture() -> Vec<u8> {
        let mut data = Vec::new();
        for i in 0..6 {
            data.extend_from_slice(format!("row{i},aaaa\n").as_bytes());
        }
        for i in 6..10 {
            data.extend_from_slice(format!("r{i},x\n").as_bytes());
        }
        data
    }

    #[test]
    fn preview_touches_only_the_minimal_partition_prefix() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_fixture(&dir, "ten.csv", &ten_line_fixture());
        let mut table =
            LazyTable::open(&path, schema2(), TableOptions::new(25)).expect("open");
        assert_eq!(table.partitions().len(), 3);

        let rows = table.preview(4).expect("preview");
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].fields, ["row0", "aaaa"]);
        assert_eq!(rows[3].fields, ["row3", "aaaa"]);
        // Partitions 0 and 1 satisfy four rows; partition 2 stays unread.
        assert_eq!(table.cached_partition_count(), 2);
    }

    #[test]
    fn repeated_preview_is_deterministic_and_never_more_expensive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_fixture(&dir, "ten.csv", &ten_line_fixture());
        let mut table =
            LazyTable::open(&path, schema2(), TableOptions::new(25)).expect("open");

        let first = table.preview(4).expect("first preview");
        let parses = table.partitions_parsed();
        let second = table.preview(4).expect("second preview");
        assert_eq!(first, second);
        assert_eq!(table.partitions_parsed(), parses);
    }

    #[test]
    fn preview_zero_reads_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_fixture(&dir, "ten.csv", &ten_line_fixture());
        let mut table =
            LazyTable::open(&path, schema2(), TableOptions::new(25)).expect("open");
        let rows = table.preview(0).expect("preview");
        assert!(rows.is_empty());
        assert_eq!(table.cached_partition_count(), 0);
    }

    #[test]
    fn preview_beyond_total_returns_every_row() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_fixture(&dir, "ten.csv", &ten_line_fixture());
        let mut table =
            LazyTable::open(&path, schema2(), TableOptions::new(25)).expect("open");
        let rows = table.preview(1000).expect("preview");
        assert_eq!(rows.len(), 10);
    }

    #[test]
    fn materialize_preserves_physical_order_and_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_fixture(&dir, "ten.csv", &ten_line_fixture());
        let mut table =
            LazyTable::open(&path, schema2(), TableOptions::new(25)).expect("open");

        let first = table.materialize().expect("materialize");
        assert_eq!(first.len(), 10);
        assert_eq!(first.rows()[0].fields, ["row0", "aaaa"]);
        assert_eq!(first.rows()[9].fields, ["r9", "x"]);
        assert_eq!(table.partitions_parsed(), 3);

        let second = table.materialize().expect("materialize again");
        assert_eq!(first, second);
        // No partition is ever re-parsed.
        assert_eq!(table.partitions_parsed(), 3);
    }

    #[test]
    fn preview_then_materialize_reuses_the_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_fixture(&dir, "ten.csv", &ten_line_fixture());
        let mut table =
            LazyTable::open(&path, schema2(), TableOptions::new(25)).expect("open");

        table.preview(4).expect("preview");
        assert_eq!(table.partitions_parsed(), 2);
        let full = table.materialize().expect("materialize");
        assert_eq!(full.len(), 10);
        assert_eq!(table.partitions_parsed(), 3);
    }

    #[test]
    fn skipped_plus_materialized_equals_physical_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut data = Vec::new();
        for i in 0..40 {
            if i % 7 == 0 {
                data.extend_from_slice(format!("bad{i}\n").as_bytes());
            } else {
                data.extend_from_slice(format!("{i},v{i}\n").as_bytes());
            }
        }
        let path = write_fixture(&dir, "mixed.csv", &data);
        let mut table =
            LazyTable::open(&path, schema2(), TableOptions::new(32)).expect("open");

        let full = table.materialize().expect("materialize");
        assert_eq!(full.len() as u64 + table.skipped_row_count(), 40);
    }

    #[test]
    fn header_record_is_neither_row_nor_skip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data = b"id,value\n1,a\n2,b\n".to_vec();
        let path = write_fixture(&dir, "hdr.csv", &data);
        let options = TableOptions::new(1024).with_header(true);
        let mut table = LazyTable::open(&path, schema2(), options).expect("open");

        let full = table.materialize().expect("materialize");
        assert_eq!(full.len(), 2);
        assert_eq!(full.rows()[0].fields, ["1", "a"]);
        assert_eq!(table.skipped_row_count(), 0);
    }

    #[test]
    fn empty_file_yields_empty_table() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_fixture(&dir, "empty.csv", b"");
        let mut table =
            LazyTable::open(&path, schema2(), TableOptions::new(1024)).expect("open");
        assert!(table.partitions().is_empty());
        assert!(table.preview(5).expect("preview").is_empty());
        assert!(table.materialize().expect("materialize").is_empty());
    }

    #[test]
    fn fail_policy_aborts_materialize_with_rows_parsed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data = b"1,a\n2,b\nbroken\n3,c\n".to_vec();
        let path = write_fixture(&dir, "fail.csv", &data);
        let options = TableOptions::new(1024).with_bad_rows(BadRowPolicy::Fail);
        let mut table = LazyTable::open(&path, schema2(), options).expect("open");

        let err = table.materialize().expect_err("arity failure");
        assert_eq!(err.kind(), ErrorKind::Arity);
        assert_eq!(err.rows_parsed(), Some(2));
    }

    #[test]
    fn missing_file_maps_to_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.csv");
        let err = LazyTable::open(&path, schema2(), TableOptions::new(1024))
            .expect_err("missing file");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
