//! Purpose: Parse one planned partition into rows against a fixed schema.
//! Exports: `ReadOptions`, `ReadOutcome`, `read_partition`.
//! Role: The only component that touches record bytes; `table` drives it per partition.
//! Invariants: Reads exactly the partition's byte range, nothing beyond it.
//! Invariants: Rows are never truncated or padded to fit the arity.
//! Invariants: Under `Skip`, one malformed record never aborts the partition.
use std::io::{Read, Seek, SeekFrom};

use bstr::ByteSlice;

use crate::core::error::{Error, ErrorKind};
use crate::core::plan::Partition;
use crate::core::schema::{BadRowPolicy, Row, Schema};

#[derive(Copy, Clone, Debug)]
pub struct ReadOptions {
    pub delimiter: u8,
    pub bad_rows: BadRowPolicy,
    /// Consume the first physical record without counting it as a row or a
    /// skip. Applied by the table to partition 0 when the file has a header.
    pub drop_leading_record: bool,
}

#[derive(Clone, Debug, Default)]
pub struct ReadOutcome {
    pub rows: Vec<Row>,
    pub skipped: u64,
}

enum RecordProblem {
    Arity { found: usize },
    Encoding,
}

/// Read and parse the partition's byte range.
///
/// Records split on `\n` (a trailing `\r` is stripped), fields on
/// `options.delimiter`. A record whose field count matches the schema arity
/// becomes a `Row`; anything else is counted under `Skip` or aborts under
/// `Fail` with the count of rows parsed so far.
pub fn read_partition<S: Read + Seek>(
    source: &mut S,
    partition: Partition,
    schema: &Schema,
    options: ReadOptions,
) -> Result<ReadOutcome, Error> {
    let len = usize::try_from(partition.len()).map_err(|_| {
        Error::new(ErrorKind::OutOfMemory)
            .with_message("partition exceeds addressable memory")
            .with_partition(partition.index)
    })?;

    let mut buf: Vec<u8> = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| {
        Error::new(ErrorKind::OutOfMemory)
            .with_message(format!("failed to allocate {len} byte partition buffer"))
            .with_partition(partition.index)
    })?;
    buf.resize(len, 0);

    source
        .seek(SeekFrom::Start(partition.start))
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to seek to partition start")
                .with_partition(partition.index)
                .with_source(err)
        })?;
    source.read_exact(&mut buf).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read partition bytes")
            .with_partition(partition.index)
            .with_source(err)
    })?;

    let mut rows = Vec::new();
    let mut skipped = 0u64;
    let mut records = buf.lines();
    if options.drop_leading_record {
        let _ = records.next();
    }
    for record in records {
        match parse_record(record, schema, options.delimiter) {
            Ok(fields) => rows.push(Row { fields }),
            Err(problem) => match options.bad_rows {
                BadRowPolicy::Skip => skipped += 1,
                BadRowPolicy::Fail => {
                    return Err(record_error(problem, schema, partition.index, rows.len() as u64));
                }
            },
        }
    }

    Ok(ReadOutcome { rows, skipped })
}

fn parse_record(
    record: &[u8],
    schema: &Schema,
    delimiter: u8,
) -> Result<Vec<String>, RecordProblem> {
    let text = record.to_str().map_err(|_| RecordProblem::Encoding)?;
    let fields: Vec<&str> = text.split(delimiter as char).collect();
    if fields.len() != schema.arity() {
        return Err(RecordProblem::Arity { found: fields.len() });
    }
    Ok(fields.into_iter().map(str::to_string).collect())
}

fn record_error(problem: RecordProblem, schema: &Schema, partition: usize, rows_parsed: u64) -> Error {
    match problem {
        RecordProblem::Arity { found } => Error::new(ErrorKind::Arity)
            .with_message(format!("expected {} fields, found {found}", schema.arity()))
            .with_partition(partition)
            .with_rows_parsed(rows_parsed)
            .with_hint("Use --errors skip to continue past malformed records."),
        RecordProblem::Encoding => Error::new(ErrorKind::Corrupt)
            .with_message("record is not valid utf-8")
            .with_partition(partition)
            .with_rows_parsed(rows_parsed)
            .with_hint("Use --errors skip to continue past malformed records."),
    }
}
