//! Purpose: Plan record-aligned byte ranges over a delimited file without parsing it.
//! Exports: `Partition`, `plan_partitions`.
//! Role: Pure planning layer used by `table` to schedule lazy partition reads.
//! Invariants: Partitions are contiguous, cover `[0, len)`, and never split a record.
//! Invariants: Planning reads only small scan windows near each target boundary.
use std::cmp;
use std::io::{Read, Seek, SeekFrom};

use bstr::ByteSlice;

use crate::core::error::{Error, ErrorKind};

/// Bytes examined per forward scan step while hunting a record terminator.
const SCAN_WINDOW: usize = 64 * 1024;

/// A half-open, record-aligned byte range `[start, end)` of the source file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Partition {
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl Partition {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Compute the partition plan for `source`.
///
/// From each partition start, advance by `target_partition_bytes`, then scan
/// forward to the next record terminator; the position after it becomes the
/// boundary. The final partition always extends to EOF. The target is a
/// target, not a cap: a record longer than the target extends its partition
/// instead of failing the plan.
pub fn plan_partitions<S: Read + Seek>(
    source: &mut S,
    target_partition_bytes: u64,
) -> Result<Vec<Partition>, Error> {
    if target_partition_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage).with_message("target partition size must be non-zero"));
    }

    let len = source
        .seek(SeekFrom::End(0))
        .map_err(|err| Error::new(ErrorKind::Io).with_message("failed to size source").with_source(err))?;
    if len == 0 {
        return Ok(Vec::new());
    }

    let mut partitions = Vec::new();
    let mut start = 0u64;
    while start < len {
        let index = partitions.len();
        let tentative = start.saturating_add(target_partition_bytes);
        let end = if tentative >= len {
            len
        } else {
            next_record_boundary(source, tentative, len)?.unwrap_or(len)
        };
        if end.saturating_sub(tentative) > target_partition_bytes {
            // A single record overran the target; the boundary moved to keep
            // the partition record-aligned.
            tracing::debug!(
                partition = index,
                overrun_bytes = end - tentative,
                "record longer than target extended partition"
            );
        }
        partitions.push(Partition { index, start, end });
        start = end;
    }

    Ok(partitions)
}

/// Position just past the first record terminator at or after `from`, or
/// `None` when the rest of the file holds no terminator.
fn next_record_boundary<S: Read + Seek>(
    source: &mut S,
    from: u64,
    len: u64,
) -> Result<Option<u64>, Error> {
    source
        .seek(SeekFrom::Start(from))
        .map_err(|err| Error::new(ErrorKind::Io).with_message("failed to seek source").with_source(err))?;

    let mut window = [0u8; SCAN_WINDOW];
    let mut offset = from;
    while offset < len {
        let want = cmp::min(SCAN_WINDOW as u64, len - offset) as usize;
        let read = source
            .read(&mut window[..want])
            .map_err(|err| Error::new(ErrorKind::Io).with_message("failed to scan for record boundary").with_source(err))?;
        if read == 0 {
            break;
        }
        if let Some(pos) = window[..read].find_byte(b'\n') {
            return Ok(Some(offset + pos as u64 + 1));
        }
        offset += read as u64;
    }
    Ok(None)
}
