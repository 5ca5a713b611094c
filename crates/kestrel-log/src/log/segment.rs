//! A single segment: one `.log` data file plus its `.index` offset index and
//! `.timeindex` time index.

use std::fs::{File, OpenOptions};
use std::io::{Read as _, Seek, SeekFrom, Write as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use kestrel_common::error::{LogError, Result};
use kestrel_common::types::{Offset, Record, Timestamp};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::framing::{
    base_offset_filename, decode_index_entry, decode_record_body, decode_time_index_entry,
    encode_index_entry, encode_record, encode_time_index_entry, INDEX_ENTRY_SIZE,
    TIME_INDEX_ENTRY_SIZE,
};

/// Flush policy: fsync after this many records, or this long since the last
/// flush, whichever comes first.
#[derive(Debug, Clone, Copy)]
pub struct FlushPolicy {
    pub every_records: u64,
    pub every_ms: u64,
}

/// Outcome of replaying a segment's data file on open: a truncated tail
/// record is dropped rather than treated as corruption, the standard
/// crash-recovery invariant for append-only logs.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub records_recovered: u64,
    pub bytes_truncated: u64,
    pub index_rebuilt: bool,
    pub time_index_rebuilt: bool,
    pub corruption_detected: bool,
    pub errors: Vec<String>,
}

struct Files {
    log: File,
    index: File,
    timeindex: File,
}

/// A single append-only segment backed by three files on disk.
///
/// Writers and readers both take the exclusive lock: a shared file
/// descriptor's position isn't safe to advance from two threads at once, so
/// even reads serialise on `seek`+`read`.
pub struct Segment {
    base_offset: Offset,
    dir: PathBuf,
    files: RwLock<Files>,
    size: AtomicU64,
    next_offset: AtomicI64,
    max_timestamp: AtomicI64,
    record_count: AtomicU64,
    records_since_flush: AtomicU64,
    last_flush: RwLock<Instant>,
    flush_policy: FlushPolicy,
}

impl Segment {
    /// Open (creating if absent) the segment rooted at `base_offset` inside
    /// `dir`, replaying its data file and rebuilding indexes if needed.
    pub fn open(
        dir: &Path,
        base_offset: Offset,
        flush_policy: FlushPolicy,
    ) -> Result<(Self, RecoveryReport)> {
        let stem = base_offset_filename(base_offset);
        let log_path = dir.join(format!("{stem}.log"));
        let index_path = dir.join(format!("{stem}.index"));
        let timeindex_path = dir.join(format!("{stem}.timeindex"));

        let mut log_file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&log_path)?;

        let recovery = recover(&mut log_file, &index_path, &timeindex_path, base_offset)?;

        let index_file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&index_path)?;
        let timeindex_file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&timeindex_path)?;

        let size = log_file.metadata()?.len();

        let segment = Self {
            base_offset,
            dir: dir.to_path_buf(),
            files: RwLock::new(Files {
                log: log_file,
                index: index_file,
                timeindex: timeindex_file,
            }),
            size: AtomicU64::new(size),
            next_offset: AtomicI64::new(recovery.next_offset_hint),
            max_timestamp: AtomicI64::new(recovery.max_timestamp_seen),
            record_count: AtomicU64::new(recovery.records_recovered),
            records_since_flush: AtomicU64::new(0),
            last_flush: RwLock::new(Instant::now()),
            flush_policy,
        };

        Ok((segment, recovery.into()))
    }

    #[must_use]
    pub fn base_offset(&self) -> Offset {
        self.base_offset
    }

    #[must_use]
    pub fn next_offset(&self) -> Offset {
        self.next_offset.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn max_timestamp(&self) -> Timestamp {
        self.max_timestamp.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.record_count.load(Ordering::Acquire) == 0
    }

    /// Append a single record, assigning it `offset` (the caller, `Log`,
    /// owns the global offset counter and must keep it in step with this
    /// segment's). Returns the assigned offset.
    pub fn append(&self, mut record: Record) -> Result<Offset> {
        let offset = self.next_offset.load(Ordering::Acquire);
        record.offset = offset;

        let mut files = self.files.write();
        let position = files.log.seek(SeekFrom::End(0))?;
        let frame = encode_record(&record);
        files.log.write_all(&frame)?;

        files
            .index
            .write_all(&encode_index_entry(offset, position))?;
        files
            .timeindex
            .write_all(&encode_time_index_entry(record.timestamp, offset))?;

        self.size.fetch_add(frame.len() as u64, Ordering::AcqRel);
        self.next_offset.store(offset + 1, Ordering::Release);
        self.record_count.fetch_add(1, Ordering::AcqRel);
        self.max_timestamp
            .fetch_max(record.timestamp, Ordering::AcqRel);

        let since = self.records_since_flush.fetch_add(1, Ordering::AcqRel) + 1;
        drop(files);
        self.maybe_flush(since)?;

        Ok(offset)
    }

    /// Append a batch of records in one write-lock critical section,
    /// assigning them contiguous offsets.
    pub fn append_batch(&self, records: Vec<Record>) -> Result<Vec<Offset>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut assigned = Vec::with_capacity(records.len());
        let mut files = self.files.write();
        let mut position = files.log.seek(SeekFrom::End(0))?;
        let mut total_bytes = 0u64;
        let mut max_ts = self.max_timestamp.load(Ordering::Acquire);
        let mut offset = self.next_offset.load(Ordering::Acquire);

        for mut record in records {
            record.offset = offset;
            let frame = encode_record(&record);
            files.log.write_all(&frame)?;
            files
                .index
                .write_all(&encode_index_entry(offset, position))?;
            files
                .timeindex
                .write_all(&encode_time_index_entry(record.timestamp, offset))?;

            position += frame.len() as u64;
            total_bytes += frame.len() as u64;
            max_ts = max_ts.max(record.timestamp);
            assigned.push(offset);
            offset += 1;
        }

        let count = assigned.len() as u64;
        self.size.fetch_add(total_bytes, Ordering::AcqRel);
        self.next_offset.store(offset, Ordering::Release);
        self.record_count.fetch_add(count, Ordering::AcqRel);
        self.max_timestamp.store(max_ts, Ordering::Release);

        let since = self.records_since_flush.fetch_add(count, Ordering::AcqRel) + count;
        drop(files);
        self.maybe_flush(since)?;

        Ok(assigned)
    }

    /// Read the single record starting at `offset`.
    pub fn read(&self, offset: Offset) -> Result<Record> {
        let position = self.locate(offset)?;
        let mut files = self.files.write();
        read_record_at(&mut files.log, position)
    }

    /// Read whole records starting at `start_offset` up to `max_bytes`,
    /// always returning at least one record if one exists.
    pub fn read_range(&self, start_offset: Offset, max_bytes: usize) -> Result<Vec<Record>> {
        let position = self.locate(start_offset)?;
        let mut files = self.files.write();
        files.log.seek(SeekFrom::Start(position))?;

        let mut out = Vec::new();
        let mut consumed = 0usize;
        loop {
            if consumed >= max_bytes && !out.is_empty() {
                break;
            }
            let mut len_buf = [0u8; 4];
            match files.log.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let body_len = u32::from_be_bytes(len_buf) as usize;
            let mut body = vec![0u8; body_len];
            files.log.read_exact(&mut body)?;
            let record = decode_record_body(bytes::Bytes::from(body))?;
            consumed += 4 + body_len;
            out.push(record);
        }
        Ok(out)
    }

    /// Find the earliest offset whose record timestamp is `>= target`, per
    /// `findOffsetByTimestamp`.
    pub fn find_offset_by_timestamp(&self, target: Timestamp) -> Result<Option<Offset>> {
        let mut files = self.files.write();
        let len = files.timeindex.metadata()?.len();
        let entry_count = (len / TIME_INDEX_ENTRY_SIZE as u64) as usize;

        let mut lo = 0usize;
        let mut hi = entry_count;
        let mut found: Option<Offset> = None;

        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let (ts, off) = read_time_index_entry(&mut files.timeindex, mid)?;
            if ts >= target {
                found = Some(off);
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }

        Ok(found)
    }

    /// Discard every record at or after `offset`, truncating all three
    /// files and rebuilding in-memory counters.
    pub fn truncate_to(&self, offset: Offset) -> Result<()> {
        if offset <= self.base_offset {
            let mut files = self.files.write();
            files.log.set_len(0)?;
            files.index.set_len(0)?;
            files.timeindex.set_len(0)?;
            self.size.store(0, Ordering::Release);
            self.next_offset.store(self.base_offset, Ordering::Release);
            self.record_count.store(0, Ordering::Release);
            self.max_timestamp.store(i64::MIN, Ordering::Release);
            return Ok(());
        }

        let position = match self.locate(offset) {
            Ok(p) => p,
            Err(_) => return Ok(()),
        };
        let kept = self.entries_before(offset)?;

        let mut files = self.files.write();
        files.log.set_len(position)?;
        files.index.set_len(kept * INDEX_ENTRY_SIZE as u64)?;
        files
            .timeindex
            .set_len(kept * TIME_INDEX_ENTRY_SIZE as u64)?;

        self.size.store(position, Ordering::Release);
        self.next_offset.store(offset, Ordering::Release);
        self.record_count.store(kept, Ordering::Release);

        Ok(())
    }

    /// fsync the data file and both index files.
    pub fn flush(&self) -> Result<()> {
        let files = self.files.write();
        files.log.sync_data()?;
        files.index.sync_data()?;
        files.timeindex.sync_data()?;
        drop(files);
        self.records_since_flush.store(0, Ordering::Release);
        *self.last_flush.write() = Instant::now();
        Ok(())
    }

    /// Remove this segment's three files from disk. Called by the cleaner
    /// once retention has decided the segment is no longer needed.
    pub fn delete(&self) -> Result<()> {
        let stem = base_offset_filename(self.base_offset);
        for ext in ["log", "index", "timeindex"] {
            let path = self.dir.join(format!("{stem}.{ext}"));
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    fn maybe_flush(&self, since_last: u64) -> Result<()> {
        let elapsed_ms = self.last_flush.read().elapsed().as_millis() as u64;
        if since_last >= self.flush_policy.every_records || elapsed_ms >= self.flush_policy.every_ms
        {
            self.flush()?;
        }
        Ok(())
    }

    /// Resolve `offset` to the exact byte position of its record's frame.
    ///
    /// The index is append-ordered and monotonic in offset but, after
    /// compaction, not necessarily contiguous (gaps are legal once records
    /// are dropped) — so this binary-searches for the greatest index entry
    /// `<= offset` and scans forward from there, rather than assuming a
    /// dense `offset - base` slot index.
    fn locate(&self, offset: Offset) -> Result<u64> {
        let next = self.next_offset.load(Ordering::Acquire);
        if offset < self.base_offset || offset >= next {
            return Err(LogError::OffsetOutOfRange {
                offset,
                base: self.base_offset,
                next,
            }
            .into());
        }

        let mut files = self.files.write();
        let floor_position = floor_index_entry(&mut files.index, offset)?
            .map_or(0, |(_, position)| position);

        files.log.seek(SeekFrom::Start(floor_position))?;
        let mut pos = floor_position;
        loop {
            let mut len_buf = [0u8; 4];
            match files.log.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Err(LogError::OffsetOutOfRange {
                        offset,
                        base: self.base_offset,
                        next,
                    }
                    .into());
                }
                Err(e) => return Err(e.into()),
            }
            let body_len = u32::from_be_bytes(len_buf) as u64;
            let mut body = vec![0u8; body_len as usize];
            files.log.read_exact(&mut body)?;
            let offset_field = i64::from_be_bytes(body[8..16].try_into().unwrap());

            if offset_field == offset {
                return Ok(pos);
            }
            if offset_field > offset {
                return Err(LogError::OffsetOutOfRange {
                    offset,
                    base: self.base_offset,
                    next,
                }
                .into());
            }
            pos += 4 + body_len;
        }
    }

    /// Count of index entries whose offset is strictly less than `offset`
    /// (used by `truncate_to` to size the index files without assuming a
    /// dense offset-to-slot mapping).
    fn entries_before(&self, offset: Offset) -> Result<u64> {
        let mut files = self.files.write();
        let len = files.index.metadata()?.len();
        let entry_count = len / INDEX_ENTRY_SIZE as u64;

        let mut lo = 0u64;
        let mut hi = entry_count;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let mut buf = [0u8; INDEX_ENTRY_SIZE];
            files.index.seek(SeekFrom::Start(mid * INDEX_ENTRY_SIZE as u64))?;
            files.index.read_exact(&mut buf)?;
            let (entry_offset, _) = decode_index_entry(&buf);
            if entry_offset < offset {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }
}

/// Binary-search `index` for the greatest entry with `offset <= target`.
fn floor_index_entry(index: &mut File, target: Offset) -> Result<Option<(Offset, u64)>> {
    let len = index.metadata()?.len();
    let entry_count = len / INDEX_ENTRY_SIZE as u64;

    let mut lo = 0u64;
    let mut hi = entry_count;
    let mut found = None;

    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let mut buf = [0u8; INDEX_ENTRY_SIZE];
        index.seek(SeekFrom::Start(mid * INDEX_ENTRY_SIZE as u64))?;
        index.read_exact(&mut buf)?;
        let (entry_offset, position) = decode_index_entry(&buf);
        if entry_offset <= target {
            found = Some((entry_offset, position));
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }

    Ok(found)
}

fn read_record_at(log: &mut File, position: u64) -> Result<Record> {
    log.seek(SeekFrom::Start(position))?;
    let mut len_buf = [0u8; 4];
    log.read_exact(&mut len_buf)?;
    let body_len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; body_len];
    log.read_exact(&mut body)?;
    decode_record_body(bytes::Bytes::from(body))
}

fn read_time_index_entry(file: &mut File, slot: usize) -> Result<(Timestamp, Offset)> {
    let mut buf = [0u8; TIME_INDEX_ENTRY_SIZE];
    file.seek(SeekFrom::Start((slot * TIME_INDEX_ENTRY_SIZE) as u64))?;
    file.read_exact(&mut buf)?;
    Ok(decode_time_index_entry(&buf))
}

/// Internal recovery outcome, richer than the public [`RecoveryReport`] so
/// [`Segment::open`] can seed its atomics without a second data-file scan.
struct Recovery {
    records_recovered: u64,
    next_offset_hint: Offset,
    max_timestamp_seen: Timestamp,
    bytes_truncated: u64,
    index_rebuilt: bool,
    time_index_rebuilt: bool,
    corruption_detected: bool,
    errors: Vec<String>,
}

impl From<Recovery> for RecoveryReport {
    fn from(r: Recovery) -> Self {
        RecoveryReport {
            records_recovered: r.records_recovered,
            bytes_truncated: r.bytes_truncated,
            index_rebuilt: r.index_rebuilt,
            time_index_rebuilt: r.time_index_rebuilt,
            corruption_detected: r.corruption_detected,
            errors: r.errors,
        }
    }
}

/// Replay the data file from position 0. On the first frame that fails to
/// decode, is truncated, or carries the wrong expected offset, stop and
/// discard everything from that point onward. Then
/// rebuild either index file from scratch if its size disagrees with what
/// was replayed.
fn recover(
    log: &mut File,
    index_path: &Path,
    timeindex_path: &Path,
    base_offset: Offset,
) -> Result<Recovery> {
    let file_len = log.metadata()?.len();
    log.seek(SeekFrom::Start(0))?;

    let mut positions = Vec::new();
    let mut offsets = Vec::new();
    let mut timestamps = Vec::new();
    let mut pos = 0u64;
    let mut errors = Vec::new();
    let mut corruption_detected = false;
    // Offsets need only be strictly increasing from `base_offset` onward,
    // not contiguous: compaction's rewrite-and-swap can leave gaps within
    // a segment.
    let mut last_offset: Option<Offset> = None;

    loop {
        let mut len_buf = [0u8; 4];
        match log.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let body_len = u32::from_be_bytes(len_buf) as u64;
        if pos + 4 + body_len > file_len {
            warn!(position = pos, "segment record frame runs past EOF, truncating");
            corruption_detected = true;
            errors.push(format!("frame at {pos} runs past end of file"));
            break;
        }

        let mut body = vec![0u8; body_len as usize];
        if log.read_exact(&mut body).is_err() {
            corruption_detected = true;
            errors.push(format!("short read at {pos}"));
            break;
        }

        let expected_floor = last_offset.map_or(base_offset, |o| o + 1);
        match decode_record_body(bytes::Bytes::from(body)) {
            Ok(record) if record.offset >= expected_floor => {
                positions.push(pos);
                offsets.push(record.offset);
                timestamps.push(record.timestamp);
                pos += 4 + body_len;
                last_offset = Some(record.offset);
            }
            Ok(record) => {
                corruption_detected = true;
                errors.push(format!(
                    "non-monotonic offset at {pos}: expected >= {expected_floor}, found {}",
                    record.offset
                ));
                break;
            }
            Err(e) => {
                corruption_detected = true;
                errors.push(format!("decode error at {pos}: {e}"));
                break;
            }
        }
    }

    let bytes_truncated = file_len.saturating_sub(pos);
    if bytes_truncated > 0 {
        log.set_len(pos)?;
    }
    log.seek(SeekFrom::End(0))?;

    let records_recovered = positions.len() as u64;
    let max_timestamp_seen = timestamps.iter().copied().max().unwrap_or(i64::MIN);
    let next_offset_hint = last_offset.map_or(base_offset, |o| o + 1);

    let index_ok = index_matches(index_path, records_recovered)?;
    let time_index_ok = index_matches(timeindex_path, records_recovered)?;

    if !index_ok {
        rebuild_index(index_path, &offsets, &positions)?;
    }
    if !time_index_ok {
        rebuild_time_index(timeindex_path, &offsets, &timestamps)?;
    }

    if corruption_detected {
        debug!(
            records_recovered,
            bytes_truncated, "segment recovered with truncation"
        );
    }

    Ok(Recovery {
        records_recovered,
        next_offset_hint,
        max_timestamp_seen,
        bytes_truncated,
        index_rebuilt: !index_ok,
        time_index_rebuilt: !time_index_ok,
        corruption_detected,
        errors,
    })
}

fn index_matches(path: &Path, expected_records: u64) -> Result<bool> {
    if !path.exists() {
        return Ok(expected_records == 0);
    }
    let len = std::fs::metadata(path)?.len();
    Ok(len == expected_records * INDEX_ENTRY_SIZE as u64)
}

fn rebuild_index(path: &Path, offsets: &[Offset], positions: &[u64]) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    for (offset, position) in offsets.iter().zip(positions.iter()) {
        file.write_all(&encode_index_entry(*offset, *position))?;
    }
    file.sync_data()?;
    Ok(())
}

fn rebuild_time_index(path: &Path, offsets: &[Offset], timestamps: &[Timestamp]) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    for (offset, timestamp) in offsets.iter().zip(timestamps.iter()) {
        file.write_all(&encode_time_index_entry(*timestamp, *offset))?;
    }
    file.sync_data()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn policy() -> FlushPolicy {
        FlushPolicy {
            every_records: 1,
            every_ms: 1000,
        }
    }

    fn record(key: &str, value: &str, ts: i64) -> Record {
        Record {
            offset: -1,
            timestamp: ts,
            key: Some(Bytes::copy_from_slice(key.as_bytes())),
            value: Some(Bytes::copy_from_slice(value.as_bytes())),
            headers: vec![],
        }
    }

    #[test]
    fn append_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let (segment, _) = Segment::open(dir.path(), 0, policy()).unwrap();

        let offset = segment.append(record("k1", "v1", 100)).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(segment.next_offset(), 1);

        let read = segment.read(0).unwrap();
        assert_eq!(read.key, Some(Bytes::from_static(b"k1")));
        assert_eq!(read.value, Some(Bytes::from_static(b"v1")));
    }

    #[test]
    fn append_batch_assigns_contiguous_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let (segment, _) = Segment::open(dir.path(), 10, policy()).unwrap();

        let batch = vec![
            record("a", "1", 1),
            record("b", "2", 2),
            record("c", "3", 3),
        ];
        let offsets = segment.append_batch(batch).unwrap();
        assert_eq!(offsets, vec![10, 11, 12]);
        assert_eq!(segment.next_offset(), 13);
    }

    #[test]
    fn read_out_of_range_offset_errors() {
        let dir = tempfile::tempdir().unwrap();
        let (segment, _) = Segment::open(dir.path(), 0, policy()).unwrap();
        segment.append(record("a", "b", 1)).unwrap();

        let err = segment.read(99).unwrap_err();
        assert!(matches!(
            err,
            kestrel_common::error::Error::Log(LogError::OffsetOutOfRange { .. })
        ));
    }

    #[test]
    fn find_offset_by_timestamp_binary_searches() {
        let dir = tempfile::tempdir().unwrap();
        let (segment, _) = Segment::open(dir.path(), 0, policy()).unwrap();
        for i in 0..5 {
            segment.append(record("k", "v", i * 10)).unwrap();
        }

        assert_eq!(segment.find_offset_by_timestamp(25).unwrap(), Some(3));
        assert_eq!(segment.find_offset_by_timestamp(0).unwrap(), Some(0));
        assert_eq!(segment.find_offset_by_timestamp(1000).unwrap(), None);
    }

    #[test]
    fn truncate_to_discards_trailing_records() {
        let dir = tempfile::tempdir().unwrap();
        let (segment, _) = Segment::open(dir.path(), 0, policy()).unwrap();
        for i in 0..5 {
            segment.append(record("k", "v", i)).unwrap();
        }

        segment.truncate_to(3).unwrap();
        assert_eq!(segment.next_offset(), 3);
        assert!(segment.read(3).is_err());
        assert!(segment.read(2).is_ok());
    }

    #[test]
    fn recovery_truncates_at_corrupt_trailing_bytes() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (segment, _) = Segment::open(dir.path(), 0, policy()).unwrap();
            segment.append(record("a", "1", 1)).unwrap();
            segment.append(record("b", "2", 2)).unwrap();
            segment.flush().unwrap();
        }

        // Simulate a torn write: a truncated length prefix past the last
        // good record.
        let stem = base_offset_filename(0);
        let log_path = dir.path().join(format!("{stem}.log"));
        let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
        file.write_all(&[0xFF, 0xFF, 0xFF, 0xFF]).unwrap();
        drop(file);

        let (segment, report) = Segment::open(dir.path(), 0, policy()).unwrap();
        assert_eq!(report.records_recovered, 2);
        assert!(report.corruption_detected);
        assert_eq!(segment.next_offset(), 2);
    }
}
