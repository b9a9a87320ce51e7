//! Stats snapshot persistence.
//!
//! A flat binary file seeding the ordering statistics across restarts.
//!
//! # File Layout
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │ magic: b"SVCS" (4 bytes)            │
//! │ version: u16                        │
//! │ reserved: u16                       │
//! │ save_counter: u64                   │
//! │ record_count: u32                   │
//! ├─────────────────────────────────────┤
//! │ record_count × record               │
//! │   name_len: u16 + UTF-8 name        │
//! │   hits: u64                         │
//! │   misses: u64                       │
//! │   total_time_ns: u64                │
//! │   frequency: f64 (bit pattern)      │
//! ├─────────────────────────────────────┤
//! │ crc32 of everything after magic     │
//! └─────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. The frequency travels as its exact bit
//! pattern, so a write/read round trip is bit-for-bit. Writes go through a
//! temp file renamed into place; a torn write leaves the previous snapshot
//! intact.

use std::fs;
use std::path::Path;

use tracing::trace;

use sievecache_core::{CacheError, CacheResult};

/// Magic bytes identifying a stats snapshot file.
const MAGIC: [u8; 4] = *b"SVCS";

/// Current snapshot format version.
const FORMAT_VERSION: u16 = 1;

/// Fixed header size past the magic: version + reserved + counter + count.
const HEADER_TAIL: usize = 2 + 2 + 8 + 4;

/// Longest accepted symbol name, matching the u16 length prefix.
const MAX_NAME_LEN: usize = u16::MAX as usize;

/// One persisted symbol record.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SnapshotRecord {
    pub name: String,
    pub hits: u64,
    pub misses: u64,
    pub total_time_ns: u64,
    pub frequency: f64,
}

/// Parsed snapshot file.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshotFile {
    /// Monotonic counter bumped on every save.
    pub save_counter: u64,
    pub records: Vec<SnapshotRecord>,
}

/// Serialize and atomically write a snapshot.
pub fn write_snapshot(
    path: &Path,
    save_counter: u64,
    records: &[SnapshotRecord],
) -> CacheResult<()> {
    let mut buf = Vec::with_capacity(MAGIC.len() + HEADER_TAIL + records.len() * 64);
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.extend_from_slice(&save_counter.to_le_bytes());
    let count = u32::try_from(records.len()).map_err(|_| CacheError::InvalidConfig {
        detail: format!("snapshot cannot hold {} records", records.len()),
    })?;
    buf.extend_from_slice(&count.to_le_bytes());

    for record in records {
        let name = record.name.as_bytes();
        if name.len() > MAX_NAME_LEN {
            return Err(CacheError::InvalidConfig {
                detail: format!("symbol name too long for snapshot: {} bytes", name.len()),
            });
        }
        buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
        buf.extend_from_slice(name);
        buf.extend_from_slice(&record.hits.to_le_bytes());
        buf.extend_from_slice(&record.misses.to_le_bytes());
        buf.extend_from_slice(&record.total_time_ns.to_le_bytes());
        buf.extend_from_slice(&record.frequency.to_bits().to_le_bytes());
    }

    let crc = crc32fast::hash(&buf[MAGIC.len()..]);
    buf.extend_from_slice(&crc.to_le_bytes());

    let tmp = path.with_extension("svcs.tmp");
    fs::write(&tmp, &buf).map_err(|e| CacheError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| CacheError::io(path, e))?;
    trace!(path = %path.display(), bytes = buf.len(), "snapshot written");
    Ok(())
}

/// Read and verify a snapshot.
pub fn read_snapshot(path: &Path) -> CacheResult<StatsSnapshotFile> {
    let data = fs::read(path).map_err(|e| CacheError::io(path, e))?;
    let corrupt = |detail: &str| CacheError::SnapshotCorrupted {
        path: path.to_path_buf(),
        detail: detail.into(),
    };

    if data.len() < MAGIC.len() + HEADER_TAIL + 4 {
        return Err(corrupt("file shorter than header"));
    }
    if data[..MAGIC.len()] != MAGIC {
        return Err(corrupt("bad magic"));
    }

    let crc_offset = data.len() - 4;
    let stored_crc = u32::from_le_bytes(data[crc_offset..].try_into().expect("4 bytes"));
    let computed_crc = crc32fast::hash(&data[MAGIC.len()..crc_offset]);
    if stored_crc != computed_crc {
        return Err(corrupt("crc mismatch"));
    }

    let mut cursor = Reader::new(&data[MAGIC.len()..crc_offset]);
    let version = cursor.u16().ok_or_else(|| corrupt("truncated version"))?;
    if version != FORMAT_VERSION {
        return Err(CacheError::SnapshotVersionMismatch {
            expected: FORMAT_VERSION,
            found: version,
        });
    }
    let _reserved = cursor.u16().ok_or_else(|| corrupt("truncated header"))?;
    let save_counter = cursor.u64().ok_or_else(|| corrupt("truncated counter"))?;
    let count = cursor.u32().ok_or_else(|| corrupt("truncated count"))?;

    let mut records = Vec::with_capacity(count.min(65_536) as usize);
    for _ in 0..count {
        let name_len = cursor.u16().ok_or_else(|| corrupt("truncated name length"))? as usize;
        let name_bytes = cursor
            .bytes(name_len)
            .ok_or_else(|| corrupt("truncated name"))?;
        let name = std::str::from_utf8(name_bytes)
            .map_err(|_| corrupt("name is not valid UTF-8"))?
            .to_owned();
        let hits = cursor.u64().ok_or_else(|| corrupt("truncated record"))?;
        let misses = cursor.u64().ok_or_else(|| corrupt("truncated record"))?;
        let total_time_ns = cursor.u64().ok_or_else(|| corrupt("truncated record"))?;
        let frequency = f64::from_bits(cursor.u64().ok_or_else(|| corrupt("truncated record"))?);
        records.push(SnapshotRecord {
            name,
            hits,
            misses,
            total_time_ns,
            frequency,
        });
    }
    if !cursor.is_exhausted() {
        return Err(corrupt("trailing bytes after records"));
    }

    Ok(StatsSnapshotFile {
        save_counter,
        records,
    })
}

/// Bounds-checked little-endian reader over a byte slice.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn u16(&mut self) -> Option<u16> {
        self.bytes(2).map(|b| u16::from_le_bytes(b.try_into().expect("2 bytes")))
    }

    fn u32(&mut self) -> Option<u32> {
        self.bytes(4).map(|b| u32::from_le_bytes(b.try_into().expect("4 bytes")))
    }

    fn u64(&mut self) -> Option<u64> {
        self.bytes(8).map(|b| u64::from_le_bytes(b.try_into().expect("8 bytes")))
    }

    fn is_exhausted(&self) -> bool {
        self.pos == self.data.len()
    }
}
