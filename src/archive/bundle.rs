//! Packing emote images into size-capped zip files.

use std::collections::VecDeque;
use std::io::{Cursor, Write};

use bytes::Bytes;
use chrono::{DateTime, Datelike, Timelike, Utc};
use tracing::warn;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Local file header bytes, not counting the name.
pub const ZIP_OVERHEAD_BYTES: u64 = 30;

/// Central directory record bytes, not counting the name.
const CENTRAL_DIRECTORY_BYTES: u64 = 46;

/// End of central directory record.
const END_RECORD_BYTES: u64 = 22;

/// A file destined for an export zip.
#[derive(Debug, Clone)]
pub struct BundleEntry {
    pub name: String,
    pub modified: DateTime<Utc>,
    pub data: Bytes,
}

impl BundleEntry {
    /// Rough size of this entry inside a stored zip.
    pub fn estimated_size(&self) -> u64 {
        estimated_size(&self.name, self.data.len())
    }

    /// Space taken including its central directory record.
    fn packed_size(&self) -> u64 {
        self.estimated_size() + CENTRAL_DIRECTORY_BYTES + self.name.len() as u64
    }
}

pub fn estimated_size(name: &str, data_len: usize) -> u64 {
    ZIP_OVERHEAD_BYTES + name.len() as u64 + data_len as u64
}

/// Result of packing a set of entries.
#[derive(Debug, Default)]
pub struct Packed {
    /// Finished zip files, each under the size limit.
    pub archives: Vec<Bytes>,
    /// Names of entries that could not fit in a zip on their own.
    pub oversized: Vec<String>,
}

/// Pack `entries` in order into as few STORED zips under `size_limit` as possible.
pub fn pack(entries: impl IntoIterator<Item = BundleEntry>, size_limit: u64) -> zip::result::ZipResult<Packed> {
    let mut packed = Packed::default();
    let mut pending: VecDeque<BundleEntry> = VecDeque::new();

    for entry in entries {
        if END_RECORD_BYTES + entry.packed_size() >= size_limit {
            packed.oversized.push(entry.name);
        } else {
            pending.push_back(entry);
        }
    }

    while !pending.is_empty() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let mut used = END_RECORD_BYTES;

        while let Some(entry) = pending.pop_front() {
            if used + entry.packed_size() >= size_limit {
                pending.push_front(entry);
                break;
            }
            used += entry.packed_size();

            let options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Stored)
                .last_modified_time(zip_time(&entry.modified));
            writer.start_file(entry.name.as_str(), options)?;
            writer.write_all(&entry.data)?;
        }

        packed.archives.push(Bytes::from(writer.finish()?.into_inner()));
    }

    Ok(packed)
}

/// Zip timestamps cannot represent dates before 1980.
fn zip_time(time: &DateTime<Utc>) -> zip::DateTime {
    let year = u16::try_from(time.year()).unwrap_or(0);
    zip::DateTime::from_date_and_time(
        year,
        time.month() as u8,
        time.day() as u8,
        time.hour() as u8,
        time.minute() as u8,
        time.second() as u8,
    )
    .unwrap_or_else(|_| {
        warn!("timestamp {} out of zip range", time);
        zip::DateTime::default()
    })
}
