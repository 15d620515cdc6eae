//! Exporting a guild's emotes as zip files.

use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use tracing::{debug, info};

use crate::archive::{pack, BundleEntry};
use crate::common::types::emote_url;
use crate::common::{EmoteError, EmoteId, EmoteResult, GuildId};

use super::fetch::{Fetcher, IMAGE_MIMETYPES};

/// Milliseconds from the Unix epoch to the first second of 2015.
const DISCORD_EPOCH_MS: u64 = 1_420_070_400_000;

/// An emote to include in an export.
#[derive(Debug, Clone)]
pub struct ExportEmote {
    pub id: EmoteId,
    pub name: String,
    pub animated: bool,
}

impl ExportEmote {
    fn extension(&self) -> &'static str {
        if self.animated {
            "gif"
        } else {
            "png"
        }
    }

    /// When the emote was created, from its snowflake.
    pub fn created_at(&self) -> DateTime<Utc> {
        let millis = (self.id >> 22) + DISCORD_EPOCH_MS;
        i64::try_from(millis)
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_default()
    }
}

#[derive(Debug)]
pub struct ExportArchive {
    pub file_name: String,
    pub data: Bytes,
}

#[derive(Debug, Default)]
pub struct Export {
    pub archives: Vec<ExportArchive>,
    /// Emotes whose image could not be downloaded.
    pub failed: Vec<(String, EmoteError)>,
    /// Files too large for any archive under the limit.
    pub oversized: Vec<String>,
}

/// Download every emote and pack them into zips no larger than `filesize_limit`.
///
/// Timeouts and bad URLs are collected per emote. Any other failure cancels
/// the remaining downloads and is returned.
pub async fn export_emotes(
    fetcher: &Fetcher,
    guild: GuildId,
    emotes: &[ExportEmote],
    filesize_limit: u64,
) -> EmoteResult<Export> {
    let names = unique_file_names(emotes);

    let downloads = emotes.iter().zip(names).map(|(emote, file_name)| async move {
        // The CDN is trusted to serve images, so no HEAD request.
        let url = emote_url(emote.id, emote.animated);
        match fetcher.fetch(&url, IMAGE_MIMETYPES, false).await {
            Ok(data) => Ok(Ok(BundleEntry {
                name: file_name,
                modified: emote.created_at(),
                data,
            })),
            Err(e @ (EmoteError::FetchTimeout | EmoteError::InvalidUrl)) => {
                debug!("skipping {} in export: {}", emote.name, e);
                Ok(Err((emote.name.clone(), e)))
            }
            Err(e) => Err(e),
        }
    });
    let results = try_join_all(downloads).await?;

    let mut export = Export::default();
    let mut entries = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(entry) => entries.push(entry),
            Err(failure) => export.failed.push(failure),
        }
    }

    let packed = pack(entries, filesize_limit).map_err(|e| std::io::Error::other(e.to_string()))?;
    export.oversized = packed.oversized;
    export.archives = packed
        .archives
        .into_iter()
        .enumerate()
        .map(|(index, data)| ExportArchive {
            file_name: format!("emotes-{}-{}.zip", guild, index + 1),
            data,
        })
        .collect();

    info!(
        "exported {} emotes from guild {} into {} archives",
        emotes.len() - export.failed.len() - export.oversized.len(),
        guild,
        export.archives.len()
    );
    Ok(export)
}

/// `name.png`, then `name-2.png`, `name-3.png` for duplicates.
fn unique_file_names(emotes: &[ExportEmote]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    emotes
        .iter()
        .map(|emote| {
            let base = format!("{}.{}", emote.name, emote.extension());
            let count = seen.entry(base).or_insert(0);
            *count += 1;
            if *count == 1 {
                format!("{}.{}", emote.name, emote.extension())
            } else {
                format!("{}-{}.{}", emote.name, count, emote.extension())
            }
        })
        .collect()
}
