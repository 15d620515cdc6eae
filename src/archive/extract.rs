//! Streaming extraction of zip and uncompressed tar archives.
//!
//! Members are read one at a time in the container's own order. Anything at
//! or above the size limit is reported without reading its content.

use std::io::{Cursor, Read};

use bytes::Bytes;
use futures::stream::{self, Stream};
use tracing::debug;
use zip::ZipArchive;

use crate::common::{EmoteError, EmoteResult};

/// Tar headers and data are laid out in blocks of this size.
const TAR_BLOCK_SIZE: usize = 512;

/// One regular file from an archive.
#[derive(Debug)]
pub struct ArchiveEntry {
    /// Path of the member inside the archive.
    pub name: String,
    /// Member content, or why it could not be read.
    pub content: EmoteResult<Bytes>,
}

/// Forward-only iterator over the files of an archive.
pub struct ArchiveEntries {
    size_limit: u64,
    inner: Inner,
}

enum Inner {
    Zip {
        archive: ZipArchive<Cursor<Bytes>>,
        next: usize,
    },
    Tar {
        data: Bytes,
        members: std::vec::IntoIter<TarMember>,
    },
}

enum TarMember {
    File { name: String, size: u64, position: u64 },
    Broken(std::io::Error),
}

/// Open `archive` as a zip, falling back to an uncompressed tar.
pub fn extract(archive: Bytes, size_limit: u64) -> EmoteResult<ArchiveEntries> {
    let inner = match ZipArchive::new(Cursor::new(archive.clone())) {
        Ok(zip) => Inner::Zip {
            archive: zip,
            next: 0,
        },
        Err(e) => {
            debug!("not a zip archive ({}), trying tar", e);
            let members = scan_tar(&archive)?;
            Inner::Tar {
                data: archive,
                members: members.into_iter(),
            }
        }
    };

    Ok(ArchiveEntries { size_limit, inner })
}

/// Like [`extract`], yielding to the scheduler between members.
pub fn extract_stream(
    archive: Bytes,
    size_limit: u64,
) -> EmoteResult<impl Stream<Item = ArchiveEntry> + Send> {
    Ok(extract(archive, size_limit)?.into_stream())
}

impl ArchiveEntries {
    pub fn into_stream(self) -> impl Stream<Item = ArchiveEntry> + Send {
        stream::unfold(self, |mut entries| async move {
            tokio::task::yield_now().await;
            let entry = entries.next()?;
            Some((entry, entries))
        })
    }

    fn next_zip(archive: &mut ZipArchive<Cursor<Bytes>>, next: &mut usize, limit: u64) -> Option<ArchiveEntry> {
        while *next < archive.len() {
            let index = *next;
            *next += 1;

            let fallback_name = archive
                .name_for_index(index)
                .map(str::to_string)
                .unwrap_or_else(|| format!("#{}", index));

            let mut file = match archive.by_index(index) {
                Ok(file) => file,
                Err(e) => {
                    return Some(ArchiveEntry {
                        name: fallback_name,
                        content: Err(std::io::Error::other(e).into()),
                    })
                }
            };
            if file.is_dir() {
                continue;
            }

            let name = file.name().to_string();
            let size = file.size();
            if size >= limit {
                return Some(ArchiveEntry {
                    name,
                    content: Err(EmoteError::FileTooBig { size, limit }),
                });
            }

            let mut buf = Vec::with_capacity(size as usize);
            // The declared size can lie, so cap the read as well.
            let content = match (&mut file).take(limit).read_to_end(&mut buf) {
                Ok(read) if read as u64 >= limit => Err(EmoteError::FileTooBig {
                    size: read as u64,
                    limit,
                }),
                Ok(_) => Ok(Bytes::from(buf)),
                Err(e) => Err(e.into()),
            };
            return Some(ArchiveEntry { name, content });
        }
        None
    }

    fn next_tar(data: &Bytes, members: &mut std::vec::IntoIter<TarMember>, limit: u64) -> Option<ArchiveEntry> {
        let (name, size, position) = match members.next()? {
            TarMember::File {
                name,
                size,
                position,
            } => (name, size, position),
            TarMember::Broken(e) => {
                return Some(ArchiveEntry {
                    name: String::from("<unreadable>"),
                    content: Err(e.into()),
                })
            }
        };

        if size >= limit {
            return Some(ArchiveEntry {
                name,
                content: Err(EmoteError::FileTooBig { size, limit }),
            });
        }

        let start = position as usize;
        let end = start.saturating_add(size as usize);
        let content = if end <= data.len() {
            Ok(data.slice(start..end))
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "tar member extends past end of archive",
            )
            .into())
        };
        Some(ArchiveEntry { name, content })
    }
}

impl Iterator for ArchiveEntries {
    type Item = ArchiveEntry;

    fn next(&mut self) -> Option<ArchiveEntry> {
        let limit = self.size_limit;
        match &mut self.inner {
            Inner::Zip { archive, next } => Self::next_zip(archive, next, limit),
            Inner::Tar { data, members } => Self::next_tar(data, members, limit),
        }
    }
}

/// Walk the tar headers, remembering where each file's data starts.
///
/// Only headers are parsed here. Content is sliced out of the original
/// buffer when the member is reached.
fn scan_tar(data: &Bytes) -> EmoteResult<Vec<TarMember>> {
    if data.len() < TAR_BLOCK_SIZE {
        return Err(EmoteError::InvalidArchive);
    }

    let mut archive = tar::Archive::new(Cursor::new(data.as_ref()));
    let entries = archive
        .entries_with_seek()
        .map_err(|_| EmoteError::InvalidArchive)?;

    let mut members = Vec::new();
    for (index, entry) in entries.enumerate() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if index == 0 => {
                debug!("not a tar archive either: {}", e);
                return Err(EmoteError::InvalidArchive);
            }
            Err(e) => {
                members.push(TarMember::Broken(e));
                break;
            }
        };

        if !entry.header().entry_type().is_file() {
            continue;
        }

        let name = entry
            .path()
            .map(|path| path.to_string_lossy().into_owned())
            .unwrap_or_else(|_| String::from_utf8_lossy(&entry.path_bytes()).into_owned());
        members.push(TarMember::File {
            name,
            size: entry.size(),
            position: entry.raw_file_position(),
        });
    }

    Ok(members)
}
