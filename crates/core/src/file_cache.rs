//! Directory snapshot for the menu program.
//!
//! The storage device cannot be touched while the bus loop is servicing the
//! console, so the directory structure is captured once, right after mount,
//! into a fixed-capacity cache. The Launcher port reads titles out of this
//! cache; the loader uses the stored names to re-open the selected file.
//!
//! Only a flat root directory of up to [`FOLDER_LIMIT`] entries is supported.

use serde::{Deserialize, Serialize};

use crate::hal::{Cp437Encoder, Storage};
use crate::loader::{self, ChfHeader};
use crate::logging::{log, LogCategory, LogLevel};

/// Maximum entries cached per directory.
pub const FOLDER_LIMIT: usize = 100;

/// On-screen title width, in CP437 bytes.
pub const TITLE_LEN: usize = 32;

/// One cached directory entry.
///
/// `title` is the CP437 text the menu paints, space-padded to
/// [`TITLE_LEN`]; `name` is the storage key used to re-open the entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub title: [u8; TITLE_LEN],
    pub is_file: bool,
    pub name: String,
}

impl FileRecord {
    pub fn new(title: [u8; TITLE_LEN], is_file: bool, name: impl Into<String>) -> Self {
        Self {
            title,
            is_file,
            name: name.into(),
        }
    }

    /// Build a record from ASCII text, space-padding the title.
    pub fn with_title(title_text: &str, is_file: bool, name: impl Into<String>) -> Self {
        let mut title = [b' '; TITLE_LEN];
        let bytes = title_text.as_bytes();
        let len = bytes.len().min(TITLE_LEN);
        title[..len].copy_from_slice(&bytes[..len]);
        Self::new(title, is_file, name)
    }

    /// The title with trailing padding removed, for host-side display.
    pub fn title_text(&self) -> String {
        String::from_utf8_lossy(&self.title)
            .trim_end_matches(' ')
            .to_string()
    }
}

/// The immutable snapshot of the storage root directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryCache {
    records: Vec<FileRecord>,
}

impl DirectoryCache {
    /// Build a cache directly from records, truncating at [`FOLDER_LIMIT`].
    pub fn from_records(mut records: Vec<FileRecord>) -> Self {
        records.truncate(FOLDER_LIMIT);
        Self { records }
    }

    /// Enumerate storage and derive a title for every entry.
    ///
    /// Title derivation:
    /// - directory: `/` prepended to the translated name
    /// - CHF image: the title field of its header, translated
    /// - BIN image: the name with its final `.xxx` extension stripped
    /// - anything else: the raw name, translated
    pub fn build<S: Storage, E: Cp437Encoder>(storage: &mut S, encoder: &E) -> Self {
        let mut records = Vec::new();
        for entry in storage.entries() {
            if records.len() == FOLDER_LIMIT {
                log(LogCategory::Loader, LogLevel::Warn, || {
                    format!("directory cache full, dropping entries past {}", FOLDER_LIMIT)
                });
                break;
            }

            let mut title = [b' '; TITLE_LEN];
            if entry.is_dir {
                title[0] = b'/';
                encoder.encode(&entry.name, &mut title[1..]);
                records.push(FileRecord::new(title, false, entry.name));
                continue;
            }

            match storage.read(&entry.name) {
                Some(data) if loader::is_chf_image(&data) => {
                    match ChfHeader::parse(&data) {
                        Ok(header) => {
                            encoder.encode(&header.title, &mut title);
                        }
                        Err(_) => {
                            encoder.encode(&entry.name, &mut title);
                        }
                    }
                }
                Some(data) if data.first() == Some(&loader::BIN_MAGIC) => {
                    let stem = match entry.name.rsplit_once('.') {
                        Some((stem, _extension)) => stem,
                        None => entry.name.as_str(),
                    };
                    encoder.encode(stem, &mut title);
                }
                _ => {
                    encoder.encode(&entry.name, &mut title);
                }
            }
            records.push(FileRecord::new(title, true, entry.name));
        }

        log(LogCategory::Loader, LogLevel::Info, || {
            format!("directory cache built, {} entries", records.len())
        });
        Self { records }
    }

    pub fn len(&self) -> u16 {
        self.records.len() as u16
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: u16) -> Option<&FileRecord> {
        self.records.get(index as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.iter()
    }
}
