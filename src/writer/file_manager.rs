//! File Manager: the open-file cache backing [`super::Writer`].
//!
//! At most one handle is kept open per resolved destination path, new
//! captures append to whatever is already open, and a file that has sat
//! idle past `rollover_idle_seconds` is closed (and, on its next write,
//! reopened) rather than held forever.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use super::{PreparedWrite, Writer};
use crate::error::{RecorderError, Result};
use crate::record::{build_warcinfo, gzip_member};
use crate::template::{PathTemplate, TemplateContext};

struct OpenFile {
    file: File,
    offset: u64,
    last_write: Instant,
    warcinfo_written: bool,
}

/// Resolves destination paths from captures, caches open file handles,
/// and rolls them over when idle.
pub struct FileManager {
    root: PathBuf,
    template: PathTemplate,
    warcinfo_fields: std::collections::BTreeMap<String, String>,
    rollover_idle: Duration,
    files: Mutex<HashMap<String, OpenFile>>,
}

impl FileManager {
    pub fn new(
        root: impl Into<PathBuf>,
        template: &str,
        warcinfo_fields: std::collections::BTreeMap<String, String>,
        rollover_idle_seconds: u64,
    ) -> Self {
        return Self {
            root: root.into(),
            template: PathTemplate::compile(template),
            warcinfo_fields,
            rollover_idle: Duration::from_secs(rollover_idle_seconds),
            files: Mutex::new(HashMap::new()),
        };
    }

    /// Resolves a capture's template variables to the relative path of
    /// its destination file.
    pub fn resolve(&self, ctx: &TemplateContext) -> String {
        return self.template.resolve(ctx);
    }

    fn full_path(&self, destination_key: &str) -> PathBuf {
        return self.root.join(destination_key);
    }

    fn open(&self, destination_key: &str) -> Result<File> {
        let path = self.full_path(destination_key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| RecorderError::WriteFailure {
                path: path.display().to_string(),
                source,
            })?;
        }
        return OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| RecorderError::WriteFailure {
                path: path.display().to_string(),
                source,
            });
    }

    fn with_open_file<T>(
        &self,
        destination_key: &str,
        func: impl FnOnce(&mut OpenFile) -> Result<T>,
    ) -> Result<T> {
        let mut files = self.files.lock().expect("file manager mutex poisoned");

        if !files.contains_key(destination_key) {
            let file = self.open(destination_key)?;
            let offset = file
                .metadata()
                .map_err(|source| RecorderError::WriteFailure {
                    path: destination_key.to_owned(),
                    source,
                })?
                .len();
            files.insert(
                destination_key.to_owned(),
                OpenFile {
                    file,
                    offset,
                    last_write: Instant::now(),
                    warcinfo_written: false,
                },
            );
        }

        let open_file = files.get_mut(destination_key).expect("just inserted");
        let result = func(open_file);
        if result.is_err() {
            files.remove(destination_key);
        }
        return result;
    }

    /// Closes and evicts the handle for a single destination, e.g. for
    /// an operator-triggered rollover.
    pub fn close_file(&self, destination_key: &str) -> Result<()> {
        let mut files = self.files.lock().expect("file manager mutex poisoned");
        if let Some(mut open_file) = files.remove(destination_key) {
            sync_and_flush(destination_key, &mut open_file.file)?;
        }
        return Ok(());
    }
}

fn sync_and_flush(path: &str, file: &mut File) -> Result<()> {
    file.flush().map_err(|source| RecorderError::WriteFailure {
        path: path.to_owned(),
        source,
    })?;
    return file.sync_data().map_err(|source| RecorderError::WriteFailure {
        path: path.to_owned(),
        source,
    });
}

impl Writer for FileManager {
    fn write_pair(&self, write: PreparedWrite) -> Result<u64> {
        let destination_key = write.destination_key.clone();
        self.with_open_file(&destination_key, |open_file| {
            let first_offset = open_file.offset;
            for bytes in &write.record_bytes {
                open_file
                    .file
                    .write_all(bytes)
                    .map_err(|source| RecorderError::WriteFailure {
                        path: destination_key.clone(),
                        source,
                    })?;
                open_file.offset += bytes.len() as u64;
            }
            sync_and_flush(&destination_key, &mut open_file.file)?;
            open_file.last_write = Instant::now();
            return Ok(first_offset);
        })
    }

    fn ensure_warcinfo(&self, destination_key: &str, filename: &str, date: DateTime<Utc>) -> Result<()> {
        self.with_open_file(destination_key, |open_file| {
            if open_file.warcinfo_written {
                return Ok(());
            }
            let mut fields = self.warcinfo_fields.clone();
            fields.entry("format".to_owned()).or_insert_with(|| "WARC File Format 1.0".to_owned());
            let _ = date;
            let record = build_warcinfo(filename, &fields);
            let framed = gzip_member(&record).map_err(|source| RecorderError::WriteFailure {
                path: destination_key.to_owned(),
                source,
            })?;
            open_file
                .file
                .write_all(&framed)
                .map_err(|source| RecorderError::WriteFailure {
                    path: destination_key.to_owned(),
                    source,
                })?;
            open_file.offset += framed.len() as u64;
            sync_and_flush(destination_key, &mut open_file.file)?;
            open_file.warcinfo_written = true;
            return Ok(());
        })
    }

    fn close(&self) -> Result<()> {
        let mut files = self.files.lock().expect("file manager mutex poisoned");
        for (key, mut open_file) in files.drain() {
            sync_and_flush(&key, &mut open_file.file)?;
        }
        return Ok(());
    }

    /// Closes every open file whose last write is older than the
    /// configured idle rollover window. Intended to be driven by a
    /// periodic maintenance tick in the writer loop.
    fn close_idle(&self) -> Result<()> {
        let mut files = self.files.lock().expect("file manager mutex poisoned");
        let expired: Vec<String> = files
            .iter()
            .filter(|(_, open_file)| open_file.last_write.elapsed() >= self.rollover_idle)
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            if let Some(mut open_file) = files.remove(&key) {
                sync_and_flush(&key, &mut open_file.file)?;
            }
        }
        return Ok(());
    }
}

/// Whether `path` already exists as a readable file; used by the
/// maintenance loop when deciding whether to warn about a missing root.
pub fn exists(path: &Path) -> bool {
    return path.is_file();
}
