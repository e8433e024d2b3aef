//! Scoped spill-to-disk storage for response bodies.
//!
//! A captured body starts life in memory and, past `spill_threshold_bytes`,
//! moves to a temp file so a large response never forces the whole payload
//! to be buffered in RAM. The temp file is a scoped resource: it is
//! removed as soon as the owning [`SpillBuffer`] (and thus the capture
//! that created it) is dropped, win or lose.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

/// A body buffer that starts in memory and spills to a uniquely-named
/// temp file once it exceeds a threshold.
pub enum SpillBuffer {
    Memory(Vec<u8>),
    Disk(SpillFile),
}

impl SpillBuffer {
    pub fn new() -> Self {
        return Self::Memory(Vec::new());
    }

    pub fn len(&self) -> u64 {
        match self {
            Self::Memory(buffer) => return buffer.len() as u64,
            Self::Disk(file) => return file.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        return self.len() == 0;
    }

    /// Appends `chunk`, spilling to `spill_dir` if this write would cross
    /// `threshold_bytes`.
    pub fn push(&mut self, chunk: &[u8], threshold_bytes: usize, spill_dir: &std::path::Path) -> std::io::Result<()> {
        if let Self::Memory(buffer) = self {
            if buffer.len() + chunk.len() > threshold_bytes {
                let mut spilled = SpillFile::create(spill_dir)?;
                spilled.file.write_all(buffer)?;
                spilled.len = buffer.len() as u64;
                *self = Self::Disk(spilled);
            }
        }

        match self {
            Self::Memory(buffer) => buffer.extend_from_slice(chunk),
            Self::Disk(file) => {
                file.file.write_all(chunk)?;
                file.len += chunk.len() as u64;
            }
        }

        return Ok(());
    }

    /// Reads the full body back into memory for serialization into a WARC
    /// record. Spilled bodies are read once, at write time, so the working
    /// set never holds more than one in-flight capture's worth of bytes.
    pub fn into_vec(self) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Memory(buffer) => return Ok(buffer),
            Self::Disk(mut file) => {
                let mut buffer = Vec::with_capacity(file.len as usize);
                file.file.seek(SeekFrom::Start(0))?;
                file.file.read_to_end(&mut buffer)?;
                return Ok(buffer);
            }
        }
    }
}

impl Default for SpillBuffer {
    fn default() -> Self {
        return Self::new();
    }
}

/// A uniquely-named temp file, removed when dropped.
pub struct SpillFile {
    file: File,
    path: PathBuf,
    len: u64,
}

impl SpillFile {
    fn create(dir: &std::path::Path) -> std::io::Result<Self> {
        let path = dir.join(format!("spill-{}", uuid::Uuid::new_v4()));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        return Ok(Self { file, path, len: 0 });
    }
}

impl Drop for SpillFile {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(error) = std::fs::remove_file(&self.path) {
                tracing::error!(path = %self.path.display(), %error, "failed to remove spill file");
            }
        }
    }
}
