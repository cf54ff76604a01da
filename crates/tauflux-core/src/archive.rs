//! Minimal on-disk raw/analyzed data persistence.
//!
//! A production columnar/HDF5-equivalent format is out of scope; `DirectoryArchiver` is
//! an append-only directory-of-chunks implementation adequate for round-tripping tests,
//! not a performance-oriented store.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{Result, TaufluxError};
use crate::worker::Worker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveChunkKind {
    RawTimestamps,
    RawHistograms,
    Markers,
}

impl ArchiveChunkKind {
    fn file_name(self) -> &'static str {
        match self {
            ArchiveChunkKind::RawTimestamps => "raw_timestamps.chunks",
            ArchiveChunkKind::RawHistograms => "raw_histograms.chunks",
            ArchiveChunkKind::Markers => "markers.chunks",
        }
    }
}

pub trait Archiver: Send {
    fn open(&mut self, path: &Path) -> Result<()>;
    fn append(&mut self, kind: ArchiveChunkKind, payload: &[u8]) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// Appends each chunk as a length-prefixed record to one file per kind inside a
/// freshly created directory; fails to open if the directory already exists
/// (exclusive-create).
#[derive(Default)]
pub struct DirectoryArchiver {
    dir: Option<PathBuf>,
    files: std::collections::HashMap<ArchiveChunkKind, File>,
}

impl DirectoryArchiver {
    pub fn new() -> Self {
        Self::default()
    }

    fn file_for(&mut self, kind: ArchiveChunkKind) -> Result<&mut File> {
        let dir = self
            .dir
            .as_ref()
            .ok_or_else(|| TaufluxError::contract("DirectoryArchiver: append before open"))?
            .clone();
        if !self.files.contains_key(&kind) {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(kind.file_name()))
                .map_err(|e| TaufluxError::exhausted(format!("DirectoryArchiver: {e}")))?;
            self.files.insert(kind, file);
        }
        Ok(self.files.get_mut(&kind).unwrap())
    }
}

impl Archiver for DirectoryArchiver {
    fn open(&mut self, path: &Path) -> Result<()> {
        fs::create_dir(path)
            .map_err(|e| TaufluxError::contract(format!("DirectoryArchiver::open: {e}")))?;
        self.dir = Some(path.to_path_buf());
        Ok(())
    }

    fn append(&mut self, kind: ArchiveChunkKind, payload: &[u8]) -> Result<()> {
        let file = self.file_for(kind)?;
        file.write_all(&(payload.len() as u64).to_le_bytes())
            .and_then(|_| file.write_all(payload))
            .map_err(|e| TaufluxError::exhausted(format!("DirectoryArchiver::append: {e}")))
    }

    fn close(&mut self) -> Result<()> {
        for (_, mut file) in self.files.drain() {
            file.flush()
                .map_err(|e| TaufluxError::exhausted(format!("DirectoryArchiver::close: {e}")))?;
        }
        self.dir = None;
        Ok(())
    }
}

/// Runs an [`Archiver`] on its own thread so a raw-data write overlaps the run loop's
/// channel processing instead of blocking it. `append` only queues the write; errors are
/// recorded against the archiver's internal state and surfaced by the next [`Self::flush`]
/// or [`Self::close`], matching the run loop's fork-join shape (kick the write off, join
/// on it once the concurrent work that doesn't need it has finished).
pub struct ArchiveWorker {
    archiver: Arc<Mutex<Box<dyn Archiver>>>,
    worker: Worker,
    failed: Arc<Mutex<Option<String>>>,
}

impl ArchiveWorker {
    pub fn new(archiver: Box<dyn Archiver>) -> Self {
        Self {
            archiver: Arc::new(Mutex::new(archiver)),
            worker: Worker::spawn(64),
            failed: Arc::new(Mutex::new(None)),
        }
    }

    pub fn open(&self, path: &Path) -> Result<()> {
        self.archiver.lock().unwrap().open(path)
    }

    /// Queues `payload` to be appended off the caller's thread. Never blocks; a write
    /// failure is stashed and only reported at the next [`Self::flush`]/[`Self::close`].
    pub fn append(&self, kind: ArchiveChunkKind, payload: Vec<u8>) -> Result<()> {
        let archiver = Arc::clone(&self.archiver);
        let failed = Arc::clone(&self.failed);
        self.worker.submit(move || {
            if let Err(e) = archiver.lock().unwrap().append(kind, &payload) {
                *failed.lock().unwrap() = Some(e.to_string());
            }
        })?;
        Ok(())
    }

    /// Blocks until every append queued so far has completed, then surfaces the first
    /// failure recorded since the last flush.
    pub fn flush(&self) -> Result<()> {
        let handle = self.worker.submit(|| ())?;
        handle.wait();
        match self.failed.lock().unwrap().take() {
            Some(msg) => Err(TaufluxError::exhausted(format!("archive write failed: {msg}"))),
            None => Ok(()),
        }
    }

    pub fn close(&self) -> Result<()> {
        self.flush()?;
        self.archiver.lock().unwrap().close()
    }
}

/// Reads back every length-prefixed chunk written for `kind` under `dir`. Provided for
/// round-trip tests; the orchestrator itself never reads its own archive back.
pub fn read_chunks(dir: &Path, kind: ArchiveChunkKind) -> Result<Vec<Vec<u8>>> {
    let path = dir.join(kind.file_name());
    let mut file = File::open(&path)
        .map_err(|e| TaufluxError::contract(format!("read_chunks: {e}")))?;
    let mut chunks = Vec::new();
    loop {
        let mut len_buf = [0u8; 8];
        match file.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(TaufluxError::exhausted(format!("read_chunks: {e}"))),
        }
        let len = u64::from_le_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        file.read_exact(&mut payload)
            .map_err(|e| TaufluxError::exhausted(format!("read_chunks: {e}")))?;
        chunks.push(payload);
    }
    Ok(chunks)
}
