use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use error_printer::ErrorPrinter;
use tracing::{debug, warn};

use crate::errors::{Result, UploadError};

/// Name of the temporary file holding part `index` of a session.
pub fn chunk_file_name(session_id: &str, index: usize) -> String {
    format!("{session_id}_{index}.chunk")
}

/// One contiguous byte range of the source file, materialized on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFile {
    pub index: usize,
    pub path: PathBuf,
    /// Offset of the first byte within the source file.
    pub offset: u64,
    pub len: u64,
}

/// The temporary files of one session. Registered files are removed by
/// [`SessionArtifacts::cleanup`] or, at the latest, when this is dropped.
#[derive(Debug, Default)]
pub struct SessionArtifacts {
    paths: Vec<PathBuf>,
}

impl SessionArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Takes over the files registered with `other`; they are no longer deleted by it.
    pub fn adopt(&mut self, mut other: SessionArtifacts) {
        self.paths.append(&mut other.paths);
    }

    pub fn cleanup(&mut self) {
        for path in self.paths.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(?path, "removed temporary file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => warn!(?path, "failed to remove temporary file: {e}"),
            }
        }
    }
}

impl Drop for SessionArtifacts {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// The chunk files of one source file, in order. They are deleted along with `artifacts`
/// unless another [`SessionArtifacts`] adopts them.
#[derive(Debug)]
pub struct ChunkedFile {
    pub chunks: Vec<ChunkFile>,
    pub artifacts: SessionArtifacts,
}

/// Splits a file into fixed-size chunk files. This is blocking, sequential IO; run it
/// off the async executor.
#[derive(Debug, Clone)]
pub struct FileChunker {
    temp_dir: PathBuf,
    chunk_size: u64,
}

impl FileChunker {
    pub fn new(temp_dir: impl Into<PathBuf>, chunk_size: u64) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            chunk_size,
        }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Writes `ceil(total_size / chunk_size)` chunk files covering the first `total_size`
    /// bytes of `path` in order. On error, any chunk already written is removed.
    pub fn chunk(&self, session_id: &str, path: &Path, total_size: u64) -> Result<ChunkedFile> {
        if self.chunk_size == 0 {
            return Err(UploadError::InternalError(anyhow!("chunk size must be positive")));
        }

        self.ensure_temp_dir()?;

        let mut source = File::open(path)
            .map_err(|e| UploadError::FileError(format!("cannot open {path:?}: {e}")))
            .log_error("chunking failed")?;

        let n_chunks = total_size.div_ceil(self.chunk_size) as usize;
        let mut written = SessionArtifacts::new();
        let mut chunks = Vec::with_capacity(n_chunks);

        for index in 0..n_chunks {
            let offset = index as u64 * self.chunk_size;
            let len = self.chunk_size.min(total_size - offset);
            let chunk_path = self.temp_dir.join(chunk_file_name(session_id, index));

            written.register(&chunk_path);
            let copied = write_chunk(&mut source, &chunk_path, len)?;

            if copied != len {
                return Err(UploadError::FileError(format!(
                    "{path:?} ended after {} bytes, expected {total_size}",
                    offset + copied
                )));
            }

            chunks.push(ChunkFile {
                index,
                path: chunk_path,
                offset,
                len,
            });
        }

        let mut extra = [0u8; 1];
        if source.read(&mut extra).map(|n| n > 0).unwrap_or(false) {
            warn!(?path, total_size, "file grew after its size was read; extra bytes are not uploaded");
        }

        debug!(session_id, n_chunks, total_size, "file chunked");
        Ok(ChunkedFile {
            chunks,
            artifacts: written,
        })
    }

    fn ensure_temp_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.temp_dir).map_err(|e| {
            UploadError::UnsupportedEnvironment(format!("temporary directory {:?} unusable: {e}", self.temp_dir))
        })?;
        if !self.temp_dir.is_dir() {
            return Err(UploadError::UnsupportedEnvironment(format!("{:?} is not a directory", self.temp_dir)));
        }
        Ok(())
    }
}

fn write_chunk(source: &mut File, chunk_path: &Path, len: u64) -> Result<u64> {
    let file = File::create(chunk_path)
        .map_err(|e| UploadError::FileError(format!("cannot create {chunk_path:?}: {e}")))?;
    let mut writer = BufWriter::new(file);
    let copied = std::io::copy(&mut source.take(len), &mut writer)
        .map_err(|e| UploadError::FileError(format!("cannot write {chunk_path:?}: {e}")))?;
    writer
        .flush()
        .map_err(|e| UploadError::FileError(format!("cannot write {chunk_path:?}: {e}")))?;
    Ok(copied)
}
