//! Low-level I/O operations handling sequential writing.
//!
//! [`SeqWriter`] appends buffers and tracks the current offset so the container
//! writer can record where every object lands. [`AtomicOutput`] stages a file in
//! the destination directory and only moves it into place once fully written.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::Result;

/// A writer that appends data and tracks the current offset.
#[derive(Debug)]
pub struct SeqWriter<W: Write> {
    writer: W,
    current_offset: u64,
}

impl<W: Write> SeqWriter<W> {
    /// Wraps a writer positioned at offset 0.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            current_offset: 0,
        }
    }

    /// Writes a complete buffer.
    /// Returns the offset where the writing started.
    pub fn write_all(&mut self, buffer: &[u8]) -> Result<u64> {
        let start_offset = self.current_offset;
        self.writer.write_all(buffer)?;
        self.current_offset += buffer.len() as u64;
        Ok(start_offset)
    }

    /// Flushes the underlying writer.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Returns the current cursor position.
    pub fn current_offset(&self) -> u64 {
        self.current_offset
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// A temporary file next to `destination` that replaces it on [`AtomicOutput::commit`].
///
/// Dropping without committing deletes the temporary file, so a failed repack never
/// leaves partial output at the destination path.
#[derive(Debug)]
pub struct AtomicOutput {
    temp: NamedTempFile,
    destination: PathBuf,
}

impl AtomicOutput {
    /// Creates the staging file in the destination's directory.
    pub fn create(destination: &Path) -> Result<Self> {
        let dir = match destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let temp = NamedTempFile::new_in(dir)?;
        Ok(Self {
            temp,
            destination: destination.to_path_buf(),
        })
    }

    /// Buffered writer over the staging file.
    pub fn writer(&mut self) -> BufWriter<&mut File> {
        BufWriter::new(self.temp.as_file_mut())
    }

    /// Syncs the staging file and moves it to the destination.
    pub fn commit(self) -> Result<()> {
        self.temp.as_file().sync_all()?;
        self.temp.persist(&self.destination)?;
        Ok(())
    }
}
