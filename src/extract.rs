//! Range selection and extraction.
//!
//! Extracting a block selects `[start, end)` in the live document and asks the
//! host to save the selection as a new document. The host's verdict is not
//! trusted on its own: success requires a non-empty file at the target path
//! afterwards.
//!
//! A save leaves the session in an unreliable state; callers reacquire the
//! session before extracting the next block.

use crate::error::{Error, Result};
use crate::host::DocumentFormat;
use crate::segment::Block;
use crate::session::Session;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Outcome category of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockStatus {
    /// Saved and verified on disk
    Extracted,
    /// Empty block, nothing saved
    Skipped,
    /// Selection or save failed
    Failed,
}

/// Per-block outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionResult {
    /// 1-based output ordinal
    pub block_index: usize,
    /// The range that was extracted
    pub block: Block,
    /// Outcome category
    pub status: BlockStatus,
    /// `true` for extracted and skipped blocks
    pub success: bool,
    /// Written file, if any
    pub output_path: Option<PathBuf>,
    /// Size of the written file
    pub byte_size: Option<u64>,
    /// Failure description
    pub error_message: Option<String>,
    /// Extra remark, e.g. why a block was skipped
    pub note: Option<String>,
    /// Extraction attempts made (0 for skipped blocks)
    pub attempts: u32,
}

impl ExtractionResult {
    /// A verified extraction.
    pub fn extracted(block_index: usize, block: Block, path: PathBuf, byte_size: u64, attempts: u32) -> Self {
        Self {
            block_index,
            block,
            status: BlockStatus::Extracted,
            success: true,
            output_path: Some(path),
            byte_size: Some(byte_size),
            error_message: None,
            note: None,
            attempts,
        }
    }

    /// An empty block that was not saved.
    pub fn skipped(block_index: usize, block: Block) -> Self {
        Self {
            block_index,
            block,
            status: BlockStatus::Skipped,
            success: true,
            output_path: None,
            byte_size: None,
            error_message: None,
            note: Some("empty block, skipped".to_string()),
            attempts: 0,
        }
    }

    /// A failed extraction.
    pub fn failed(block_index: usize, block: Block, error: &Error, attempts: u32) -> Self {
        Self {
            block_index,
            block,
            status: BlockStatus::Failed,
            success: false,
            output_path: None,
            byte_size: None,
            error_message: Some(error.to_string()),
            note: None,
            attempts,
        }
    }
}

/// Saves selected ranges as documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extractor {
    format: DocumentFormat,
    attributes: String,
}

impl Extractor {
    /// Extractor writing `format`.
    pub fn new(format: DocumentFormat) -> Self {
        Self {
            format,
            attributes: String::new(),
        }
    }

    /// Set the attribute string passed to the host's save call.
    pub fn with_attributes(mut self, attributes: impl Into<String>) -> Self {
        self.attributes = attributes.into();
        self
    }

    /// Output format.
    pub fn format(&self) -> DocumentFormat {
        self.format
    }

    /// Select `block` in the live document.
    pub fn select_block(&self, session: &mut Session, block: Block) -> Result<()> {
        session.select(block.start, block.end)
    }

    /// Save the current selection to `output_path` and verify the file.
    pub fn save_block(&self, session: &mut Session, output_path: &Path) -> Result<u64> {
        let saved = session.save_selection(output_path, self.format, &self.attributes)?;
        if !saved {
            return Err(Error::save(output_path, "host reported failure"));
        }
        verify_output(output_path)
    }
}

/// Remove a file left at `path` by an earlier run.
///
/// A leftover file would pass verification for a save that wrote nothing.
pub fn clear_target(path: &Path) -> Result<()> {
    if path.exists() {
        log::debug!("Removing stale {}", path.display());
        fs::remove_file(path).map_err(|e| Error::save(path, e))?;
    }
    Ok(())
}

/// Size of a freshly written output file; missing or empty files are save failures.
pub fn verify_output(path: &Path) -> Result<u64> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => Ok(meta.len()),
        Ok(_) => Err(Error::save(path, "file is empty after save")),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::save(
            path,
            "file not found after save although the host reported success",
        )),
        Err(e) => Err(Error::save(path, e)),
    }
}
