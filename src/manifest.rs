//! Multi-document batch jobs driven by a manifest.
//!
//! A manifest lists `(id, ordinal, source, db_key)` rows. Only `source` and
//! `ordinal` drive extraction; `id` and `db_key` are carried through to the
//! report so callers can match outputs back to their records.
//!
//! Two file forms are accepted:
//!
//! - a JSON array of row objects (`.json`)
//! - comma-separated text with a header line naming the columns
//!
//! Rows are grouped by resolved source path. Each document runs through its
//! own session lifecycle; with `parallel` set, distinct documents run on
//! separate threads. Blocks of one document are always extracted in order on
//! a single session.

use crate::batch::{BatchOrchestrator, BatchReport};
use crate::config::SplitConfig;
use crate::error::{Error, Result};
use crate::extract::BlockStatus;
use crate::host::HostFactory;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

/// One manifest row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Caller's identifier for the row
    pub id: String,
    /// 1-based block ordinal to extract
    pub ordinal: usize,
    /// Source document, relative to the base directory unless absolute
    pub source: String,
    /// External database key
    #[serde(default)]
    pub db_key: Option<String>,
}

/// A parsed manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    /// Rows in file order
    pub entries: Vec<ManifestEntry>,
}

/// Rows sharing one source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentJob {
    /// Resolved source path
    pub source: PathBuf,
    /// Ordinals to extract
    pub ordinals: BTreeSet<usize>,
    /// Rows referring to this document
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Load a manifest: JSON for `.json`, comma-separated text otherwise.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let manifest = if is_json {
            Self::from_json(&content)?
        } else {
            Self::from_csv(&content)?
        };
        log::info!("Loaded {} manifest rows from {}", manifest.entries.len(), path.display());
        Ok(manifest)
    }

    /// Parse a JSON array of rows.
    pub fn from_json(content: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(content).map_err(|e| Error::Manifest {
            line: e.line(),
            reason: e.to_string(),
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Parse comma-separated text whose first non-blank line names the columns.
    ///
    /// `id`, `ordinal` and `source` are required columns, `db_key` is optional.
    /// Fields may be wrapped in double quotes; quoted commas are not supported.
    pub fn from_csv(content: &str) -> Result<Self> {
        let mut lines = content
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim_start_matches('\u{feff}').trim()))
            .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'));

        let (header_line, header) = lines.next().ok_or_else(|| Error::Manifest {
            line: 1,
            reason: "manifest is empty".to_string(),
        })?;
        let columns: Vec<String> = split_fields(header, header_line)?
            .into_iter()
            .map(|c| c.to_ascii_lowercase())
            .collect();
        let column = |name: &str| columns.iter().position(|c| c == name);
        let missing = |name: &str| Error::Manifest {
            line: header_line,
            reason: format!("missing '{}' column", name),
        };
        let id_col = column("id").ok_or_else(|| missing("id"))?;
        let ordinal_col = column("ordinal").ok_or_else(|| missing("ordinal"))?;
        let source_col = column("source").ok_or_else(|| missing("source"))?;
        let key_col = column("db_key");

        let mut entries = Vec::new();
        for (line, text) in lines {
            let fields = split_fields(text, line)?;
            let field = |idx: usize| {
                fields.get(idx).cloned().ok_or_else(|| Error::Manifest {
                    line,
                    reason: format!("expected at least {} fields, found {}", idx + 1, fields.len()),
                })
            };
            let raw_ordinal = field(ordinal_col)?;
            let ordinal = raw_ordinal.parse::<usize>().map_err(|_| Error::Manifest {
                line,
                reason: format!("invalid ordinal '{}'", raw_ordinal),
            })?;
            entries.push(ManifestEntry {
                id: field(id_col)?,
                ordinal,
                source: field(source_col)?,
                db_key: key_col
                    .and_then(|idx| fields.get(idx).cloned())
                    .filter(|k| !k.is_empty()),
            });
        }

        let manifest = Self { entries };
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        for (i, entry) in self.entries.iter().enumerate() {
            let invalid = |reason: &str| Error::Manifest {
                line: i + 1,
                reason: format!("row '{}': {}", entry.id, reason),
            };
            if entry.ordinal == 0 {
                return Err(invalid("ordinals start at 1"));
            }
            if entry.source.trim().is_empty() {
                return Err(invalid("source is empty"));
            }
        }
        Ok(())
    }

    /// Group rows by source document, resolving relative sources against `base_dir`.
    ///
    /// Jobs come out in order of first appearance.
    pub fn jobs(&self, base_dir: &Path) -> Vec<DocumentJob> {
        let mut groups: IndexMap<PathBuf, DocumentJob> = IndexMap::new();
        for entry in &self.entries {
            let source = resolve(base_dir, &entry.source);
            let job = groups.entry(source.clone()).or_insert_with(|| DocumentJob {
                source,
                ordinals: BTreeSet::new(),
                entries: Vec::new(),
            });
            job.ordinals.insert(entry.ordinal);
            job.entries.push(entry.clone());
        }
        groups.into_values().collect()
    }
}

/// Split one comma-separated record.
///
/// A field wrapped in double quotes may contain commas; `""` inside it is a
/// literal quote.
fn split_fields(text: &str, line: usize) -> Result<Vec<String>> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    quoted = false;
                }
            },
            '"' if field.trim().is_empty() => {
                field.clear();
                quoted = true;
            },
            ',' if !quoted => fields.push(std::mem::take(&mut field).trim().to_string()),
            _ => field.push(c),
        }
    }

    if quoted {
        return Err(Error::Manifest {
            line,
            reason: "unterminated quoted field".to_string(),
        });
    }
    fields.push(field.trim().to_string());
    Ok(fields)
}

fn resolve(base_dir: &Path, source: &str) -> PathBuf {
    let path = Path::new(source.trim());
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Outcome of one manifest row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryOutcome {
    /// Row identifier
    pub id: String,
    /// Row database key
    pub db_key: Option<String>,
    /// Resolved source document
    pub source: PathBuf,
    /// Requested ordinal
    pub ordinal: usize,
    /// Block outcome; `None` when the block was never attempted
    pub status: Option<BlockStatus>,
    /// Written file
    pub output_path: Option<PathBuf>,
    /// Failure description
    pub error: Option<String>,
}

impl EntryOutcome {
    /// Whether the requested block was written.
    pub fn is_extracted(&self) -> bool {
        self.status == Some(BlockStatus::Extracted)
    }
}

/// Outcome of a manifest run.
#[derive(Debug, Clone, Serialize)]
pub struct ManifestReport {
    /// One report per source document, in job order
    pub documents: Vec<BatchReport>,
    /// One outcome per manifest row, in manifest order within each document
    pub entries: Vec<EntryOutcome>,
}

impl ManifestReport {
    /// Rows whose block was written.
    pub fn extracted(&self) -> usize {
        self.entries.iter().filter(|e| e.is_extracted()).count()
    }

    /// Rows whose block was not written.
    pub fn unresolved(&self) -> usize {
        self.entries.len() - self.extracted()
    }

    /// Documents whose run aborted.
    pub fn aborted(&self) -> usize {
        self.documents.iter().filter(|d| !d.is_completed()).count()
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Runs every document named in a manifest.
pub struct ManifestRunner {
    factory: Arc<dyn HostFactory>,
    config: SplitConfig,
    parallel: bool,
}

impl ManifestRunner {
    /// Create a runner splitting documents with `config`.
    pub fn new(factory: Arc<dyn HostFactory>, config: SplitConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            factory,
            config,
            parallel: false,
        })
    }

    /// Process distinct documents concurrently.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Extract the requested blocks of every document into `output_dir`.
    pub fn run(&self, manifest: &Manifest, base_dir: &Path, output_dir: &Path) -> ManifestReport {
        let jobs = manifest.jobs(base_dir);
        log::info!(
            "Running {} manifest rows across {} documents{}",
            manifest.entries.len(),
            jobs.len(),
            if self.parallel { " in parallel" } else { "" }
        );

        let documents: Vec<BatchReport> = if self.parallel && jobs.len() > 1 {
            thread::scope(|scope| {
                let handles: Vec<_> = jobs
                    .iter()
                    .map(|job| scope.spawn(move || self.run_job(job, output_dir)))
                    .collect();
                handles
                    .into_iter()
                    .zip(&jobs)
                    .map(|(handle, job)| {
                        handle.join().unwrap_or_else(|_| {
                            log::error!("Worker for {} panicked", job.source.display());
                            BatchReport::aborted(&job.source, output_dir, "worker thread panicked")
                        })
                    })
                    .collect()
            })
        } else {
            jobs.iter().map(|job| self.run_job(job, output_dir)).collect()
        };

        let entries = jobs
            .iter()
            .zip(&documents)
            .flat_map(|(job, report)| job.entries.iter().map(move |entry| outcome(job, report, entry)))
            .collect();
        ManifestReport { documents, entries }
    }

    fn run_job(&self, job: &DocumentJob, output_dir: &Path) -> BatchReport {
        match BatchOrchestrator::new(Arc::clone(&self.factory), self.config.clone()) {
            Ok(orchestrator) => orchestrator
                .with_selection(job.ordinals.iter().copied())
                .run(&job.source, output_dir),
            Err(e) => BatchReport::aborted(&job.source, output_dir, e.to_string()),
        }
    }
}

fn outcome(job: &DocumentJob, report: &BatchReport, entry: &ManifestEntry) -> EntryOutcome {
    let result = report.results.iter().find(|r| r.block_index == entry.ordinal);
    let error = match (result, &report.status) {
        (Some(r), _) => r.error_message.clone(),
        (None, crate::batch::RunStatus::Aborted { reason }) => Some(reason.clone()),
        (None, crate::batch::RunStatus::Completed) => Some(format!(
            "block {} not found; document has {} planned blocks",
            entry.ordinal,
            report.planned_blocks
        )),
    };
    EntryOutcome {
        id: entry.id.clone(),
        db_key: entry.db_key.clone(),
        source: job.source.clone(),
        ordinal: entry.ordinal,
        status: result.map(|r| r.status),
        output_path: result.and_then(|r| r.output_path.clone()),
        error,
    }
}
