//! Batch orchestration.
//!
//! Drives one source document from open to the last block:
//!
//! ```text
//! Idle ─► Opening ─► Enumerating ─┬─► Selecting ─► Saving ─► Reacquiring ─┐
//!   │          │             │    └──────────────── per block ◄───────────┘
//!   │          └─────────────┴──► Aborted                                 │
//!   └──────────────────────────────────────────────────────────► Completed
//! ```
//!
//! A failing block is recorded and the run moves on; only an unopenable
//! document, a failed enumeration or an exhausted reacquire escalation abort
//! the run. Either way the caller gets a [`BatchReport`] listing every block
//! attempted.

use crate::config::SplitConfig;
use crate::error::{Error, Result};
use crate::extract::{clear_target, BlockStatus, ExtractionResult, Extractor};
use crate::host::HostFactory;
use crate::markers::{enumerate_markers, MarkerScan};
use crate::naming::{source_stem, NamePattern};
use crate::position::Position;
use crate::segment::{segment, BlockPlan, PlannedBlock};
use crate::session::{Session, SessionManager};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    /// Not started
    Idle,
    /// Launching the host and opening the source
    Opening,
    /// Walking markers and planning blocks
    Enumerating,
    /// Selecting the range of a block
    Selecting {
        /// Block ordinal
        block: usize,
    },
    /// Saving the selection of a block
    Saving {
        /// Block ordinal
        block: usize,
    },
    /// Resetting the session before or after a block
    Reacquiring {
        /// Block ordinal
        block: usize,
    },
    /// Every planned block was attempted
    Completed,
    /// The run stopped early
    Aborted,
}

/// Terminal status of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RunStatus {
    /// Every planned block was attempted
    Completed,
    /// The run stopped early
    Aborted {
        /// What stopped it
        reason: String,
    },
}

/// Outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    /// Blocks written and verified
    pub succeeded: usize,
    /// Blocks that failed
    pub failed: usize,
    /// Empty blocks skipped
    pub skipped: usize,
}

impl Summary {
    /// Count outcomes in `results`.
    pub fn of(results: &[ExtractionResult]) -> Self {
        let mut summary = Self::default();
        for r in results {
            match r.status {
                BlockStatus::Extracted => summary.succeeded += 1,
                BlockStatus::Failed => summary.failed += 1,
                BlockStatus::Skipped => summary.skipped += 1,
            }
        }
        summary
    }

    /// Total blocks attempted.
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

/// Full account of one run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// Unique run id
    pub run_id: String,
    /// Source document
    pub source: PathBuf,
    /// Output directory
    pub output_dir: PathBuf,
    /// RFC 3339 start time
    pub started_at: String,
    /// RFC 3339 end time
    pub finished_at: String,
    /// Terminal status
    pub status: RunStatus,
    /// Markers retained by enumeration
    pub marker_count: usize,
    /// Blocks planned for extraction
    pub planned_blocks: usize,
    /// Per-block outcomes, in block order
    pub results: Vec<ExtractionResult>,
    /// Non-fatal problems (skipped markers, ...)
    pub warnings: Vec<String>,
    /// Outcome counts
    pub summary: Summary,
}

impl BatchReport {
    fn new(source: &Path, output_dir: &Path) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            source: source.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            started_at: chrono::Utc::now().to_rfc3339(),
            finished_at: String::new(),
            status: RunStatus::Completed,
            marker_count: 0,
            planned_blocks: 0,
            results: Vec::new(),
            warnings: Vec::new(),
            summary: Summary::default(),
        }
    }

    pub(crate) fn aborted(source: &Path, output_dir: &Path, reason: impl Into<String>) -> Self {
        let mut report = Self::new(source, output_dir);
        report.finish(RunStatus::Aborted {
            reason: reason.into(),
        });
        report
    }

    fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.summary = Summary::of(&self.results);
        self.finished_at = chrono::Utc::now().to_rfc3339();
    }

    /// Whether every planned block was attempted.
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Whether any block failed.
    pub fn has_failures(&self) -> bool {
        self.summary.failed > 0
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Markers and blocks found in a document, without extracting anything.
#[derive(Debug, Clone, Serialize)]
pub struct Survey {
    /// Marker walk result
    pub scan: MarkerScan,
    /// Document start
    pub doc_start: Position,
    /// Document end
    pub doc_end: Position,
    /// Blocks chosen for extraction
    pub plan: BlockPlan,
}

/// Callback invoked after each block with the result and the number of blocks to attempt.
pub type ProgressFn = Box<dyn FnMut(&ExtractionResult, usize) + Send>;

/// Splits one source document into per-block output files.
pub struct BatchOrchestrator {
    manager: SessionManager,
    config: SplitConfig,
    pattern: NamePattern,
    extractor: Extractor,
    only: Option<BTreeSet<usize>>,
    progress: Option<ProgressFn>,
    state: BatchState,
}

impl BatchOrchestrator {
    /// Create an orchestrator launching hosts from `factory`.
    pub fn new(factory: Arc<dyn HostFactory>, config: SplitConfig) -> Result<Self> {
        config.validate()?;
        let pattern = NamePattern::parse(&config.name_pattern)?;
        let extractor = Extractor::new(config.format).with_attributes(config.save_attributes.clone());
        Ok(Self {
            manager: SessionManager::new(factory, config.session.clone()),
            config,
            pattern,
            extractor,
            only: None,
            progress: None,
            state: BatchState::Idle,
        })
    }

    /// Only extract blocks with these 1-based ordinals.
    pub fn with_selection(mut self, ordinals: impl IntoIterator<Item = usize>) -> Self {
        self.only = Some(ordinals.into_iter().collect());
        self
    }

    /// Report each block outcome to `f` as it happens.
    pub fn with_progress(mut self, f: impl FnMut(&ExtractionResult, usize) + Send + 'static) -> Self {
        self.progress = Some(Box::new(f));
        self
    }

    /// Current state.
    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Configuration in use.
    pub fn config(&self) -> &SplitConfig {
        &self.config
    }

    fn transition(&mut self, next: BatchState) {
        log::debug!("{:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Enumerate markers and plan blocks for `source` without extracting.
    pub fn survey(&mut self, source: impl AsRef<Path>) -> Result<Survey> {
        let source = source.as_ref();
        self.transition(BatchState::Opening);
        let mut session = match self.manager.acquire(source) {
            Ok(s) => s,
            Err(e) => {
                self.transition(BatchState::Aborted);
                return Err(e);
            },
        };
        self.transition(BatchState::Enumerating);
        let survey = self.plan(&mut session);
        session.release();
        self.transition(if survey.is_ok() { BatchState::Completed } else { BatchState::Aborted });
        survey
    }

    fn plan(&self, session: &mut Session) -> Result<Survey> {
        let mut scan = enumerate_markers(session, &self.config.marker_kind)?;
        let doc_start = session.doc_start()?;
        let doc_end = session.doc_end()?;
        scan.retain_within(doc_start, doc_end);
        let positions = scan.positions_in_document_order();
        let blocks = segment(&positions, doc_start, doc_end);
        let plan = BlockPlan::new(&blocks, &self.config.plan_options());
        log::info!(
            "{} markers -> {} blocks, {} planned",
            positions.len(),
            blocks.len(),
            plan.len()
        );
        Ok(Survey {
            scan,
            doc_start,
            doc_end,
            plan,
        })
    }

    /// Split `source` into files under `output_dir`.
    pub fn run(&mut self, source: impl AsRef<Path>, output_dir: impl AsRef<Path>) -> BatchReport {
        let source = source.as_ref();
        let output_dir = output_dir.as_ref();
        let mut report = BatchReport::new(source, output_dir);
        log::info!("Splitting {} into {}", source.display(), output_dir.display());

        self.transition(BatchState::Opening);
        let mut session = match self.manager.acquire(source) {
            Ok(s) => s,
            Err(e) => return self.abort(report, None, e),
        };

        self.transition(BatchState::Enumerating);
        let survey = match self.plan(&mut session) {
            Ok(s) => s,
            Err(e) => return self.abort(report, Some(session), e),
        };
        report.marker_count = survey.scan.markers.len();
        report.warnings.extend(
            survey
                .scan
                .warnings
                .iter()
                .map(|w| format!("control #{} skipped: {}", w.ordinal, w.reason)),
        );

        let selected: Vec<PlannedBlock> = survey
            .plan
            .iter()
            .filter(|b| self.only.as_ref().map_or(true, |only| only.contains(&b.ordinal)))
            .copied()
            .collect();
        report.planned_blocks = selected.len();
        if let Some(only) = &self.only {
            let missing: Vec<String> = only
                .iter()
                .filter(|o| !selected.iter().any(|b| b.ordinal == **o))
                .map(|o| o.to_string())
                .collect();
            if !missing.is_empty() {
                report
                    .warnings
                    .push(format!("requested blocks not in document: {}", missing.join(", ")));
            }
        }

        if let Err(e) = fs::create_dir_all(output_dir) {
            return self.abort(report, Some(session), Error::from(e));
        }
        let ordinals: Vec<usize> = selected.iter().map(|b| b.ordinal).collect();
        let paths = match self.pattern.paths_for(
            output_dir,
            &ordinals,
            &source_stem(source),
            self.extractor.format().extension(),
        ) {
            Ok(p) => p,
            Err(e) => return self.abort(report, Some(session), e),
        };

        let total = selected.len();
        let mut dirty = false;
        for (planned, path) in selected.iter().zip(paths) {
            let result = if planned.block.is_empty() {
                log::info!("Block {} is empty at {}, skipped", planned.ordinal, planned.block.start);
                ExtractionResult::skipped(planned.ordinal, planned.block)
            } else {
                if dirty {
                    self.transition(BatchState::Reacquiring {
                        block: planned.ordinal,
                    });
                    if let Err(e) = self.manager.reacquire(&mut session) {
                        return self.abort(report, Some(session), e);
                    }
                }
                dirty = true;
                match self.extract_block(&mut session, planned, &path) {
                    Ok(result) => result,
                    Err(e) => return self.abort(report, Some(session), e),
                }
            };

            match result.status {
                BlockStatus::Extracted => log::info!(
                    "[{}/{}] block {} -> {} ({} bytes)",
                    report.results.len() + 1,
                    total,
                    result.block_index,
                    path.display(),
                    result.byte_size.unwrap_or(0)
                ),
                BlockStatus::Failed => log::warn!(
                    "[{}/{}] block {} failed: {}",
                    report.results.len() + 1,
                    total,
                    result.block_index,
                    result.error_message.as_deref().unwrap_or("unknown error")
                ),
                BlockStatus::Skipped => {},
            }
            if let Some(progress) = self.progress.as_mut() {
                progress(&result, total);
            }
            report.results.push(result);
        }

        session.release();
        self.transition(BatchState::Completed);
        report.finish(RunStatus::Completed);
        log::info!(
            "Finished {}: {} extracted, {} failed, {} skipped",
            source.display(),
            report.summary.succeeded,
            report.summary.failed,
            report.summary.skipped
        );
        report
    }

    /// Extract one non-empty block, retrying once after a reacquire on selection failure.
    ///
    /// Block-level failures come back as a failed result; only fatal errors are `Err`.
    fn extract_block(&mut self, session: &mut Session, planned: &PlannedBlock, path: &Path) -> Result<ExtractionResult> {
        let ordinal = planned.ordinal;
        let block = planned.block;

        if let Err(e) = clear_target(path) {
            return Ok(ExtractionResult::failed(ordinal, block, &e, 0));
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            self.transition(BatchState::Selecting { block: ordinal });
            match self.extractor.select_block(session, block) {
                Ok(()) => break,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) if attempts == 1 => {
                    log::warn!("Block {}: {}; reacquiring and retrying once", ordinal, e);
                    self.transition(BatchState::Reacquiring { block: ordinal });
                    self.manager.reacquire(session)?;
                },
                Err(e) => return Ok(ExtractionResult::failed(ordinal, block, &e, attempts)),
            }
        }

        self.transition(BatchState::Saving { block: ordinal });
        match self.extractor.save_block(session, path) {
            Ok(size) => Ok(ExtractionResult::extracted(ordinal, block, path.to_path_buf(), size, attempts)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => Ok(ExtractionResult::failed(ordinal, block, &e, attempts)),
        }
    }

    fn abort(&mut self, mut report: BatchReport, session: Option<Session>, error: Error) -> BatchReport {
        log::error!("Aborting {}: {}", report.source.display(), error);
        if let Some(session) = session {
            session.release();
        }
        self.transition(BatchState::Aborted);
        report.finish(RunStatus::Aborted {
            reason: error.to_string(),
        });
        report
    }
}

/// Split `source` into `output_dir` with `config`.
///
/// Fails only when the configuration itself is invalid; run-level problems
/// are reported through [`BatchReport::status`].
pub fn run_batch(
    factory: Arc<dyn HostFactory>,
    source: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    config: SplitConfig,
) -> Result<BatchReport> {
    let mut orchestrator = BatchOrchestrator::new(factory, config)?;
    Ok(orchestrator.run(source, output_dir))
}
