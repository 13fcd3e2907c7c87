//! In-process automation host.
//!
//! `MemoryHost` behaves like a document-processor process holding one open
//! document: a list of containers, each a list of paragraphs, plus a chain of
//! controls anchored in the body. Saving a selection writes the selected text
//! to disk, paragraphs joined by `\n`.
//!
//! Documents are read from disk on open, either as a JSON snapshot of
//! [`MemoryDocument`] (`.json`) or as marked text: one paragraph per line,
//! with [`MARKER_TOKEN`] standing for a marker anchored where the token sits.
//!
//! The host can misbehave on request through [`Faults`], reproducing the
//! failure modes seen with real automation hosts: selection state drifting
//! after a save, saves reporting success without writing, malformed anchors,
//! failing selections, failing opens and refused launches.

use super::{AnchorRecord, AutomationHost, ControlId, HostError, HostFactory, HostResult, HostValue};
use crate::error::{Error, Result};
use crate::position::Position;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Token marking a marker anchor in marked-text documents.
pub const MARKER_TOKEN: &str = "[^]";

/// Control kind assigned to markers read from marked text.
pub const DEFAULT_MARKER_KIND: &str = "en";

/// A list of paragraphs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryContainer {
    /// Paragraph texts, without paragraph breaks
    pub paragraphs: Vec<String>,
}

/// A control object in the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryControl {
    /// Control kind tag
    pub kind: String,
    /// Anchor position; `None` makes the anchor query fail
    pub anchor: Option<Position>,
}

/// Document content held by a [`MemoryHost`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryDocument {
    /// Containers; container 0 is the main body
    pub containers: Vec<MemoryContainer>,
    /// Control chain, in chain order
    #[serde(default)]
    pub controls: Vec<MemoryControl>,
}

impl MemoryDocument {
    /// Parse marked text: one paragraph per line, each `token` becomes a
    /// control of kind `kind` anchored at the token's character offset.
    pub fn from_marked_text(text: &str, token: &str, kind: &str) -> Self {
        let mut paragraphs = Vec::new();
        let mut controls = Vec::new();

        for (block, line) in text.lines().enumerate() {
            let mut clean = String::with_capacity(line.len());
            let mut rest = line;
            while let Some(idx) = rest.find(token) {
                clean.push_str(&rest[..idx]);
                let offset = clean.chars().count() as u32;
                controls.push(MemoryControl {
                    kind: kind.to_string(),
                    anchor: Some(Position::new(0, block as u32, offset)),
                });
                rest = &rest[idx + token.len()..];
            }
            clean.push_str(rest);
            paragraphs.push(clean);
        }

        Self {
            containers: vec![MemoryContainer { paragraphs }],
            controls,
        }
    }

    /// Load a document from disk: JSON snapshot for `.json`, marked text otherwise.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(Self::from_marked_text(&content, MARKER_TOKEN, DEFAULT_MARKER_KIND))
        }
    }

    /// First position of the body.
    pub fn start(&self) -> Position {
        Position::ORIGIN
    }

    /// Position after the last character of the last paragraph.
    pub fn end(&self) -> Position {
        for (c, container) in self.containers.iter().enumerate().rev() {
            if let Some(last) = container.paragraphs.last() {
                return Position::new(
                    c as u32,
                    (container.paragraphs.len() - 1) as u32,
                    last.chars().count() as u32,
                );
            }
        }
        Position::ORIGIN
    }

    /// Whether `pos` addresses an existing gap in the text.
    pub fn contains(&self, pos: Position) -> bool {
        if pos == Position::ORIGIN {
            return true;
        }
        self.containers
            .get(pos.container as usize)
            .and_then(|c| c.paragraphs.get(pos.block as usize))
            .is_some_and(|p| pos.offset as usize <= p.chars().count())
    }

    /// Text in `[start, end)`; paragraph breaks become `\n`.
    pub fn text_between(&self, start: Position, end: Position) -> String {
        let mut out = String::new();
        let last = self.end();
        for (c, container) in self.containers.iter().enumerate() {
            for (b, para) in container.paragraphs.iter().enumerate() {
                let mut offset = 0u32;
                for ch in para.chars() {
                    let pos = Position::new(c as u32, b as u32, offset);
                    if start <= pos && pos < end {
                        out.push(ch);
                    }
                    offset += 1;
                }
                let brk = Position::new(c as u32, b as u32, offset);
                if brk < last && start <= brk && brk < end {
                    out.push('\n');
                }
            }
        }
        out
    }
}

/// Misbehaviour to reproduce. Sequence numbers are 1-based and counted per factory.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Every launch fails
    pub refuse_launch: bool,
    /// Launch sequence numbers that fail
    pub failing_launches: BTreeSet<usize>,
    /// Open sequence numbers that fail
    pub failing_opens: BTreeSet<usize>,
    /// Chain ordinals (0-based) whose anchor query fails
    pub failing_anchors: BTreeSet<usize>,
    /// Save sequence numbers that report success without writing a file
    pub phantom_saves: BTreeSet<usize>,
    /// Save sequence numbers that report failure
    pub failing_saves: BTreeSet<usize>,
    /// Selection sequence numbers whose extend call fails
    pub failing_selections: BTreeSet<usize>,
    /// After a save, cursor moves fail until the document is reopened
    pub drift_after_save: bool,
    /// Last control links back to the head
    pub looping_chain: bool,
    /// Wrap results in an extra tuple layer
    pub tuple_results: bool,
}

/// Call counters shared by all hosts of one factory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostStats {
    /// Launch attempts
    pub launches: usize,
    /// Open attempts
    pub opens: usize,
    /// Documents closed
    pub closes: usize,
    /// Processes quit
    pub quits: usize,
    /// Save attempts
    pub saves: usize,
    /// Selection extend attempts
    pub selections: usize,
    /// Modules registered
    pub modules_registered: usize,
    /// Hosts currently alive
    pub live_hosts: usize,
    /// Highest number of simultaneously alive hosts
    pub peak_live_hosts: usize,
}

#[derive(Debug, Default)]
struct Shared {
    faults: Faults,
    stats: HostStats,
}

fn lock(shared: &Arc<Mutex<Shared>>) -> MutexGuard<'_, Shared> {
    // A panicking test thread must not hide the counters from the others
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Factory producing [`MemoryHost`] processes.
#[derive(Debug, Clone, Default)]
pub struct MemoryHostFactory {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryHostFactory {
    /// Factory with well-behaved hosts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory whose hosts misbehave as described by `faults`.
    pub fn with_faults(faults: Faults) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                faults,
                stats: HostStats::default(),
            })),
        }
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> HostStats {
        lock(&self.shared).stats.clone()
    }
}

impl HostFactory for MemoryHostFactory {
    fn launch(&self) -> HostResult<Box<dyn AutomationHost>> {
        let mut shared = lock(&self.shared);
        shared.stats.launches += 1;
        let seq = shared.stats.launches;
        if shared.faults.refuse_launch || shared.faults.failing_launches.contains(&seq) {
            return Err(HostError::new("automation server did not start"));
        }
        shared.stats.live_hosts += 1;
        shared.stats.peak_live_hosts = shared.stats.peak_live_hosts.max(shared.stats.live_hosts);
        drop(shared);
        log::debug!("Launched in-memory host #{}", seq);
        Ok(Box::new(MemoryHost::new(Arc::clone(&self.shared))))
    }
}

/// One in-memory host process.
#[derive(Debug)]
pub struct MemoryHost {
    shared: Arc<Mutex<Shared>>,
    document: Option<MemoryDocument>,
    path: Option<PathBuf>,
    cursor: Position,
    selection: Option<(Position, Position)>,
    drifted: bool,
    visible: bool,
    alive: bool,
}

impl MemoryHost {
    fn new(shared: Arc<Mutex<Shared>>) -> Self {
        Self {
            shared,
            document: None,
            path: None,
            cursor: Position::ORIGIN,
            selection: None,
            drifted: false,
            visible: true,
            alive: true,
        }
    }

    /// Whether the host window is visible.
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Path of the open document.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn faults(&self) -> Faults {
        lock(&self.shared).faults.clone()
    }

    fn wrap(&self, value: HostValue) -> HostValue {
        if self.faults().tuple_results {
            HostValue::Tuple(vec![value])
        } else {
            value
        }
    }

    fn ensure_alive(&self) -> HostResult<()> {
        if self.alive {
            Ok(())
        } else {
            Err(HostError::new("host process has exited"))
        }
    }

    fn document(&self) -> HostResult<&MemoryDocument> {
        self.ensure_alive()?;
        self.document
            .as_ref()
            .ok_or_else(|| HostError::new("no document is open"))
    }

    fn checked_position(&self, container: u32, block: u32, offset: u32) -> HostResult<Position> {
        let doc = self.document()?;
        if self.drifted && self.faults().drift_after_save {
            return Err(HostError::new("selection state is stale after save"));
        }
        let pos = Position::new(container, block, offset);
        if !doc.contains(pos) {
            return Err(HostError::new(format!("position {} is out of range", pos)));
        }
        Ok(pos)
    }

    fn control(&self, id: ControlId) -> HostResult<(usize, &MemoryControl)> {
        let doc = self.document()?;
        let ordinal = (id as usize)
            .checked_sub(1)
            .ok_or_else(|| HostError::new("invalid control id 0"))?;
        doc.controls
            .get(ordinal)
            .map(|c| (ordinal, c))
            .ok_or_else(|| HostError::new(format!("no control with id {}", id)))
    }
}

impl AutomationHost for MemoryHost {
    fn register_module(&mut self, kind: &str, name: &str) -> HostResult<HostValue> {
        self.ensure_alive()?;
        log::trace!("Registering module {} ({})", name, kind);
        lock(&self.shared).stats.modules_registered += 1;
        Ok(self.wrap(HostValue::Bool(true)))
    }

    fn set_visible(&mut self, visible: bool) -> HostResult<()> {
        self.ensure_alive()?;
        self.visible = visible;
        Ok(())
    }

    fn open(&mut self, path: &Path, _format: &str, flags: &str) -> HostResult<HostValue> {
        self.ensure_alive()?;
        let failing = {
            let mut shared = lock(&self.shared);
            shared.stats.opens += 1;
            shared.faults.failing_opens.contains(&shared.stats.opens)
        };
        if failing {
            return Err(HostError::new("host refused to open the document"));
        }
        log::trace!("Opening {} with flags '{}'", path.display(), flags);
        let document =
            MemoryDocument::load(path).map_err(|e| HostError::new(e.to_string()))?;
        self.document = Some(document);
        self.path = Some(path.to_path_buf());
        self.cursor = Position::ORIGIN;
        self.selection = None;
        self.drifted = false;
        Ok(self.wrap(HostValue::Bool(true)))
    }

    fn close_document(&mut self) -> HostResult<()> {
        self.ensure_alive()?;
        if self.document.take().is_some() {
            lock(&self.shared).stats.closes += 1;
        }
        self.path = None;
        self.selection = None;
        Ok(())
    }

    fn quit(&mut self) -> HostResult<()> {
        self.ensure_alive()?;
        self.document = None;
        self.alive = false;
        let mut shared = lock(&self.shared);
        shared.stats.quits += 1;
        shared.stats.live_hosts = shared.stats.live_hosts.saturating_sub(1);
        Ok(())
    }

    fn move_doc_begin(&mut self) -> HostResult<()> {
        self.cursor = self.document()?.start();
        self.selection = None;
        Ok(())
    }

    fn move_doc_end(&mut self) -> HostResult<()> {
        self.cursor = self.document()?.end();
        self.selection = None;
        Ok(())
    }

    fn get_pos(&mut self) -> HostResult<HostValue> {
        self.document()?;
        Ok(self.wrap(HostValue::from(self.cursor)))
    }

    fn set_pos(&mut self, container: u32, block: u32, offset: u32) -> HostResult<HostValue> {
        let pos = self.checked_position(container, block, offset)?;
        self.cursor = pos;
        self.selection = None;
        Ok(self.wrap(HostValue::Bool(true)))
    }

    fn begin_selection(&mut self) -> HostResult<()> {
        self.document()?;
        self.selection = Some((self.cursor, self.cursor));
        Ok(())
    }

    fn extend_selection(&mut self, container: u32, block: u32, offset: u32) -> HostResult<HostValue> {
        let failing = {
            let mut shared = lock(&self.shared);
            shared.stats.selections += 1;
            shared.faults.failing_selections.contains(&shared.stats.selections)
        };
        if failing {
            return Err(HostError::new("selection call raised an exception"));
        }
        let pos = self.checked_position(container, block, offset)?;
        let anchor = match self.selection {
            Some((anchor, _)) => anchor,
            None => return Err(HostError::new("no selection in progress")),
        };
        self.selection = Some((anchor, pos));
        self.cursor = pos;
        Ok(self.wrap(HostValue::Bool(true)))
    }

    fn save_selection(&mut self, path: &Path, _format: &str, _attributes: &str) -> HostResult<HostValue> {
        let text = {
            let doc = self.document()?;
            let (anchor, active) = self
                .selection
                .ok_or_else(|| HostError::new("nothing is selected"))?;
            let (start, end) = if anchor <= active { (anchor, active) } else { (active, anchor) };
            doc.text_between(start, end)
        };

        let (seq, faults) = {
            let mut shared = lock(&self.shared);
            shared.stats.saves += 1;
            (shared.stats.saves, shared.faults.clone())
        };
        self.drifted = true;

        if faults.failing_saves.contains(&seq) {
            return Ok(self.wrap(HostValue::Bool(false)));
        }
        if !faults.phantom_saves.contains(&seq) {
            fs::write(path, text).map_err(|e| HostError::new(e.to_string()))?;
        }
        Ok(self.wrap(HostValue::Bool(true)))
    }

    fn head_control(&mut self) -> HostResult<Option<ControlId>> {
        let doc = self.document()?;
        Ok(if doc.controls.is_empty() { None } else { Some(1) })
    }

    fn control_kind(&mut self, id: ControlId) -> HostResult<String> {
        Ok(self.control(id)?.1.kind.clone())
    }

    fn next_control(&mut self, id: ControlId) -> HostResult<Option<ControlId>> {
        let len = self.document()?.controls.len() as u64;
        self.control(id)?;
        if id < len {
            Ok(Some(id + 1))
        } else if self.faults().looping_chain {
            Ok(Some(1))
        } else {
            Ok(None)
        }
    }

    fn anchor_position(&mut self, id: ControlId) -> HostResult<AnchorRecord> {
        let failing = self.faults().failing_anchors;
        let (ordinal, control) = self.control(id)?;
        if failing.contains(&ordinal) {
            return Err(HostError::new("anchor query raised an exception"));
        }
        control
            .anchor
            .map(AnchorRecord::for_position)
            .ok_or_else(|| HostError::new("control has no anchor"))
    }
}

impl Drop for MemoryHost {
    fn drop(&mut self) {
        if self.alive {
            // Handle dropped without quit: the process lingers as a stale instance
            log::warn!("In-memory host dropped without quitting");
            let mut shared = lock(&self.shared);
            shared.stats.live_hosts = shared.stats.live_hosts.saturating_sub(1);
        }
    }
}

/// Helper to write a [`MemoryDocument`] as a JSON snapshot.
pub fn write_document(doc: &MemoryDocument, path: impl AsRef<Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(doc)?;
    fs::write(path.as_ref(), json).map_err(Error::from)
}
