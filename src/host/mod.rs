//! Automation host interface.
//!
//! The splitter never talks to a word processor directly. Everything it needs
//! from the host goes through [`AutomationHost`], and new host processes are
//! obtained from a [`HostFactory`]. Values that come back from the host in
//! loosely typed shapes are normalized here, at the boundary:
//!
//! ```text
//! host call ──► HostValue ──► Position / bool ──► core
//!               AnchorRecord ─┘
//! ```
//!
//! [`memory::MemoryHost`] is a complete in-process implementation used by the
//! CLI and the tests. A native automation backend plugs in by implementing the
//! two traits.

pub mod memory;

use crate::error::{Error, Result};
use crate::position::Position;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Failure reported by the host itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError(pub String);

impl HostError {
    /// Create a host error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for HostError {}

/// Result of a raw host call.
pub type HostResult<T> = std::result::Result<T, HostError>;

/// Opaque identifier of a control object in the host's control chain.
pub type ControlId = u64;

/// Loosely typed value as returned by host calls.
///
/// Some host calls return a bare value, others wrap it in a tuple. Use the
/// accessors instead of matching on the shape.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    /// No value
    Empty,
    /// Boolean verdict
    Bool(bool),
    /// Integer scalar
    Int(i64),
    /// Text
    Text(String),
    /// Tuple of values
    Tuple(Vec<HostValue>),
}

impl HostValue {
    /// Interpret the value as a success verdict.
    ///
    /// A tuple's verdict is its first element.
    pub fn truthy(&self) -> bool {
        match self {
            HostValue::Empty => false,
            HostValue::Bool(b) => *b,
            HostValue::Int(i) => *i != 0,
            HostValue::Text(s) => !s.is_empty(),
            HostValue::Tuple(items) => items.first().is_some_and(HostValue::truthy),
        }
    }

    /// Interpret the value as an integer, unwrapping single-element tuples.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            HostValue::Int(i) => Some(*i),
            HostValue::Bool(b) => Some(i64::from(*b)),
            HostValue::Text(s) => s.trim().parse().ok(),
            HostValue::Tuple(items) if items.len() == 1 => items[0].as_int(),
            _ => None,
        }
    }

    /// Interpret the value as a `(container, block, offset)` triple.
    ///
    /// Accepts a flat 3-tuple, or a tuple whose single element is one.
    pub fn to_position(&self) -> Result<Position> {
        match self {
            HostValue::Tuple(items) if items.len() == 3 => {
                let c = component(&items[0], "container")?;
                let b = component(&items[1], "block")?;
                let o = component(&items[2], "offset")?;
                Ok(Position::new(c, b, o))
            },
            HostValue::Tuple(items) if items.len() == 1 => items[0].to_position(),
            other => Err(Error::Host(HostError::new(format!(
                "expected a position triple, got {:?}",
                other
            )))),
        }
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

impl From<Position> for HostValue {
    fn from(p: Position) -> Self {
        HostValue::Tuple(vec![
            HostValue::Int(i64::from(p.container)),
            HostValue::Int(i64::from(p.block)),
            HostValue::Int(i64::from(p.offset)),
        ])
    }
}

fn component(value: &HostValue, name: &str) -> Result<u32> {
    value
        .as_int()
        .and_then(|i| u32::try_from(i).ok())
        .ok_or_else(|| Error::Host(HostError::new(format!("invalid {} component: {:?}", name, value))))
}

/// Key-value record returned by a marker's anchor-position query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnchorRecord {
    fields: IndexMap<String, HostValue>,
}

impl AnchorRecord {
    /// Key holding the container index.
    pub const CONTAINER_KEY: &'static str = "List";
    /// Key holding the paragraph index.
    pub const BLOCK_KEY: &'static str = "Para";
    /// Key holding the character offset.
    pub const OFFSET_KEY: &'static str = "Pos";

    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record holding the three anchor keys for `pos`.
    pub fn for_position(pos: Position) -> Self {
        Self::new()
            .with(Self::CONTAINER_KEY, HostValue::Int(i64::from(pos.container)))
            .with(Self::BLOCK_KEY, HostValue::Int(i64::from(pos.block)))
            .with(Self::OFFSET_KEY, HostValue::Int(i64::from(pos.offset)))
    }

    /// Add or replace a field.
    pub fn with(mut self, key: impl Into<String>, value: HostValue) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Look up a field.
    pub fn get(&self, key: &str) -> Option<&HostValue> {
        self.fields.get(key)
    }

    /// Convert into a typed position, rejecting missing or malformed keys.
    pub fn to_position(&self) -> std::result::Result<Position, String> {
        let field = |key: &str| -> std::result::Result<u32, String> {
            let value = self.get(key).ok_or_else(|| format!("missing key '{}'", key))?;
            value
                .as_int()
                .and_then(|i| u32::try_from(i).ok())
                .ok_or_else(|| format!("key '{}' is not a non-negative integer: {:?}", key, value))
        };
        Ok(Position::new(
            field(Self::CONTAINER_KEY)?,
            field(Self::BLOCK_KEY)?,
            field(Self::OFFSET_KEY)?,
        ))
    }
}

/// Native document format tag understood by the host's open/save calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocumentFormat {
    /// Native binary format
    #[default]
    Hwp,
    /// Native XML-based format
    Hwpx,
    /// HTML export
    Html,
    /// Plain text export
    Text,
    /// Rich text export
    Rtf,
}

impl DocumentFormat {
    /// Tag passed to the host.
    pub fn tag(&self) -> &'static str {
        match self {
            DocumentFormat::Hwp => "HWP",
            DocumentFormat::Hwpx => "HWPX",
            DocumentFormat::Html => "HTML",
            DocumentFormat::Text => "TEXT",
            DocumentFormat::Rtf => "RTF",
        }
    }

    /// Conventional file extension (without dot).
    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Hwp => "hwp",
            DocumentFormat::Hwpx => "hwpx",
            DocumentFormat::Html => "html",
            DocumentFormat::Text => "txt",
            DocumentFormat::Rtf => "rtf",
        }
    }
}

impl FromStr for DocumentFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "HWP" => Ok(DocumentFormat::Hwp),
            "HWPX" => Ok(DocumentFormat::Hwpx),
            "HTML" | "HTM" => Ok(DocumentFormat::Html),
            "TEXT" | "TXT" => Ok(DocumentFormat::Text),
            "RTF" => Ok(DocumentFormat::Rtf),
            _ => Err(Error::InvalidFormat(s.to_string())),
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Flags passed to the host's open call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    /// Open without modal prompts
    pub force_open: bool,
    /// Open read/write even when a stale lock file exists
    pub lock_override: bool,
    /// Skip password prompts
    pub suspend_password: bool,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self {
            force_open: true,
            lock_override: true,
            suspend_password: true,
        }
    }
}

impl OpenFlags {
    /// Render as the host's `key:value;key:value` flag string.
    pub fn to_flag_string(&self) -> String {
        let mut parts = vec![format!("forceopen:{}", self.force_open)];
        if self.lock_override {
            // The host checks for "lock:false" to ignore an existing lock file
            parts.push("lock:false".to_string());
        }
        parts.push(format!("suspendpassword:{}", self.suspend_password));
        parts.join(";")
    }
}

impl fmt::Display for OpenFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_flag_string())
    }
}

/// Live handle to one document-processor process.
///
/// The host keeps implicit cursor and selection state between calls; the
/// splitter only touches it through a [`crate::session::Session`].
pub trait AutomationHost: Send {
    /// Register a capability/safety module with the host.
    fn register_module(&mut self, kind: &str, name: &str) -> HostResult<HostValue>;

    /// Show or hide the host window.
    fn set_visible(&mut self, visible: bool) -> HostResult<()>;

    /// Open a document.
    fn open(&mut self, path: &Path, format: &str, flags: &str) -> HostResult<HostValue>;

    /// Close the open document, discarding changes.
    fn close_document(&mut self) -> HostResult<()>;

    /// Terminate the host process.
    fn quit(&mut self) -> HostResult<()>;

    /// Move the cursor to the start of the document.
    fn move_doc_begin(&mut self) -> HostResult<()>;

    /// Move the cursor to the end of the document.
    fn move_doc_end(&mut self) -> HostResult<()>;

    /// Current cursor position, usually a `(list, para, pos)` tuple.
    fn get_pos(&mut self) -> HostResult<HostValue>;

    /// Move the cursor.
    fn set_pos(&mut self, container: u32, block: u32, offset: u32) -> HostResult<HostValue>;

    /// Start a selection anchored at the cursor.
    fn begin_selection(&mut self) -> HostResult<()>;

    /// Move the active end of the selection.
    fn extend_selection(&mut self, container: u32, block: u32, offset: u32) -> HostResult<HostValue>;

    /// Save the current selection as a new document.
    fn save_selection(&mut self, path: &Path, format: &str, attributes: &str) -> HostResult<HostValue>;

    /// Head of the control chain, if any.
    fn head_control(&mut self) -> HostResult<Option<ControlId>>;

    /// Control kind tag (e.g. `"en"` for endnotes).
    fn control_kind(&mut self, id: ControlId) -> HostResult<String>;

    /// Next control in the chain.
    fn next_control(&mut self, id: ControlId) -> HostResult<Option<ControlId>>;

    /// Anchor position of a control.
    fn anchor_position(&mut self, id: ControlId) -> HostResult<AnchorRecord>;
}

/// Starts new host processes.
pub trait HostFactory: Send + Sync {
    /// Launch a fresh host process.
    fn launch(&self) -> HostResult<Box<dyn AutomationHost>>;
}
