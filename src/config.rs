//! Configuration for splitting runs.
//!
//! Settings can be built in code with the `with_*` methods or loaded from a
//! JSON file; missing keys fall back to the defaults below.

use crate::error::{Error, Result};
use crate::host::{DocumentFormat, OpenFlags};
use crate::naming::NamePattern;
use crate::segment::{EmptyBlockPolicy, PlanOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Module registered with the host right after launch.
///
/// Hosts that guard file access behind an approval dialog accept a module
/// that approves it instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityModule {
    /// Module kind as the host names it
    pub kind: String,
    /// Registered module name
    pub name: String,
}

/// How a host session is launched and the document opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Show the host window
    pub visible: bool,
    /// Open without modal prompts
    pub force_open: bool,
    /// Open read/write even if a stale lock file is present
    pub lock_override: bool,
    /// Skip password prompts
    pub suspend_password: bool,
    /// Module to register after launch
    pub security_module: Option<SecurityModule>,
    /// Consecutive failed reopens tolerated before restarting the host
    pub max_reopen_attempts: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            visible: false,
            force_open: true,
            lock_override: true,
            suspend_password: true,
            security_module: None,
            max_reopen_attempts: 2,
        }
    }
}

impl SessionOptions {
    /// Flags passed to the host's open call.
    pub fn open_flags(&self) -> OpenFlags {
        OpenFlags {
            force_open: self.force_open,
            lock_override: self.lock_override,
            suspend_password: self.suspend_password,
        }
    }

    /// Show or hide the host window.
    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    /// Register `module` after launch.
    pub fn with_security_module(mut self, kind: impl Into<String>, name: impl Into<String>) -> Self {
        self.security_module = Some(SecurityModule {
            kind: kind.into(),
            name: name.into(),
        });
        self
    }

    /// Set how many consecutive reopen failures are tolerated.
    pub fn with_max_reopen_attempts(mut self, attempts: u32) -> Self {
        self.max_reopen_attempts = attempts;
        self
    }
}

/// Settings for one splitting run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Control kind treated as a block terminator
    pub marker_kind: String,
    /// Output format
    pub format: DocumentFormat,
    /// Output file name template
    pub name_pattern: String,
    /// Keep the content before the first marker
    pub include_leading_block: bool,
    /// Keep the content after the last marker
    pub include_trailing_block: bool,
    /// Empty block handling
    pub empty_blocks: EmptyBlockPolicy,
    /// Attribute string passed to the host's save-selection call
    pub save_attributes: String,
    /// Host session settings
    pub session: SessionOptions,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            marker_kind: "en".to_string(),
            format: DocumentFormat::Hwp,
            name_pattern: NamePattern::DEFAULT.to_string(),
            include_leading_block: true,
            include_trailing_block: true,
            empty_blocks: EmptyBlockPolicy::Skip,
            save_attributes: String::new(),
            session: SessionOptions::default(),
        }
    }
}

impl SplitConfig {
    /// Create configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.marker_kind.trim().is_empty() {
            return Err(Error::Config("marker_kind must not be empty".to_string()));
        }
        NamePattern::parse(&self.name_pattern)?;
        Ok(())
    }

    /// Block selection options derived from this configuration.
    pub fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            include_leading_block: self.include_leading_block,
            include_trailing_block: self.include_trailing_block,
            empty_blocks: self.empty_blocks,
        }
    }

    /// Set the marker kind.
    pub fn with_marker_kind(mut self, kind: impl Into<String>) -> Self {
        self.marker_kind = kind.into();
        self
    }

    /// Set the output format.
    pub fn with_format(mut self, format: DocumentFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the output name template.
    pub fn with_name_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.name_pattern = pattern.into();
        self
    }

    /// Keep or drop the block before the first marker.
    pub fn with_leading_block(mut self, include: bool) -> Self {
        self.include_leading_block = include;
        self
    }

    /// Keep or drop the block after the last marker.
    pub fn with_trailing_block(mut self, include: bool) -> Self {
        self.include_trailing_block = include;
        self
    }

    /// Set the empty block policy.
    pub fn with_empty_blocks(mut self, policy: EmptyBlockPolicy) -> Self {
        self.empty_blocks = policy;
        self
    }

    /// Set the host session options.
    pub fn with_session(mut self, session: SessionOptions) -> Self {
        self.session = session;
        self
    }
}
