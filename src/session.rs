//! Host session lifecycle.
//!
//! A [`Session`] owns one live host process with the source document open.
//! It is the only way the rest of the crate reaches the host, so there is never
//! more than one handle per source document.
//!
//! ```text
//! acquire ──► launch host ──► register module ──► hide window ──► open
//!                                                                   │
//!            ┌──────────── reacquire (close + open, same process) ◄─┤
//!            │   failed max_reopen_attempts times in a row          │
//!            └──► restart (quit, launch, open) ──► fatal on failure │
//!                                                                   ▼
//!                                   drop: close without saving, quit host
//! ```
//!
//! Selecting a range and saving it leaves the host's cursor and selection
//! state unreliable, so the batch driver reacquires the session between
//! extractions.

use crate::config::SessionOptions;
use crate::error::{Error, Result};
use crate::host::{AutomationHost, DocumentFormat, HostError, HostFactory};
use crate::position::Position;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// How a [`SessionManager::reacquire`] call recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reacquired {
    /// The document was reopened in the same host process
    Reopened {
        /// Reopen attempts used, including the successful one
        attempts: u32,
    },
    /// Reopening kept failing; a new host process was started
    Restarted,
}

/// One live host handle bound to one open source document.
pub struct Session {
    host: Option<Box<dyn AutomationHost>>,
    source_path: PathBuf,
    source_format: &'static str,
    open_flags: String,
    visible: bool,
    opens: u32,
    restarts: u32,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("source_path", &self.source_path)
            .field("visible", &self.visible)
            .field("opens", &self.opens)
            .field("restarts", &self.restarts)
            .field("live", &self.host.is_some())
            .finish()
    }
}

impl Session {
    /// Source document path.
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Whether the host window is shown.
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Number of times the document was opened in this session.
    pub fn open_count(&self) -> u32 {
        self.opens
    }

    /// Number of host restarts in this session.
    pub fn restart_count(&self) -> u32 {
        self.restarts
    }

    /// Host handle; fails once the session has been torn down.
    pub(crate) fn host_mut(&mut self) -> Result<&mut dyn AutomationHost> {
        match self.host.as_deref_mut() {
            Some(host) => Ok(host),
            None => Err(Error::Host(HostError::new("session has been released"))),
        }
    }

    /// Current cursor position.
    pub fn current_position(&mut self) -> Result<Position> {
        let value = self.host_mut()?.get_pos()?;
        value.to_position()
    }

    /// Position of the document start.
    pub fn doc_start(&mut self) -> Result<Position> {
        self.host_mut()?.move_doc_begin()?;
        self.current_position()
    }

    /// Position of the document end.
    pub fn doc_end(&mut self) -> Result<Position> {
        self.host_mut()?.move_doc_end()?;
        self.current_position()
    }

    /// Move the cursor to `pos`.
    pub fn move_to(&mut self, pos: Position) -> Result<()> {
        let verdict = self
            .host_mut()?
            .set_pos(pos.container, pos.block, pos.offset)
            .map_err(|e| Error::Selection(format!("cannot move cursor to {}: {}", pos, e)))?;
        if !verdict.truthy() {
            return Err(Error::Selection(format!("host rejected cursor move to {}", pos)));
        }
        Ok(())
    }

    /// Select `[start, end)`.
    pub fn select(&mut self, start: Position, end: Position) -> Result<()> {
        self.move_to(start)?;
        self.host_mut()?
            .begin_selection()
            .map_err(|e| Error::Selection(format!("cannot start selection at {}: {}", start, e)))?;
        let verdict = self
            .host_mut()?
            .extend_selection(end.container, end.block, end.offset)
            .map_err(|e| Error::Selection(format!("cannot extend selection to {}: {}", end, e)))?;
        if !verdict.truthy() {
            return Err(Error::Selection(format!("host rejected selection end {}", end)));
        }
        Ok(())
    }

    /// Save the current selection; returns the host's verdict.
    pub fn save_selection(&mut self, path: &Path, format: DocumentFormat, attributes: &str) -> Result<bool> {
        let value = self
            .host_mut()?
            .save_selection(path, format.tag(), attributes)
            .map_err(|e| Error::save(path, e))?;
        Ok(value.truthy())
    }

    /// Close the document and open it again in the same host process.
    pub fn reopen(&mut self) -> Result<()> {
        let path = self.source_path.clone();
        let format = self.source_format;
        let flags = self.open_flags.clone();
        let host = self.host_mut()?;
        if let Err(e) = host.close_document() {
            log::warn!("Closing {} before reopen failed: {}", path.display(), e);
        }
        let verdict = host.open(&path, format, &flags).map_err(|e| Error::open(&path, e))?;
        if !verdict.truthy() {
            return Err(Error::open(&path, "host reported failure"));
        }
        self.opens += 1;
        log::debug!("Reopened {} (open #{})", path.display(), self.opens);
        Ok(())
    }

    /// Close the document and quit the host. Also done on drop.
    pub fn release(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if let Some(mut host) = self.host.take() {
            if let Err(e) = host.close_document() {
                log::warn!("Closing {} failed: {}", self.source_path.display(), e);
            }
            if let Err(e) = host.quit() {
                log::warn!("Quitting host failed: {}", e);
            }
            log::debug!("Released session for {}", self.source_path.display());
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Creates sessions and recovers them when they go bad.
#[derive(Clone)]
pub struct SessionManager {
    factory: Arc<dyn HostFactory>,
    options: SessionOptions,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a manager launching hosts from `factory`.
    pub fn new(factory: Arc<dyn HostFactory>, options: SessionOptions) -> Self {
        Self { factory, options }
    }

    /// Session options in use.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Launch a host and open `path` in it.
    pub fn acquire(&self, path: impl AsRef<Path>) -> Result<Session> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::open(path, "file not found"));
        }
        let source_format = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse::<DocumentFormat>().ok())
            .map(|f| f.tag())
            .unwrap_or("");

        let host = self.launch_and_open(path, source_format)?;
        log::info!("Opened {}", path.display());
        Ok(Session {
            host: Some(host),
            source_path: path.to_path_buf(),
            source_format,
            open_flags: self.options.open_flags().to_flag_string(),
            visible: self.options.visible,
            opens: 1,
            restarts: 0,
        })
    }

    /// Run `f` with a session on `path`, releasing it on every exit path.
    pub fn with_session<T, F>(&self, path: impl AsRef<Path>, f: F) -> Result<T>
    where
        F: FnOnce(&mut Session) -> Result<T>,
    {
        let mut session = self.acquire(path)?;
        let result = f(&mut session);
        session.release();
        result
    }

    /// Reset the session's host state between extractions.
    ///
    /// Reopens the document in the same process, retrying up to
    /// `max_reopen_attempts` times; if every attempt fails the host is
    /// restarted. A failed restart is fatal.
    pub fn reacquire(&self, session: &mut Session) -> Result<Reacquired> {
        let attempts = self.options.max_reopen_attempts.max(1);
        for attempt in 1..=attempts {
            match session.reopen() {
                Ok(()) => return Ok(Reacquired::Reopened { attempts: attempt }),
                Err(e) => log::warn!("Reopen attempt {}/{} failed: {}", attempt, attempts, e),
            }
        }

        log::warn!(
            "Reopening {} failed {} times in a row, restarting host",
            session.source_path.display(),
            attempts
        );
        match self.restart(session) {
            Ok(()) => Ok(Reacquired::Restarted),
            Err(e) => Err(Error::Reacquire {
                path: session.source_path.clone(),
                attempts,
                reason: e.to_string(),
            }),
        }
    }

    /// Replace the session's host process with a new one.
    pub fn restart(&self, session: &mut Session) -> Result<()> {
        session.teardown();
        let host = self.launch_and_open(&session.source_path, session.source_format)?;
        session.host = Some(host);
        session.opens += 1;
        session.restarts += 1;
        log::info!("Restarted host for {}", session.source_path.display());
        Ok(())
    }

    fn launch_and_open(&self, path: &Path, format: &str) -> Result<Box<dyn AutomationHost>> {
        let mut host = self.factory.launch().map_err(|e| Error::Launch(e.to_string()))?;

        match self.configure_and_open(host.as_mut(), path, format) {
            Ok(()) => Ok(host),
            Err(e) => {
                if let Err(quit_err) = host.quit() {
                    log::warn!("Quitting host after failed open: {}", quit_err);
                }
                Err(e)
            },
        }
    }

    fn configure_and_open(&self, host: &mut dyn AutomationHost, path: &Path, format: &str) -> Result<()> {
        if let Some(module) = &self.options.security_module {
            match host.register_module(&module.kind, &module.name) {
                Ok(v) if v.truthy() => {},
                Ok(_) => log::warn!("Host declined module {}", module.name),
                Err(e) => log::warn!("Registering module {} failed: {}", module.name, e),
            }
        }
        host.set_visible(self.options.visible)
            .map_err(|e| Error::open(path, format!("cannot set window visibility: {}", e)))?;

        let flags = self.options.open_flags().to_flag_string();
        let verdict = host.open(path, format, &flags).map_err(|e| Error::open(path, e))?;
        if !verdict.truthy() {
            return Err(Error::open(path, "host reported failure"));
        }
        Ok(())
    }
}
