//! Marker enumeration.
//!
//! Markers are footnote/endnote-like controls embedded in the body. The host
//! exposes them as a singly linked chain starting at a head control; the walk
//! follows `next` links until the chain ends, keeping controls of the wanted
//! kind and reading each one's anchor position.
//!
//! A marker whose anchor cannot be read is skipped and reported as a
//! [`MarkerWarning`]; one malformed anchor must not cost the rest of the
//! document.

use crate::error::{Error, Result};
use crate::host::{AutomationHost, ControlId};
use crate::position::Position;
use crate::session::Session;
use serde::Serialize;
use std::collections::HashSet;

/// A marker retained by the walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Marker {
    /// Control kind tag
    pub kind: String,
    /// Where the marker sits in the body
    pub anchor: Position,
    /// Position of the control in the chain (0-based, all kinds counted)
    pub ordinal: usize,
}

/// A control that was skipped during the walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarkerWarning {
    /// Position of the control in the chain (0-based)
    pub ordinal: usize,
    /// Why it was skipped
    pub reason: String,
}

/// Outcome of one walk over the marker chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MarkerScan {
    /// Retained markers, in chain order
    pub markers: Vec<Marker>,
    /// Skipped controls
    pub warnings: Vec<MarkerWarning>,
    /// Number of controls visited, of any kind
    pub visited: usize,
}

impl MarkerScan {
    /// Anchor positions in chain order.
    pub fn positions(&self) -> Vec<Position> {
        self.markers.iter().map(|m| m.anchor).collect()
    }

    /// Anchor positions sorted into document order.
    ///
    /// The sort is stable, so markers sharing an anchor keep their chain order.
    pub fn positions_in_document_order(&self) -> Vec<Position> {
        let mut positions = self.positions();
        if positions.windows(2).any(|w| w[0] > w[1]) {
            log::warn!("Marker chain is not in document order; sorting {} anchors", positions.len());
            positions.sort();
        }
        positions
    }

    /// Move markers anchored outside `[start, end]` into the warnings.
    ///
    /// Such an anchor would produce an inverted block and take its neighbours
    /// down with it. Returns how many markers were dropped.
    pub fn retain_within(&mut self, start: Position, end: Position) -> usize {
        let before = self.markers.len();
        let (inside, outside): (Vec<Marker>, Vec<Marker>) = self
            .markers
            .drain(..)
            .partition(|m| m.anchor >= start && m.anchor <= end);
        self.markers = inside;

        for marker in outside {
            let err = Error::MarkerRead {
                ordinal: marker.ordinal,
                reason: format!("anchor {} outside body {}..{}", marker.anchor, start, end),
            };
            log::warn!("Skipping marker: {}", err);
            self.warnings.push(MarkerWarning {
                ordinal: marker.ordinal,
                reason: err.to_string(),
            });
        }
        self.warnings.sort_by_key(|w| w.ordinal);
        before - self.markers.len()
    }
}

/// Walk the marker chain of the session's document.
pub fn enumerate_markers(session: &mut Session, kind: &str) -> Result<MarkerScan> {
    scan_chain(session.host_mut()?, kind)
}

/// Walk the control chain of the document open in `host`.
pub fn scan_chain(host: &mut dyn AutomationHost, kind: &str) -> Result<MarkerScan> {
    let mut scan = MarkerScan::default();
    let mut seen: HashSet<ControlId> = HashSet::new();
    let mut current = host.head_control()?;

    while let Some(id) = current {
        if !seen.insert(id) {
            let err = Error::CircularChain(id);
            log::warn!("{}; stopping after {} controls", err, scan.visited);
            scan.warnings.push(MarkerWarning {
                ordinal: scan.visited,
                reason: err.to_string(),
            });
            break;
        }

        let ordinal = scan.visited;
        scan.visited += 1;

        match host.control_kind(id) {
            Ok(k) if k == kind => match read_anchor(host, id, ordinal) {
                Ok(anchor) => {
                    log::trace!("Marker #{} ({}) anchored at {}", ordinal, k, anchor);
                    scan.markers.push(Marker {
                        kind: k,
                        anchor,
                        ordinal,
                    });
                },
                Err(e) => {
                    log::warn!("Skipping marker: {}", e);
                    scan.warnings.push(MarkerWarning {
                        ordinal,
                        reason: e.to_string(),
                    });
                },
            },
            Ok(_) => {},
            Err(e) => {
                log::warn!("Skipping control #{}: kind query failed: {}", ordinal, e);
                scan.warnings.push(MarkerWarning {
                    ordinal,
                    reason: format!("kind query failed: {}", e),
                });
            },
        }

        current = host.next_control(id)?;
    }

    log::debug!(
        "Visited {} controls, kept {} '{}' markers, skipped {}",
        scan.visited,
        scan.markers.len(),
        kind,
        scan.warnings.len()
    );
    Ok(scan)
}

fn read_anchor(host: &mut dyn AutomationHost, id: ControlId, ordinal: usize) -> Result<Position> {
    let record = host.anchor_position(id).map_err(|e| Error::MarkerRead {
        ordinal,
        reason: e.to_string(),
    })?;
    record
        .to_position()
        .map_err(|reason| Error::MarkerRead { ordinal, reason })
}
