//! Body coordinates inside an open document.
//!
//! A [`Position`] addresses the gap before character `offset` of paragraph
//! `block` in list `container`. Positions are ordered lexicographically and
//! carry no arithmetic: every range endpoint comes from the host (marker
//! anchors, document start/end), never from offset math.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A `(container, block, offset)` coordinate in document body text.
///
/// Only meaningful within the document session that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    /// List (container) index
    pub container: u32,
    /// Paragraph (block) index inside the container
    pub block: u32,
    /// Character offset inside the paragraph
    pub offset: u32,
}

impl Position {
    /// Start of the main body.
    pub const ORIGIN: Position = Position::new(0, 0, 0);

    /// Create a position from its three components.
    pub const fn new(container: u32, block: u32, offset: u32) -> Self {
        Self {
            container,
            block,
            offset,
        }
    }

    /// Components as a tuple, in comparison order.
    pub fn as_tuple(&self) -> (u32, u32, u32) {
        (self.container, self.block, self.offset)
    }
}

impl From<(u32, u32, u32)> for Position {
    fn from((container, block, offset): (u32, u32, u32)) -> Self {
        Self::new(container, block, offset)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.container, self.block, self.offset)
    }
}
