//! Block segmentation.
//!
//! Turns an ordered list of marker anchors into contiguous body ranges:
//!
//! ```text
//! doc start ──► m1 ──► m2 ──► ... ──► mN ──► doc end
//!  [block 0 )[block 1)      ...      [block N       )
//! ```
//!
//! N markers always give N + 1 blocks, and each block ends where the next one
//! starts. Which of those blocks become output documents is decided by a
//! [`BlockPlan`]: the leading and trailing blocks can be dropped, and empty
//! blocks are either kept as skipped entries or dropped before numbering.

use crate::position::Position;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A body range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Block {
    /// Inclusive start
    pub start: Position,
    /// Exclusive end
    pub end: Position,
}

impl Block {
    /// Create a block.
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Whether the block holds no text.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}-{})", self.start, self.end)
    }
}

/// Split `[doc_start, doc_end)` at each marker position.
///
/// Returns `markers.len() + 1` chained blocks. Identical consecutive markers
/// produce an empty block between them.
pub fn segment(markers: &[Position], doc_start: Position, doc_end: Position) -> Vec<Block> {
    let mut blocks = Vec::with_capacity(markers.len() + 1);
    let mut cursor = doc_start;
    for &m in markers {
        blocks.push(Block::new(cursor, m));
        cursor = m;
    }
    blocks.push(Block::new(cursor, doc_end));
    blocks
}

/// What to do with empty blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyBlockPolicy {
    /// Keep them in the plan; extraction records them as skipped
    #[default]
    Skip,
    /// Remove them before ordinals are assigned
    Drop,
}

/// Which segmented blocks become output documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanOptions {
    /// Keep the block before the first marker
    pub include_leading_block: bool,
    /// Keep the block after the last marker
    pub include_trailing_block: bool,
    /// Empty block handling
    pub empty_blocks: EmptyBlockPolicy,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            include_leading_block: true,
            include_trailing_block: true,
            empty_blocks: EmptyBlockPolicy::Skip,
        }
    }
}

/// A block chosen for extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlannedBlock {
    /// 1-based output ordinal
    pub ordinal: usize,
    /// Index in the segmented block list
    pub segment_index: usize,
    /// The range
    pub block: Block,
}

/// Ordered list of blocks to extract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BlockPlan {
    /// Planned blocks, in document order
    pub blocks: Vec<PlannedBlock>,
}

impl BlockPlan {
    /// Apply `options` to a segmented block list.
    pub fn new(segments: &[Block], options: &PlanOptions) -> Self {
        let last = segments.len().saturating_sub(1);
        // With no markers the single block is both leading and trailing; it is kept
        // unless both ends are excluded.
        let single = segments.len() == 1;

        let mut blocks = Vec::with_capacity(segments.len());
        for (index, block) in segments.iter().enumerate() {
            let keep = if single {
                options.include_leading_block || options.include_trailing_block
            } else if index == 0 {
                options.include_leading_block
            } else if index == last {
                options.include_trailing_block
            } else {
                true
            };
            if !keep {
                continue;
            }
            if block.is_empty() && options.empty_blocks == EmptyBlockPolicy::Drop {
                log::debug!("Dropping empty block {} at {}", index, block.start);
                continue;
            }
            blocks.push(PlannedBlock {
                ordinal: blocks.len() + 1,
                segment_index: index,
                block: *block,
            });
        }
        Self { blocks }
    }

    /// Number of planned blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether nothing is planned.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Iterate over planned blocks.
    pub fn iter(&self) -> impl Iterator<Item = &PlannedBlock> {
        self.blocks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(c: u32, b: u32, o: u32) -> Position {
        Position::new(c, b, o)
    }

    #[test]
    fn test_three_markers() {
        let markers = [p(0, 5, 0), p(0, 12, 0), p(0, 20, 0)];
        let blocks = segment(&markers, Position::ORIGIN, p(0, 25, 10));
        assert_eq!(
            blocks,
            vec![
                Block::new(p(0, 0, 0), p(0, 5, 0)),
                Block::new(p(0, 5, 0), p(0, 12, 0)),
                Block::new(p(0, 12, 0), p(0, 20, 0)),
                Block::new(p(0, 20, 0), p(0, 25, 10)),
            ]
        );
    }

    #[test]
    fn test_zero_markers() {
        let blocks = segment(&[], Position::ORIGIN, p(0, 3, 1));
        assert_eq!(blocks, vec![Block::new(Position::ORIGIN, p(0, 3, 1))]);
    }

    #[test]
    fn test_identical_markers_give_empty_block() {
        let blocks = segment(&[p(0, 8, 0), p(0, 8, 0)], Position::ORIGIN, p(0, 9, 0));
        assert_eq!(blocks.len(), 3);
        assert!(blocks[1].is_empty());
        assert_eq!(blocks[1], Block::new(p(0, 8, 0), p(0, 8, 0)));
    }

    #[test]
    fn test_plan_keeps_everything_by_default() {
        let blocks = segment(&[p(0, 8, 0), p(0, 8, 0)], Position::ORIGIN, p(0, 9, 0));
        let plan = BlockPlan::new(&blocks, &PlanOptions::default());
        assert_eq!(plan.len(), 3);
        let ordinals: Vec<_> = plan.iter().map(|b| b.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
    }

    #[test]
    fn test_plan_drops_empty_before_numbering() {
        let blocks = segment(&[p(0, 8, 0), p(0, 8, 0)], Position::ORIGIN, p(0, 9, 0));
        let options = PlanOptions {
            empty_blocks: EmptyBlockPolicy::Drop,
            ..Default::default()
        };
        let plan = BlockPlan::new(&blocks, &options);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.blocks[1].ordinal, 2);
        assert_eq!(plan.blocks[1].segment_index, 2);
    }

    #[test]
    fn test_plan_without_leading_block() {
        let blocks = segment(&[p(0, 2, 0), p(0, 4, 0)], Position::ORIGIN, p(0, 6, 0));
        let options = PlanOptions {
            include_leading_block: false,
            ..Default::default()
        };
        let plan = BlockPlan::new(&blocks, &options);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.blocks[0].block.start, p(0, 2, 0));
        assert_eq!(plan.blocks[0].ordinal, 1);
    }

    #[test]
    fn test_plan_without_trailing_block() {
        let blocks = segment(&[p(0, 2, 0), p(0, 4, 0)], Position::ORIGIN, p(0, 6, 0));
        let options = PlanOptions {
            include_trailing_block: false,
            ..Default::default()
        };
        let plan = BlockPlan::new(&blocks, &options);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.blocks[1].block.end, p(0, 4, 0));
    }

    #[test]
    fn test_plan_single_block() {
        let blocks = segment(&[], Position::ORIGIN, p(0, 6, 0));
        let drop_leading = PlanOptions {
            include_leading_block: false,
            ..Default::default()
        };
        assert_eq!(BlockPlan::new(&blocks, &drop_leading).len(), 1);

        let drop_both = PlanOptions {
            include_leading_block: false,
            include_trailing_block: false,
            ..Default::default()
        };
        assert!(BlockPlan::new(&blocks, &drop_both).is_empty());
    }
}
