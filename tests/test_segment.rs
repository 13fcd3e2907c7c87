//! Integration tests for marker enumeration and segmentation.

use docsplit::batch::BatchOrchestrator;
use docsplit::host::memory::{MemoryHostFactory, MARKER_TOKEN};
use docsplit::host::DocumentFormat;
use docsplit::naming::NamePattern;
use docsplit::segment::{segment, Block, BlockPlan, PlanOptions};
use docsplit::{Position, SplitConfig};
use proptest::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn p(c: u32, b: u32, o: u32) -> Position {
    Position::new(c, b, o)
}

/// Sorted marker positions inside `[ORIGIN, (3,0,0))`
fn markers_strategy() -> impl Strategy<Value = Vec<Position>> {
    prop::collection::vec((0u32..3, 0u32..50, 0u32..100), 0..40).prop_map(|raw| {
        let mut positions: Vec<Position> = raw.into_iter().map(Position::from).collect();
        positions.sort();
        positions
    })
}

/// Marked text: lines of words with marker tokens sprinkled in
fn marked_text_strategy() -> impl Strategy<Value = String> {
    let piece = ("[a-z ]{0,8}", any::<bool>())
        .prop_map(|(text, marker)| if marker { format!("{}{}", text, MARKER_TOKEN) } else { text });
    let line = prop::collection::vec(piece, 1..5).prop_map(|pieces| pieces.concat());
    prop::collection::vec(line, 1..12).prop_map(|lines| lines.join("\n"))
}

mod scenario_tests {
    use super::*;

    #[test]
    fn test_three_markers_give_four_blocks() {
        let blocks = segment(&[p(0, 5, 0), p(0, 12, 0), p(0, 20, 0)], Position::ORIGIN, p(0, 25, 10));
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
    fn test_identical_markers_give_one_empty_block() {
        let blocks = segment(&[p(0, 8, 0), p(0, 8, 0)], Position::ORIGIN, p(0, 10, 0));
        let empty: Vec<_> = blocks.iter().filter(|b| b.is_empty()).collect();
        assert_eq!(empty, vec![&Block::new(p(0, 8, 0), p(0, 8, 0))]);
    }

    #[test]
    fn test_markers_from_marked_text() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("exam.txt");
        fs::write(&source, "Q1 stem\nchoices[^]\nQ2 stem[^]\nappendix").unwrap();

        let config = SplitConfig::new().with_format(DocumentFormat::Text);
        let mut orchestrator = BatchOrchestrator::new(Arc::new(MemoryHostFactory::new()), config).unwrap();
        let survey = orchestrator.survey(&source).unwrap();

        assert_eq!(survey.scan.positions(), vec![p(0, 1, 7), p(0, 2, 7)]);
        assert_eq!(survey.doc_end, p(0, 3, 8));
        assert_eq!(survey.plan.len(), 3);
        assert_eq!(survey.plan.blocks[2].block, Block::new(p(0, 2, 7), p(0, 3, 8)));
    }

    #[test]
    fn test_marker_kind_filters() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("exam.txt");
        fs::write(&source, "a[^]\nb[^]").unwrap();

        let config = SplitConfig::new().with_marker_kind("fn");
        let mut orchestrator = BatchOrchestrator::new(Arc::new(MemoryHostFactory::new()), config).unwrap();
        let survey = orchestrator.survey(&source).unwrap();
        assert!(survey.scan.markers.is_empty());
        assert_eq!(survey.scan.visited, 2);
        assert_eq!(survey.plan.len(), 1);
    }
}

mod proptest_tests {
    use super::*;

    proptest! {
        #[test]
        fn segmentation_is_complete_and_chained(markers in markers_strategy()) {
            let start = Position::ORIGIN;
            let end = p(3, 0, 0);
            let blocks = segment(&markers, start, end);

            prop_assert_eq!(blocks.len(), markers.len() + 1);
            prop_assert_eq!(blocks[0].start, start);
            prop_assert_eq!(blocks[blocks.len() - 1].end, end);
            for pair in blocks.windows(2) {
                prop_assert_eq!(pair[0].end, pair[1].start);
            }
            for (block, marker) in blocks.iter().zip(&markers) {
                prop_assert_eq!(block.end, *marker);
            }
        }

        #[test]
        fn zero_markers_give_one_block(c in 0u32..4, b in 0u32..100, o in 0u32..100) {
            let end = p(c, b, o);
            prop_assert_eq!(segment(&[], Position::ORIGIN, end), vec![Block::new(Position::ORIGIN, end)]);
        }

        #[test]
        fn plan_ordinals_are_dense(markers in markers_strategy(), leading in any::<bool>(), trailing in any::<bool>()) {
            let blocks = segment(&markers, Position::ORIGIN, p(3, 0, 0));
            let options = PlanOptions {
                include_leading_block: leading,
                include_trailing_block: trailing,
                ..Default::default()
            };
            let plan = BlockPlan::new(&blocks, &options);
            for (i, planned) in plan.iter().enumerate() {
                prop_assert_eq!(planned.ordinal, i + 1);
                prop_assert_eq!(planned.block, blocks[planned.segment_index]);
            }
        }

        #[test]
        fn output_names_are_distinct(count in 1usize..3000, width in 0usize..6) {
            let pattern = NamePattern::parse(&format!("{{stem}}-{{index:0{}}}.{{ext}}", width)).unwrap();
            let ordinals: Vec<usize> = (1..=count).collect();
            let paths = pattern.paths_for(Path::new("out"), &ordinals, "exam", "hwp").unwrap();
            let unique: HashSet<_> = paths.iter().collect();
            prop_assert_eq!(unique.len(), count);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn enumeration_and_segmentation_are_deterministic(text in marked_text_strategy()) {
            let dir = tempdir().unwrap();
            let source = dir.path().join("doc.txt");
            fs::write(&source, &text).unwrap();

            let factory = Arc::new(MemoryHostFactory::new());
            let mut orchestrator = BatchOrchestrator::new(factory, SplitConfig::default()).unwrap();
            let first = orchestrator.survey(&source).unwrap();
            let second = orchestrator.survey(&source).unwrap();

            prop_assert_eq!(first.scan.markers.len(), text.matches(MARKER_TOKEN).count());
            prop_assert_eq!(first.plan.len(), first.scan.markers.len() + 1);
            prop_assert_eq!(first.plan, second.plan);
        }
    }
}
