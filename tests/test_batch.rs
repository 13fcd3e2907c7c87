//! Integration tests for batch extraction against the in-memory host.

use docsplit::batch::{run_batch, BatchOrchestrator, BatchState, RunStatus};
use docsplit::config::SessionOptions;
use docsplit::extract::BlockStatus;
use docsplit::host::memory::{write_document, Faults, MemoryContainer, MemoryControl, MemoryDocument, MemoryHostFactory};
use docsplit::host::DocumentFormat;
use docsplit::segment::EmptyBlockPolicy;
use docsplit::{Position, SplitConfig};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

const EXAM: &str = "alpha[^]\nbeta[^]\ngamma";

fn setup(text: &str) -> (TempDir, PathBuf, PathBuf) {
    let dir = tempdir().unwrap();
    let source = dir.path().join("exam.txt");
    fs::write(&source, text).unwrap();
    let out = dir.path().join("out");
    (dir, source, out)
}

fn config() -> SplitConfig {
    SplitConfig::new().with_format(DocumentFormat::Text)
}

fn faulty(faults: Faults) -> MemoryHostFactory {
    MemoryHostFactory::with_faults(faults)
}

fn set(items: &[usize]) -> std::collections::BTreeSet<usize> {
    items.iter().copied().collect()
}

fn read(out: &Path, name: &str) -> String {
    fs::read_to_string(out.join(name)).unwrap()
}

mod extraction_tests {
    use super::*;

    #[test]
    fn test_every_block_written() {
        let (_dir, source, out) = setup(EXAM);
        let factory = MemoryHostFactory::new();
        let report = run_batch(Arc::new(factory.clone()), &source, &out, config()).unwrap();

        assert!(report.is_completed());
        assert_eq!(report.marker_count, 2);
        assert_eq!(report.summary.succeeded, 3);
        assert_eq!(read(&out, "exam_001.txt"), "alpha");
        assert_eq!(read(&out, "exam_002.txt"), "\nbeta");
        assert_eq!(read(&out, "exam_003.txt"), "\ngamma");

        let stats = factory.stats();
        assert_eq!(stats.launches, 1);
        assert_eq!(stats.peak_live_hosts, 1);
        assert_eq!(stats.live_hosts, 0);
    }

    #[test]
    fn test_empty_block_skipped_not_saved() {
        let (_dir, source, out) = setup("alpha[^][^]\nbeta");
        let factory = MemoryHostFactory::new();
        let report = run_batch(Arc::new(factory.clone()), &source, &out, config()).unwrap();

        let empty = &report.results[1];
        assert_eq!(empty.status, BlockStatus::Skipped);
        assert!(empty.success);
        assert!(empty.output_path.is_none());
        assert!(!out.join("exam_002.txt").exists());
        assert_eq!(factory.stats().saves, 2);
        assert_eq!(report.summary.skipped, 1);
        assert!(!report.has_failures());
    }

    #[test]
    fn test_drop_empty_renumbers() {
        let (_dir, source, out) = setup("alpha[^][^]\nbeta");
        let cfg = config().with_empty_blocks(EmptyBlockPolicy::Drop);
        let report = run_batch(Arc::new(MemoryHostFactory::new()), &source, &out, cfg).unwrap();

        assert_eq!(report.results.len(), 2);
        assert_eq!(read(&out, "exam_002.txt"), "\nbeta");
    }

    #[test]
    fn test_phantom_save_reported_as_failure() {
        let (_dir, source, out) = setup(EXAM);
        let factory = faulty(Faults {
            phantom_saves: set(&[2]),
            ..Default::default()
        });
        let report = run_batch(Arc::new(factory), &source, &out, config()).unwrap();

        let phantom = &report.results[1];
        assert_eq!(phantom.status, BlockStatus::Failed);
        assert!(!phantom.success);
        assert!(phantom
            .error_message
            .as_deref()
            .unwrap()
            .contains("file not found after save"));
        assert!(report.is_completed());
        assert_eq!(report.results[2].status, BlockStatus::Extracted);
    }

    #[test]
    fn test_stale_output_does_not_pass_verification() {
        let (_dir, source, out) = setup(EXAM);
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("exam_002.txt"), "previous run").unwrap();
        let factory = faulty(Faults {
            phantom_saves: set(&[2]),
            ..Default::default()
        });
        let report = run_batch(Arc::new(factory), &source, &out, config()).unwrap();

        assert_eq!(report.results[1].status, BlockStatus::Failed);
        assert!(!out.join("exam_002.txt").exists());
    }

    #[test]
    fn test_drop_leading_block() {
        let (_dir, source, out) = setup("preamble\nQ1[^]\nQ2[^]");
        let cfg = config().with_leading_block(false);
        let report = run_batch(Arc::new(MemoryHostFactory::new()), &source, &out, cfg).unwrap();

        assert_eq!(report.results.len(), 2);
        assert_eq!(read(&out, "exam_001.txt"), "\nQ2");
        // trailing block is empty: marker sits at the very end
        assert_eq!(report.results[1].status, BlockStatus::Skipped);
    }

    #[test]
    fn test_drop_trailing_block() {
        let (_dir, source, out) = setup("Q1[^]\nQ2[^]\nanswer key");
        let cfg = config().with_trailing_block(false);
        let report = run_batch(Arc::new(MemoryHostFactory::new()), &source, &out, cfg).unwrap();

        assert_eq!(report.summary.succeeded, 2);
        assert_eq!(read(&out, "exam_001.txt"), "Q1");
        assert_eq!(read(&out, "exam_002.txt"), "\nQ2");
        assert!(!out.join("exam_003.txt").exists());
    }

    #[test]
    fn test_custom_name_pattern() {
        let (_dir, source, out) = setup(EXAM);
        let cfg = config().with_name_pattern("problem-{index}.{ext}");
        let report = run_batch(Arc::new(MemoryHostFactory::new()), &source, &out, cfg).unwrap();

        assert!(report.is_completed());
        assert_eq!(read(&out, "problem-3.txt"), "\ngamma");
    }

    #[test]
    fn test_selected_blocks_only() {
        let (_dir, source, out) = setup(EXAM);
        let factory = MemoryHostFactory::new();
        let mut orch = BatchOrchestrator::new(Arc::new(factory.clone()), config())
            .unwrap()
            .with_selection([3, 9]);
        let report = orch.run(&source, &out);

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].block_index, 3);
        assert_eq!(read(&out, "exam_003.txt"), "\ngamma");
        assert!(!out.join("exam_001.txt").exists());
        assert_eq!(factory.stats().saves, 1);
        assert!(report.warnings.iter().any(|w| w.contains('9')));
    }

    #[test]
    fn test_unreadable_anchor_is_a_warning() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("exam.json");
        let doc = MemoryDocument {
            containers: vec![MemoryContainer {
                paragraphs: vec!["one".into(), "two".into(), "three".into()],
            }],
            controls: vec![
                MemoryControl {
                    kind: "en".into(),
                    anchor: Some(Position::new(0, 0, 3)),
                },
                MemoryControl {
                    kind: "en".into(),
                    anchor: None,
                },
                MemoryControl {
                    kind: "en".into(),
                    anchor: Some(Position::new(0, 1, 3)),
                },
            ],
        };
        write_document(&doc, &source).unwrap();
        let out = dir.path().join("out");
        let report = run_batch(Arc::new(MemoryHostFactory::new()), &source, &out, config()).unwrap();

        assert!(report.is_completed());
        assert_eq!(report.marker_count, 2);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.summary.succeeded, 3);
    }

    #[test]
    fn test_anchor_past_body_end_does_not_cost_trailing_block() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("exam.json");
        let doc = MemoryDocument {
            containers: vec![MemoryContainer {
                paragraphs: vec!["alpha".into(), "beta".into()],
            }],
            controls: vec![
                MemoryControl {
                    kind: "en".into(),
                    anchor: Some(Position::new(0, 0, 5)),
                },
                MemoryControl {
                    kind: "en".into(),
                    anchor: Some(Position::new(0, 9, 0)),
                },
            ],
        };
        write_document(&doc, &source).unwrap();
        let out = dir.path().join("out");
        let report = run_batch(Arc::new(MemoryHostFactory::new()), &source, &out, config()).unwrap();

        assert!(report.is_completed());
        assert_eq!(report.marker_count, 1);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("outside body"));
        assert!(report.results.iter().all(|r| r.block.start <= r.block.end));
        assert_eq!(report.summary.succeeded, 2);
        assert_eq!(report.summary.failed, 0);
        assert_eq!(read(&out, "exam_001.txt"), "alpha");
        assert_eq!(read(&out, "exam_002.txt"), "\nbeta");
    }
}

mod recovery_tests {
    use super::*;

    #[test]
    fn test_drift_after_save_is_cleared_by_reacquire() {
        let (_dir, source, out) = setup(EXAM);
        let factory = faulty(Faults {
            drift_after_save: true,
            ..Default::default()
        });
        let report = run_batch(Arc::new(factory.clone()), &source, &out, config()).unwrap();

        assert_eq!(report.summary.succeeded, 3);
        assert_eq!(factory.stats().opens, 3);
    }

    #[test]
    fn test_selection_failure_retried_once() {
        let (_dir, source, out) = setup(EXAM);
        let factory = faulty(Faults {
            failing_selections: set(&[2]),
            ..Default::default()
        });
        let report = run_batch(Arc::new(factory), &source, &out, config()).unwrap();

        assert_eq!(report.summary.succeeded, 3);
        assert_eq!(report.results[1].attempts, 2);
        assert_eq!(report.results[0].attempts, 1);
    }

    #[test]
    fn test_persistent_selection_failure_isolated() {
        let (_dir, source, out) = setup(EXAM);
        let factory = faulty(Faults {
            failing_selections: set(&[2, 3]),
            ..Default::default()
        });
        let report = run_batch(Arc::new(factory), &source, &out, config()).unwrap();

        assert!(report.is_completed());
        assert_eq!(report.results[1].status, BlockStatus::Failed);
        assert_eq!(report.results[1].attempts, 2);
        assert_eq!(report.results[2].status, BlockStatus::Extracted);
        assert_eq!(read(&out, "exam_003.txt"), "\ngamma");
    }

    #[test]
    fn test_host_reported_save_failure_isolated() {
        let (_dir, source, out) = setup(EXAM);
        let factory = faulty(Faults {
            failing_saves: set(&[1]),
            tuple_results: true,
            ..Default::default()
        });
        let report = run_batch(Arc::new(factory), &source, &out, config()).unwrap();

        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.succeeded, 2);
        assert!(report.is_completed());
    }

    #[test]
    fn test_failed_reopens_escalate_to_restart() {
        let (_dir, source, out) = setup(EXAM);
        let factory = faulty(Faults {
            failing_opens: set(&[2, 3]),
            ..Default::default()
        });
        let report = run_batch(Arc::new(factory.clone()), &source, &out, config()).unwrap();

        assert_eq!(report.summary.succeeded, 3);
        let stats = factory.stats();
        assert_eq!(stats.launches, 2);
        assert_eq!(stats.peak_live_hosts, 1);
        assert_eq!(stats.live_hosts, 0);
    }

    #[test]
    fn test_failed_restart_aborts() {
        let (_dir, source, out) = setup(EXAM);
        let factory = faulty(Faults {
            failing_opens: set(&[2, 3, 4]),
            ..Default::default()
        });
        let mut orch = BatchOrchestrator::new(Arc::new(factory.clone()), config()).unwrap();
        let report = orch.run(&source, &out);

        assert_eq!(orch.state(), BatchState::Aborted);
        match &report.status {
            RunStatus::Aborted { reason } => assert!(reason.contains("reacquire")),
            other => panic!("expected abort, got {:?}", other),
        }
        assert_eq!(report.results.len(), 1);
        assert_eq!(read(&out, "exam_001.txt"), "alpha");
        assert_eq!(factory.stats().live_hosts, 0);
    }

    #[test]
    fn test_more_reopen_attempts_avoid_restart() {
        let (_dir, source, out) = setup(EXAM);
        let factory = faulty(Faults {
            failing_opens: set(&[2, 3]),
            ..Default::default()
        });
        let cfg = config().with_session(SessionOptions::default().with_max_reopen_attempts(3));
        let report = run_batch(Arc::new(factory.clone()), &source, &out, cfg).unwrap();

        assert_eq!(report.summary.succeeded, 3);
        assert_eq!(factory.stats().launches, 1);
    }

    #[test]
    fn test_unopenable_source_aborts_without_output() {
        let (_dir, source, out) = setup(EXAM);
        let factory = faulty(Faults {
            failing_opens: set(&[1]),
            ..Default::default()
        });
        let report = run_batch(Arc::new(factory.clone()), &source, &out, config()).unwrap();

        assert!(matches!(report.status, RunStatus::Aborted { .. }));
        assert!(report.results.is_empty());
        assert!(!out.exists());
        assert_eq!(factory.stats().live_hosts, 0);
    }

    #[test]
    fn test_refused_launch_aborts() {
        let (_dir, source, out) = setup(EXAM);
        let factory = faulty(Faults {
            refuse_launch: true,
            ..Default::default()
        });
        let report = run_batch(Arc::new(factory), &source, &out, config()).unwrap();
        assert!(!report.is_completed());
    }
}

mod report_tests {
    use super::*;

    #[test]
    fn test_report_json() {
        let (_dir, source, out) = setup("alpha[^][^]\nbeta");
        let report = run_batch(Arc::new(MemoryHostFactory::new()), &source, &out, config()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();

        assert_eq!(value["status"]["state"], "completed");
        assert_eq!(value["summary"]["succeeded"], 2);
        assert_eq!(value["summary"]["skipped"], 1);
        assert_eq!(value["results"][1]["status"], "skipped");
        assert_eq!(value["results"][0]["block"]["end"]["offset"], 5);
        assert_eq!(value["run_id"].as_str().unwrap().len(), 36);
        assert!(chrono::DateTime::parse_from_rfc3339(value["finished_at"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_distinct_run_ids() {
        let (_dir, source, out) = setup(EXAM);
        let factory = Arc::new(MemoryHostFactory::new());
        let first = run_batch(factory.clone(), &source, &out, config()).unwrap();
        let second = run_batch(factory, &source, &out, config()).unwrap();
        assert_ne!(first.run_id, second.run_id);
        assert!(second.is_completed());
    }
}
