//! Integration tests for the startup revalidation scan

use std::sync::Arc;

use sidekeep_core::domain::{DerivativeKind, OrphanReason};
use sidekeep_sync::RevalidationScanner;

use crate::common::{p, Harness, ScriptedConfirmation};

fn scanner(h: &Harness, confirmation: Arc<ScriptedConfirmation>) -> RevalidationScanner {
    RevalidationScanner::new(
        &h.config,
        h.store.clone(),
        h.rules.clone(),
        h.index.clone(),
        h.notifier.clone(),
        confirmation,
    )
}

#[tokio::test]
async fn test_creates_missing_sidecars_only() {
    let h = Harness::new();
    h.write("a.png", "x");
    h.write("Docs/b.pdf", "x");
    h.write("Docs/b.pdf.side.md", "keep me");
    h.write("notes.txt", "x");
    let confirmation = Arc::new(ScriptedConfirmation::decline_all());

    let report = scanner(&h, confirmation.clone()).run().await.unwrap();

    assert_eq!(report.created, vec![p("a.png.side.md")]);
    assert_eq!(h.read("Docs/b.pdf.side.md"), "keep me");
    assert!(!h.exists("notes.txt.side.md"));
    assert!(report.orphans.is_empty());
    assert!(confirmation.batches().is_empty());
    assert!(h.index.read().await.contains(&p("Docs/b.pdf.side.md")));
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let h = Harness::new();
    h.write("a.png", "x");
    h.write("b.png", "x");
    h.write("gone.png.side.md", "orphan");
    let confirmation = Arc::new(ScriptedConfirmation::approve_all());
    let scanner = scanner(&h, confirmation.clone());

    let first = scanner.run().await.unwrap();
    assert_eq!(first.created.len(), 2);
    assert_eq!(first.deleted, vec![p("gone.png.side.md")]);

    let second = scanner.run().await.unwrap();
    assert!(second.is_clean());
    assert!(second.orphans.is_empty());
    assert_eq!(confirmation.batches().len(), 1);
}

#[tokio::test]
async fn test_orphan_with_missing_main_is_kept_when_declined() {
    let h = Harness::new();
    h.write("gone.png.side.md", "orphan");
    let confirmation = Arc::new(ScriptedConfirmation::decline_all());

    let report = scanner(&h, confirmation.clone()).run().await.unwrap();

    assert_eq!(report.orphans.len(), 1);
    assert_eq!(
        report.orphans.reason_for(&p("gone.png.side.md")),
        Some(OrphanReason::MainMissing)
    );
    assert!(report.deleted.is_empty());
    assert!(h.exists("gone.png.side.md"));

    let shown = confirmation.batches();
    assert_eq!(shown.len(), 1);
    assert_eq!(
        shown[0].reasons().get(&p("gone.png.side.md")).map(String::as_str),
        Some("main file missing")
    );
}

#[tokio::test]
async fn test_approved_orphans_go_to_trash() {
    let h = Harness::new();
    h.write("Photos/gone.png.side.md", "orphan");
    h.write("Photos/gone.png.preview.png", "thumb");
    let confirmation = Arc::new(ScriptedConfirmation::approve_all());

    let report = scanner(&h, confirmation).run().await.unwrap();

    assert_eq!(report.deleted.len(), 2);
    assert!(h.in_trash("Photos/gone.png.side.md"));
    assert!(h.in_trash("Photos/gone.png.preview.png"));
    assert!(h.index.read().await.is_empty());
    assert_eq!(h.notifier.count("sync"), 1);
}

#[tokio::test]
async fn test_orphan_reasons_are_classified() {
    let h = Harness::new();
    h.mkdir("Album.png");
    h.write("Album.png.side.md", "folder named like a main");
    h.write("doc.txt", "x");
    h.write("doc.txt.side.md", "extension no longer monitored");
    let confirmation = Arc::new(ScriptedConfirmation::decline_all());

    let report = scanner(&h, confirmation).run().await.unwrap();

    assert_eq!(
        report.orphans.reason_for(&p("Album.png.side.md")),
        Some(OrphanReason::MainIsFolder)
    );
    assert_eq!(
        report.orphans.reason_for(&p("doc.txt.side.md")),
        Some(OrphanReason::NoLongerMonitored)
    );
    assert_eq!(report.orphans.of_kind(DerivativeKind::Sidecar).len(), 2);
}

#[tokio::test]
async fn test_partial_approval_and_foreign_paths() {
    let h = Harness::new();
    h.write("keep.png", "x");
    h.write("keep.png.side.md", "not an orphan");
    h.write("one.png.side.md", "orphan");
    h.write("two.png.side.md", "orphan");
    let confirmation = Arc::new(ScriptedConfirmation::approve(&[
        "one.png.side.md",
        "keep.png.side.md",
    ]));

    let report = scanner(&h, confirmation).run().await.unwrap();

    assert_eq!(report.orphans.len(), 2);
    assert_eq!(report.deleted, vec![p("one.png.side.md")]);
    assert!(h.exists("keep.png.side.md"));
    assert!(h.exists("two.png.side.md"));
    assert!(!h.exists("one.png.side.md"));
}

#[tokio::test]
async fn test_auto_create_disabled_skips_phase_one() {
    let h = Harness::with_config(|b| b.auto_create_sidecar(false));
    h.write("a.png", "x");
    let confirmation = Arc::new(ScriptedConfirmation::decline_all());

    let report = scanner(&h, confirmation).run().await.unwrap();

    assert!(report.created.is_empty());
    assert!(!h.exists("a.png.side.md"));
}

#[tokio::test]
async fn test_stale_index_entries_are_dropped() {
    let h = Harness::new();
    h.index
        .write()
        .await
        .index_if_derivative(&p("ghost.png.side.md"), &h.rules);
    let confirmation = Arc::new(ScriptedConfirmation::approve_all());

    let report = scanner(&h, confirmation.clone()).run().await.unwrap();

    assert!(report.orphans.is_empty());
    assert!(!h.index.read().await.contains(&p("ghost.png.side.md")));
    assert!(confirmation.batches().is_empty());
}

#[tokio::test]
async fn test_index_sync_keeps_live_entries_and_adds_unindexed_ones() {
    let h = Harness::new();
    h.write("a.png", "x");
    h.write("a.png.side.md", "a notes");
    h.write("b.png", "x");
    h.write("b.png.side.md", "b notes");
    {
        let mut index = h.index.write().await;
        index.index_if_derivative(&p("a.png.side.md"), &h.rules);
        index.index_if_derivative(&p("ghost.png.side.md"), &h.rules);
    }
    let confirmation = Arc::new(ScriptedConfirmation::decline_all());

    let report = scanner(&h, confirmation).run().await.unwrap();

    let index = h.index.read().await;
    assert_eq!(index.main_for(&p("a.png.side.md")).cloned(), Some(p("a.png")));
    assert_eq!(index.main_for(&p("b.png.side.md")).cloned(), Some(p("b.png")));
    assert!(!index.contains(&p("ghost.png.side.md")));
    assert_eq!(index.len(), 2);
    assert!(report.created.is_empty());
    assert_eq!(h.read("b.png.side.md"), "b notes");
}
