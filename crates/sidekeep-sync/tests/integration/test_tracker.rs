//! Integration tests for the external change tracker
//!
//! Identities are inode numbers, so these tests only run on Unix.
#![cfg(unix)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use sidekeep_cache::{DatabasePool, SqliteIdentityRepository};
use sidekeep_core::ports::IIdentityRepository;
use sidekeep_sync::{ExternalChangeTracker, RawChange, TrackerOutcome};
use tokio_util::sync::CancellationToken;

use crate::common::{p, Handled, Harness, RecordingHandler};

struct Setup {
    h: Harness,
    repo: Arc<SqliteIdentityRepository>,
    handler: Arc<RecordingHandler>,
    tracker: Arc<ExternalChangeTracker>,
}

async fn setup(h: Harness) -> Setup {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    let repo = Arc::new(SqliteIdentityRepository::new(pool.pool().clone()));
    let handler = Arc::new(RecordingHandler::default());
    let tracker = Arc::new(ExternalChangeTracker::new(
        &h.config,
        h.store.clone(),
        h.rules.clone(),
        repo.clone(),
        handler.clone(),
    ));
    Setup {
        h,
        repo,
        handler,
        tracker,
    }
}

// ============================================================================
// Rebuild
// ============================================================================

#[tokio::test]
async fn test_rebuild_registers_visible_files_and_persists() {
    let h = Harness::new();
    h.write("a.png", "x");
    h.write("Docs/b.pdf.side.md", "notes");
    h.write(".obsidian/workspace.json", "{}");
    let s = setup(h).await;

    let stats = s.tracker.rebuild().await.unwrap();

    assert_eq!(stats.added, 2);
    assert_eq!(stats.kept, 0);
    assert_eq!(s.tracker.tracked(), 2);
    assert!(s.tracker.identity_of(&p("a.png")).is_some());

    let persisted = s.repo.load_all().await.unwrap();
    assert_eq!(persisted.len(), 2);
    assert!(persisted.contains_key(&s.h.abs("a.png")));

    let again = s.tracker.rebuild().await.unwrap();
    assert_eq!(again.kept, 2);
    assert_eq!(again.added, 0);
}

#[tokio::test]
async fn test_rebuild_counts_removed_entries() {
    let h = Harness::new();
    h.write("a.png", "x");
    h.write("b.png", "x");
    let s = setup(h).await;
    s.tracker.rebuild().await.unwrap();

    s.h.rm("b.png");
    let stats = s.tracker.rebuild().await.unwrap();

    assert_eq!(stats.kept, 1);
    assert_eq!(stats.removed, 1);
    assert_eq!(s.repo.load_all().await.unwrap().len(), 1);
}

// ============================================================================
// Correlation
// ============================================================================

#[tokio::test]
async fn test_unlink_then_add_becomes_one_rename() {
    let h = Harness::new();
    h.write("a.png", "x");
    let s = setup(h).await;
    s.tracker.rebuild().await.unwrap();
    let identity = s.tracker.identity_of(&p("a.png"));

    s.h.mv("a.png", "Photos/b.png");
    let unlinked = s
        .tracker
        .handle_change(RawChange::Removed(p("a.png")))
        .await;
    let added = s
        .tracker
        .handle_change(RawChange::Added(p("Photos/b.png")))
        .await;

    assert_eq!(unlinked, TrackerOutcome::Pending);
    assert_eq!(
        added,
        TrackerOutcome::Renamed {
            from: p("a.png"),
            to: p("Photos/b.png"),
        }
    );
    assert_eq!(
        s.handler.events(),
        vec![Handled::Renamed(p("a.png"), p("Photos/b.png"))]
    );
    assert_eq!(s.handler.created(), 0);
    assert_eq!(s.handler.deleted(), 0);
    assert_eq!(s.tracker.identity_of(&p("Photos/b.png")), identity);
    assert_eq!(s.tracker.pending_count(), 0);

    let persisted = s.repo.load_all().await.unwrap();
    assert!(persisted.contains_key(&s.h.abs("Photos/b.png")));
    assert!(!persisted.contains_key(&s.h.abs("a.png")));
}

#[tokio::test]
async fn test_add_before_unlink_is_still_a_rename() {
    let h = Harness::new();
    h.write("a.png", "x");
    let s = setup(h).await;
    s.tracker.rebuild().await.unwrap();

    s.h.mv("a.png", "b.png");
    let added = s.tracker.handle_change(RawChange::Added(p("b.png"))).await;
    let unlinked = s
        .tracker
        .handle_change(RawChange::Removed(p("a.png")))
        .await;

    assert!(matches!(added, TrackerOutcome::Renamed { .. }));
    assert_eq!(unlinked, TrackerOutcome::Ignored);
    assert_eq!(s.handler.renamed(), 1);
    assert_eq!(s.handler.deleted(), 0);
}

#[tokio::test]
async fn test_unmatched_unlink_is_delivered_as_delete() {
    let h = Harness::new();
    h.write("a.png", "x");
    let s = setup(h).await;
    s.tracker.rebuild().await.unwrap();

    s.h.rm("a.png");
    s.tracker
        .handle_change(RawChange::Removed(p("a.png")))
        .await;

    assert_eq!(s.tracker.sweep(Instant::now()).await, 0);
    assert_eq!(s.handler.deleted(), 0);

    let delivered = s
        .tracker
        .sweep(Instant::now() + Duration::from_secs(5))
        .await;
    assert_eq!(delivered, 1);
    assert_eq!(s.handler.events(), vec![Handled::Deleted(p("a.png"))]);
    assert_eq!(s.handler.sweeps(), 2);
}

#[tokio::test]
async fn test_new_file_is_registered_and_forwarded() {
    let h = Harness::new();
    let s = setup(h).await;
    s.tracker.rebuild().await.unwrap();

    s.h.write("c.png", "x");
    let outcome = s.tracker.handle_change(RawChange::Added(p("c.png"))).await;
    let repeat = s.tracker.handle_change(RawChange::Added(p("c.png"))).await;

    assert_eq!(outcome, TrackerOutcome::Registered);
    assert_eq!(repeat, TrackerOutcome::Ignored);
    assert_eq!(s.handler.events(), vec![Handled::Created(p("c.png"))]);
}

#[tokio::test]
async fn test_creates_not_forwarded_when_disabled() {
    let h = Harness::with_config(|b| b.forward_creates(false));
    let s = setup(h).await;

    s.h.write("c.png", "x");
    let outcome = s.tracker.handle_change(RawChange::Added(p("c.png"))).await;

    assert_eq!(outcome, TrackerOutcome::Registered);
    assert!(s.handler.events().is_empty());
}

#[tokio::test]
async fn test_hidden_and_denied_paths_are_ignored() {
    let h = Harness::with_config(|b| b.deny_folder("Private"));
    h.write(".obsidian/cache.png", "x");
    h.write("Private/secret.png", "x");
    let s = setup(h).await;

    let hidden = s
        .tracker
        .handle_change(RawChange::Added(p(".obsidian/cache.png")))
        .await;
    let denied = s
        .tracker
        .handle_change(RawChange::Added(p("Private/secret.png")))
        .await;

    assert_eq!(hidden, TrackerOutcome::Ignored);
    assert_eq!(denied, TrackerOutcome::Ignored);
    assert_eq!(s.tracker.tracked(), 0);
}

#[tokio::test]
async fn test_folder_move_becomes_one_folder_rename() {
    let h = Harness::new();
    h.write("Trips/a.png", "x");
    h.write("Trips/a.png.side.md", "notes");
    let s = setup(h).await;
    s.tracker.rebuild().await.unwrap();

    s.h.mv("Trips", "Holidays");
    let unlinked = s.tracker.handle_change(RawChange::Removed(p("Trips"))).await;
    let added = s
        .tracker
        .handle_change(RawChange::Added(p("Holidays")))
        .await;

    assert_eq!(unlinked, TrackerOutcome::Pending);
    assert_eq!(
        added,
        TrackerOutcome::Renamed {
            from: p("Trips"),
            to: p("Holidays"),
        }
    );
    assert_eq!(
        s.handler.events(),
        vec![Handled::Renamed(p("Trips"), p("Holidays"))]
    );
    assert!(s.tracker.identity_of(&p("Holidays/a.png")).is_some());
    assert_eq!(s.tracker.pending_count(), 0);
}

#[tokio::test]
async fn test_folder_moved_in_from_outside_registers_its_files() {
    let h = Harness::new();
    h.write(".staging/Import/a.png", "x");
    h.write(".staging/Import/.cache/skip.png", "x");
    let s = setup(h).await;
    s.tracker.rebuild().await.unwrap();
    assert_eq!(s.tracker.tracked(), 0);

    s.h.mv(".staging/Import", "Import");
    let added = s.tracker.handle_change(RawChange::Added(p("Import"))).await;

    assert_eq!(added, TrackerOutcome::FolderRegistered { files: 1 });
    assert!(s.tracker.identity_of(&p("Import/a.png")).is_some());
    assert!(s.tracker.identity_of(&p("Import/.cache/skip.png")).is_none());
    assert_eq!(s.handler.events(), vec![Handled::Created(p("Import/a.png"))]);
    assert!(s
        .repo
        .load_all()
        .await
        .unwrap()
        .contains_key(&s.h.abs("Import/a.png")));

    s.h.mv("Import/a.png", "Import/b.png");
    let unlinked = s
        .tracker
        .handle_change(RawChange::Removed(p("Import/a.png")))
        .await;
    let renamed = s
        .tracker
        .handle_change(RawChange::Added(p("Import/b.png")))
        .await;

    assert_eq!(unlinked, TrackerOutcome::Pending);
    assert_eq!(
        renamed,
        TrackerOutcome::Renamed {
            from: p("Import/a.png"),
            to: p("Import/b.png"),
        }
    );
    assert_eq!(s.handler.renamed(), 1);
    assert_eq!(s.handler.created(), 1);
}

#[tokio::test]
async fn test_added_folder_registers_without_forwarding_when_disabled() {
    let h = Harness::with_config(|b| b.forward_creates(false));
    h.write(".staging/Import/a.png", "x");
    let s = setup(h).await;

    s.h.mv(".staging/Import", "Import");
    let added = s.tracker.handle_change(RawChange::Added(p("Import"))).await;

    assert_eq!(added, TrackerOutcome::FolderRegistered { files: 1 });
    assert!(s.handler.events().is_empty());
    assert_eq!(s.tracker.tracked(), 1);
}

#[tokio::test]
async fn test_empty_added_folder_is_ignored() {
    let h = Harness::new();
    let s = setup(h).await;

    s.h.mkdir("Empty");
    let added = s.tracker.handle_change(RawChange::Added(p("Empty"))).await;

    assert_eq!(added, TrackerOutcome::Ignored);
    assert!(s.handler.events().is_empty());
}

// ============================================================================
// Event loop
// ============================================================================

#[tokio::test]
async fn test_run_loop_processes_changes_until_cancelled() {
    let h = Harness::new();
    h.write("a.png", "x");
    let s = setup(h).await;
    s.tracker.rebuild().await.unwrap();

    let (tx, rx) = tokio::sync::mpsc::channel(16);
    let cancel = CancellationToken::new();
    let tracker = s.tracker.clone();
    let loop_cancel = cancel.clone();
    let task = tokio::spawn(async move { tracker.run(rx, loop_cancel).await });

    s.h.mv("a.png", "b.png");
    tx.send(RawChange::Removed(p("a.png"))).await.unwrap();
    tx.send(RawChange::Added(p("b.png"))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("tracker did not stop")
        .unwrap();

    assert_eq!(s.handler.renamed(), 1);
    assert_eq!(s.handler.deleted(), 0);
}
