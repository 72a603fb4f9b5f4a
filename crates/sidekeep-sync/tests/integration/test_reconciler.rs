//! Integration tests for the event reconciler
//!
//! Files are moved on disk first, then the matching event is delivered,
//! mirroring how the host reports changes after the fact.

use std::time::{Duration, Instant};

use sidekeep_sync::Action;

use crate::common::{p, Harness};

// ============================================================================
// Created
// ============================================================================

#[tokio::test]
async fn test_created_main_gets_empty_sidecar() {
    let h = Harness::new();
    let reconciler = h.reconciler();
    h.write("Photos/img.png", "binary");

    let outcome = reconciler.handle_created(&p("Photos/img.png")).await;

    assert_eq!(outcome.created(), vec![&p("Photos/img.png.side.md")]);
    assert_eq!(h.read("Photos/img.png.side.md"), "");
    let index = h.index.read().await;
    assert_eq!(
        index.main_for(&p("Photos/img.png.side.md")),
        Some(&p("Photos/img.png"))
    );
}

#[tokio::test]
async fn test_created_main_seeded_from_template() {
    let h = Harness::with_config(|b| b.sidecar_template("Templates/sidecar.md"));
    h.write("Templates/sidecar.md", "# Notes\n\ntags: []\n");
    let reconciler = h.reconciler();
    h.write("doc.pdf", "pdf");

    reconciler.handle_created(&p("doc.pdf")).await;

    assert_eq!(h.read("doc.pdf.side.md"), "# Notes\n\ntags: []\n");
}

#[tokio::test]
async fn test_created_main_with_missing_template_gets_empty_sidecar() {
    let h = Harness::with_config(|b| b.sidecar_template("Templates/missing.md"));
    let reconciler = h.reconciler();
    h.write("doc.pdf", "pdf");

    let outcome = reconciler.handle_created(&p("doc.pdf")).await;

    assert_eq!(outcome.created().len(), 1);
    assert_eq!(h.read("doc.pdf.side.md"), "");
}

#[tokio::test]
async fn test_created_respects_auto_create_switch() {
    let h = Harness::with_config(|b| b.auto_create_sidecar(false));
    let reconciler = h.reconciler();
    h.write("img.png", "x");

    let outcome = reconciler.handle_created(&p("img.png")).await;

    assert!(outcome.created().is_empty());
    assert!(!h.exists("img.png.side.md"));
}

#[tokio::test]
async fn test_created_ignores_unmonitored_and_hidden() {
    let h = Harness::new();
    let reconciler = h.reconciler();
    h.write("notes.txt", "x");
    h.write(".cache/img.png", "x");

    assert!(reconciler.handle_created(&p("notes.txt")).await.is_empty());
    assert!(reconciler.handle_created(&p(".cache/img.png")).await.is_empty());
    assert!(!h.exists("notes.txt.side.md"));
    assert!(!h.exists(".cache/img.png.side.md"));
}

#[tokio::test]
async fn test_created_ignores_denied_folder() {
    let h = Harness::with_config(|b| b.deny_folder("Archive/**"));
    let reconciler = h.reconciler();
    h.write("Archive/2020/img.png", "x");

    let outcome = reconciler.handle_created(&p("Archive/2020/img.png")).await;

    assert!(outcome.created().is_empty());
    assert!(!h.exists("Archive/2020/img.png.side.md"));
}

#[tokio::test]
async fn test_created_derivative_is_indexed_not_nested() {
    let h = Harness::new();
    let reconciler = h.reconciler();
    h.write("img.png", "x");
    h.write("img.png.preview.png", "thumb");

    let outcome = reconciler.handle_created(&p("img.png.preview.png")).await;

    assert!(outcome.contains(&Action::Indexed(p("img.png.preview.png"))));
    assert!(!h.exists("img.png.preview.png.side.md"));
    assert!(h.index.read().await.contains(&p("img.png.preview.png")));
}

#[tokio::test]
async fn test_created_keeps_existing_sidecar_content() {
    let h = Harness::new();
    let reconciler = h.reconciler();
    h.write("img.png", "x");
    h.write("img.png.side.md", "existing notes");

    let outcome = reconciler.handle_created(&p("img.png")).await;

    assert!(outcome.created().is_empty());
    assert_eq!(h.read("img.png.side.md"), "existing notes");
    assert!(h.index.read().await.contains(&p("img.png.side.md")));
}

// ============================================================================
// Renamed: main file
// ============================================================================

#[tokio::test]
async fn test_main_rename_moves_derivatives_without_duplicates() {
    let h = Harness::new();
    h.write("img.png", "x");
    h.write("img.png.side.md", "my notes");
    h.write("img.png.preview.png", "thumb");
    h.build_index().await;
    let reconciler = h.reconciler();

    h.mv("img.png", "photo.png");
    let outcome = reconciler
        .handle_renamed(&p("img.png"), &p("photo.png"))
        .await;

    assert_eq!(outcome.moved().len(), 2);
    assert!(outcome.created().is_empty());
    assert_eq!(outcome.conflicts(), 0);
    assert!(!h.exists("img.png.side.md"));
    assert!(!h.exists("img.png.preview.png"));
    assert!(!h.exists("photo.png.side.md.side.md"));
    assert_eq!(h.read("photo.png.side.md"), "my notes");
    assert_eq!(h.read("photo.png.preview.png"), "thumb");

    let index = h.index.read().await;
    assert_eq!(index.len(), 2);
    assert_eq!(index.main_for(&p("photo.png.side.md")), Some(&p("photo.png")));
    assert!(!index.contains(&p("img.png.side.md")));
}

#[tokio::test]
async fn test_main_move_to_new_folder_creates_parents() {
    let h = Harness::new();
    h.write("img.png", "x");
    h.write("img.png.side.md", "notes");
    h.build_index().await;
    let reconciler = h.reconciler();

    h.mv("img.png", "Trips/2024/img.png");
    reconciler
        .handle_renamed(&p("img.png"), &p("Trips/2024/img.png"))
        .await;

    assert_eq!(h.read("Trips/2024/img.png.side.md"), "notes");
    assert!(!h.exists("img.png.side.md"));
}

#[tokio::test]
async fn test_main_rename_onto_occupied_sidecar_is_a_conflict() {
    let h = Harness::new();
    h.write("a.png", "x");
    h.write("a.png.side.md", "notes for a");
    h.write("b.png.side.md", "notes for the old b");
    h.build_index().await;
    let reconciler = h.reconciler();

    h.mv("a.png", "b.png");
    let outcome = reconciler.handle_renamed(&p("a.png"), &p("b.png")).await;

    assert_eq!(outcome.conflicts(), 1);
    assert_eq!(h.read("a.png.side.md"), "notes for a");
    assert_eq!(h.read("b.png.side.md"), "notes for the old b");
    assert_eq!(h.notifier.count("conflict"), 1);
}

#[tokio::test]
async fn test_rename_into_monitored_extension_creates_sidecar() {
    let h = Harness::new();
    h.write("scan.txt", "x");
    let reconciler = h.reconciler();

    h.mv("scan.txt", "scan.pdf");
    let outcome = reconciler
        .handle_renamed(&p("scan.txt"), &p("scan.pdf"))
        .await;

    assert_eq!(outcome.created(), vec![&p("scan.pdf.side.md")]);
    assert!(h.exists("scan.pdf.side.md"));
}

#[tokio::test]
async fn test_duplicate_rename_is_ignored() {
    let h = Harness::with_config(|b| b.duplicate_rename_window_ms(5_000));
    h.write("a.png", "x");
    h.write("a.png.side.md", "notes");
    h.build_index().await;
    let reconciler = h.reconciler();

    h.mv("a.png", "b.png");
    let first = reconciler.handle_renamed(&p("a.png"), &p("b.png")).await;
    let second = reconciler.handle_renamed(&p("a.png"), &p("b.png")).await;

    assert_eq!(first.moved().len(), 1);
    assert_eq!(second.actions(), &[Action::Duplicate]);
    assert_eq!(h.read("b.png.side.md"), "notes");
}

#[tokio::test]
async fn test_folder_rename_rekeys_index() {
    let h = Harness::new();
    h.write("Trips/img.png", "x");
    h.write("Trips/img.png.side.md", "notes");
    h.build_index().await;
    let reconciler = h.reconciler();

    h.mv("Trips", "Holidays");
    let outcome = reconciler
        .handle_renamed(&p("Trips"), &p("Holidays"))
        .await;

    assert!(outcome.contains(&Action::FolderRekeyed { count: 1 }));
    let index = h.index.read().await;
    assert_eq!(
        index.main_for(&p("Holidays/img.png.side.md")),
        Some(&p("Holidays/img.png"))
    );
    assert!(!index.contains(&p("Trips/img.png.side.md")));
}

// ============================================================================
// Renamed: derivative
// ============================================================================

#[tokio::test]
async fn test_derivative_rename_moves_main_and_siblings() {
    let h = Harness::new();
    h.write("a.png", "x");
    h.write("a.png.side.md", "notes");
    h.write("a.png.preview.png", "thumb");
    h.build_index().await;
    let reconciler = h.reconciler();

    h.mv("a.png.side.md", "c.png.side.md");
    let outcome = reconciler
        .handle_renamed(&p("a.png.side.md"), &p("c.png.side.md"))
        .await;

    assert!(outcome.contains(&Action::Moved {
        from: p("a.png"),
        to: p("c.png"),
    }));
    assert!(h.exists("c.png"));
    assert!(!h.exists("a.png"));
    assert_eq!(h.read("c.png.preview.png"), "thumb");
    assert_eq!(
        h.index.read().await.main_for(&p("c.png.side.md")),
        Some(&p("c.png"))
    );

    // The host then reports the main file's old path as gone
    let echo = reconciler.handle_deleted(&p("a.png")).await;
    assert_eq!(echo.actions(), &[Action::Suppressed]);
}

#[tokio::test]
async fn test_derivative_rename_onto_existing_main_is_a_conflict() {
    let h = Harness::new();
    h.write("a.png", "a");
    h.write("a.png.side.md", "notes");
    h.write("c.png", "c");
    h.build_index().await;
    let reconciler = h.reconciler();

    h.mv("a.png.side.md", "c.png.side.md");
    let outcome = reconciler
        .handle_renamed(&p("a.png.side.md"), &p("c.png.side.md"))
        .await;

    assert_eq!(outcome.conflicts(), 1);
    assert_eq!(h.read("a.png"), "a");
    assert_eq!(h.read("c.png"), "c");
}

#[tokio::test]
async fn test_derivative_rename_inside_bulk_window_only_reindexes() {
    let h = Harness::with_config(|b| b.bulk_move_window_ms(10_000));
    h.write("a.png", "x");
    h.write("a.png.side.md", "a notes");
    h.write("x.png", "x");
    h.write("x.png.side.md", "x notes");
    h.build_index().await;
    let reconciler = h.reconciler();

    h.mv("a.png", "b.png");
    let opened = reconciler.handle_renamed(&p("a.png"), &p("b.png")).await;
    assert!(opened.contains(&Action::BulkWindowOpened));

    h.mv("x.png.side.md", "y.png.side.md");
    let outcome = reconciler
        .handle_renamed(&p("x.png.side.md"), &p("y.png.side.md"))
        .await;

    assert!(outcome.contains(&Action::Coalesced));
    assert!(h.exists("x.png"));
    assert!(!h.exists("y.png"));
    assert!(h.index.read().await.contains(&p("y.png.side.md")));
}

#[tokio::test]
async fn test_truncated_sidecar_repair_moves_main_inside_bulk_window() {
    let h = Harness::with_config(|b| b.bulk_move_window_ms(10_000));
    h.write("a.png", "x");
    h.write("a.png.side.md", "a notes");
    h.write("c.png", "x");
    h.write("c.png.side.md", "c notes");
    h.build_index().await;
    let reconciler = h.reconciler();

    h.mv("a.png", "b.png");
    let opened = reconciler.handle_renamed(&p("a.png"), &p("b.png")).await;
    assert!(opened.contains(&Action::BulkWindowOpened));

    h.mv("c.png.side.md", "d.md");
    let outcome = reconciler
        .handle_renamed(&p("c.png.side.md"), &p("d.md"))
        .await;

    assert!(outcome.contains(&Action::Repaired {
        from: p("d.md"),
        to: p("d.png.side.md"),
    }));
    assert!(!outcome.contains(&Action::Coalesced));
    assert!(outcome.contains(&Action::Moved {
        from: p("c.png"),
        to: p("d.png"),
    }));
    assert_eq!(h.read("d.png.side.md"), "c notes");
    assert!(h.exists("d.png"));
    assert!(!h.exists("c.png"));
    assert_eq!(
        h.index.read().await.main_for(&p("d.png.side.md")).cloned(),
        Some(p("d.png"))
    );
}

#[tokio::test]
async fn test_truncated_sidecar_name_is_restored() {
    let h = Harness::new();
    h.write("photo.png", "x");
    h.write("photo.png.side.md", "my notes");
    h.build_index().await;
    let reconciler = h.reconciler();

    h.mv("photo.png.side.md", "holiday.md");
    let outcome = reconciler
        .handle_renamed(&p("photo.png.side.md"), &p("holiday.md"))
        .await;

    assert!(outcome.contains(&Action::Repaired {
        from: p("holiday.md"),
        to: p("holiday.png.side.md"),
    }));
    assert!(!h.exists("holiday.md"));
    assert_eq!(h.read("holiday.png.side.md"), "my notes");
    assert!(h.exists("holiday.png"));
    assert!(!h.exists("photo.png"));
    assert_eq!(h.notifier.count("sync"), 1);
}

#[tokio::test]
async fn test_truncated_sidecar_repair_refuses_occupied_target() {
    let h = Harness::new();
    h.write("photo.png", "x");
    h.write("photo.png.side.md", "mine");
    h.write("holiday.png.side.md", "theirs");
    h.build_index().await;
    let reconciler = h.reconciler();

    h.mv("photo.png.side.md", "holiday.md");
    let outcome = reconciler
        .handle_renamed(&p("photo.png.side.md"), &p("holiday.md"))
        .await;

    assert_eq!(outcome.conflicts(), 1);
    assert_eq!(h.read("holiday.md"), "mine");
    assert_eq!(h.read("holiday.png.side.md"), "theirs");
    assert!(h.exists("photo.png"));
}

#[tokio::test]
async fn test_derivative_renamed_to_plain_name_is_unindexed() {
    let h = Harness::new();
    h.write("a.png", "x");
    h.write("a.png.preview.png", "thumb");
    h.build_index().await;
    let reconciler = h.reconciler();

    h.mv("a.png.preview.png", "thumbnail.png");
    let outcome = reconciler
        .handle_renamed(&p("a.png.preview.png"), &p("thumbnail.png"))
        .await;

    assert!(outcome.contains(&Action::Unindexed(p("a.png.preview.png"))));
    assert!(h.index.read().await.is_empty());
    assert!(h.exists("a.png"));
}

// ============================================================================
// Deleted
// ============================================================================

#[tokio::test]
async fn test_deleted_main_moves_derivatives_to_trash() {
    let h = Harness::new();
    h.write("Photos/img.png", "x");
    h.write("Photos/img.png.side.md", "notes");
    h.write("Photos/img.png.preview.png", "thumb");
    h.build_index().await;
    let reconciler = h.reconciler();

    h.rm("Photos/img.png");
    let outcome = reconciler.handle_deleted(&p("Photos/img.png")).await;

    assert_eq!(outcome.trashed().len(), 2);
    assert!(!h.exists("Photos/img.png.side.md"));
    assert!(h.in_trash("Photos/img.png.side.md"));
    assert!(h.in_trash("Photos/img.png.preview.png"));
    assert!(h.index.read().await.is_empty());
}

#[tokio::test]
async fn test_deleted_main_finds_unindexed_derivatives() {
    let h = Harness::new();
    h.write("img.png.side.md", "notes");
    let reconciler = h.reconciler();

    let outcome = reconciler.handle_deleted(&p("img.png")).await;

    assert_eq!(outcome.trashed(), vec![&p("img.png.side.md")]);
    assert!(h.in_trash("img.png.side.md"));
}

#[tokio::test]
async fn test_deleted_derivative_does_not_cascade() {
    let h = Harness::new();
    h.write("img.png", "x");
    h.write("img.png.side.md", "notes");
    h.write("img.png.preview.png", "thumb");
    h.build_index().await;
    let reconciler = h.reconciler();

    h.rm("img.png.side.md");
    let outcome = reconciler.handle_deleted(&p("img.png.side.md")).await;

    assert!(outcome.contains(&Action::Unindexed(p("img.png.side.md"))));
    assert!(outcome.trashed().is_empty());
    assert!(h.exists("img.png"));
    assert!(h.exists("img.png.preview.png"));
}

#[tokio::test]
async fn test_deleted_main_that_reappeared_keeps_derivatives() {
    let h = Harness::new();
    h.write("img.png", "x");
    h.write("img.png.side.md", "notes");
    h.build_index().await;
    let reconciler = h.reconciler();

    let outcome = reconciler.handle_deleted(&p("img.png")).await;

    assert!(outcome.is_empty());
    assert!(h.exists("img.png.side.md"));
}

#[tokio::test]
async fn test_deleted_unmonitored_file_keeps_lookalike_derivatives() {
    let h = Harness::new();
    h.write("notes.txt.side.md", "kept");
    let reconciler = h.reconciler();

    let outcome = reconciler.handle_deleted(&p("notes.txt")).await;

    assert!(outcome.is_empty());
    assert!(h.exists("notes.txt.side.md"));
}

// ============================================================================
// Short-lived state and refresh
// ============================================================================

#[tokio::test]
async fn test_sweep_expires_suppression() {
    let h = Harness::new();
    h.write("a.png", "x");
    h.write("a.png.side.md", "notes");
    h.build_index().await;
    let reconciler = h.reconciler();

    h.mv("a.png.side.md", "c.png.side.md");
    reconciler
        .handle_renamed(&p("a.png.side.md"), &p("c.png.side.md"))
        .await;
    reconciler.sweep(Instant::now() + Duration::from_secs(60));

    let outcome = reconciler.handle_deleted(&p("a.png")).await;
    assert!(!outcome.contains(&Action::Suppressed));
    assert!(h.exists("c.png.side.md"));
}

#[tokio::test]
async fn test_mutations_trigger_a_debounced_refresh() {
    let h = Harness::with_config(|b| b.refresh_debounce_ms(100));
    let reconciler = h.reconciler();
    h.write("a.png", "x");
    h.write("b.png", "x");

    reconciler.handle_created(&p("a.png")).await;
    reconciler.handle_created(&p("b.png")).await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(h.notifier.refreshes(), 1);
}
