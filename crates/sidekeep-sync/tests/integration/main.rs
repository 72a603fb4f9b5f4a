//! Integration tests for sidekeep-sync
//!
//! Every test runs against a fresh temporary store through the real
//! `LocalFileStore`, with recording doubles for notices and confirmation.

#[allow(dead_code)]
mod common;

mod test_reconciler;
mod test_revalidation;
mod test_tracker;
