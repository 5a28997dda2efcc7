//! cinch-merge-gate integration testsuite.
//!
//! These tests exercise the store and the Build Correlation Engine against
//! a real, disposable Postgres database (see `common`). They're skipped,
//! not failed, when `TEST_DB_URL` isn't set.

mod common;
mod correlation;
mod webhook;
