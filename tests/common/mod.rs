//! Shared fixtures for the end-to-end tests.
//!
//! Tests should only import from this module, not from internal submodules.

#[allow(dead_code)]
mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{cover_settings, wait_until, CountingResizer, TestLibrary, PNG_BYTES};
