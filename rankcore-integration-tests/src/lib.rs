//! Integration tests for `RankCore`
//!
//! This crate contains integration tests that drive the ranking engine
//! through its collaborators (in-memory backend, chaos wrappers) end to end.

// This is a test-only crate
#![cfg(test)]
