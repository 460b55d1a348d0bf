//! Core data models for the bucket viewer.
//!
//! Buckets and files map to the `buckets` and `files` tables via
//! `sqlx::FromRow` and serialize as JSON via `serde`.

pub mod bucket;
pub mod file;
