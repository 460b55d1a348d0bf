//! Fetch S3-style bucket listings, store their file records and serve them
//! back for browsing.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
