//! HTTP handlers. Each one unpacks a request, calls into the services and
//! maps failures onto [`crate::errors::AppError`].

pub mod bucket_handlers;
pub mod health_handlers;
pub mod message_handlers;
