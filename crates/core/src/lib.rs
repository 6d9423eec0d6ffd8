//! Crisis-risk detection for coaching conversation transcripts.
//!
//! Webhook payload → user-only normalized text → tiered phrase classifier →
//! incident decision policy (persist, notify, mark failure).

pub mod config;
pub mod detection;
pub mod incident;
pub mod types;
