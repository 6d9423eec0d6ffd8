//! HTTP surface for the crisis-detection webhook.

pub mod routes;
pub mod server;
pub mod shutdown;
