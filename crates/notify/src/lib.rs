//! Outbound alert channel for detected crisis incidents.

pub mod dispatcher;
pub mod render;
pub mod resend;
