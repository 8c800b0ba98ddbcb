//! HTTP API over the expiry scheduler.

pub mod app;
