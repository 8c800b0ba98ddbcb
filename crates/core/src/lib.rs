//! `sweepd-core` — shared building blocks for the expiry scheduler.
//!
//! This crate contains **pure** primitives (no IO, no async): identifiers,
//! the domain error model, the daily schedule window and a clock seam.

pub mod clock;
pub mod error;
pub mod id;
pub mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{JobId, NodeId, TableId};
pub use window::DayWindow;
