//! Cross-session relational store for Cadre
//!
//! SQLite-backed persistence for run history, per-phase metrics, and
//! per-role/model aggregates. The store is append-only from the flow's point
//! of view and is never read on the control path.
//!
//! The database lives at `~/.cache/cadre/cadre.db` by default.

pub mod connection;
pub mod error;
pub mod models;
pub mod repos;

pub use connection::Database;
pub use error::{Error, Result};
