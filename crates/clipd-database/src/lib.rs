//! SQLite persistence layer for the clipd note-delivery queue.
//!
//! This crate provides:
//! - Async SQLite executor with dedicated thread
//! - Database migrations for the note outbox schema
//! - Model types for queued notes
//! - Query helpers for CRUD operations
//!
//! # Architecture
//!
//! The `Database` uses a single dedicated thread for all SQLite operations.
//! Queries are sent through a channel and executed in FIFO order.
//!
//! ```ignore
//! let db = Database::open(path).await?;
//! let notes = db.list_notes().await?;
//! ```
//!
//! **Important**: Only SQL operations should run inside `db.call()`.
//! Heavy computation must happen outside.

mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;

pub use error::{DatabaseError, DatabaseResult};
pub use executor::Database;
pub use migrations::run_migrations;
pub use models::*;
