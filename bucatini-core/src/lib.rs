//! Bucatini Core - Oplog Tailing and Publication Pipeline
//!
//! This crate provides the core of the Bucatini relay: it tails the
//! replication oplog of a MongoDB replica set and turns each data-bearing
//! entry into a compact change notification ready for Redis pub/sub.
//!
//! # Key Components
//!
//! - **Entries**: [`entry`] models raw oplog documents and normalizes them
//! - **Messages**: [`message`] computes the wire-format change notification
//! - **Tailing**: [`tail`] maintains the tailable cursor against the oplog
//! - **State**: [`state`] defines the resume-checkpoint contract
//! - **Publishing**: [`publish`] defines the channel-publication contract
//! - **Supervision**: [`pipeline`] orchestrates the reader-to-publisher stream
//!
//! # Example
//!
//! ```rust
//! use bucatini_core::entry::{OplogEntry, RawOplogEntry};
//! use bucatini_core::message::Publication;
//! use bson::{doc, Timestamp};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let raw = RawOplogEntry {
//!     timestamp: Timestamp { time: 0, increment: 1 },
//!     operation: "i".to_string(),
//!     namespace: "app.users".to_string(),
//!     payload: doc! { "_id": "u1", "name": "Alice" },
//!     target: None,
//! };
//!
//! let entry = OplogEntry::from_raw(raw)?.expect("insert is data-bearing");
//! let publication = Publication::from_entry(&entry)?;
//!
//! assert_eq!(publication.collection_channel, "app.users");
//! assert_eq!(publication.specific_channel, "app.users::u1");
//! # Ok(())
//! # }
//! ```

pub mod entry;
pub mod message;
pub mod metrics;
pub mod pipeline;
pub mod publish;
pub mod state;
pub mod tail;
