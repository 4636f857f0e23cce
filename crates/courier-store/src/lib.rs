//! # Courier Store - Filesystem Persistence
//!
//! Filesystem-backed implementations of the bus persistence ports: the
//! queue store, the subscription store, and the message journal.
//!
//! ## Durability model
//!
//! - One JSON document per record; every mutation writes a temporary file,
//!   fsyncs it, and renames it into place, so a crash leaves either the old
//!   or the new version, never a torn one.
//! - Each store root carries an advisory `fs2` exclusive lock so two
//!   processes cannot serve the same data directory.
//! - Recovery reads skip in-flight temporary files.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod fs_journal;
mod fs_queue;
mod fs_subscriptions;
mod providers;
mod util;

pub use fs_journal::FsMessageJournal;
pub use fs_queue::FsQueueStore;
pub use fs_subscriptions::FsSubscriptionStore;
pub use providers::{journal_from_config, queue_store_from_config, subscription_store_from_config};
