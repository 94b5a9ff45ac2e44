//! End-to-end storage scenarios through the public `keepsake` API
//!
//! Each module drives a full [`StorageManager`](keepsake::StorageManager)
//! over in-memory repositories.

mod common;

mod eviction;
mod flushing;
mod queries;
mod round_trip;
mod user_lifecycle;
