//! Access to the content-addressed store.
//!
//! Channels never talk to each other directly: the sender inserts a
//! document under `base key + slot`, the receiver polls the same key.

mod client;
mod fs_store;

pub use client::{FetchError, FetchErrorCode, InsertError, StoreClient};
pub use fs_store::FsStoreClient;
