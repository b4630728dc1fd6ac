// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! archive-storage: the persistent state store (§4.1).
//!
//! The store treats the registry's job-history snapshot as opaque bytes.
//! It owns only the encode/decode and atomic-write concerns; the dirty-flag
//! flush loop and its interaction with the registry lock live in
//! `archive-engine`.

pub mod store;

pub use store::{FileStore, JobHistory};
