//! result_store: authorization-gated file store for JSON measurement submissions.
//!
//! `storage` owns the on-disk layout, `identity` the authorization contract, and
//! `server` binds both to HTTP routes.

pub mod error;
pub mod config;
pub mod storage;
pub mod security;
pub mod identity;
pub mod server;
