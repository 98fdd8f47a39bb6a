//! Shared archive types and the legacy cipher

pub mod archive;
pub mod crypto;
