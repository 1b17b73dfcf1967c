//! Shared utilities.
//!
//! Content hashing, structural hashing of target identity, and the
//! tar.gz codec used by the artifact cache.

pub mod archive;
pub mod hash;
pub mod structhash;

#[cfg(test)]
pub mod testutil;
