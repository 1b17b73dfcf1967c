//! ark-lib: Core types and logic for the ark build engine
//!
//! This crate provides the content-addressed build and deploy core:
//! - `Target`: declarative unit of work with a deterministic checksum
//! - `Artifact`: the record a target produces, backed by a local and remote cache
//! - `Dag`: dependency graph with isolation, sorting and parallel walks
//! - `Store`: pluggable target and edge storage (memory, SQLite)
//! - `TargetKind`: the closed set of target types and their actions
//! - `execute`: the caching scheduler that walks the graph
//! - `observer`: filesystem change detection feeding watch mode
//! - `workspace`: `.ark/settings.json` discovery and settings

pub mod artifact;
pub mod clients;
pub mod consts;
pub mod dag;
pub mod execute;
pub mod observer;
pub mod platform;
pub mod storage;
pub mod target;
pub mod targets;
pub mod util;
pub mod workspace;
