#![doc = "charm-recipe-core: core logic library for charm-recipe-sync."]

//! This crate contains the data model, the Launchpad client contract and the
//! reconciliation pipelines for charm-recipe-sync. Nothing here performs
//! terminal I/O; every operation returns a structured report for the CLI
//! crate to render.
//!
//! # Usage
//! Add this as a dependency for the shared configuration, planning, sync and
//! build-inspection code.

pub mod builds;
pub mod channel;
pub mod config;
pub mod contract;
pub mod plan;
pub mod sync;
