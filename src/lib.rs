//! # lamina-core
//!
//! Layered aggregation, conflict resolution and link integrity for a multi-source reference
//! knowledge base (instruction sets, language keywords, hardware components).
//!
//! ## Overview
//!
//! Every documented entity is described by several ranked **layers**: a base table, a detailed
//! spec, a narrative manual, errata. lamina-core merges those layers into one **canonical
//! record** per entity under deterministic precedence rules, keeps related entities consistent
//! through **groups**, scores each record's completeness, and checks that a tree of **manifest**
//! documents reaches every record exactly once with correct identities.
//!
//! Nothing is fixed silently. Every disagreement, drift or broken link becomes a typed
//! [`issue::Issue`], and each run ends with a summary and a pass/fail verdict.
//!
//! ## Architecture
//!
//! - **[`properties`]**: controlled field vocabulary, values, identities, layer and canonical records
//! - **[`codec`]**: on-disk documents (entity records, groups, manifests, production documents)
//! - **[`normalize`]**: the contract external extraction adapters feed
//! - **[`merge`]**: the Layer Merge Engine
//! - **[`group`]**: group discovery and the synchronization state machine
//! - **[`audit`]**: schema drift, quality scores and category aggregates
//! - **[`manifest`]**: manifest graph loading, validation and node building
//! - **[`pipeline`]** / **[`commands`]**: stages over a [`corpus::RunContext`] and the batch command surface
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lamina_core::{
//!     commands::{execute_and_summarize, Op},
//!     config::{ConfigProvider, TomlConfigProvider},
//!     corpus::RunContext,
//!     store::FsStore,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TomlConfigProvider::for_corpus("./corpus").load()?;
//!     let store = FsStore::new("./corpus")?;
//!     let mut ctx = RunContext::load(Box::new(store), config)?;
//!
//!     let summary = execute_and_summarize(&Op::Run { dry_run: true }, &mut ctx)?;
//!     println!("{}", summary.verdict_line()?);
//!     for issue in ctx.issues.iter() {
//!         println!("{issue}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **default**: the library
//! - **bin**: the `lamina` command line tool

pub mod audit;
pub mod codec;
pub mod commands;
pub mod config;
pub mod corpus;
pub mod error;
pub mod group;
pub mod issue;
pub mod manifest;
pub mod merge;
pub mod normalize;
pub mod paths;
pub mod pipeline;
pub mod properties;
pub mod store;

pub use error::*;
