//! Plume - progressive hydration of emissions datasets.
//!
//! # Overview
//!
//! Plume feeds an emissions chart viewer from a remote relational data
//! service. It reconciles several sources so the viewer is never blocked:
//!
//! - an in-memory cache from a prior load
//! - a small scoped "hero" fetch for fast first paint
//! - a precomputed static snapshot for offline-friendly defaults
//! - the full authoritative bulk fetch
//!
//! A provisional dataset is served first and upgraded in place once the
//! authoritative one lands, with listeners notified exactly once.
//!
//! # Modules
//!
//! - [`model`]: Canonical dataset and cache-state types
//! - [`sources`]: Gateway, snapshot, hero and bootstrap suppliers
//! - [`cache`]: Cache store and request deduplication
//! - [`race`]: First-usable-wins race between suppliers
//! - [`merge`]: Key-based merging with authoritative precedence
//! - [`coverage`]: Activity-data coverage of groups
//! - [`notifier`]: Hydration listeners
//! - [`service`]: The data service tying the tiers together
//! - [`api`]: HTTP API handlers
//! - [`config`]: Environment configuration

#![deny(rustdoc::broken_intra_doc_links)]

pub mod api;
pub mod cache;
pub mod config;
pub mod coverage;
pub mod error;
pub mod merge;
pub mod model;
pub mod notifier;
pub mod race;
pub mod service;
pub mod sources;

pub use error::{HydrationError, Result};
pub use service::DataService;
