//! LandWatch Ingest Library
//!
//! Version-aware ingestion pipeline for periodically-refreshed geospatial and
//! tabular datasets. Artifacts produced by source-specific downloaders are
//! fingerprinted, compared against the last successful run, and only changed
//! datasets are loaded through a staged protocol (raw staging, normalized
//! payload, typed target). Run manifests and retention bookkeeping tie the
//! datasets of one run together.
//!
//! # Modules
//!
//! - [`config`]: process-wide configuration, constructed once from the
//!   environment and passed down explicitly
//! - [`storage`]: local-filesystem or S3-compatible blob storage behind one
//!   interface
//! - [`catalog`]: dataset/category/version bookkeeping in PostgreSQL
//! - [`bulk`]: external geometry loader orchestration with stall recovery
//! - [`staging`]: raw staging, payload normalization and the parameterized
//!   ingest script
//! - [`pipeline`]: the per-file ingest driver with fingerprint skip
//! - [`runner`]: the per-category run orchestrator, manifests and retention

pub mod bulk;
pub mod catalog;
pub mod config;
pub mod pipeline;
pub mod runner;
pub mod staging;
pub mod storage;
