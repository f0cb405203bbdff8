//! # Plan Harness Core
//!
//! Shared, I/O-free logic for Plan Harness: plan normalization, resource
//! graph construction, heuristic component linking, drift summaries, the
//! staleness guard, storage projections, and the store traits the
//! ingestion coordinator runs against.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or HTTP
//! dependencies. Storage and notification backends are supplied by the
//! calling application through the traits in [`store`].
//!
//! ## Pipeline
//!
//! ```text
//! raw plan ──▶ normalize ──┬──▶ graph ───┐
//!                          ├──▶ linker ──┤
//!                          └──▶ drift ───┼──▶ staleness ──▶ projection ──▶ stores
//!                                        │
//! ```

pub mod drift;
pub mod error;
pub mod graph;
pub mod ingest;
pub mod linker;
pub mod models;
pub mod normalize;
pub mod probe;
pub mod projection;
pub mod staleness;
pub mod store;

pub use error::IngestError;
