//! # Plan Harness
//!
//! A local-first Terraform plan ingestion, drift tracking, and dependency
//! analysis service.
//!
//! CI pipelines submit `terraform show -json` output per component and
//! environment. Each accepted plan is stored twice: the full artifact on
//! disk and a pruned, queryable document in SQLite carrying its drift
//! counts, resource graph, and guessed links to other components.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────────────┐   ┌─────────────┐
//! │ CI / CLI     │──▶│ plan-harness-core    │──▶│ SQLite      │
//! │ (ph, HTTP)   │   │ normalize/graph/link │   │ plan index  │
//! └──────────────┘   │ drift/staleness      │   ├─────────────┤
//!                    └──────────┬──────────┘   │ Artifacts   │
//!                               │              │ (fs)        │
//!                               ▼              └─────────────┘
//!                        ┌────────────┐
//!                        │ Slack alert│
//!                        └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ph init
//! ph project create platform --env dev --env prod
//! ph component create <project-id> network
//! ph token create <project-id>
//! ph ingest plan.json --component <component-id> --env prod
//! ph report <project-id>
//! ph serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite plan index and registry |
//! | [`artifacts`] | Filesystem artifact store |
//! | [`auth`] | Access tokens and the internal secret |
//! | [`notify`] | Slack drift alerts |
//! | [`services`] | Store wiring shared by CLI and server |
//! | [`ingest`] | Plan submission and offline analysis |
//! | [`plans`] | Plan retrieval and deletion |
//! | [`registry`] | Project, component and token administration |
//! | [`report`] | Per-environment drift report |
//! | [`server`] | HTTP server |

pub mod artifacts;
pub mod auth;
pub mod config;
pub mod db;
pub mod ingest;
pub mod migrate;
pub mod notify;
pub mod plans;
pub mod registry;
pub mod report;
pub mod server;
pub mod services;
pub mod sqlite_store;
