//! # queuebridge
//!
//! Per-tenant queue provisioning and bidirectional event relay for a
//! multi-tenant integration layer.
//!
//! Tenants of the platform exchange events with a central bus through
//! queues provisioned on demand: a dedicated inbound queue per tenant and
//! one shared outbound queue. The crate's core is the resource lifecycle
//! state machine (create, update, delete as explicit transition tables over
//! an audit ledger) and the relay pipeline moving events between the bus
//! and the queues without loss or duplication.
//!
//! Module map:
//! - [`ledger`]: audit ledger; the conditional Started insert is the only
//!   cross-execution synchronization in the system
//! - [`directory`]: tenant metadata and queue resolution
//! - [`provision`]: provisioning seam plus an in-process simulator
//! - [`lifecycle`]: workflow tables, generic executor, launcher
//! - [`relay`]: inbound and outbound event relays
//! - [`transport`]: bus and queue transport seams
//! - [`gateway`]: queue service, credentials, REST API

pub mod config;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod lifecycle;
pub mod provision;
pub mod relay;
pub mod transport;

pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
