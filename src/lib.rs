//! Archway - adaptive client gateway for a remote rewriting proxy
//!
//! Archway decides whether an outbound resource request should be routed
//! through a remote rewriting proxy, rewrites target URLs into proxy
//! form, schedules requests under a concurrency cap, caches responses by
//! resource type, probes the proxy's health on an adaptive timer and
//! falls back to direct requests when the proxy degrades.
//!
//! ## Services
//!
//! - **Cache**: resource-type-aware TTL/LRU response cache
//! - **Queue**: priority-ordered admission under a concurrency cap
//! - **Health**: adaptive-interval probing of the proxy origin
//! - **Faults**: failure classification and a bounded rolling log
//! - **Orchestrator**: routing, state machine, fallback and statistics

pub mod cache;
pub mod config;
pub mod events;
pub mod faults;
pub mod health;
pub mod metrics;
pub mod orchestrator;
pub mod persist;
pub mod queue;
pub mod resource;
pub mod transport;
pub mod types;

pub use config::Args;
pub use orchestrator::{GatewayConfig, ProxyGateway, ProxyResponse, ProxyStatus, RequestOptions};
pub use resource::ResourceType;
pub use types::{ArchwayError, ErrorKind, Result};
