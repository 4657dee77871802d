//! Wardgate control plane
//!
//! Computes, per device and per gateway, the peers and routes each endpoint
//! may use and pushes that configuration over long-lived streams whenever
//! authorization state changes.
//!
//! A change (login, health update, gateway enrollment, privileged grant)
//! fires the [`Triggers`] of every affected stream; the stream handler wakes,
//! recomputes through the [`filters`] pipeline and pushes the result.

pub mod admin;
pub mod api;
pub mod config;
pub mod device;
pub mod error;
pub mod filters;
pub mod gateway;
pub mod metrics;
pub mod privileged;
pub mod server;
pub mod session_store;
pub mod triggers;

pub use api::{ApiServer, PushSink};
pub use config::{ApiServerConfig, CONTROL_PLANE_PEER_NAME};
pub use error::{ControlError, SessionError, TriggerError};
pub use metrics::Metrics;
pub use privileged::{GrantRegistry, PrivilegedAccess, PrivilegedUser};
pub use server::{ResponseSink, RpcServer};
pub use session_store::SessionStore;
pub use triggers::{Trigger, Triggers};
