//! Wardgate endpoint agent
//!
//! Drives the endpoint through Disconnected, Authenticating, Bootstrapping
//! and Connected. While connected it holds one configuration stream open
//! against the control plane and applies every push to the local tunnel.
//! Local clients watch and steer the agent through [`ipc`].

pub mod agent;
pub mod api;
pub mod auth;
pub mod backoff;
pub mod config;
pub mod enroll;
pub mod error;
pub mod ipc;
pub mod network;
pub mod notify;
pub mod prober;
pub mod runtime;
pub mod statemachine;
pub mod states;
pub mod status;

pub use agent::Agent;
pub use api::{ApiConnection, ApiDialer, DeviceConfigStream, TcpApiDialer};
pub use auth::{FileTokenProvider, StaticTokenProvider, TokenProvider};
pub use backoff::Backoff;
pub use config::{AgentConfig, ConfigManager};
pub use enroll::{ApiEnroller, Enroller};
pub use error::{AgentError, NetworkError, SyncError, TokenError};
pub use ipc::{IpcClient, IpcRequest, IpcResponse, IpcServer, StatusStream};
pub use network::{FileConfigurer, NetworkConfigurer, NoopConfigurer};
pub use notify::{Notifier, TracingNotifier};
pub use prober::{ProbeSettings, Prober};
pub use runtime::{AgentRuntime, RuntimeConfig};
pub use statemachine::{AgentHandle, Event, State, StateMachine, TransitionError};
pub use states::connected::{classify, Outcome};
pub use states::AgentContext;
pub use status::StatusFanout;
