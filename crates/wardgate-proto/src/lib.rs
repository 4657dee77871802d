//! Wardgate protocol definitions
//!
//! Wire types shared by the control plane and the endpoint agent: device,
//! gateway and session records, the configuration pushes, RPC status codes
//! and the length-prefixed frame codec.

pub mod codec;
pub mod messages;
pub mod status;
pub mod types;
pub mod wireguard;

pub use codec::{ClientCodec, CodecError, MessageCodec, ServerCodec};
pub use messages::*;
pub use status::{Code, RpcStatus};
pub use types::*;
pub use wireguard::InterfaceConfig;

/// Protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum frame size (16MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Port the gateways answer liveness probes on
pub const GATEWAY_PROBE_PORT: u16 = 3000;
