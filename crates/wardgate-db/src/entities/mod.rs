//! Database entities

pub mod device;
pub mod device_issue;
pub mod gateway;
pub mod session;

pub mod prelude {
    pub use super::device::Entity as Device;
    pub use super::device_issue::Entity as DeviceIssue;
    pub use super::gateway::Entity as Gateway;
    pub use super::session::Entity as Session;
}
