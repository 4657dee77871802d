//! One-time device enrollment

use std::sync::Arc;

use async_trait::async_trait;
use wardgate_proto::Enrollment;

use crate::api::ApiDialer;
use crate::error::SyncError;

#[async_trait]
pub trait Enroller: Send + Sync {
    async fn enroll(
        &self,
        token: &str,
        serial: &str,
        platform: &str,
        public_key: &str,
    ) -> Result<Enrollment, SyncError>;
}

/// Enrolls through the control plane's `EnrollDevice` call
pub struct ApiEnroller {
    dialer: Arc<dyn ApiDialer>,
}

impl ApiEnroller {
    pub fn new(dialer: Arc<dyn ApiDialer>) -> Self {
        Self { dialer }
    }
}

#[async_trait]
impl Enroller for ApiEnroller {
    async fn enroll(
        &self,
        token: &str,
        serial: &str,
        platform: &str,
        public_key: &str,
    ) -> Result<Enrollment, SyncError> {
        let mut conn = self.dialer.dial().await?;
        let enrollment = conn.enroll(token, serial, platform, public_key).await?;
        tracing::info!(serial = %serial, ipv4 = %enrollment.device_ipv4, "Device enrolled");
        Ok(enrollment)
    }
}
