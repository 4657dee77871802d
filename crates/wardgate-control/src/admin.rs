//! Administrative operations gated by the admin credentials

use wardgate_auth::verify_password;
use wardgate_db::StoreError;
use wardgate_proto::{AdminCredentials, Device, DeviceIssue, Gateway, Session};

use crate::api::ApiServer;
use crate::error::ControlError;
use crate::privileged::PrivilegedUser;

impl ApiServer {
    pub fn authenticate_admin(&self, credentials: &AdminCredentials) -> Result<(), ControlError> {
        let denied = || ControlError::Unauthenticated("invalid admin credentials".to_string());

        if self.config.admin_password_hash.is_empty()
            || credentials.username != self.config.admin_username
        {
            return Err(denied());
        }
        match verify_password(&credentials.password, &self.config.admin_password_hash) {
            Ok(true) => Ok(()),
            Ok(false) => Err(denied()),
            Err(e) => {
                tracing::error!(error = %e, "Admin password hash is unusable");
                Err(denied())
            }
        }
    }

    /// Register a new gateway. `gateway.password_hash` carries the argon2 hash
    /// of the gateway's password.
    pub async fn enroll_gateway(
        &self,
        credentials: &AdminCredentials,
        gateway: Gateway,
    ) -> Result<Gateway, ControlError> {
        self.authenticate_admin(credentials)?;
        validate_gateway(&gateway)?;

        self.store
            .add_gateway(&gateway)
            .await
            .map_err(|e| ControlError::DataLoss(e.to_string()))?;

        let stored = self.read_back_gateway(&gateway.name).await?;
        tracing::info!(gateway = %stored.name, "Gateway enrolled");
        self.propagate_gateway_change(&stored.name);
        Ok(stored.redacted())
    }

    pub async fn update_gateway(
        &self,
        credentials: &AdminCredentials,
        gateway: Gateway,
    ) -> Result<Gateway, ControlError> {
        self.authenticate_admin(credentials)?;
        validate_gateway(&gateway)?;

        self.store
            .update_gateway(&gateway)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(what) => ControlError::NotFound(what),
                e => ControlError::DataLoss(e.to_string()),
            })?;

        let stored = self.read_back_gateway(&gateway.name).await?;
        tracing::info!(gateway = %stored.name, "Gateway updated");
        self.propagate_gateway_change(&stored.name);
        Ok(stored.redacted())
    }

    pub async fn list_gateways(
        &self,
        credentials: &AdminCredentials,
    ) -> Result<Vec<Gateway>, ControlError> {
        self.authenticate_admin(credentials)?;
        let gateways = self.store.read_gateways().await?;
        Ok(gateways.iter().map(Gateway::redacted).collect())
    }

    pub async fn get_sessions(
        &self,
        credentials: &AdminCredentials,
    ) -> Result<Vec<Session>, ControlError> {
        self.authenticate_admin(credentials)?;
        let mut sessions = self.sessions.all().await;
        sessions.sort_by_key(|s| s.device.id);
        Ok(sessions)
    }

    pub async fn grant_privileged_access(
        &self,
        credentials: &AdminCredentials,
        gateway: &str,
        user_id: &str,
        duration: chrono::Duration,
    ) -> Result<PrivilegedUser, ControlError> {
        self.authenticate_admin(credentials)?;
        if user_id.is_empty() {
            return Err(ControlError::InvalidArgument("user id is required".to_string()));
        }
        self.store.read_gateway(gateway).await?;

        let user = self.privileged.grant(gateway, user_id, duration);
        tracing::info!(gateway = %gateway, user_id = %user_id, expires = %user.expires, "Granted privileged access");
        self.gateways.fire(&gateway.to_string());
        Ok(user)
    }

    pub async fn revoke_privileged_access(
        &self,
        credentials: &AdminCredentials,
        gateway: &str,
        user_id: &str,
    ) -> Result<bool, ControlError> {
        self.authenticate_admin(credentials)?;
        let revoked = self.privileged.revoke(gateway, user_id);
        if revoked {
            tracing::info!(gateway = %gateway, user_id = %user_id, "Revoked privileged access");
            self.gateways.fire(&gateway.to_string());
        }
        Ok(revoked)
    }

    /// Record a health verdict for a device and push it to every affected stream.
    pub async fn update_device_health(
        &self,
        credentials: &AdminCredentials,
        device_id: i64,
        healthy: bool,
        issues: &[DeviceIssue],
    ) -> Result<Device, ControlError> {
        self.authenticate_admin(credentials)?;
        let device = self
            .store
            .update_device_health(device_id, healthy, issues)
            .await?;
        tracing::info!(device_id, healthy, issues = issues.len(), "Device health updated");
        self.refresh_device(device.clone()).await;
        Ok(device)
    }

    async fn read_back_gateway(&self, name: &str) -> Result<Gateway, ControlError> {
        self.store
            .read_gateway(name)
            .await
            .map_err(|e| ControlError::Aborted(e.to_string()))
    }

    fn propagate_gateway_change(&self, name: &str) {
        self.devices.fire_all();
        self.gateways.fire(&name.to_string());
    }
}

fn validate_gateway(gateway: &Gateway) -> Result<(), ControlError> {
    if gateway.name.is_empty() {
        return Err(ControlError::InvalidArgument("gateway name is required".to_string()));
    }
    if gateway.public_key.is_empty() {
        return Err(ControlError::InvalidArgument(format!(
            "gateway {}: public key is required",
            gateway.name
        )));
    }
    Ok(())
}
