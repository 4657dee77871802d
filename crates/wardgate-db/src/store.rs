//! Store trait and its sea-orm implementation

use std::collections::HashMap;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use chrono::Utc;
use ipnet::Ipv4Net;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, NotSet, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use thiserror::Error;
use wardgate_proto::{Device, DeviceIssue, Gateway, Session, Severity};

use crate::entities::{device, device_issue, gateway, session};
use crate::ipalloc::next_free_ipv4;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No free address left in {0}")]
    AddressSpaceExhausted(Ipv4Net),

    #[error("Invalid record: {0}")]
    Invalid(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Device fields supplied at enrollment
#[derive(Debug, Clone)]
pub struct NewDevice {
    pub serial: String,
    pub platform: String,
    pub public_key: String,
    pub username: String,
    pub healthy: bool,
}

/// Authoritative records behind the control plane
#[async_trait]
pub trait Store: Send + Sync {
    async fn read_device_by_id(&self, id: i64) -> Result<Device, StoreError>;

    async fn read_device_by_serial_platform(
        &self,
        serial: &str,
        platform: &str,
    ) -> Result<Device, StoreError>;

    async fn read_devices(&self) -> Result<Vec<Device>, StoreError>;

    /// Create the device, or refresh key and owner if serial and platform are known.
    async fn enroll_device(&self, device: NewDevice) -> Result<Device, StoreError>;

    /// Replace the health flag and the full issue list of a device
    async fn update_device_health(
        &self,
        id: i64,
        healthy: bool,
        issues: &[DeviceIssue],
    ) -> Result<Device, StoreError>;

    async fn read_gateways(&self) -> Result<Vec<Gateway>, StoreError>;

    async fn read_gateway(&self, name: &str) -> Result<Gateway, StoreError>;

    async fn add_gateway(&self, gateway: &Gateway) -> Result<(), StoreError>;

    async fn update_gateway(&self, gateway: &Gateway) -> Result<(), StoreError>;

    /// Persist `session`, dropping any other session for the same device in the same transaction.
    async fn add_session(&self, session: &Session) -> Result<(), StoreError>;

    async fn read_session(&self, key: &str) -> Result<Session, StoreError>;

    async fn read_sessions(&self) -> Result<Vec<Session>, StoreError>;

    /// Delete sessions past their expiry, returning how many went away
    async fn remove_expired_sessions(&self) -> Result<u64, StoreError>;
}

/// sea-orm backed [`Store`]
pub struct DbStore {
    db: DatabaseConnection,
    device_network: Ipv4Net,
    reserved: Vec<Ipv4Addr>,
}

impl DbStore {
    /// The first host of `device_network` is kept for the control plane.
    pub fn new(db: DatabaseConnection, device_network: Ipv4Net) -> Self {
        let reserved = device_network.hosts().take(1).collect();
        Self {
            db,
            device_network,
            reserved,
        }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Address the control plane answers on inside the tunnel
    pub fn control_plane_ipv4(&self) -> Option<Ipv4Addr> {
        self.reserved.first().copied()
    }
}

fn db_id(id: i64) -> Result<i32, StoreError> {
    i32::try_from(id).map_err(|_| StoreError::NotFound(format!("device {}", id)))
}

fn severity_name(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "info",
        Severity::Notice => "notice",
        Severity::Warning => "warning",
        Severity::Danger => "danger",
        Severity::Critical => "critical",
    }
}

fn parse_severity(name: &str) -> Result<Severity, StoreError> {
    match name {
        "info" => Ok(Severity::Info),
        "notice" => Ok(Severity::Notice),
        "warning" => Ok(Severity::Warning),
        "danger" => Ok(Severity::Danger),
        "critical" => Ok(Severity::Critical),
        other => Err(StoreError::Invalid(format!("unknown severity {:?}", other))),
    }
}

fn issue_from_model(model: device_issue::Model) -> Result<DeviceIssue, StoreError> {
    Ok(DeviceIssue {
        title: model.title,
        message: model.message,
        severity: parse_severity(&model.severity)?,
        detected_at: model.detected_at,
        last_updated: model.last_updated,
        resolve_before: model.resolve_before,
    })
}

fn device_from_model(model: device::Model, issues: Vec<DeviceIssue>) -> Device {
    Device {
        id: i64::from(model.id),
        serial: model.serial,
        platform: model.platform,
        public_key: model.public_key,
        username: model.username,
        ipv4: model.ipv4,
        healthy: model.healthy,
        issues,
        last_updated: model.last_updated,
    }
}

fn gateway_from_model(model: gateway::Model) -> Result<Gateway, StoreError> {
    Ok(Gateway {
        name: model.name,
        public_key: model.public_key,
        endpoint: model.endpoint,
        ipv4: model.ipv4,
        ipv6: model.ipv6,
        routes_ipv4: serde_json::from_str(&model.routes_ipv4)?,
        routes_ipv6: serde_json::from_str(&model.routes_ipv6)?,
        access_group_ids: serde_json::from_str(&model.access_group_ids)?,
        requires_privileged_access: model.requires_privileged_access,
        password_hash: model.password_hash,
        healthy: false,
    })
}

fn gateway_to_active(gateway: &Gateway) -> Result<gateway::ActiveModel, StoreError> {
    Ok(gateway::ActiveModel {
        name: Set(gateway.name.clone()),
        public_key: Set(gateway.public_key.clone()),
        endpoint: Set(gateway.endpoint.clone()),
        ipv4: Set(gateway.ipv4.clone()),
        ipv6: Set(gateway.ipv6.clone()),
        routes_ipv4: Set(serde_json::to_string(&gateway.routes_ipv4)?),
        routes_ipv6: Set(serde_json::to_string(&gateway.routes_ipv6)?),
        access_group_ids: Set(serde_json::to_string(&gateway.access_group_ids)?),
        requires_privileged_access: Set(gateway.requires_privileged_access),
        password_hash: Set(gateway.password_hash.clone()),
    })
}

fn session_from_model(model: session::Model, device: Device) -> Result<Session, StoreError> {
    Ok(Session {
        key: model.key,
        device,
        object_id: model.object_id,
        groups: serde_json::from_str(&model.groups)?,
        expiry: model.expiry,
    })
}

async fn load_issues<C: ConnectionTrait>(
    conn: &C,
    device_id: i32,
) -> Result<Vec<DeviceIssue>, StoreError> {
    device_issue::Entity::find()
        .filter(device_issue::Column::DeviceId.eq(device_id))
        .order_by_asc(device_issue::Column::Id)
        .all(conn)
        .await?
        .into_iter()
        .map(issue_from_model)
        .collect()
}

async fn load_device<C: ConnectionTrait>(conn: &C, id: i32) -> Result<Device, StoreError> {
    let model = device::Entity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("device {}", id)))?;
    let issues = load_issues(conn, model.id).await?;
    Ok(device_from_model(model, issues))
}

async fn load_all_devices<C: ConnectionTrait>(conn: &C) -> Result<Vec<Device>, StoreError> {
    let mut issues: HashMap<i32, Vec<DeviceIssue>> = HashMap::new();
    for model in device_issue::Entity::find()
        .order_by_asc(device_issue::Column::Id)
        .all(conn)
        .await?
    {
        let device_id = model.device_id;
        issues
            .entry(device_id)
            .or_default()
            .push(issue_from_model(model)?);
    }

    Ok(device::Entity::find()
        .order_by_asc(device::Column::Id)
        .all(conn)
        .await?
        .into_iter()
        .map(|model| {
            let device_issues = issues.remove(&model.id).unwrap_or_default();
            device_from_model(model, device_issues)
        })
        .collect())
}

#[async_trait]
impl Store for DbStore {
    async fn read_device_by_id(&self, id: i64) -> Result<Device, StoreError> {
        load_device(&self.db, db_id(id)?).await
    }

    async fn read_device_by_serial_platform(
        &self,
        serial: &str,
        platform: &str,
    ) -> Result<Device, StoreError> {
        let model = device::Entity::find()
            .filter(device::Column::Serial.eq(serial))
            .filter(device::Column::Platform.eq(platform))
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                StoreError::NotFound(format!("device with serial {} on {}", serial, platform))
            })?;
        let issues = load_issues(&self.db, model.id).await?;
        Ok(device_from_model(model, issues))
    }

    async fn read_devices(&self) -> Result<Vec<Device>, StoreError> {
        load_all_devices(&self.db).await
    }

    async fn enroll_device(&self, new: NewDevice) -> Result<Device, StoreError> {
        let txn = self.db.begin().await?;

        let existing = device::Entity::find()
            .filter(device::Column::Serial.eq(new.serial.as_str()))
            .filter(device::Column::Platform.eq(new.platform.as_str()))
            .one(&txn)
            .await?;

        let id = match existing {
            Some(model) => {
                let id = model.id;
                let mut active: device::ActiveModel = model.into();
                active.public_key = Set(new.public_key);
                active.username = Set(new.username);
                active.update(&txn).await?;
                tracing::info!(device_id = id, serial = %new.serial, "Re-enrolled existing device");
                id
            }
            None => {
                let taken: Vec<String> = device::Entity::find()
                    .all(&txn)
                    .await?
                    .into_iter()
                    .map(|d| d.ipv4)
                    .collect();
                let ipv4 = next_free_ipv4(
                    self.device_network,
                    taken.iter().map(String::as_str),
                    &self.reserved,
                )
                .ok_or(StoreError::AddressSpaceExhausted(self.device_network))?;

                let inserted = device::ActiveModel {
                    id: NotSet,
                    serial: Set(new.serial.clone()),
                    platform: Set(new.platform),
                    public_key: Set(new.public_key),
                    username: Set(new.username),
                    ipv4: Set(ipv4.to_string()),
                    healthy: Set(new.healthy),
                    last_updated: Set(None),
                }
                .insert(&txn)
                .await?;
                tracing::info!(device_id = inserted.id, serial = %new.serial, ipv4 = %ipv4, "Enrolled new device");
                inserted.id
            }
        };

        let device = load_device(&txn, id).await?;
        txn.commit().await?;
        Ok(device)
    }

    async fn update_device_health(
        &self,
        id: i64,
        healthy: bool,
        issues: &[DeviceIssue],
    ) -> Result<Device, StoreError> {
        let id = db_id(id)?;
        let txn = self.db.begin().await?;

        let model = device::Entity::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("device {}", id)))?;

        let mut active: device::ActiveModel = model.into();
        active.healthy = Set(healthy);
        active.last_updated = Set(Some(Utc::now()));
        active.update(&txn).await?;

        device_issue::Entity::delete_many()
            .filter(device_issue::Column::DeviceId.eq(id))
            .exec(&txn)
            .await?;

        for issue in issues {
            device_issue::ActiveModel {
                id: NotSet,
                device_id: Set(id),
                title: Set(issue.title.clone()),
                message: Set(issue.message.clone()),
                severity: Set(severity_name(issue.severity).to_string()),
                detected_at: Set(issue.detected_at),
                last_updated: Set(issue.last_updated),
                resolve_before: Set(issue.resolve_before),
            }
            .insert(&txn)
            .await?;
        }

        let device = load_device(&txn, id).await?;
        txn.commit().await?;
        Ok(device)
    }

    async fn read_gateways(&self) -> Result<Vec<Gateway>, StoreError> {
        gateway::Entity::find()
            .order_by_asc(gateway::Column::Name)
            .all(&self.db)
            .await?
            .into_iter()
            .map(gateway_from_model)
            .collect()
    }

    async fn read_gateway(&self, name: &str) -> Result<Gateway, StoreError> {
        let model = gateway::Entity::find_by_id(name.to_string())
            .one(&self.db)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("gateway {}", name)))?;
        gateway_from_model(model)
    }

    async fn add_gateway(&self, gateway: &Gateway) -> Result<(), StoreError> {
        gateway_to_active(gateway)?.insert(&self.db).await?;
        Ok(())
    }

    async fn update_gateway(&self, gateway: &Gateway) -> Result<(), StoreError> {
        let exists = gateway::Entity::find_by_id(gateway.name.clone())
            .one(&self.db)
            .await?
            .is_some();
        if !exists {
            return Err(StoreError::NotFound(format!("gateway {}", gateway.name)));
        }

        gateway_to_active(gateway)?.update(&self.db).await?;
        Ok(())
    }

    async fn add_session(&self, session: &Session) -> Result<(), StoreError> {
        let device_id = db_id(session.device.id)?;
        let txn = self.db.begin().await?;

        session::Entity::delete_many()
            .filter(
                Condition::any()
                    .add(session::Column::DeviceId.eq(device_id))
                    .add(session::Column::Key.eq(session.key.as_str())),
            )
            .exec(&txn)
            .await?;

        session::ActiveModel {
            key: Set(session.key.clone()),
            device_id: Set(device_id),
            object_id: Set(session.object_id.clone()),
            groups: Set(serde_json::to_string(&session.groups)?),
            expiry: Set(session.expiry),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        Ok(())
    }

    async fn read_session(&self, key: &str) -> Result<Session, StoreError> {
        let model = session::Entity::find_by_id(key.to_string())
            .one(&self.db)
            .await?
            .ok_or_else(|| StoreError::NotFound("session".to_string()))?;
        let device = load_device(&self.db, model.device_id).await?;
        session_from_model(model, device)
    }

    async fn read_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let devices: HashMap<i64, Device> = load_all_devices(&self.db)
            .await?
            .into_iter()
            .map(|d| (d.id, d))
            .collect();

        let mut sessions = Vec::new();
        for model in session::Entity::find().all(&self.db).await? {
            match devices.get(&i64::from(model.device_id)) {
                Some(device) => sessions.push(session_from_model(model, device.clone())?),
                None => {
                    tracing::warn!(device_id = model.device_id, "Session references missing device")
                }
            }
        }
        Ok(sessions)
    }

    async fn remove_expired_sessions(&self) -> Result<u64, StoreError> {
        let result = session::Entity::delete_many()
            .filter(session::Column::Expiry.lte(Utc::now()))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
