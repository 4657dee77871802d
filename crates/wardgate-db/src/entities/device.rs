//! Enrolled devices

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "device")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub serial: String,

    pub platform: String,

    /// WireGuard public key
    #[sea_orm(unique)]
    pub public_key: String,

    pub username: String,

    /// Tunnel address allocated at enrollment
    #[sea_orm(unique)]
    pub ipv4: String,

    pub healthy: bool,

    /// Last time the health checker reported on this device
    pub last_updated: Option<ChronoDateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::device_issue::Entity")]
    DeviceIssue,

    #[sea_orm(has_many = "super::session::Entity")]
    Session,
}

impl Related<super::device_issue::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DeviceIssue.def()
    }
}

impl Related<super::session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Session.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
