//! Outstanding health issues, one row per issue

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "device_issue")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub device_id: i32,

    pub title: String,

    #[sea_orm(column_type = "Text")]
    pub message: String,

    /// `info`, `notice`, `warning`, `danger` or `critical`
    pub severity: String,

    pub detected_at: ChronoDateTimeUtc,

    pub last_updated: ChronoDateTimeUtc,

    pub resolve_before: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::device::Entity",
        from = "Column::DeviceId",
        to = "super::device::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Device,
}

impl Related<super::device::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Device.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
