//! Gateways

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "gateway")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub name: String,

    #[sea_orm(unique)]
    pub public_key: String,

    pub endpoint: String,

    pub ipv4: String,

    pub ipv6: String,

    /// JSON array of CIDRs
    #[sea_orm(column_type = "Text")]
    pub routes_ipv4: String,

    /// JSON array of CIDRs
    #[sea_orm(column_type = "Text")]
    pub routes_ipv6: String,

    /// JSON array of group ids
    #[sea_orm(column_type = "Text")]
    pub access_group_ids: String,

    pub requires_privileged_access: bool,

    pub password_hash: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
