//! Initial schema: devices, their issues, gateways and sessions

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Device::Table)
                    .if_not_exists()
                    .col(pk_auto(Device::Id))
                    .col(string_len(Device::Serial, 255).not_null())
                    .col(string_len(Device::Platform, 32).not_null())
                    .col(string_len(Device::PublicKey, 255).not_null().unique_key())
                    .col(string_len(Device::Username, 255).not_null())
                    .col(string_len(Device::Ipv4, 64).not_null().unique_key())
                    .col(boolean(Device::Healthy).not_null().default(false))
                    .col(timestamp_with_time_zone_null(Device::LastUpdated))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_device_serial_platform")
                    .table(Device::Table)
                    .col(Device::Serial)
                    .col(Device::Platform)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DeviceIssue::Table)
                    .if_not_exists()
                    .col(pk_auto(DeviceIssue::Id))
                    .col(integer(DeviceIssue::DeviceId).not_null())
                    .col(string_len(DeviceIssue::Title, 255).not_null())
                    .col(text(DeviceIssue::Message).not_null())
                    .col(string_len(DeviceIssue::Severity, 16).not_null())
                    .col(timestamp_with_time_zone(DeviceIssue::DetectedAt).not_null())
                    .col(timestamp_with_time_zone(DeviceIssue::LastUpdated).not_null())
                    .col(timestamp_with_time_zone(DeviceIssue::ResolveBefore).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_device_issue_device_id")
                            .from(DeviceIssue::Table, DeviceIssue::DeviceId)
                            .to(Device::Table, Device::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Gateway::Table)
                    .if_not_exists()
                    .col(string_len(Gateway::Name, 255).not_null().primary_key())
                    .col(string_len(Gateway::PublicKey, 255).not_null().unique_key())
                    .col(string_len(Gateway::Endpoint, 255).not_null())
                    .col(string_len(Gateway::Ipv4, 64).not_null())
                    .col(string_len(Gateway::Ipv6, 64).not_null().default(""))
                    .col(text(Gateway::RoutesIpv4).not_null())
                    .col(text(Gateway::RoutesIpv6).not_null())
                    .col(text(Gateway::AccessGroupIds).not_null())
                    .col(
                        boolean(Gateway::RequiresPrivilegedAccess)
                            .not_null()
                            .default(false),
                    )
                    .col(string_len(Gateway::PasswordHash, 255).not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Session::Table)
                    .if_not_exists()
                    .col(string_len(Session::Key, 255).not_null().primary_key())
                    .col(integer(Session::DeviceId).not_null().unique_key())
                    .col(string_len(Session::ObjectId, 255).not_null())
                    .col(text(Session::Groups).not_null())
                    .col(timestamp_with_time_zone(Session::Expiry).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_session_device_id")
                            .from(Session::Table, Session::DeviceId)
                            .to(Device::Table, Device::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Session::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Gateway::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(DeviceIssue::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Device::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Device {
    Table,
    Id,
    Serial,
    Platform,
    PublicKey,
    Username,
    Ipv4,
    Healthy,
    LastUpdated,
}

#[derive(DeriveIden)]
enum DeviceIssue {
    Table,
    Id,
    DeviceId,
    Title,
    Message,
    Severity,
    DetectedAt,
    LastUpdated,
    ResolveBefore,
}

#[derive(DeriveIden)]
enum Gateway {
    Table,
    Name,
    PublicKey,
    Endpoint,
    Ipv4,
    Ipv6,
    RoutesIpv4,
    RoutesIpv6,
    AccessGroupIds,
    RequiresPrivilegedAccess,
    PasswordHash,
}

#[derive(DeriveIden)]
enum Session {
    Table,
    Key,
    DeviceId,
    ObjectId,
    Groups,
    Expiry,
}
