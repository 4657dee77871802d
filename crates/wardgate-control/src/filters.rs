//! Authorization filter pipeline
//!
//! Decides which devices a gateway may peer with. The stages run in a fixed
//! order: privileged, authorized, healthy, unique. Privileged narrows the
//! candidate pool first, so a session that only passes the group check never
//! reaches a privileged gateway.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use wardgate_proto::{Device, Gateway, Session};

use crate::privileged::PrivilegedUser;

pub fn has_intersection(a: &[String], b: &[String]) -> bool {
    a.iter().any(|x| b.contains(x))
}

/// Keep only explicitly granted users when the gateway requires privileged access.
pub fn privileged(
    gateway: &Gateway,
    users: &[PrivilegedUser],
    sessions: Vec<Session>,
) -> Vec<Session> {
    if !gateway.requires_privileged_access {
        return sessions;
    }
    sessions
        .into_iter()
        .filter(|s| users.iter().any(|u| u.user_id == s.object_id))
        .collect()
}

/// Keep sessions sharing at least one group with the gateway
pub fn authorized(gateway: &Gateway, sessions: Vec<Session>) -> Vec<Session> {
    sessions
        .into_iter()
        .filter(|s| has_intersection(&s.groups, &gateway.access_group_ids))
        .collect()
}

pub fn healthy(sessions: Vec<Session>, now: DateTime<Utc>) -> Vec<Session> {
    sessions
        .into_iter()
        .filter(|s| s.device.is_healthy(now))
        .collect()
}

/// One entry per device id; duplicate peers break the WireGuard interface.
pub fn unique(sessions: Vec<Session>) -> Vec<Session> {
    let mut seen = HashSet::new();
    sessions
        .into_iter()
        .filter(|s| seen.insert(s.device.id))
        .collect()
}

/// Run the full pipeline and return the surviving devices ordered by id.
pub fn gateway_devices(
    gateway: &Gateway,
    sessions: Vec<Session>,
    privileged_users: &[PrivilegedUser],
    now: DateTime<Utc>,
) -> Vec<Device> {
    let sessions = privileged(gateway, privileged_users, sessions);
    let sessions = authorized(gateway, sessions);
    let sessions = healthy(sessions, now);
    let sessions = unique(sessions);

    let mut devices: Vec<Device> = sessions.into_iter().map(|s| s.device).collect();
    devices.sort_by_key(|d| d.id);
    devices
}

/// Gateways a session with `groups` may use, with secrets stripped
pub fn gateways_for_groups(gateways: Vec<Gateway>, groups: &[String]) -> Vec<Gateway> {
    gateways
        .into_iter()
        .filter(|g| has_intersection(&g.access_group_ids, groups))
        .map(|g| g.redacted())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use wardgate_proto::{DeviceIssue, Severity};

    fn device(id: i64, healthy: bool) -> Device {
        Device {
            id,
            serial: format!("serial-{}", id),
            platform: "darwin".to_string(),
            public_key: format!("key-{}", id),
            username: "user@example.com".to_string(),
            ipv4: format!("10.255.24.{}", id + 1),
            healthy,
            issues: vec![],
            last_updated: None,
        }
    }

    fn session(key: &str, object_id: &str, device: Device, groups: &[&str]) -> Session {
        Session {
            key: key.to_string(),
            device,
            object_id: object_id.to_string(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
            expiry: Utc::now() + Duration::hours(1),
        }
    }

    fn gateway(groups: &[&str], privileged: bool) -> Gateway {
        Gateway {
            name: "gw".to_string(),
            access_group_ids: groups.iter().map(|g| g.to_string()).collect(),
            requires_privileged_access: privileged,
            ..Default::default()
        }
    }

    #[test]
    fn test_privileged_gateway_excludes_ungranted_member() {
        let gw = gateway(&["g1"], true);
        let sessions = vec![
            session("a", "granted", device(1, true), &["g1"]),
            session("b", "not-granted", device(2, true), &["g1"]),
        ];
        let users = vec![PrivilegedUser {
            user_id: "granted".to_string(),
            expires: Utc::now() + Duration::hours(1),
        }];

        let devices = gateway_devices(&gw, sessions, &users, Utc::now());
        assert_eq!(devices.iter().map(|d| d.id).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_grant_without_group_membership_is_not_enough() {
        let gw = gateway(&["g1"], true);
        let sessions = vec![session("a", "granted", device(1, true), &["other"])];
        let users = vec![PrivilegedUser {
            user_id: "granted".to_string(),
            expires: Utc::now() + Duration::hours(1),
        }];

        assert!(gateway_devices(&gw, sessions, &users, Utc::now()).is_empty());
    }

    #[test]
    fn test_unhealthy_devices_are_dropped() {
        let gw = gateway(&["g1"], false);
        let now = Utc::now();
        let mut overdue = device(2, true);
        overdue.issues.push(DeviceIssue::new(
            "firewall",
            "enable it",
            Severity::Critical,
            now - Duration::minutes(1),
        ));
        let sessions = vec![
            session("a", "u1", device(1, true), &["g1"]),
            session("b", "u2", overdue, &["g1"]),
            session("c", "u3", device(3, false), &["g1"]),
        ];

        let devices = gateway_devices(&gw, sessions, &[], now);
        assert_eq!(devices.iter().map(|d| d.id).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_duplicate_device_yields_one_entry() {
        let gw = gateway(&["g1"], false);
        let sessions = vec![
            session("a", "u1", device(5, true), &["g1"]),
            session("b", "u1", device(5, true), &["g1"]),
        ];

        let devices = gateway_devices(&gw, sessions, &[], Utc::now());
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, 5);
    }

    #[test]
    fn test_output_is_sorted_by_device_id() {
        let gw = gateway(&["g1"], false);
        let sessions = vec![
            session("a", "u1", device(9, true), &["g1"]),
            session("b", "u2", device(3, true), &["g1"]),
            session("c", "u3", device(6, true), &["g1"]),
        ];

        let ids: Vec<i64> = gateway_devices(&gw, sessions, &[], Utc::now())
            .iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec![3, 6, 9]);
    }

    #[test]
    fn test_gateways_for_groups_redacts() {
        let mut gw = gateway(&["g1"], false);
        gw.password_hash = "secret".to_string();
        let other = Gateway {
            name: "other".to_string(),
            access_group_ids: vec!["g2".to_string()],
            ..Default::default()
        };

        let visible = gateways_for_groups(vec![gw, other], &["g1".to_string()]);
        assert_eq!(visible.len(), 1);
        assert!(visible[0].password_hash.is_empty());
    }
}
