//! Time-bounded privileged access grants

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// A user allowed onto a privileged gateway until `expires`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegedUser {
    pub user_id: String,
    pub expires: DateTime<Utc>,
}

/// Source of privileged access grants
pub trait PrivilegedAccess: Send + Sync {
    /// Unexpired grants for `gateway`
    fn privileged_users(&self, gateway: &str) -> Vec<PrivilegedUser>;

    fn grant(&self, gateway: &str, user_id: &str, duration: Duration) -> PrivilegedUser;

    /// Returns whether a grant existed
    fn revoke(&self, gateway: &str, user_id: &str) -> bool;
}

/// In-process grant registry
#[derive(Default)]
pub struct GrantRegistry {
    grants: DashMap<String, Vec<PrivilegedUser>>,
}

impl GrantRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PrivilegedAccess for GrantRegistry {
    fn privileged_users(&self, gateway: &str) -> Vec<PrivilegedUser> {
        let now = Utc::now();
        self.grants
            .get(gateway)
            .map(|users| {
                users
                    .iter()
                    .filter(|u| u.expires > now)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn grant(&self, gateway: &str, user_id: &str, duration: Duration) -> PrivilegedUser {
        let now = Utc::now();
        let user = PrivilegedUser {
            user_id: user_id.to_string(),
            expires: now + duration,
        };

        let mut users = self.grants.entry(gateway.to_string()).or_default();
        users.retain(|u| u.user_id != user_id && u.expires > now);
        users.push(user.clone());

        tracing::info!(gateway, user_id, expires = %user.expires, "Granted privileged access");
        user
    }

    fn revoke(&self, gateway: &str, user_id: &str) -> bool {
        let Some(mut users) = self.grants.get_mut(gateway) else {
            return false;
        };
        let before = users.len();
        users.retain(|u| u.user_id != user_id);
        before != users.len()
    }
}
