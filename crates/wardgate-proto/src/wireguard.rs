//! WireGuard interface configuration rendering

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Gateway;

/// Local tunnel interface plus the peers it should talk to
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub private_key: String,
    /// Interface address in CIDR form, e.g. `10.255.24.7/21`
    pub address: String,
    pub listen_port: Option<u16>,
    pub mtu: Option<u16>,
    pub peers: Vec<Gateway>,
}

impl InterfaceConfig {
    pub fn peer_names(&self) -> Vec<&str> {
        self.peers.iter().map(|p| p.name.as_str()).collect()
    }
}

fn write_non_empty(f: &mut fmt::Formatter<'_>, key: &str, value: &str) -> fmt::Result {
    if value.is_empty() {
        return Ok(());
    }
    writeln!(f, "{} = {}", key, value)
}

/// Renders the wg-quick style INI document
impl fmt::Display for InterfaceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[Interface]")?;
        write_non_empty(f, "PrivateKey", &self.private_key)?;
        if let Some(port) = self.listen_port {
            writeln!(f, "ListenPort = {}", port)?;
        }
        if let Some(mtu) = self.mtu {
            writeln!(f, "MTU = {}", mtu)?;
        }
        write_non_empty(f, "Address", &self.address)?;
        writeln!(f)?;

        for peer in &self.peers {
            writeln!(f, "[Peer] # {}", peer.name)?;
            write_non_empty(f, "PublicKey", &peer.public_key)?;
            write_non_empty(f, "AllowedIPs", &peer.allowed_ips().join(","))?;
            write_non_empty(f, "Endpoint", &peer.endpoint)?;
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_interface_with_peer() {
        let config = InterfaceConfig {
            private_key: "cHJpdmF0ZQ==".to_string(),
            address: "10.255.24.7/21".to_string(),
            listen_port: None,
            mtu: Some(1360),
            peers: vec![Gateway {
                name: "gw-oslo".to_string(),
                public_key: "cHVibGlj".to_string(),
                endpoint: "198.51.100.10:51820".to_string(),
                ipv4: "10.255.240.2".to_string(),
                routes_ipv4: vec!["10.0.0.0/24".to_string()],
                ..Default::default()
            }],
        };

        let rendered = config.to_string();
        assert_eq!(
            rendered,
            "[Interface]\n\
             PrivateKey = cHJpdmF0ZQ==\n\
             MTU = 1360\n\
             Address = 10.255.24.7/21\n\
             \n\
             [Peer] # gw-oslo\n\
             PublicKey = cHVibGlj\n\
             AllowedIPs = 10.0.0.0/24,10.255.240.2/32\n\
             Endpoint = 198.51.100.10:51820\n\
             \n"
        );
    }

    #[test]
    fn test_render_skips_empty_fields() {
        let config = InterfaceConfig::default();
        assert_eq!(config.to_string(), "[Interface]\n\n");
    }
}
