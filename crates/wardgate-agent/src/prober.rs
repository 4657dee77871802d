//! Background gateway liveness probing

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use wardgate_proto::{Gateway, GATEWAY_PROBE_PORT};

use crate::status::StatusFanout;

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub initial_delay: Duration,
    pub interval: Duration,
    pub timeout: Duration,
    pub port: u16,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            interval: Duration::from_secs(20),
            timeout: Duration::from_secs(2),
            port: GATEWAY_PROBE_PORT,
        }
    }
}

/// A running prober; stops when dropped.
pub struct Prober {
    cancel: CancellationToken,
}

impl Prober {
    pub fn spawn(
        gateways: Vec<Gateway>,
        status: Arc<StatusFanout>,
        settings: ProbeSettings,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        tokio::spawn(probe_loop(gateways, status, settings, cancel.clone()));
        Self { cancel }
    }
}

impl Drop for Prober {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn probe_loop(
    gateways: Vec<Gateway>,
    status: Arc<StatusFanout>,
    settings: ProbeSettings,
    cancel: CancellationToken,
) {
    let mut wait = settings.initial_delay;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }
        wait = settings.interval;

        let results = probe_all(&gateways, &settings).await;
        if cancel.is_cancelled() {
            return;
        }
        status.update(|s| {
            for gateway in s.gateways.iter_mut() {
                if let Some(healthy) = results.get(&gateway.name) {
                    gateway.healthy = *healthy;
                }
            }
        });
    }
}

/// Probe every gateway concurrently, keyed by gateway name
pub async fn probe_all(gateways: &[Gateway], settings: &ProbeSettings) -> HashMap<String, bool> {
    let probes = gateways.iter().map(|gateway| async move {
        let healthy = probe(&gateway.ipv4, settings.port, settings.timeout).await;
        if healthy != gateway.healthy {
            tracing::debug!(gateway = %gateway.name, healthy, "Gateway health changed");
        }
        (gateway.name.clone(), healthy)
    });
    futures::future::join_all(probes).await.into_iter().collect()
}

async fn probe(host: &str, port: u16, timeout: Duration) -> bool {
    if host.is_empty() {
        return false;
    }
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use wardgate_proto::{AgentState, AgentStatus};

    fn gateway(name: &str) -> Gateway {
        Gateway {
            name: name.to_string(),
            ipv4: "127.0.0.1".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_probe_all_reports_reachability() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let settings = ProbeSettings {
            port,
            timeout: Duration::from_millis(500),
            ..Default::default()
        };

        let mut unreachable = gateway("gw-down");
        unreachable.ipv4 = String::new();
        let results = probe_all(&[gateway("gw-up"), unreachable], &settings).await;

        assert_eq!(results.get("gw-up"), Some(&true));
        assert_eq!(results.get("gw-down"), Some(&false));
    }

    #[tokio::test]
    async fn test_prober_updates_status_snapshot() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let status = Arc::new(StatusFanout::new());
        let mut snapshot = AgentStatus::new(AgentState::Connected);
        snapshot.gateways = vec![gateway("gw-1")];
        status.update_status(snapshot);

        let parent = CancellationToken::new();
        let _prober = Prober::spawn(
            vec![gateway("gw-1")],
            status.clone(),
            ProbeSettings {
                port,
                ..Default::default()
            },
            &parent,
        );

        tokio::time::timeout(Duration::from_secs(5), async {
            while !status.current().gateways[0].healthy {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("gateway never marked healthy");
    }
}
