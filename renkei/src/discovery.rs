//! Outbound service-discovery contract.
//!
//! On start-up the core registers `(service_name, version, port)` with the
//! platform's discovery component, then heartbeats on a fixed interval from
//! a background task, and deregisters on shutdown. The discovery component
//! being down never prevents local operation: every failure here is a log
//! line, not an error.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Discovery client settings.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Base URL of the discovery service, e.g. `http://127.0.0.1:8090`.
    pub endpoint: String,
    /// Name this process registers under.
    pub service_name: String,
    /// Version string reported on registration.
    pub version: String,
    /// Port this process listens on.
    pub port: u16,
    /// Heartbeat interval.
    pub heartbeat_interval: Duration,
}

impl DiscoveryConfig {
    /// Config with the default 10-second heartbeat.
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        service_name: impl Into<String>,
        version: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            service_name: service_name.into(),
            version: version.into(),
            port,
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Serialize)]
struct Registration<'a> {
    name: &'a str,
    version: &'a str,
    port: u16,
}

/// Client for the discovery component.
#[derive(Clone)]
pub struct DiscoveryClient {
    config: Arc<DiscoveryConfig>,
    client: reqwest::Client,
}

impl std::fmt::Debug for DiscoveryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryClient")
            .field("config", &self.config)
            .finish()
    }
}

impl DiscoveryClient {
    /// Create a client.
    #[must_use]
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config: Arc::new(config),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
        }
    }

    fn services_url(&self) -> String {
        format!("{}/v1/services", self.config.endpoint)
    }

    /// Register this process. Logs and carries on when discovery is down.
    pub async fn register(&self) {
        let body = Registration {
            name: &self.config.service_name,
            version: &self.config.version,
            port: self.config.port,
        };
        match self.client.post(self.services_url()).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                info!(service = %self.config.service_name, "registered with discovery");
            }
            Ok(response) => {
                warn!(status = %response.status(), "discovery rejected registration");
            }
            Err(err) => {
                warn!(error = %err, "discovery unreachable, continuing unregistered");
            }
        }
    }

    /// Send one heartbeat.
    async fn heartbeat(&self) {
        let url = format!("{}/{}/heartbeat", self.services_url(), self.config.service_name);
        match self.client.post(url).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("heartbeat acknowledged");
            }
            Ok(response) => warn!(status = %response.status(), "heartbeat rejected"),
            Err(err) => warn!(error = %err, "heartbeat failed"),
        }
    }

    /// Deregister this process; called on shutdown.
    pub async fn deregister(&self) {
        let url = format!("{}/{}", self.services_url(), self.config.service_name);
        match self.client.delete(url).send().await {
            Ok(response) if response.status().is_success() => {
                info!(service = %self.config.service_name, "deregistered from discovery");
            }
            Ok(response) => warn!(status = %response.status(), "deregistration rejected"),
            Err(err) => warn!(error = %err, "deregistration failed"),
        }
    }

    /// Register, then heartbeat forever on the configured interval.
    ///
    /// Abort the returned handle (or drop the runtime) to stop; call
    /// [`DiscoveryClient::deregister`] separately during shutdown.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.register().await;
            let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
            // The first tick fires immediately; registration just happened.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.heartbeat().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_body_shape() {
        let body = Registration {
            name: "agent-core",
            version: "0.4.2",
            port: 8094,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["name"], "agent-core");
        assert_eq!(json["port"], 8094);
    }

    #[tokio::test]
    async fn unreachable_discovery_does_not_error() {
        // Nothing listens here; all three calls must come back quietly.
        let client = DiscoveryClient::new(DiscoveryConfig::new(
            "http://127.0.0.1:1",
            "agent-core",
            "0.0.0",
            0,
        ));
        client.register().await;
        client.heartbeat().await;
        client.deregister().await;
    }

    #[tokio::test]
    async fn spawned_heartbeat_can_be_aborted() {
        let client = DiscoveryClient::new(DiscoveryConfig {
            heartbeat_interval: Duration::from_millis(10),
            ..DiscoveryConfig::new("http://127.0.0.1:1", "agent-core", "0.0.0", 0)
        });
        let handle = client.spawn();
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
    }
}
