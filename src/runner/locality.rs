use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;

use tracing::debug;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Names and addresses this machine answers to. Detected once per fleet
/// load; each node caches its own verdict for its lifetime.
#[derive(Clone, Debug, Default)]
pub struct LocalIdentity {
    names: HashSet<String>,
    addrs: HashSet<IpAddr>,
}

impl LocalIdentity {
    pub async fn detect() -> Self {
        let mut names: HashSet<String> = ["localhost", "127.0.0.1", "::1"]
            .into_iter()
            .map(String::from)
            .collect();
        let mut addrs = HashSet::new();

        if let Some(hostname) = own_hostname() {
            addrs.extend(resolve(&hostname).await);
            if let Some((short, _)) = hostname.split_once('.') {
                names.insert(short.to_string());
            }
            names.insert(hostname);
        }

        debug!(?names, ?addrs, "detected local identity");
        Self { names, addrs }
    }

    pub fn from_parts(
        names: impl IntoIterator<Item = String>,
        addrs: impl IntoIterator<Item = IpAddr>,
    ) -> Self {
        Self {
            names: names.into_iter().collect(),
            addrs: addrs.into_iter().collect(),
        }
    }

    pub async fn is_local(&self, host: &str) -> bool {
        if self.names.contains(host) {
            return true;
        }
        if let Ok(ip) = host.parse::<IpAddr>() {
            return ip.is_loopback() || self.addrs.contains(&ip);
        }
        resolve(host)
            .await
            .iter()
            .any(|ip| ip.is_loopback() || self.addrs.contains(ip))
    }
}

fn own_hostname() -> Option<String> {
    hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().trim().to_string())
        .filter(|h| !h.is_empty())
}

async fn resolve(host: &str) -> Vec<IpAddr> {
    match tokio::time::timeout(LOOKUP_TIMEOUT, tokio::net::lookup_host((host, 0))).await {
        Ok(Ok(addrs)) => addrs.map(|a| a.ip()).collect(),
        _ => Vec::new(),
    }
}
