//! The managed set of hosts and the fleet-wide fan-out operations.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::config::FleetConfig;
use crate::error::{ConfigError, HostListError};
use crate::guard::GuardController;
use crate::models::{FleetOverview, GuardPolicy, NodeSnapshot};
use crate::node::Node;
use crate::nvidia::GpuSampler;
use crate::runner::{
    CommandRunner, LocalIdentity, LocalRunner, RemoteRunner, SimulatedHost, SshConnector,
};

/// Hostnames from a host list: the first token of every non-empty line
/// that does not start with `#`, e.g. `worker-0 slots=8` → `worker-0`.
pub fn parse_host_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_whitespace().next())
        .map(String::from)
        .collect()
}

pub fn read_host_list(path: &Path) -> Result<Vec<String>, HostListError> {
    let text = std::fs::read_to_string(path).map_err(|source| HostListError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_host_list(&text))
}

/// Ordered, uniquely keyed collection of nodes.
pub struct NodeFleet {
    nodes: Vec<Node>,
    max_concurrency: usize,
}

impl NodeFleet {
    /// Build nodes for `hostnames` in order, skipping duplicates. Locality is
    /// decided here, once per node.
    pub async fn load(hostnames: Vec<String>, config: &FleetConfig) -> Result<Self, ConfigError> {
        let policy = config.policy()?;
        let identity = LocalIdentity::detect().await;
        let mut seen = HashSet::new();
        let mut nodes = Vec::with_capacity(hostnames.len());

        for hostname in hostnames {
            if !seen.insert(hostname.clone()) {
                warn!(host = %hostname, "duplicate host in host list, skipping");
                continue;
            }
            let runner: Box<dyn CommandRunner> = if identity.is_local(&hostname).await {
                Box::new(LocalRunner::new())
            } else {
                Box::new(RemoteRunner::new(
                    hostname.clone(),
                    Box::new(SshConnector::new(config.connect_timeout())),
                    config.reconnect_cooldown(),
                ))
            };
            info!(host = %hostname, local = runner.is_local(), "loaded node");
            nodes.push(build_node(hostname, runner, config, policy));
        }

        Ok(Self::from_nodes(nodes, config.max_concurrency))
    }

    /// `count` simulated hosts named `fake-node-<i>`.
    pub fn simulated(count: usize, config: &FleetConfig) -> Result<Self, ConfigError> {
        let policy = config.policy()?;
        let nodes = (0..count)
            .map(|i| {
                let hostname = format!("fake-node-{i}");
                let runner = Box::new(SimulatedHost::new(hostname.clone()));
                build_node(hostname, runner, config, policy)
            })
            .collect();
        Ok(Self::from_nodes(nodes, config.max_concurrency))
    }

    pub fn from_nodes(nodes: Vec<Node>, max_concurrency: usize) -> Self {
        Self {
            nodes,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn hostnames(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.hostname().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Poll every node. Nodes are independent; a slow host only occupies
    /// one slot of the pool.
    pub async fn update(&mut self) {
        let polls: Vec<_> = self.nodes.iter_mut().map(|node| Box::pin(node.update())).collect();
        stream::iter(polls)
            .buffered(self.max_concurrency)
            .collect::<Vec<()>>()
            .await;
    }

    /// Start the guard on `names` (every node when empty). The result covers
    /// every node in the fleet, keyed by hostname.
    pub async fn start_guard(&mut self, names: &[String]) -> BTreeMap<String, bool> {
        let selected = selection(names);
        let actions: Vec<_> = self
            .nodes
            .iter_mut()
            .filter(|node| selects(&selected, node))
            .map(|node| Box::pin(node.start_guard()))
            .collect();
        stream::iter(actions)
            .buffered(self.max_concurrency)
            .collect::<Vec<bool>>()
            .await;

        self.nodes
            .iter()
            .map(|node| (node.hostname().to_string(), node.guard_state().is_running))
            .collect()
    }

    /// Stop the guard on `names` (every node when empty). Each value is
    /// `true` when that node's guard is stopped.
    pub async fn stop_guard(&mut self, names: &[String]) -> BTreeMap<String, bool> {
        let selected = selection(names);
        let actions: Vec<_> = self
            .nodes
            .iter_mut()
            .filter(|node| selects(&selected, node))
            .map(|node| Box::pin(node.stop_guard()))
            .collect();
        stream::iter(actions)
            .buffered(self.max_concurrency)
            .collect::<Vec<bool>>()
            .await;

        self.nodes
            .iter()
            .map(|node| (node.hostname().to_string(), !node.guard_state().is_running))
            .collect()
    }

    pub fn need_guard(&self, names: &[String]) -> BTreeMap<String, bool> {
        let selected = selection(names);
        self.nodes
            .iter()
            .filter(|node| selects(&selected, node))
            .map(|node| (node.hostname().to_string(), node.need_guard()))
            .collect()
    }

    /// Start the guard wherever a reachable node needs one and has none
    /// running. Returns the hostnames acted on.
    pub async fn auto_guard(&mut self) -> Vec<String> {
        let targets: Vec<String> = self
            .nodes
            .iter()
            .filter(|n| n.is_online() && !n.guard_state().is_running && n.need_guard())
            .map(|n| n.hostname().to_string())
            .collect();
        if targets.is_empty() {
            return targets;
        }
        info!(hosts = ?targets, "auto-guard starting guards");
        self.start_guard(&targets).await;
        targets
    }

    pub fn update_guard_policy(&mut self, policy: GuardPolicy) {
        info!(
            interval_minutes = policy.interval_minutes(),
            threshold_w = policy.power_threshold_w(),
            "updating guard policy"
        );
        for node in &mut self.nodes {
            node.set_policy(policy);
        }
    }

    /// Per-node views in load order.
    pub fn snapshot(&self) -> Vec<NodeSnapshot> {
        self.nodes.iter().map(Node::snapshot).collect()
    }

    pub fn overview(&self) -> FleetOverview {
        FleetOverview::from_snapshots(&self.snapshot())
    }

    pub async fn close(&mut self) {
        let closes: Vec<_> = self.nodes.iter_mut().map(|node| Box::pin(node.close())).collect();
        stream::iter(closes)
            .buffered(self.max_concurrency)
            .collect::<Vec<()>>()
            .await;
    }
}

fn build_node(
    hostname: String,
    runner: Box<dyn CommandRunner>,
    config: &FleetConfig,
    policy: GuardPolicy,
) -> Node {
    let timeout = config.command_timeout();
    let guard = GuardController::new(&hostname, &config.guard, timeout);
    Node::new(hostname, runner, GpuSampler::new(timeout), guard, policy)
}

/// `None` selects every node.
fn selection(names: &[String]) -> Option<HashSet<&str>> {
    (!names.is_empty()).then(|| names.iter().map(String::as_str).collect())
}

fn selects(selected: &Option<HashSet<&str>>, node: &Node) -> bool {
    match selected {
        Some(names) => names.contains(node.hostname()),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::config::GuardConfig;
    use crate::runner::testing::FakeHost;

    const BUSY: &str = "0, A100, 60, 99, 70000, 80000, 300.0";
    const IDLE: &str = "0, A100, 30, 0, 0, 80000, 60.0";

    fn config() -> FleetConfig {
        FleetConfig {
            guard: GuardConfig {
                settle_delay_ms: 1000,
                ..GuardConfig::default()
            },
            max_concurrency: 2,
            ..FleetConfig::default()
        }
    }

    fn fleet(hosts: &[(&str, &FakeHost)]) -> NodeFleet {
        let config = config();
        let nodes = hosts
            .iter()
            .map(|(name, host)| {
                build_node(
                    name.to_string(),
                    host.boxed(),
                    &config,
                    config.policy().unwrap(),
                )
            })
            .collect();
        NodeFleet::from_nodes(nodes, config.max_concurrency)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn host_list_takes_first_token_and_skips_comments() {
        let text = "# volcano hosts\n\
                    worker-0 slots=8\n\
                    \n\
                    \tworker-1   slots=8\n\
                    #worker-2 slots=8\n\
                    worker-3";
        assert_eq!(
            parse_host_list(text),
            names(&["worker-0", "worker-1", "worker-3"])
        );
    }

    #[test]
    fn read_host_list_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "a slots=8\nb slots=8").unwrap();
        assert_eq!(read_host_list(file.path()).unwrap(), names(&["a", "b"]));
        assert!(read_host_list(Path::new("/nonexistent/all.host")).is_err());
    }

    #[test(tokio::test)]
    async fn load_deduplicates_and_keeps_order() {
        let fleet = NodeFleet::load(names(&["localhost", "127.0.0.1", "localhost"]), &config())
            .await
            .unwrap();
        assert_eq!(fleet.hostnames(), names(&["localhost", "127.0.0.1"]));
        assert!(fleet.nodes().iter().all(Node::is_local));
    }

    #[test(tokio::test(start_paused = true))]
    async fn start_guard_with_empty_list_targets_every_node() {
        let (a, b, c) = (FakeHost::new(IDLE), FakeHost::new(IDLE), FakeHost::new(IDLE));
        let mut fleet = fleet(&[("h1", &a), ("h2", &b), ("h3", &c)]);

        let result = fleet.start_guard(&[]).await;

        assert_eq!(
            result,
            BTreeMap::from([
                ("h1".to_string(), true),
                ("h2".to_string(), true),
                ("h3".to_string(), true),
            ])
        );
        for host in [&a, &b, &c] {
            assert_eq!(host.with(|s| s.count("bash ")), 1);
        }
    }

    #[test(tokio::test(start_paused = true))]
    async fn start_guard_twice_issues_one_launch() {
        let (a, b) = (FakeHost::new(IDLE), FakeHost::new(IDLE));
        let mut fleet = fleet(&[("h1", &a), ("h2", &b)]);

        let first = fleet.start_guard(&names(&["h1"])).await;
        let second = fleet.start_guard(&names(&["h1"])).await;

        assert_eq!(first, second);
        assert_eq!(second.get("h1"), Some(&true));
        assert_eq!(second.get("h2"), Some(&false));
        assert_eq!(a.with(|s| s.count("bash ")), 1);
        assert_eq!(b.with(|s| s.commands.len()), 0);
    }

    #[test(tokio::test(start_paused = true))]
    async fn stop_guard_reports_stopped_and_survives_failures() {
        let (a, b) = (FakeHost::new(IDLE), FakeHost::new(IDLE));
        a.with(|s| s.guard_running = true);
        b.with(|s| {
            s.guard_running = true;
            s.kill_works = false;
        });
        let mut fleet = fleet(&[("h1", &a), ("h2", &b)]);

        let result = fleet.stop_guard(&[]).await;

        assert_eq!(
            result,
            BTreeMap::from([("h1".to_string(), true), ("h2".to_string(), false)])
        );
    }

    #[test(tokio::test(start_paused = true))]
    async fn unreachable_node_does_not_abort_the_fleet() {
        let (a, b) = (FakeHost::new(BUSY), FakeHost::new(BUSY));
        b.with(|s| s.offline = true);
        let mut fleet = fleet(&[("h1", &a), ("h2", &b)]);

        fleet.update().await;
        let result = fleet.start_guard(&[]).await;

        let snapshot = fleet.snapshot();
        assert_eq!(snapshot[0].gpus.len(), 1);
        assert!(snapshot[0].is_online);
        assert!(snapshot[1].gpus.is_empty());
        assert!(!snapshot[1].is_online);
        assert_eq!(result.get("h1"), Some(&true));
        assert_eq!(result.get("h2"), Some(&false));
    }

    #[test(tokio::test(start_paused = true))]
    async fn auto_guard_targets_idle_online_unguarded_nodes() {
        let busy = FakeHost::new(BUSY);
        let idle = FakeHost::new(IDLE);
        let guarded = FakeHost::new(IDLE);
        guarded.with(|s| s.guard_running = true);
        let offline = FakeHost::new(IDLE);
        let mut fleet = fleet(&[
            ("busy", &busy),
            ("idle", &idle),
            ("guarded", &guarded),
            ("offline", &offline),
        ]);
        fleet.update().await;
        offline.with(|s| s.offline = true);

        assert_eq!(fleet.auto_guard().await, names(&["idle"]));
        assert!(fleet.nodes()[1].guard_state().is_running);
        assert_eq!(busy.with(|s| s.count("bash ")), 0);
        assert_eq!(guarded.with(|s| s.count("bash ")), 0);
    }

    #[test(tokio::test)]
    async fn policy_update_applies_to_every_node() {
        let (a, b) = (FakeHost::new(BUSY), FakeHost::new(IDLE));
        let mut fleet = fleet(&[("h1", &a), ("h2", &b)]);
        fleet.update().await;

        assert_eq!(
            fleet.need_guard(&[]),
            BTreeMap::from([("h1".to_string(), false), ("h2".to_string(), true)])
        );

        fleet.update_guard_policy(GuardPolicy::new(5, 50.0).unwrap());
        assert!(fleet
            .nodes()
            .iter()
            .all(|n| n.policy() == GuardPolicy::new(5, 50.0).unwrap()));
        assert_eq!(
            fleet.need_guard(&names(&["h2"])),
            BTreeMap::from([("h2".to_string(), false)])
        );
    }

    #[test(tokio::test)]
    async fn snapshot_keeps_load_order() {
        let hosts: Vec<FakeHost> = (0..5).map(|_| FakeHost::new(BUSY)).collect();
        let named: Vec<(String, &FakeHost)> = hosts
            .iter()
            .enumerate()
            .map(|(i, h)| (format!("n{}", 4 - i), h))
            .collect();
        let refs: Vec<(&str, &FakeHost)> = named.iter().map(|(n, h)| (n.as_str(), *h)).collect();
        let mut fleet = fleet(&refs);
        fleet.update().await;

        let order: Vec<String> = fleet.snapshot().into_iter().map(|s| s.hostname).collect();
        assert_eq!(order, names(&["n4", "n3", "n2", "n1", "n0"]));
        assert_eq!(fleet.overview().gpus, 5);
    }

    #[test(tokio::test)]
    async fn simulated_fleet_polls() {
        let mut fleet = NodeFleet::simulated(3, &config()).unwrap();
        fleet.update().await;
        let overview = fleet.overview();
        assert_eq!(overview.nodes, 3);
        assert_eq!(overview.gpus, 24);
        assert_eq!(overview.online, 3);
    }

    #[test(tokio::test(start_paused = true))]
    async fn fleet_operations_run_on_spawned_tasks() {
        let (a, b) = (FakeHost::new(IDLE), FakeHost::new(BUSY));
        let fleet = std::sync::Arc::new(tokio::sync::Mutex::new(fleet(&[("h1", &a), ("h2", &b)])));

        let worker = fleet.clone();
        let result = tokio::spawn(async move {
            let mut fleet = worker.lock().await;
            fleet.update().await;
            let started = fleet.start_guard(&names(&["h1"])).await;
            let stopped = fleet.stop_guard(&names(&["h1"])).await;
            fleet.close().await;
            (started, stopped)
        })
        .await
        .unwrap();

        let (started, stopped) = result;
        assert_eq!(started.get("h1"), Some(&true));
        assert_eq!(started.get("h2"), Some(&false));
        assert_eq!(stopped.get("h1"), Some(&true));
        assert_eq!(a.with(|s| s.count("bash ")), 1);
        assert_eq!(fleet.lock().await.overview().gpus, 2);
    }
}
