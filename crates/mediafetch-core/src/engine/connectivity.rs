//! Connectivity probe - answers "is the network usable right now?"
//!
//! Reachability is decided by the OS routing table: connecting an unbound
//! UDP socket resolves a route without sending any packet, and fails when
//! no route to the target exists.

use crate::error::FetchError;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Source of network reachability
pub trait ConnectivityProbe: Send + Sync {
    /// Never fails: a probe that cannot answer reports `false`.
    fn is_reachable(&self) -> bool;
}

/// Probe backed by route lookups to a list of well-known addresses
#[derive(Debug, Clone)]
pub struct RouteProbe {
    targets: Vec<SocketAddr>,
}

impl RouteProbe {
    /// Create a probe from `host:port` strings; unparseable entries are dropped
    pub fn new<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let targets = targets
            .into_iter()
            .filter_map(|t| t.as_ref().parse::<SocketAddr>().ok())
            .collect();
        Self { targets }
    }

    fn has_route(target: &SocketAddr) -> bool {
        let bind: SocketAddr = if target.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };

        UdpSocket::bind(bind)
            .and_then(|socket| socket.connect(target))
            .is_ok()
    }
}

impl Default for RouteProbe {
    fn default() -> Self {
        Self::new(["1.1.1.1:53", "[2606:4700:4700::1111]:53"])
    }
}

impl ConnectivityProbe for RouteProbe {
    fn is_reachable(&self) -> bool {
        // IPv4 first, then IPv6; any routable target is enough
        let reachable = self.targets.iter().any(Self::has_route);
        debug!("Route probe: reachable={}", reachable);
        reachable
    }
}

/// Block until `probe` reports reachable, polling at `interval`
///
/// Returns immediately when the network is already reachable.
pub async fn wait_until_reachable<P: ConnectivityProbe + ?Sized>(
    probe: &P,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<(), FetchError> {
    if probe.is_reachable() {
        return Ok(());
    }

    info!("Waiting for connection to be restored");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            _ = tokio::time::sleep(interval) => {}
        }
        if probe.is_reachable() {
            info!("Connection restored");
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProbe;

    #[test]
    fn test_route_probe_without_targets_fails_closed() {
        let probe = RouteProbe::new(Vec::<String>::new());
        assert!(!probe.is_reachable());
    }

    #[test]
    fn test_route_probe_drops_unparseable_targets() {
        let probe = RouteProbe::new(["not-an-address", "1.1.1.1:53"]);
        assert_eq!(probe.targets.len(), 1);
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_reachable() {
        let probe = ScriptedProbe::new(vec![true]);
        let cancel = CancellationToken::new();

        wait_until_reachable(&probe, Duration::from_secs(60), &cancel)
            .await
            .unwrap();
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test]
    async fn test_wait_polls_until_reachable() {
        let probe = ScriptedProbe::new(vec![false, false, false, true]);
        let cancel = CancellationToken::new();

        wait_until_reachable(&probe, Duration::from_millis(5), &cancel)
            .await
            .unwrap();
        assert_eq!(probe.calls(), 4);
    }

    #[tokio::test]
    async fn test_wait_honours_cancellation() {
        let probe = ScriptedProbe::new(vec![false]);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = wait_until_reachable(&probe, Duration::from_millis(5), &cancel).await;
        assert!(matches!(result, Err(FetchError::Cancelled)));
    }
}
