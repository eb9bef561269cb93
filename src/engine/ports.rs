//! Port allocation

use tokio::net::TcpStream;

use crate::errors::ManagerError;
use crate::storage::config::PortsConfig;

/// Whether nothing is accepting connections on `127.0.0.1:<port>`.
///
/// A plain TCP dial is the authoritative liveness test; trying to bind the
/// port instead gives false negatives on some platforms.
pub async fn port_free(port: u16) -> bool {
    match TcpStream::connect(("127.0.0.1", port)).await {
        Ok(stream) => {
            drop(stream);
            false
        }
        Err(_) => true,
    }
}

/// First port in `low..=high` that is neither tracked in the config nor
/// currently accepting connections.
pub async fn find_unused(config: &PortsConfig, low: u16, high: u16) -> Result<u16, ManagerError> {
    for port in low..=high {
        if config.deploy_at(port).is_none() && port_free(port).await {
            return Ok(port);
        }
    }
    Err(ManagerError::PortExhausted { low, high })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn skips_tracked_and_listening_ports() {
        // Hold a real listener so the dial test sees the port as taken.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken = listener.local_addr().unwrap().port();
        let tracked = taken.saturating_add(1);

        let mut config = PortsConfig::default();
        config.ports.insert(tracked, "tracked".to_string());

        let port = find_unused(&config, taken, taken.saturating_add(20))
            .await
            .unwrap();
        assert_ne!(port, taken);
        assert_ne!(port, tracked);
        assert!(port_free(port).await);
    }

    #[tokio::test]
    async fn exhausted_range_is_an_error() {
        let mut config = PortsConfig::default();
        config.ports.insert(8101, "a".to_string());
        config.ports.insert(8102, "b".to_string());

        let err = find_unused(&config, 8101, 8102).await.unwrap_err();
        assert!(matches!(err, ManagerError::PortExhausted { .. }));
    }
}
