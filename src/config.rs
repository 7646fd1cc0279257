use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration of a worker process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the control surface listens on.
    pub listen_addr: SocketAddr,
    /// Root of the job store; one sub-directory per job.
    pub store_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8580)),
            store_dir: PathBuf::from("jobs"),
        }
    }
}

impl ServerConfig {
    pub fn new(listen_addr: SocketAddr, store_dir: impl Into<PathBuf>) -> Self {
        Self {
            listen_addr,
            store_dir: store_dir.into(),
        }
    }
}

/// Configuration of the control client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Worker address, with or without an `http://` scheme.
    pub addr: String,
    pub connect_timeout: Duration,
    /// Whole-request limit. `None` by default because starting a job waits
    /// for the run to end.
    pub request_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: "http://127.0.0.1:8580".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: None,
        }
    }
}

impl ClientConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Default::default()
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_default() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:8580");
        assert_eq!(cfg.store_dir, PathBuf::from("jobs"));
    }

    #[test]
    fn server_config_new() {
        let addr: SocketAddr = "0.0.0.0:9000".parse().unwrap();
        let cfg = ServerConfig::new(addr, "/var/lib/bench");
        assert_eq!(cfg.listen_addr, addr);
        assert_eq!(cfg.store_dir, PathBuf::from("/var/lib/bench"));
    }

    #[test]
    fn client_config_default_has_no_request_timeout() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.addr, "http://127.0.0.1:8580");
        assert_eq!(cfg.connect_timeout, Duration::from_secs(5));
        assert!(cfg.request_timeout.is_none());
    }

    #[test]
    fn client_config_with_request_timeout() {
        let cfg = ClientConfig::new("10.0.0.2:8580").with_request_timeout(Duration::from_secs(30));
        assert_eq!(cfg.addr, "10.0.0.2:8580");
        assert_eq!(cfg.request_timeout, Some(Duration::from_secs(30)));
    }
}
