//! Server configuration

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Approvals server
#[derive(Parser, Debug, Clone)]
#[command(name = "approvals")]
#[command(about = "Multi-step approval workflow server")]
pub struct ServerConfig {
    /// SQLite connection string
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:approvals.db?mode=rwc")]
    pub database_url: String,

    /// Address to listen on
    #[arg(long = "bind", env = "BIND_ADDR", default_value = "0.0.0.0:3000")]
    pub bind: SocketAddr,

    /// Seconds between background escalation passes (0 disables)
    #[arg(long, env = "ESCALATION_INTERVAL_SECS", default_value_t = 300)]
    pub escalation_interval_secs: u64,

    /// JSON file of workflow templates to install
    #[arg(long, env = "APPROVALS_CATALOG")]
    pub catalog: Option<PathBuf>,

    /// JSON seed for the person/entity directory
    #[arg(long, env = "APPROVALS_DIRECTORY")]
    pub directory: Option<PathBuf>,
}

impl ServerConfig {
    pub fn escalation_interval(&self) -> Option<Duration> {
        (self.escalation_interval_secs > 0)
            .then(|| Duration::from_secs(self.escalation_interval_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::parse_from(["approvals"]);
        assert_eq!(config.bind.port(), 3000);
        assert_eq!(config.escalation_interval(), Some(Duration::from_secs(300)));
        assert!(config.catalog.is_none());
    }

    #[test]
    fn test_zero_interval_disables_escalation() {
        let config = ServerConfig::parse_from(["approvals", "--escalation-interval-secs", "0"]);
        assert_eq!(config.escalation_interval(), None);
    }

    #[test]
    fn test_catalog_path() {
        let config = ServerConfig::parse_from([
            "approvals",
            "--catalog",
            "/etc/approvals/catalog.json",
            "--bind",
            "127.0.0.1:8080",
        ]);
        assert_eq!(
            config.catalog,
            Some(PathBuf::from("/etc/approvals/catalog.json"))
        );
        assert_eq!(config.bind.port(), 8080);
    }
}
