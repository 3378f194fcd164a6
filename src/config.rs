use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "piazza", about = "A reward-based social network server")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub reward: RewardConfig,
    pub beacon: BeaconConfig,
    pub persistence: PersistenceConfig,
    pub auth: AuthConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Reactor threads the acceptor shards connections across.
    pub reactors: usize,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RewardConfig {
    pub period_secs: u64,
    /// Author's fraction of each post reward; the rest goes to curators.
    pub author_share: f64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct BeaconConfig {
    /// Where reward-cycle markers are fired (UDP, best-effort).
    pub target: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PersistenceConfig {
    pub path: Option<PathBuf>,
    pub period_secs: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub hash_cost: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7474,
            reactors: 4,
        }
    }
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            period_secs: 60,
            author_share: 0.7,
        }
    }
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            target: "239.255.32.32:44000".to_string(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: None,
            period_secs: 30,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            hash_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }

        // Resolve paths relative to data dir
        if config.persistence.path.is_none() {
            config.persistence.path = Some(data_dir.join("state.json"));
        }

        if !(0.0..=1.0).contains(&config.reward.author_share) {
            anyhow::bail!(
                "reward.author_share must be within [0, 1], got {}",
                config.reward.author_share
            );
        }
        if config.server.reactors == 0 {
            anyhow::bail!("server.reactors must be at least 1");
        }

        Ok(config)
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .expect("Could not determine home directory")
                .join(".piazza")
        })
    }

    pub fn state_path(&self) -> &PathBuf {
        self.persistence.path.as_ref().unwrap()
    }

    pub fn beacon_addr(&self) -> anyhow::Result<SocketAddr> {
        self.beacon
            .target
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid beacon target {:?}", self.beacon.target))
    }

    pub fn reward_period(&self) -> Duration {
        Duration::from_secs(self.reward.period_secs.max(1))
    }

    pub fn snapshot_period(&self) -> Duration {
        Duration::from_secs(self.persistence.period_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(data_dir: Option<PathBuf>) -> Cli {
        Cli {
            config: None,
            host: None,
            port: None,
            data_dir,
        }
    }

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 7474);
        assert_eq!(config.server.reactors, 4);
        assert_eq!(config.reward.period_secs, 60);
        assert!((config.reward.author_share - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.persistence.period_secs, 30);
        assert!(config.persistence.path.is_none());
        assert_eq!(config.auth.hash_cost, bcrypt::DEFAULT_COST);
    }

    #[test]
    fn data_dir_uses_cli_override() {
        let cli = cli(Some(PathBuf::from("/tmp/test-piazza")));
        assert_eq!(Config::data_dir(&cli), PathBuf::from("/tmp/test-piazza"));
    }

    #[test]
    fn data_dir_defaults_to_home_dot_piazza() {
        let dir = Config::data_dir(&cli(None));
        assert!(dir.ends_with(".piazza"));
    }

    #[test]
    fn load_with_no_config_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load(&cli(Some(tmp.path().to_path_buf()))).unwrap();
        assert_eq!(config.server.port, 7474);
        assert_eq!(config.state_path(), &tmp.path().join("state.json"));
        config.beacon_addr().unwrap();
    }

    #[test]
    fn load_applies_cli_overrides() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cli = cli(Some(tmp.path().to_path_buf()));
        cli.host = Some("127.0.0.1".to_string());
        cli.port = Some(8080);
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn load_reads_toml_file() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(
            &config_path,
            r#"
[server]
host = "192.168.1.1"
port = 9000
reactors = 2

[reward]
period_secs = 5
author_share = 0.5

[auth]
hash_cost = 6
"#,
        )
        .unwrap();

        let mut cli = cli(Some(tmp.path().to_path_buf()));
        cli.config = Some(config_path);
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.server.host, "192.168.1.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.reactors, 2);
        assert_eq!(config.reward.period_secs, 5);
        assert!((config.reward.author_share - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.auth.hash_cost, 6);
    }

    #[test]
    fn cli_overrides_beat_toml_values() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(
            &config_path,
            r#"
[server]
host = "192.168.1.1"
port = 9000
"#,
        )
        .unwrap();

        let mut cli = cli(Some(tmp.path().to_path_buf()));
        cli.config = Some(config_path);
        cli.host = Some("10.0.0.1".to_string());
        cli.port = Some(4000);
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.server.host, "10.0.0.1");
        assert_eq!(config.server.port, 4000);
    }

    #[test]
    fn load_rejects_out_of_range_author_share() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(&config_path, "[reward]\nauthor_share = 1.5\n").unwrap();
        let mut cli = cli(Some(tmp.path().to_path_buf()));
        cli.config = Some(config_path);
        assert!(Config::load(&cli).is_err());
    }

    #[test]
    fn load_rejects_zero_reactors() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(&config_path, "[server]\nreactors = 0\n").unwrap();
        let mut cli = cli(Some(tmp.path().to_path_buf()));
        cli.config = Some(config_path);
        assert!(Config::load(&cli).is_err());
    }
}
