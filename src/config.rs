use std::{env, net::SocketAddr};

use anyhow::Result;
use blob_store::BlobStorageConfig;
use figment::{
    providers::{Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub state_store_path: String,
    pub blob_storage: BlobStorageConfig,
    /// Digest used for content checksums. Resolved once at startup; an
    /// unknown name is fatal.
    pub checksum_algorithm: String,
    /// Directory for the temp files of the spooled upload strategy.
    /// Defaults to the system temp dir.
    pub spool_path: Option<String>,
    pub structured_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let state_store_path = env::current_dir()
            .expect("current dir is accessible")
            .join("filestore_storage/state");
        ServerConfig {
            listen_addr: "0.0.0.0:8900".to_string(),
            state_store_path: state_store_path.display().to_string(),
            blob_storage: Default::default(),
            checksum_algorithm: "sha-256".to_string(),
            spool_path: None,
            structured_logging: false,
        }
    }
}

impl ServerConfig {
    pub fn from_path(path: &str) -> Result<ServerConfig> {
        let config_str = std::fs::read_to_string(path)?;
        let config: ServerConfig = Figment::new().merge(Yaml::string(&config_str)).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.blob_storage.path.is_none() {
            return Err(anyhow::anyhow!("blob storage path must be configured"));
        }
        if self.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(anyhow::anyhow!(
                "invalid listen address: {}",
                self.listen_addr
            ));
        }
        Ok(())
    }
}
