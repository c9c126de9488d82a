use std::{fs, path::Path};

use crate::models::Config;

const DEFAULT_CONFIG: &str = r#"server_host = "0.0.0.0"
server_port = 5000
upload_dir = "./uploads"
event_log_path = "./events.log"
database_url = "sqlite:./data/index.db"
max_upload_size_mb = 10
rate_limit_requests = 1000
rate_limit_window_secs = 60
strict_subnet = false
# auto_cleanup_days = 30
"#;

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let path = Path::new("config.toml");

        if !path.exists() {
            fs::write(path, DEFAULT_CONFIG)?;
            tracing::info!("Created default config.toml");
        }

        let config_str = fs::read_to_string(path)?;
        Self::parse(&config_str)
    }

    pub fn parse(config_str: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: Config = toml::from_str(config_str)?;
        Ok(config)
    }

    pub fn max_upload_size(&self) -> usize {
        self.max_upload_size_mb * 1024 * 1024
    }
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG).expect("built-in config is valid TOML")
    }
}
