use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,

    // Reservation lifecycle
    pub hold_ttl_minutes: i64,
    pub sweep_interval_seconds: u64,
    pub sweep_batch_size: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        Ok(Self {
            database_url: config.get("database_url")?,
            host: config.get("host").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: config.get("port")?,

            hold_ttl_minutes: config.get("hold_ttl_minutes").unwrap_or(15),
            sweep_interval_seconds: config.get("sweep_interval_seconds").unwrap_or(60),
            sweep_batch_size: config.get("sweep_batch_size").unwrap_or(500),
        })
    }
}
