use secrecy::Secret;
use serde::Deserialize;
use url::Url;

pub const DEFAULT_VERIFICATION_BASE_URL: &str = "https://www.onemapafrica.org/verify";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,

    // Public page scanners land on; card codes are appended as `?id=`
    pub verification_base_url: Url,

    // Asset store for rendered QR images
    pub asset_api_url: String,
    pub asset_api_token: Secret<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        let verification_base_url = config
            .get_string("verification_base_url")
            .unwrap_or_else(|_| DEFAULT_VERIFICATION_BASE_URL.to_string());
        let verification_base_url = Url::parse(&verification_base_url).map_err(|e| {
            config::ConfigError::Message(format!("invalid VERIFICATION_BASE_URL: {}", e))
        })?;

        Ok(Self {
            database_url: config.get("database_url")?,
            host: config.get("host").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: config.get("port")?,

            verification_base_url,

            asset_api_url: config.get("asset_api_url")?,
            asset_api_token: Secret::new(config.get("asset_api_token")?),
        })
    }
}
