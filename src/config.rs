use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::time::Duration;

const DEFAULT_DATA_BASE_URL: &str = "https://query1.finance.yahoo.com";

// YAML-serializable configuration structure
#[derive(Serialize, Deserialize, Debug)]
pub struct ConfigYaml {
    pub node_name: String,
    pub environment: String,
    pub port: u16,
    pub data_base_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub rate_limit_per_minute: Option<u32>,
    pub cache_ttl_secs: Option<u64>,
    pub random_agent: Option<bool>,
}

// Holds application-wide settings
#[derive(Clone)]
pub struct AppConfig {
    pub node_name: String,
    pub environment: String,
    pub port: u16,
    pub data_base_url: String,
    pub request_timeout: Duration,
    pub rate_limit_per_minute: u32,
    pub cache_ttl: Duration,
    pub random_agent: bool,
}

impl AppConfig {
    // Load configuration from YAML file or environment variables
    pub fn load() -> Self {
        // Check for CONFIG_FILE environment variable first
        if let Ok(config_file) = env::var("CONFIG_FILE") {
            Self::from_yaml(&config_file)
        } else {
            Self::from_env()
        }
    }

    // Load configuration from YAML file
    pub fn from_yaml(file_path: &str) -> Self {
        let yaml_content = fs::read_to_string(file_path)
            .unwrap_or_else(|e| panic!("Failed to read config file {}: {}", file_path, e));
        Self::from_yaml_content(&yaml_content)
    }

    fn from_yaml_content(yaml_content: &str) -> Self {
        let yaml_config: ConfigYaml = serde_yaml::from_str(yaml_content)
            .unwrap_or_else(|e| panic!("Failed to parse YAML config: {}", e));

        Self {
            node_name: yaml_config.node_name,
            environment: yaml_config.environment,
            port: yaml_config.port,
            data_base_url: yaml_config
                .data_base_url
                .unwrap_or_else(|| DEFAULT_DATA_BASE_URL.to_string()),
            request_timeout: Duration::from_secs(yaml_config.request_timeout_secs.unwrap_or(30)),
            rate_limit_per_minute: yaml_config.rate_limit_per_minute.unwrap_or(30),
            cache_ttl: Duration::from_secs(yaml_config.cache_ttl_secs.unwrap_or(300)),
            random_agent: yaml_config.random_agent.unwrap_or(true),
        }
    }

    // Load all configuration from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok(); // Load .env file if present

        let node_name = env::var("NODE_NAME").unwrap_or_else(|_| "valuation-api".to_string());

        let environment =
            env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8080);

        let data_base_url =
            env::var("DATA_BASE_URL").unwrap_or_else(|_| DEFAULT_DATA_BASE_URL.to_string());

        let request_timeout_secs = env::var("REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let rate_limit_per_minute = env::var("RATE_LIMIT_PER_MINUTE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let cache_ttl_secs = env::var("CACHE_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(300); // Default to 5 minutes

        let random_agent = env::var("RANDOM_AGENT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(true);

        Self {
            node_name,
            environment,
            port,
            data_base_url,
            request_timeout: Duration::from_secs(request_timeout_secs),
            rate_limit_per_minute,
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            random_agent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_config_with_defaults() {
        let yaml = r#"
node_name: valuation-api-test
environment: test
port: 9000
"#;
        let config = AppConfig::from_yaml_content(yaml);
        assert_eq!(config.node_name, "valuation-api-test");
        assert_eq!(config.port, 9000);
        assert_eq!(config.data_base_url, DEFAULT_DATA_BASE_URL);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.rate_limit_per_minute, 30);
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert!(config.random_agent);
    }

    #[test]
    fn test_yaml_config_overrides() {
        let yaml = r#"
node_name: valuation-api-test
environment: production
port: 8888
data_base_url: https://query2.finance.yahoo.com
request_timeout_secs: 10
rate_limit_per_minute: 60
cache_ttl_secs: 30
random_agent: false
"#;
        let config = AppConfig::from_yaml_content(yaml);
        assert_eq!(config.environment, "production");
        assert_eq!(config.data_base_url, "https://query2.finance.yahoo.com");
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.rate_limit_per_minute, 60);
        assert_eq!(config.cache_ttl, Duration::from_secs(30));
        assert!(!config.random_agent);
    }
}
