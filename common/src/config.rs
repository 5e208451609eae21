use serde::{Deserialize, Serialize};

pub const DEFAULT_PREDICT_ENDPOINT: &str = "http://10.38.192.228:5000/predict";
pub const DEFAULT_PREDICTION_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_HTTP_PORT: u16 = 80;
pub const DEFAULT_PAGE_REFRESH_SEC: u32 = 5;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("prediction endpoint is empty")]
    EmptyEndpoint,
    #[error("prediction endpoint `{0}` is not an http:// or https:// URL")]
    UnsupportedEndpoint(String),
    #[error("invalid config json: {0}")]
    Json(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub connect_attempts: u32,
    pub connect_retry_delay_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            connect_attempts: 20,
            connect_retry_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SensorPins {
    pub dht_pin: i32,
    pub gas_adc_pin: i32,
    pub warmup_ms: u64,
}

impl Default for SensorPins {
    fn default() -> Self {
        Self {
            dht_pin: 4,
            gas_adc_pin: 34,
            warmup_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StationConfig {
    pub predict_endpoint: String,
    pub prediction_interval_ms: u64,
    pub read_timeout_ms: u64,
    pub http_port: u16,
    pub page_refresh_sec: u32,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub sensors: SensorPins,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            predict_endpoint: DEFAULT_PREDICT_ENDPOINT.to_string(),
            prediction_interval_ms: DEFAULT_PREDICTION_INTERVAL_MS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            http_port: DEFAULT_HTTP_PORT,
            page_refresh_sec: DEFAULT_PAGE_REFRESH_SEC,
            network: NetworkConfig::default(),
            sensors: SensorPins::default(),
        }
    }
}

impl StationConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let mut config: StationConfig =
            serde_json::from_str(raw).map_err(|err| ConfigError::Json(err.to_string()))?;
        config.sanitize();
        config.validate()?;
        Ok(config)
    }

    pub fn sanitize(&mut self) {
        self.predict_endpoint = self.predict_endpoint.trim().to_string();
        self.prediction_interval_ms = self.prediction_interval_ms.clamp(1_000, 86_400_000);
        self.read_timeout_ms = self.read_timeout_ms.clamp(100, 30_000);
        self.page_refresh_sec = self.page_refresh_sec.clamp(1, 3_600);
        if self.http_port == 0 {
            self.http_port = DEFAULT_HTTP_PORT;
        }
        self.network.connect_attempts = self.network.connect_attempts.max(1);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = self.predict_endpoint.trim();
        if endpoint.is_empty() {
            return Err(ConfigError::EmptyEndpoint);
        }
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::UnsupportedEndpoint(endpoint.to_string()));
        }
        Ok(())
    }
}
