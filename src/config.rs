use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_min_usd_value")]
    pub min_usd_value: f64,
    #[serde(default)]
    pub sinks: SinksConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub prices: PriceRefreshConfig,
    pub chains: Vec<ChainConfig>,
}

fn default_min_usd_value() -> f64 {
    500.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    pub name: String,
    pub chain_id: u64,
    pub rpc_http: Option<String>,
    pub rpc_ws: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct TokenConfig {
    pub symbol: String,
    pub address: String,
    pub decimals: u8,
    /// Cold price used until the first successful refresh for this symbol.
    #[serde(default)]
    pub price_usd: f64,
}

// ============================================================
// Sink Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct SinksConfig {
    #[serde(default = "default_sink_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub targets: Vec<SinkTargetConfig>,
}

impl Default for SinksConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            targets: Vec::new(),
        }
    }
}

fn default_sink_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SinkTargetConfig {
    pub name: String,
    pub url: String,
}

// ============================================================
// Transport Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_subscribe_timeout_ms")]
    pub subscribe_timeout_ms: u64,
    /// Delay after a connect failure, read error, or closed connection.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Delay after a rejected or unexpected subscription acknowledgment.
    #[serde(default = "default_resubscribe_delay_ms")]
    pub resubscribe_delay_ms: u64,
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            subscribe_timeout_ms: 10_000,
            reconnect_delay_ms: 5_000,
            resubscribe_delay_ms: 10_000,
            ping_interval_ms: 30_000,
            ping_timeout_ms: 10_000,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_subscribe_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_resubscribe_delay_ms() -> u64 {
    10_000
}

fn default_ping_interval_ms() -> u64 {
    30_000
}

fn default_ping_timeout_ms() -> u64 {
    10_000
}

impl StreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn resubscribe_delay(&self) -> Duration {
        Duration::from_millis(self.resubscribe_delay_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollConfig {
    #[serde(default = "default_poll_error_delay_ms")]
    pub error_delay_ms: u64,
    /// Bound on one `eth_blockNumber` call.
    #[serde(default = "default_height_timeout_ms")]
    pub height_timeout_ms: u64,
    /// Bound on one `eth_getLogs` call.
    #[serde(default = "default_logs_timeout_ms")]
    pub logs_timeout_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            error_delay_ms: default_poll_error_delay_ms(),
            height_timeout_ms: default_height_timeout_ms(),
            logs_timeout_ms: default_logs_timeout_ms(),
        }
    }
}

fn default_poll_error_delay_ms() -> u64 {
    10_000
}

fn default_height_timeout_ms() -> u64 {
    10_000
}

fn default_logs_timeout_ms() -> u64 {
    30_000
}

impl PollConfig {
    pub fn error_delay(&self) -> Duration {
        Duration::from_millis(self.error_delay_ms)
    }

    pub fn height_timeout(&self) -> Duration {
        Duration::from_millis(self.height_timeout_ms)
    }

    pub fn logs_timeout(&self) -> Duration {
        Duration::from_millis(self.logs_timeout_ms)
    }
}

// ============================================================
// Price Refresh Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct PriceRefreshConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_price_api_url")]
    pub api_url: String,
    #[serde(default = "default_price_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_vs_currency")]
    pub vs_currency: String,
    /// Token symbol -> CoinGecko coin id.
    #[serde(default)]
    pub ids: HashMap<String, String>,
}

impl Default for PriceRefreshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_interval_secs: 300,
            api_url: default_price_api_url(),
            request_timeout_ms: 10_000,
            vs_currency: default_vs_currency(),
            ids: HashMap::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_refresh_interval_secs() -> u64 {
    300
}

fn default_price_api_url() -> String {
    "https://api.coingecko.com/api/v3/simple/price".to_string()
}

fn default_price_request_timeout_ms() -> u64 {
    10_000
}

fn default_vs_currency() -> String {
    "usd".to_string()
}

impl Config {
    pub fn load(path: &str) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("Failed to read config file '{}': {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| eyre::eyre!("Failed to parse config file '{}': {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    /// Process-level checks. Per-chain problems are reported when the chain's
    /// session is built, so one bad chain never stops the others.
    fn validate(&self) -> eyre::Result<()> {
        if self.chains.is_empty() {
            return Err(eyre::eyre!("At least one chain must be configured"));
        }
        if !self.min_usd_value.is_finite() || self.min_usd_value < 0.0 {
            return Err(eyre::eyre!(
                "min_usd_value must be a non-negative number, got {}",
                self.min_usd_value
            ));
        }
        for sink in &self.sinks.targets {
            let url = reqwest::Url::parse(&sink.url).map_err(|e| {
                eyre::eyre!("Invalid URL '{}' for sink '{}': {}", sink.url, sink.name, e)
            })?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(eyre::eyre!(
                    "Sink '{}' must use http or https, got '{}'",
                    sink.name,
                    url.scheme()
                ));
            }
        }
        if self.prices.enabled && self.prices.refresh_interval_secs == 0 {
            return Err(eyre::eyre!("prices.refresh_interval_secs must be greater than zero"));
        }
        let timings = [
            ("stream.connect_timeout_ms", self.stream.connect_timeout_ms),
            ("stream.subscribe_timeout_ms", self.stream.subscribe_timeout_ms),
            ("stream.ping_interval_ms", self.stream.ping_interval_ms),
            ("stream.ping_timeout_ms", self.stream.ping_timeout_ms),
            ("poll.height_timeout_ms", self.poll.height_timeout_ms),
            ("poll.logs_timeout_ms", self.poll.logs_timeout_ms),
            ("sinks.timeout_ms", self.sinks.timeout_ms),
            ("prices.request_timeout_ms", self.prices.request_timeout_ms),
        ];
        for (key, value) in timings {
            if value == 0 {
                return Err(eyre::eyre!("{} must be greater than zero", key));
            }
        }
        Ok(())
    }
}

impl ChainConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(name: &str) -> ChainConfig {
        ChainConfig {
            name: name.to_string(),
            chain_id: 1,
            rpc_http: Some("http://localhost:8545".to_string()),
            rpc_ws: None,
            poll_interval_ms: 2000,
            tokens: vec![TokenConfig {
                symbol: "USDC".to_string(),
                address: "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48".to_string(),
                decimals: 6,
                price_usd: 1.0,
            }],
        }
    }

    fn config(chains: Vec<ChainConfig>) -> Config {
        Config {
            min_usd_value: 500.0,
            sinks: SinksConfig::default(),
            stream: StreamConfig::default(),
            poll: PollConfig::default(),
            prices: PriceRefreshConfig::default(),
            chains,
        }
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
min_usd_value = 1000.0

[sinks]
timeout_ms = 2500

[[sinks.targets]]
name = "local"
url = "http://localhost:3000/webhook"

[prices.ids]
WETH = "weth"

[[chains]]
name = "ethereum"
chain_id = 1
rpc_http = "http://localhost:8545"
rpc_ws = "ws://localhost:8546"

[[chains.tokens]]
symbol = "USDC"
address = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"
decimals = 6
price_usd = 1.0
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.min_usd_value, 1000.0);
        assert_eq!(config.sinks.timeout_ms, 2500);
        assert_eq!(config.sinks.targets[0].name, "local");
        assert_eq!(config.chains.len(), 1);
        assert_eq!(config.chains[0].name, "ethereum");
        assert_eq!(config.chains[0].chain_id, 1);
        assert_eq!(config.chains[0].rpc_ws.as_deref(), Some("ws://localhost:8546"));
        assert_eq!(config.chains[0].tokens[0].symbol, "USDC");
        assert_eq!(config.chains[0].tokens[0].decimals, 6);
        assert_eq!(config.chains[0].poll_interval_ms, 2000); // default
        assert_eq!(config.prices.ids.get("WETH").map(String::as_str), Some("weth"));
        assert_eq!(config.prices.refresh_interval_secs, 300); // default
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_transport_defaults() {
        let config: Config = toml::from_str(
            r#"
[[chains]]
name = "base"
chain_id = 8453
rpc_ws = "wss://example.invalid"
"#,
        )
        .unwrap();

        assert_eq!(config.min_usd_value, 500.0);
        assert_eq!(config.sinks.timeout_ms, 5000);
        assert_eq!(config.stream.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.stream.resubscribe_delay(), Duration::from_secs(10));
        assert_eq!(config.stream.ping_interval(), Duration::from_secs(30));
        assert_eq!(config.stream.ping_timeout(), Duration::from_secs(10));
        assert_eq!(config.poll.error_delay_ms, 10_000);
        assert_eq!(config.poll.height_timeout(), Duration::from_secs(10));
        assert_eq!(config.poll.logs_timeout(), Duration::from_secs(30));
        assert!(config.chains[0].rpc_http.is_none());
    }

    #[test]
    fn test_validate_empty_chains() {
        assert!(config(vec![]).validate().is_err());
    }

    #[test]
    fn test_validate_bad_sink_url() {
        let mut config = config(vec![chain("ethereum")]);
        config.sinks.targets.push(SinkTargetConfig {
            name: "broken".to_string(),
            url: "not a url".to_string(),
        });
        assert!(config.validate().is_err());

        config.sinks.targets[0].url = "ftp://example.com/hook".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_negative_threshold() {
        let mut config = config(vec![chain("ethereum")]);
        config.min_usd_value = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_timeouts() {
        let zeroed: [fn(&mut Config); 8] = [
            |c: &mut Config| c.stream.connect_timeout_ms = 0,
            |c: &mut Config| c.stream.subscribe_timeout_ms = 0,
            |c: &mut Config| c.stream.ping_interval_ms = 0,
            |c: &mut Config| c.stream.ping_timeout_ms = 0,
            |c: &mut Config| c.poll.height_timeout_ms = 0,
            |c: &mut Config| c.poll.logs_timeout_ms = 0,
            |c: &mut Config| c.sinks.timeout_ms = 0,
            |c: &mut Config| c.prices.request_timeout_ms = 0,
        ];
        for zero in zeroed {
            let mut config = config(vec![chain("ethereum")]);
            assert!(config.validate().is_ok());
            zero(&mut config);
            let error = config.validate().unwrap_err().to_string();
            assert!(error.contains("must be greater than zero"), "{}", error);
        }
    }

    #[test]
    fn test_example_config_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config.example.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.sinks.targets.len(), 2);
        let polled = config.chains.iter().filter(|c| c.rpc_ws.is_none()).count();
        assert_eq!((config.chains.len(), polled), (4, 2));
        assert!(config.chains.iter().all(|c| !c.tokens.is_empty()));
    }

    #[test]
    fn test_chain_without_endpoints_is_not_process_fatal() {
        let mut bad = chain("orphan");
        bad.rpc_http = None;
        let config = config(vec![chain("ethereum"), bad]);
        assert!(config.validate().is_ok());
    }
}
