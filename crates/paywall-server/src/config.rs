use chrono::TimeDelta;
use grant_store::{EvictionPolicy, ReissuePolicy, StoreConfig};

pub const DEFAULT_PRICE: &str = "0.1";
pub const DEFAULT_NETWORK: &str = "base-sepolia";
pub const DEFAULT_FACILITATOR_URL: &str = "https://x402.org/facilitator";
pub const PAY_IMAGE_PATH: &str = "/api/pay/image";
pub const SESSIONS_PATH: &str = "/api/sessions";
/// Longest grant window any store may be configured with (about ten years)
pub const MAX_TTL_SECS: i64 = 10 * 365 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Wallet that receives payments
    pub pay_to: String,
    pub network: String,
    pub host: String,
    pub port: u16,
    pub image_url: String,
    pub base_url: String,
    pub facilitator_url: String,
    /// Price without the leading `$`
    pub price: String,
    pub development: bool,
    pub view_duration: TimeDelta,
    pub session_ttl: TimeDelta,
    pub single_use_ttl: TimeDelta,
    pub wallet_store: StoreConfig,
    pub session_store: StoreConfig,
    /// Zero disables the background purge
    pub sweep_interval_secs: u64,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst: u32,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let pay_to = std::env::var("ADDRESS").unwrap_or_default();
        if pay_to.trim().is_empty() {
            anyhow::bail!("ADDRESS is not set - configure the wallet that receives payments");
        }

        let network = env_or("NETWORK", DEFAULT_NETWORK);
        let host = env_or("HOST", "0.0.0.0");
        let port = env_parse("PORT", 3001);
        let image_url = env_or(
            "IMAGE_URL",
            "https://x402.taolimarket.com/images/pretty-girl.jpeg",
        );
        let base_url = env_or("BASE_URL", "https://x402.taolimarket.com");
        let facilitator_url = env_or("FACILITATOR_URL", DEFAULT_FACILITATOR_URL);
        let price = parse_price(&env_or("IMAGE_PRICE", "$0.1"));
        let development = env_or("NODE_ENV", "production") == "development";

        let view_duration = env_secs("VIEW_DURATION_SECS", 30);
        let session_ttl = env_secs("SESSION_TTL_SECS", 86_400);
        let single_use_ttl = env_secs("SINGLE_USE_TTL_SECS", 300);

        let wallet_store = StoreConfig {
            eviction: env_or("WALLET_EVICTION", "evict-on-access").parse::<EvictionPolicy>()?,
            reissue: env_or("WALLET_REISSUE", "overwrite").parse::<ReissuePolicy>()?,
        };
        let session_store = StoreConfig {
            eviction: env_or("SESSION_EVICTION", "retain").parse::<EvictionPolicy>()?,
            reissue: env_or("SESSION_REISSUE", "reject").parse::<ReissuePolicy>()?,
        };

        let config = Self {
            pay_to: pay_to.trim().to_string(),
            network,
            host,
            port,
            image_url,
            base_url,
            facilitator_url,
            price,
            development,
            view_duration,
            session_ttl,
            single_use_ttl,
            wallet_store,
            session_store,
            sweep_interval_secs: env_parse("SWEEP_INTERVAL_SECS", 0),
            rate_limit_per_second: env_parse("RATE_LIMIT_PER_SECOND", 10),
            rate_limit_burst: env_parse("RATE_LIMIT_BURST", 20),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        for (name, ttl) in [
            ("VIEW_DURATION_SECS", self.view_duration),
            ("SESSION_TTL_SECS", self.session_ttl),
            ("SINGLE_USE_TTL_SECS", self.single_use_ttl),
        ] {
            if ttl <= TimeDelta::zero() {
                anyhow::bail!("{} must be positive", name);
            }
            if ttl.num_seconds() > MAX_TTL_SECS {
                anyhow::bail!("{} must not exceed {} seconds", name, MAX_TTL_SECS);
            }
        }
        if self.rate_limit_per_second == 0 || self.rate_limit_burst == 0 {
            anyhow::bail!("rate limit values must be positive");
        }
        Ok(())
    }

    /// Price as displayed to buyers, e.g. `$0.1`
    pub fn display_price(&self) -> String {
        format!("${}", self.price)
    }

    pub fn resource_url(&self, path: &str) -> String {
        resource_url(&self.base_url, path)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: i64) -> TimeDelta {
    TimeDelta::try_seconds(env_parse(key, default))
        .unwrap_or_else(|| TimeDelta::seconds(default))
}

/// Strip a leading `$` and validate; anything unparseable falls back to the default price
pub fn parse_price(raw: &str) -> String {
    let clean = raw.trim().trim_start_matches('$');
    match clean.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => clean.to_string(),
        _ => DEFAULT_PRICE.to_string(),
    }
}

pub fn resource_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> ServerConfig {
    ServerConfig {
        pay_to: "0x000000000000000000000000000000000000dEaD".to_string(),
        network: DEFAULT_NETWORK.to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        image_url: "https://example.com/image.jpeg".to_string(),
        base_url: "https://example.com".to_string(),
        facilitator_url: DEFAULT_FACILITATOR_URL.to_string(),
        price: DEFAULT_PRICE.to_string(),
        development: false,
        view_duration: TimeDelta::seconds(30),
        session_ttl: TimeDelta::hours(24),
        single_use_ttl: TimeDelta::minutes(5),
        wallet_store: StoreConfig::wallet_identity(),
        session_store: StoreConfig::session_tokens(),
        sweep_interval_secs: 0,
        rate_limit_per_second: 10,
        rate_limit_burst: 20,
    }
}
