//! Presale client configuration

use eyre::{eyre, Result, WrapErr};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use url::Url;

use crate::addresses::AddressBook;
use crate::invest_limit::InvestPolicy;
use crate::redact::Redacted;
use crate::session::SessionConfig;
use crate::types::{NetworkTarget, DEFAULT_DECIMALS};

/// Networks whose endpoint overrides are always looked up
const WELL_KNOWN_NETWORKS: &[&str] = &["mainnet", "rinkeby", "private"];

/// Default host:port of the local development node
pub const DEFAULT_PRIVATE_NODE: &str = "127.0.0.1:8545";

/// Default hard cap in ETH used for the sale progress figure
pub const DEFAULT_HARD_CAP: f64 = 150.0;

/// Presale client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Network targeted at startup (query-string override wins over `PRESALE_NETWORK`)
    pub network: NetworkTarget,
    /// JSON-RPC and WebSocket endpoints per network
    pub endpoints: NodeEndpoints,
    /// Key of the local signer used on the private network
    pub wallet_private_key: Option<Redacted<String>>,
    /// File holding the cached wallet authorization
    pub auth_cache_path: PathBuf,
    /// Contract addresses per chain id
    pub addresses: AddressBook,
    /// Fixed-point exponent for ETH and token amounts
    pub decimals: u8,
    /// Purchase limits
    pub invest: InvestPolicy,
    /// Sale hard cap in ETH
    pub hard_cap: f64,
}

impl Config {
    /// Load configuration from environment
    pub fn load() -> Result<Self> {
        // Try to load .env file
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded .env from {:?}", path);
        }

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key/value source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let from_env = lookup("PRESALE_NETWORK")
            .map(NetworkTarget::new)
            .unwrap_or_default();

        // The app URL's `?network=` is read once here and never again
        let network = match lookup("PRESALE_APP_URL") {
            Some(app_url) => network_from_query(&app_url)?.unwrap_or(from_env),
            None => from_env,
        };

        let mut names: Vec<String> = WELL_KNOWN_NETWORKS.iter().map(|n| n.to_string()).collect();
        if !names.contains(&network.name) {
            names.push(network.name.clone());
        }

        let mut rpc_overrides = HashMap::new();
        let mut ws_overrides = HashMap::new();
        for name in names {
            let suffix = name.to_uppercase().replace('-', "_");
            if let Some(url) = lookup(&format!("PRESALE_RPC_URL_{}", suffix)) {
                rpc_overrides.insert(name.clone(), url);
            }
            if let Some(url) = lookup(&format!("PRESALE_WS_URL_{}", suffix)) {
                ws_overrides.insert(name, url);
            }
        }

        let endpoints = NodeEndpoints {
            infura_project_id: lookup("INFURA_PROJECT_ID").map(Redacted),
            private_node: lookup("PRESALE_PRIVATE_NODE")
                .unwrap_or_else(|| DEFAULT_PRIVATE_NODE.to_string()),
            rpc_overrides,
            ws_overrides,
        };

        let mut addresses = AddressBook::with_defaults();
        if let Some(overrides) = lookup("PRESALE_ADDRESSES") {
            addresses
                .apply_overrides(&overrides)
                .wrap_err("Invalid PRESALE_ADDRESSES")?;
        }

        let defaults = InvestPolicy::default();
        let invest = InvestPolicy {
            min: parse_or(&lookup, "PRESALE_INVEST_MIN", defaults.min)?,
            cap: parse_or(&lookup, "PRESALE_INVEST_CAP", defaults.cap)?,
            liquidity_ratio: parse_or(&lookup, "PRESALE_LIQUIDITY_RATIO", defaults.liquidity_ratio)?,
        };
        if invest.min < 0.0 || invest.cap < invest.min {
            return Err(eyre!(
                "PRESALE_INVEST_MIN ({}) must be between 0 and PRESALE_INVEST_CAP ({})",
                invest.min,
                invest.cap
            ));
        }

        Ok(Self {
            network,
            endpoints,
            wallet_private_key: lookup("WALLET_PRIVATE_KEY").map(Redacted),
            auth_cache_path: lookup("WALLET_AUTH_CACHE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".presale-wallet-auth")),
            addresses,
            decimals: parse_or(&lookup, "PRESALE_DECIMALS", DEFAULT_DECIMALS)?,
            invest,
            hard_cap: parse_or(&lookup, "PRESALE_HARD_CAP", DEFAULT_HARD_CAP)?,
        })
    }

    /// Session settings derived from this configuration
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            network: self.network.clone(),
            addresses: self.addresses.clone(),
            decimals: self.decimals,
            invest: self.invest,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| eyre!("Invalid {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

/// Extract the `network` query parameter from the application URL
pub fn network_from_query(app_url: &str) -> Result<Option<NetworkTarget>> {
    let url = Url::parse(app_url).map_err(|e| eyre!("Invalid PRESALE_APP_URL: {}", e))?;
    Ok(url
        .query_pairs()
        .find(|(key, _)| key == "network")
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(NetworkTarget::new))
}

// ============================================================================
// Node endpoints
// ============================================================================

/// Where to reach a node for a given network
#[derive(Debug, Clone)]
pub struct NodeEndpoints {
    pub infura_project_id: Option<Redacted<String>>,
    /// host:port of the local node backing the `private` network
    pub private_node: String,
    pub rpc_overrides: HashMap<String, String>,
    pub ws_overrides: HashMap<String, String>,
}

impl Default for NodeEndpoints {
    fn default() -> Self {
        Self {
            infura_project_id: None,
            private_node: DEFAULT_PRIVATE_NODE.to_string(),
            rpc_overrides: HashMap::new(),
            ws_overrides: HashMap::new(),
        }
    }
}

impl NodeEndpoints {
    /// JSON-RPC (HTTP) endpoint for signing transactions
    pub fn rpc_url(&self, network: &NetworkTarget) -> Result<String> {
        if let Some(url) = self.rpc_overrides.get(&network.name) {
            return Ok(url.clone());
        }
        if network.is_private() {
            return Ok(format!("http://{}", self.private_node));
        }
        let id = self.infura_id(network)?;
        Ok(format!("https://{}.infura.io/v3/{}", network.name, id))
    }

    /// WebSocket endpoint for the event stream
    pub fn ws_url(&self, network: &NetworkTarget) -> Result<String> {
        if let Some(url) = self.ws_overrides.get(&network.name) {
            return Ok(url.clone());
        }
        if network.is_private() {
            return Ok(format!("ws://{}", self.private_node));
        }
        let id = self.infura_id(network)?;
        Ok(format!("wss://{}.infura.io/ws/v3/{}", network.name, id))
    }

    fn infura_id(&self, network: &NetworkTarget) -> Result<&str> {
        self.infura_project_id
            .as_ref()
            .map(|id| id.expose().as_str())
            .ok_or_else(|| {
                eyre!(
                    "No endpoint for network {}: set INFURA_PROJECT_ID or PRESALE_WS_URL_{}",
                    network,
                    network.name.to_uppercase()
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.network, NetworkTarget::mainnet());
        assert_eq!(config.decimals, 18);
        assert_eq!(config.invest, InvestPolicy::default());
        assert_eq!(config.hard_cap, DEFAULT_HARD_CAP);
        assert_eq!(config.endpoints.private_node, DEFAULT_PRIVATE_NODE);
        assert!(config.wallet_private_key.is_none());
    }

    #[test]
    fn test_query_override_wins() {
        let config = Config::from_lookup(lookup_from(&[
            ("PRESALE_NETWORK", "rinkeby"),
            ("PRESALE_APP_URL", "https://presale.example/?ref=x&network=private"),
        ]))
        .unwrap();
        assert!(config.network.is_private());
    }

    #[test]
    fn test_network_from_query() {
        assert_eq!(
            network_from_query("https://app.example/?network=Rinkeby").unwrap(),
            Some(NetworkTarget::new("rinkeby"))
        );
        assert_eq!(network_from_query("https://app.example/").unwrap(), None);
        assert_eq!(network_from_query("https://app.example/?network=").unwrap(), None);
        assert!(network_from_query("not a url").is_err());
    }

    #[test]
    fn test_endpoint_resolution() {
        let config = Config::from_lookup(lookup_from(&[
            ("INFURA_PROJECT_ID", "abc123"),
            ("PRESALE_PRIVATE_NODE", "10.0.0.5:8545"),
            ("PRESALE_WS_URL_RINKEBY", "wss://rinkeby.custom/ws"),
        ]))
        .unwrap();
        let endpoints = &config.endpoints;

        assert_eq!(
            endpoints.rpc_url(&NetworkTarget::mainnet()).unwrap(),
            "https://mainnet.infura.io/v3/abc123"
        );
        assert_eq!(
            endpoints.ws_url(&NetworkTarget::mainnet()).unwrap(),
            "wss://mainnet.infura.io/ws/v3/abc123"
        );
        assert_eq!(
            endpoints.ws_url(&NetworkTarget::new("rinkeby")).unwrap(),
            "wss://rinkeby.custom/ws"
        );
        assert_eq!(
            endpoints.ws_url(&NetworkTarget::new("private")).unwrap(),
            "ws://10.0.0.5:8545"
        );
        assert_eq!(
            endpoints.rpc_url(&NetworkTarget::new("private")).unwrap(),
            "http://10.0.0.5:8545"
        );
    }

    #[test]
    fn test_missing_infura_id_is_an_error() {
        let endpoints = NodeEndpoints::default();
        assert!(endpoints.ws_url(&NetworkTarget::mainnet()).is_err());
        assert!(endpoints.ws_url(&NetworkTarget::new("private")).is_ok());
    }

    #[test]
    fn test_secrets_are_redacted() {
        let config = Config::from_lookup(lookup_from(&[
            ("INFURA_PROJECT_ID", "abc123"),
            ("WALLET_PRIVATE_KEY", "0xdeadbeef"),
        ]))
        .unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("abc123"));
        assert!(!debug.contains("deadbeef"));
    }

    #[test]
    fn test_invalid_limits_rejected() {
        assert!(Config::from_lookup(lookup_from(&[("PRESALE_INVEST_CAP", "lots")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[
            ("PRESALE_INVEST_MIN", "5"),
            ("PRESALE_INVEST_CAP", "1"),
        ]))
        .is_err());
    }
}
