use crate::config::IpLookupConfig;
use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use url::Url;

lazy_static! {
    // "key": "value" pairs with optional quoting, tolerant of trailing commas
    static ref LOOSE_PAIR: Regex =
        Regex::new(r#""?([A-Za-z_][A-Za-z0-9_]*)"?\s*:\s*(?:"([^"]*)"|([^,\s{}]+))"#).unwrap();
}

/// Keys shown for a lookup, in display order.
pub const PROFILE_KEYS: [&str; 5] = ["ip", "city", "country", "org", "timezone"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpProfile {
    pub fields: BTreeMap<String, String>,
}

impl IpProfile {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Organisation name without the leading AS number.
    pub fn organisation(&self) -> Option<&str> {
        self.get("org")
            .map(|org| org.split_once(' ').map(|(_, name)| name).unwrap_or(""))
    }

    pub fn is_bogon(&self) -> bool {
        self.get("bogon") == Some("true")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeoDetail {
    Profile(IpProfile),
    /// Reserved or special-use address, no geo data exists
    Bogon,
    /// Lookup failed or returned nothing usable
    Unavailable,
}

impl GeoDetail {
    fn from_profile(profile: IpProfile) -> Self {
        if profile.is_bogon() {
            GeoDetail::Bogon
        } else if profile.fields.is_empty() {
            GeoDetail::Unavailable
        } else {
            GeoDetail::Profile(profile)
        }
    }
}

/// Parse a lookup response.
///
/// Strict JSON is tried first; otherwise every `"key": "value"` pair found in
/// the text is taken, with quoting and trailing punctuation stripped.
pub fn parse_profile(text: &str) -> IpProfile {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(text) {
        let fields = map
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, value)
            })
            .collect();
        return IpProfile { fields };
    }

    let mut fields = BTreeMap::new();
    for captures in LOOSE_PAIR.captures_iter(text) {
        let key = captures[1].to_string();
        let value = captures
            .get(2)
            .or_else(|| captures.get(3))
            .map(|m| m.as_str().trim().trim_end_matches([',', ';', '"']))
            .unwrap_or("")
            .to_string();
        fields.insert(key, value);
    }
    IpProfile { fields }
}

/// Geolocation lookups, one request per distinct IP per run.
#[derive(Debug, Clone)]
pub struct IpInfoClient {
    client: Client,
    endpoint: String,
    enabled: bool,
    use_mock: bool,
    cache: Arc<RwLock<HashMap<String, GeoDetail>>>,
}

impl IpInfoClient {
    pub fn new(config: &IpLookupConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("header-scan/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            enabled: config.enabled,
            use_mock: config.use_mock,
            cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Look up an IP; never fails, degrading to `GeoDetail::Unavailable`.
    pub async fn lookup(&self, ip: &str) -> GeoDetail {
        if !self.enabled {
            return GeoDetail::Unavailable;
        }

        {
            let cache = self.cache.read().await;
            if let Some(detail) = cache.get(ip) {
                log::debug!("Using cached lookup for: {ip}");
                return detail.clone();
            }
        }

        let detail = if self.use_mock {
            GeoDetail::from_profile(Self::mock_profile(ip))
        } else {
            match self.fetch(ip).await {
                Ok(text) => GeoDetail::from_profile(parse_profile(&text)),
                Err(e) => {
                    log::warn!("IP lookup for {ip} failed: {e}");
                    GeoDetail::Unavailable
                }
            }
        };

        self.cache
            .write()
            .await
            .insert(ip.to_string(), detail.clone());
        detail
    }

    /// IPs looked up so far in this run.
    pub async fn looked_up(&self) -> Vec<String> {
        let mut ips: Vec<String> = self.cache.read().await.keys().cloned().collect();
        ips.sort();
        ips
    }

    async fn fetch(&self, ip: &str) -> Result<String> {
        let url = Url::parse(&self.endpoint)?.join(ip)?;
        log::debug!("Requesting {url}");

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("lookup returned HTTP {}", response.status()));
        }
        Ok(response.text().await?)
    }

    fn mock_profile(ip: &str) -> IpProfile {
        let text = match ip {
            "8.8.8.8" => {
                r#"{"ip": "8.8.8.8", "city": "Mountain View", "country": "US", "org": "AS15169 Google LLC", "timezone": "America/Los_Angeles"}"#
            }
            "1.1.1.1" => {
                r#"{"ip": "1.1.1.1", "city": "Brisbane", "country": "AU", "org": "AS13335 Cloudflare, Inc.", "timezone": "Australia/Brisbane"}"#
            }
            ip if ip.starts_with("10.") || ip.starts_with("192.168.") || ip.starts_with("127.") => {
                return IpProfile {
                    fields: BTreeMap::from([
                        ("ip".to_string(), ip.to_string()),
                        ("bogon".to_string(), "true".to_string()),
                    ]),
                };
            }
            _ => "",
        };
        parse_profile(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_config() -> IpLookupConfig {
        IpLookupConfig {
            use_mock: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_json_profile() {
        let profile = parse_profile(
            "{\n  \"ip\": \"8.8.8.8\",\n  \"city\": \"Mountain View\",\n  \"loc\": \"37.4,-122.0\",\n  \"anycast\": true\n}",
        );
        assert_eq!(profile.get("city"), Some("Mountain View"));
        assert_eq!(profile.get("loc"), Some("37.4,-122.0"));
        assert_eq!(profile.get("anycast"), Some("true"));
    }

    #[test]
    fn test_parse_loose_profile() {
        let profile = parse_profile(
            "  \"ip\": \"203.0.113.9\",\n  city: Springfield,\n  \"org\": \"AS64500 Example Net\",\n  \"bogon\": true,\n",
        );
        assert_eq!(profile.get("ip"), Some("203.0.113.9"));
        assert_eq!(profile.get("city"), Some("Springfield"));
        assert_eq!(profile.organisation(), Some("Example Net"));
        assert!(profile.is_bogon());
    }

    #[test]
    fn test_unparseable_response_is_unavailable() {
        assert_eq!(
            GeoDetail::from_profile(parse_profile("<html>rate limited</html>")),
            GeoDetail::Unavailable
        );
    }

    #[test]
    fn test_bogon_false_is_a_profile() {
        let detail = GeoDetail::from_profile(parse_profile(r#"{"ip": "8.8.4.4", "bogon": false}"#));
        assert!(matches!(detail, GeoDetail::Profile(_)));
    }

    #[tokio::test]
    async fn test_mock_lookup_and_cache() {
        let client = IpInfoClient::new(&mock_config()).unwrap();

        match client.lookup("8.8.8.8").await {
            GeoDetail::Profile(profile) => {
                assert_eq!(profile.get("country"), Some("US"));
                assert_eq!(profile.organisation(), Some("Google LLC"));
            }
            other => panic!("Expected profile, got {other:?}"),
        }
        assert_eq!(client.lookup("10.0.0.1").await, GeoDetail::Bogon);
        assert_eq!(client.lookup("203.0.113.1").await, GeoDetail::Unavailable);
        assert_eq!(
            client.looked_up().await,
            vec!["10.0.0.1", "203.0.113.1", "8.8.8.8"]
        );
    }

    #[tokio::test]
    async fn test_disabled_lookup() {
        let config = IpLookupConfig {
            enabled: false,
            ..Default::default()
        };
        let client = IpInfoClient::new(&config).unwrap();
        assert_eq!(client.lookup("8.8.8.8").await, GeoDetail::Unavailable);
        assert!(client.looked_up().await.is_empty());
    }
}
