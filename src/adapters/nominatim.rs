//! OpenStreetMap Nominatim: free-text search as a fallback geocoder and
//! reverse lookup for the town / county of a point.

use crate::adapters::http::{join_url, send_with_retry, RetryPolicy};
use crate::core::label::County;
use crate::core::overlay::normalize_town;
use crate::domain::model::{GeoPoint, GeocodeMatch, Locality};
use crate::domain::ports::{Geocoder, ReverseGeocoder};
use crate::utils::error::{LookupError, Result};
use crate::utils::throttle::Throttle;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";
const SERVICE: &str = "nominatim";
/// Nominatim's public instance allows one request per second.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(1);
const TOWN_KEYS: [&str; 4] = ["town", "city", "village", "municipality"];

#[derive(Debug, Clone)]
pub struct NominatimClient {
    client: Client,
    base_url: String,
    user_agent: String,
    throttle: Arc<Throttle>,
    reverse_retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    lat: String,
    lon: String,
    #[serde(default)]
    address: Value,
}

impl NominatimClient {
    /// Nominatim's usage policy asks for a contact address in the user agent.
    pub fn new(client: Client, base_url: impl Into<String>, email: Option<&str>) -> Self {
        let contact = email.filter(|e| !e.trim().is_empty()).unwrap_or("contact@example.com");
        Self {
            client,
            base_url: base_url.into(),
            user_agent: format!("NH-Rep-Finder/{} ({})", env!("CARGO_PKG_VERSION"), contact),
            throttle: Arc::new(Throttle::new(Duration::ZERO)),
            reverse_retry: RetryPolicy::once_after(Duration::from_millis(500)),
        }
    }

    /// Spacing shared by every search and reverse call of this client.
    pub fn with_throttle(mut self, throttle: Arc<Throttle>) -> Self {
        self.throttle = throttle;
        self
    }

    /// Delay before the single reverse-lookup retry.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.reverse_retry = RetryPolicy::once_after(delay);
        self
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)], policy: RetryPolicy) -> Result<Value> {
        let url = join_url(&self.base_url, path);
        let response = send_with_retry(SERVICE, &self.throttle, policy, || {
            self.client
                .get(&url)
                .header(USER_AGENT, &self.user_agent)
                .header(ACCEPT, "application/json")
                .query(query)
        })
        .await?;
        Ok(response.json().await?)
    }

    async fn search(&self, q: &str) -> Result<Option<SearchHit>> {
        let query = [
            ("q", q.to_string()),
            ("format", "json".to_string()),
            ("limit", "1".to_string()),
            ("countrycodes", "us".to_string()),
            ("addressdetails", "1".to_string()),
        ];
        // Spelling variants already act as retries for search.
        let body = self.get_json("search", &query, RetryPolicy::NONE).await?;
        let hits: Vec<SearchHit> = serde_json::from_value(body)?;
        Ok(hits.into_iter().next())
    }
}

/// Spellings of state routes that Nominatim matches more reliably
/// ("NH RT 120" → "NH-120" / "NH Route 120"), original address last.
pub fn address_variants(address: &str) -> Vec<String> {
    let padded = format!(" {} ", address.trim());
    let mut variants: Vec<String> = [
        (" NH RT ", " NH-"),
        (" NH RTE ", " NH-"),
        (" RT ", " Route "),
        (" RTE ", " Route "),
    ]
    .iter()
    .filter(|(from, _)| padded.contains(from))
    .map(|(from, to)| padded.replace(from, to).trim().to_string())
    .collect();
    variants.push(address.trim().to_string());
    variants.dedup();
    variants
}

/// Town from the first populated of town / city / village / municipality,
/// county with any " County" suffix dropped.
pub fn parse_locality(address: &Value) -> Locality {
    let town = TOWN_KEYS
        .iter()
        .filter_map(|key| address[*key].as_str())
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(normalize_town);
    let county = address["county"].as_str().and_then(County::parse);
    Locality { town, county }
}

fn parse_coord(raw: &str, address: &str) -> Result<f64> {
    raw.trim().parse().map_err(|_| LookupError::GeocodeFailed {
        address: address.to_string(),
        geocoder: SERVICE.to_string(),
        cause: format!("unreadable coordinate '{}'", raw),
    })
}

#[async_trait]
impl Geocoder for NominatimClient {
    fn name(&self) -> &str {
        SERVICE
    }

    async fn geocode(&self, address: &str) -> Result<GeocodeMatch> {
        let mut last_error = None;
        for variant in address_variants(address) {
            match self.search(&variant).await {
                Ok(Some(hit)) => {
                    let point = GeoPoint::new(parse_coord(&hit.lat, address)?, parse_coord(&hit.lon, address)?);
                    if variant != address.trim() {
                        tracing::debug!("Nominatim matched variant '{}'", variant);
                    }
                    return Ok(GeocodeMatch {
                        point,
                        locality: parse_locality(&hit.address),
                        geocoder: SERVICE.to_string(),
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!("Nominatim search for '{}' failed: {}", variant, e);
                    last_error = Some(e);
                }
            }
        }
        Err(LookupError::GeocodeFailed {
            address: address.to_string(),
            geocoder: SERVICE.to_string(),
            cause: last_error.map_or_else(|| "no results".to_string(), |e| e.to_string()),
        })
    }
}

#[async_trait]
impl ReverseGeocoder for NominatimClient {
    async fn reverse(&self, point: GeoPoint) -> Result<Locality> {
        let query = [
            ("lat", point.latitude.to_string()),
            ("lon", point.longitude.to_string()),
            ("format", "json".to_string()),
            ("zoom", "10".to_string()),
            ("addressdetails", "1".to_string()),
        ];
        let body = self.get_json("reverse", &query, self.reverse_retry).await?;
        Ok(parse_locality(&body["address"]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn test_address_variants() {
        let variants = address_variants("667 NH RT 120, Cornish, NH");
        assert_eq!(
            variants,
            vec![
                "667 NH-120, Cornish, NH",
                "667 NH Route 120, Cornish, NH",
                "667 NH RT 120, Cornish, NH"
            ]
        );
        assert_eq!(address_variants("1 Main St, Concord, NH"), vec!["1 Main St, Concord, NH"]);
    }

    #[test]
    fn test_parse_locality_prefers_town_then_city() {
        let village = parse_locality(&json!({"village": "cornish flat", "county": "Sullivan County"}));
        assert_eq!(village.town.as_deref(), Some("Cornish Flat"));
        assert_eq!(village.county, Some(County::Sullivan));

        let city = parse_locality(&json!({"town": "", "city": "Lebanon", "county": "Grafton County"}));
        assert_eq!(city.town.as_deref(), Some("Lebanon"));

        assert!(parse_locality(&json!({"state": "New Hampshire"})).is_empty());
    }

    #[tokio::test]
    async fn test_search_sends_contact_user_agent() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/search")
                    .query_param("q", "1 Main St, Concord, NH")
                    .query_param("countrycodes", "us")
                    .header_exists("user-agent");
                then.status(200).json_body(json!([{
                    "lat": "43.2081", "lon": "-71.5376",
                    "address": {"city": "Concord", "county": "Merrimack County"}
                }]));
            })
            .await;

        let client = NominatimClient::new(Client::new(), server.base_url(), Some("ops@example.org"));
        assert!(client.user_agent.contains("ops@example.org"));
        let found = client.geocode("1 Main St, Concord, NH").await.unwrap();
        mock.assert_async().await;
        assert!((found.point.latitude - 43.2081).abs() < 1e-9);
        assert_eq!(found.locality.county, Some(County::Merrimack));
    }

    #[tokio::test]
    async fn test_empty_search_is_geocode_failure() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/search");
                then.status(200).json_body(json!([]));
            })
            .await;

        let client = NominatimClient::new(Client::new(), server.base_url(), None);
        let err = client.geocode("667 NH RT 120, Cornish, NH").await.unwrap_err();
        // One query per spelling variant.
        mock.assert_hits_async(3).await;
        assert!(matches!(err, LookupError::GeocodeFailed { ref cause, .. } if cause == "no results"));
    }

    #[tokio::test]
    async fn test_reverse_reads_address_block() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/reverse").query_param("zoom", "10");
                then.status(200).json_body(json!({
                    "address": {"town": "Cornish", "county": "Sullivan County", "state": "New Hampshire"}
                }));
            })
            .await;

        let client = NominatimClient::new(Client::new(), server.base_url(), None);
        let locality = client.reverse(GeoPoint::new(43.47, -72.38)).await.unwrap();
        assert_eq!(locality.town.as_deref(), Some("Cornish"));
        assert_eq!(locality.county, Some(County::Sullivan));
    }

    #[tokio::test]
    async fn test_reverse_retries_once_on_server_error() {
        let server = MockServer::start_async().await;
        let unavailable = server
            .mock_async(|when, then| {
                when.method(GET).path("/reverse");
                then.status(503);
            })
            .await;

        let client = NominatimClient::new(Client::new(), server.base_url(), None)
            .with_retry_delay(Duration::from_millis(200));
        // Replace the 503 with a 200 while the client waits to retry.
        let swap = async {
            while unavailable.hits_async().await == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            unavailable.delete_async().await;
            server
                .mock_async(|when, then| {
                    when.method(GET).path("/reverse");
                    then.status(200).json_body(json!({
                        "address": {"town": "Cornish", "county": "Sullivan County"}
                    }));
                })
                .await
        };
        let (locality, ok) = tokio::join!(client.reverse(GeoPoint::new(43.47, -72.38)), swap);
        let locality = locality.unwrap();
        assert_eq!(locality.town.as_deref(), Some("Cornish"));
        assert_eq!(locality.county, Some(County::Sullivan));
        ok.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_reverse_gives_up_after_one_retry() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/reverse");
                then.status(502);
            })
            .await;

        let client = NominatimClient::new(Client::new(), server.base_url(), None)
            .with_retry_delay(Duration::from_millis(10));
        assert!(client.reverse(GeoPoint::new(43.47, -72.38)).await.is_err());
        mock.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn test_search_variants_share_throttle() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/search");
                then.status(200).json_body(json!([]));
            })
            .await;

        let client = NominatimClient::new(Client::new(), server.base_url(), None)
            .with_throttle(Arc::new(Throttle::new(Duration::from_millis(50))));
        let start = tokio::time::Instant::now();
        assert!(client.geocode("667 NH RT 120, Cornish, NH").await.is_err());
        mock.assert_hits_async(3).await;
        // Three calls, two enforced gaps.
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}
