//! US Census Bureau geocoder: structured / one-line address matching and the
//! State Legislative District (Lower) layer for coordinates.

use crate::adapters::http::{join_url, status_error, transport_error};
use crate::core::label::{self, DistrictLabel};
use crate::core::overlay::normalize_town;
use crate::domain::model::{GeoPoint, GeocodeMatch, Locality};
use crate::domain::ports::{BaseDistrictSource, Geocoder};
use crate::utils::error::{LookupError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

pub const DEFAULT_CENSUS_URL: &str = "https://geocoding.geo.census.gov/geocoder";
const SERVICE: &str = "census";

#[derive(Debug, Clone)]
pub struct CensusClient {
    client: Client,
    base_url: String,
    benchmark: String,
    vintage: String,
}

/// Address split into the components the structured endpoint expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressParts {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: Option<String>,
}

fn zip_of(token: &str) -> Option<String> {
    (token.len() >= 5 && token.chars().take(5).all(|c| c.is_ascii_digit())).then(|| token[..5].to_string())
}

/// `"667 NH RT 120, Cornish, NH 03745"` → street / city / state / zip.
/// City and state are read from the end, so unit parts stay in the street
/// (`"1 Main St, Apt 2, Concord, NH"`). Returns `None` when the address does
/// not have at least three comma-separated parts.
pub fn split_address(address: &str) -> Option<AddressParts> {
    let mut parts: Vec<&str> = address
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    // "..., NH, 03745": a trailing part that is only a zip code.
    let mut zip = None;
    if parts.len() > 3 {
        if let Some(last) = parts.last().filter(|p| !p.contains(char::is_whitespace)) {
            if let Some(found) = zip_of(last) {
                zip = Some(found);
                parts.pop();
            }
        }
    }

    let [street @ .., city, state_part] = parts.as_slice() else {
        return None;
    };
    if street.is_empty() {
        return None;
    }
    let mut tail = state_part.split_whitespace();
    let state = tail.next()?;
    let zip = zip.or_else(|| tail.find_map(zip_of));
    Some(AddressParts {
        street: street.join(", "),
        city: city.to_string(),
        state: state.to_string(),
        zip,
    })
}

impl CensusClient {
    pub fn new(client: Client, base_url: impl Into<String>, benchmark: impl Into<String>, vintage: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            benchmark: benchmark.into(),
            vintage: vintage.into(),
        }
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = join_url(&self.base_url, path);
        tracing::debug!("Census request: {} {:?}", url, query);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        if !response.status().is_success() {
            return Err(status_error(SERVICE, response.status()));
        }
        Ok(response.json().await?)
    }

    async fn locate_address(&self, address: &str) -> Result<Value> {
        let mut query = vec![
            ("benchmark", self.benchmark.clone()),
            ("format", "json".to_string()),
        ];
        match split_address(address) {
            Some(parts) => {
                query.push(("street", parts.street));
                query.push(("city", parts.city));
                query.push(("state", parts.state));
                if let Some(zip) = parts.zip {
                    query.push(("zip", zip));
                }
                self.get_json("locations/address", &query).await
            }
            None => {
                query.push(("address", address.to_string()));
                self.get_json("locations/onelineaddress", &query).await
            }
        }
    }
}

/// First entry of `result.addressMatches`.
fn parse_address_match(body: &Value) -> Option<(GeoPoint, Locality)> {
    let first = body["result"]["addressMatches"].as_array()?.first()?;
    let coords = &first["coordinates"];
    let point = GeoPoint::new(coords["y"].as_f64()?, coords["x"].as_f64()?);
    let town = first["addressComponents"]["city"]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .map(normalize_town);
    Some((point, Locality { town, county: None }))
}

/// Label from the SLDL layer of a geographies response. The layer name has
/// varied between vintages, so any layer mentioning the lower house counts.
fn parse_sldl(body: &Value) -> Option<DistrictLabel> {
    let geographies = body["result"]["geographies"].as_object()?;
    let rows = geographies
        .get("State Legislative Districts - Lower")
        .or_else(|| {
            geographies
                .iter()
                .find(|(name, _)| name.contains("Legislative Districts - Lower"))
                .map(|(_, rows)| rows)
        })?
        .as_array()?;
    let row = rows.first()?;
    ["BASENAME", "NAME"].iter().find_map(|key| {
        let raw = row[*key].as_str()?;
        label::extract(raw).or_else(|| {
            label::normalize(raw, None)
                .ok()
                .filter(DistrictLabel::is_canonical)
        })
    })
}

#[async_trait]
impl Geocoder for CensusClient {
    fn name(&self) -> &str {
        SERVICE
    }

    async fn geocode(&self, address: &str) -> Result<GeocodeMatch> {
        let body = self.locate_address(address).await?;
        let (point, locality) = parse_address_match(&body).ok_or_else(|| LookupError::GeocodeFailed {
            address: address.to_string(),
            geocoder: SERVICE.to_string(),
            cause: "no address match".to_string(),
        })?;
        Ok(GeocodeMatch {
            point,
            locality,
            geocoder: SERVICE.to_string(),
        })
    }
}

#[async_trait]
impl BaseDistrictSource for CensusClient {
    fn name(&self) -> &str {
        SERVICE
    }

    async fn base_district(&self, point: GeoPoint) -> Result<Option<DistrictLabel>> {
        let query = [
            ("x", point.longitude.to_string()),
            ("y", point.latitude.to_string()),
            ("benchmark", self.benchmark.clone()),
            ("vintage", self.vintage.clone()),
            ("layers", "all".to_string()),
            ("format", "json".to_string()),
        ];
        let body = self.get_json("geographies/coordinates", &query).await?;
        Ok(parse_sldl(&body))
    }
}
