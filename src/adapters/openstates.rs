//! Open States v3: current NH House members per district (`/people`) and
//! per point (`/people.geo`), plus bill links (`/bills`).

use crate::adapters::http::{join_url, send_with_retry, RetryPolicy};
use crate::core::label::{self, DistrictLabel};
use crate::domain::model::{GeoPoint, LegislatorRecord};
use crate::domain::ports::{LegislatorDirectory, PointLegislatorSource};
use crate::utils::cache::TtlCache;
use crate::utils::error::{LookupError, Result};
use crate::utils::throttle::Throttle;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

pub const DEFAULT_OPENSTATES_URL: &str = "https://v3.openstates.org";
pub const DEFAULT_JURISDICTION: &str = "New Hampshire";
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_DISTRICT_CACHE_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_BILL_CACHE_TTL: Duration = Duration::from_secs(3600);
const SERVICE: &str = "openstates";
const PER_PAGE: &str = "50";
const MAX_RETRIES: u32 = 1;

pub struct OpenStatesClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    jurisdiction: String,
    retry_delay: Duration,
    throttle: Arc<Throttle>,
    cache: TtlCache<DistrictLabel, Vec<LegislatorRecord>>,
    bill_cache: TtlCache<String, BillLink>,
}

impl OpenStatesClient {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            jurisdiction: DEFAULT_JURISDICTION.to_string(),
            retry_delay: DEFAULT_RETRY_DELAY,
            throttle: Arc::new(Throttle::new(Duration::ZERO)),
            cache: TtlCache::new(DEFAULT_DISTRICT_CACHE_TTL),
            bill_cache: TtlCache::new(DEFAULT_BILL_CACHE_TTL),
        }
    }

    pub fn with_jurisdiction(mut self, jurisdiction: impl Into<String>) -> Self {
        self.jurisdiction = jurisdiction.into();
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_throttle(mut self, throttle: Arc<Throttle>) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache = TtlCache::new(ttl);
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// GET with the API key, retrying once after `retry_delay` on 429, 5xx,
    /// timeouts and connection failures.
    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let api_key = self.api_key.as_deref().ok_or_else(|| LookupError::Config {
            message: "OPENSTATES_API_KEY is not set".to_string(),
        })?;
        let url = join_url(&self.base_url, path);
        let policy = RetryPolicy {
            retries: MAX_RETRIES,
            delay: self.retry_delay,
        };
        let response = send_with_retry(SERVICE, &self.throttle, policy, || {
            self.client.get(&url).header("X-API-KEY", api_key).query(query)
        })
        .await?;
        Ok(response.json().await?)
    }

    /// Best link for a bill (`"HB 1234"`, `"sb-12 2024"`, ...) from
    /// `/bills`. Text without a bill code is returned unresolved without a
    /// request; a search with no hits yields an empty URL.
    pub async fn bill_link(&self, bill: &str, year: Option<&str>) -> Result<BillLink> {
        let Some((code, found_year)) = extract_bill_code(bill) else {
            return Ok(BillLink {
                bill: bill.trim().to_string(),
                year: year.map(str::to_string),
                url: String::new(),
            });
        };
        let year = year
            .map(str::trim)
            .filter(|y| !y.is_empty())
            .map(str::to_string)
            .or(found_year);
        let cache_key = format!("{}:{}", code, year.as_deref().unwrap_or_default());
        if let Some(hit) = self.bill_cache.get(&cache_key) {
            return Ok((*hit).clone());
        }

        let mut query = vec![
            ("jurisdiction", self.jurisdiction.clone()),
            ("q", code.clone()),
            ("per_page", "3".to_string()),
        ];
        if let Some(year) = &year {
            query.push(("session", year.clone()));
        }
        let body = self.get_json("bills", &query).await?;
        let url = body["results"]
            .as_array()
            .or_else(|| body["data"].as_array())
            .and_then(|items| items.first())
            .map(best_bill_url)
            .unwrap_or_default();
        tracing::debug!("Bill link for {}: '{}'", code, url);
        let link = BillLink {
            bill: code,
            year,
            url,
        };
        Ok((*self.bill_cache.insert(cache_key, link)).clone())
    }
}

/// Result of a bill-link lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BillLink {
    pub bill: String,
    pub year: Option<String>,
    pub url: String,
}

static BILL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(HB|SB|HR|HCR|SCR)\s*[-_ ]?\s*(\d{1,4})(?:.*?(\d{4}))?").expect("valid regex")
});

/// `"hb-1234 (2024)"` → `("HB1234", Some("2024"))`.
pub fn extract_bill_code(text: &str) -> Option<(String, Option<String>)> {
    let caps = BILL_RE.captures(text)?;
    let code = format!("{}{}", caps[1].to_uppercase(), &caps[2]);
    Some((code, caps.get(3).map(|m| m.as_str().to_string())))
}

/// First of `sources[].url`, `links[].url`, then `openstates_url`.
fn best_bill_url(item: &Value) -> String {
    ["sources", "links"]
        .iter()
        .find_map(|key| {
            item[*key]
                .as_array()?
                .iter()
                .find_map(|entry| non_empty(&entry["url"]))
        })
        .or_else(|| non_empty(&item["openstates_url"]))
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl LegislatorDirectory for OpenStatesClient {
    async fn fetch_by_district(&self, label: &DistrictLabel) -> Result<Vec<LegislatorRecord>> {
        if let Some(hit) = self.cache.get(label) {
            tracing::debug!("District cache hit for {}", label);
            return Ok((*hit).clone());
        }

        let query = [
            ("jurisdiction", self.jurisdiction.clone()),
            ("org_classification", "lower".to_string()),
            ("district", label.as_str().to_string()),
            ("per_page", PER_PAGE.to_string()),
            ("include", "offices".to_string()),
            ("include", "links".to_string()),
        ];
        let body = self.get_json("people", &query).await?;
        let records = parse_people(&body, Some(label));
        tracing::debug!("{} lower-chamber records for {}", records.len(), label);
        Ok((*self.cache.insert(label.clone(), records)).clone())
    }
}

#[async_trait]
impl PointLegislatorSource for OpenStatesClient {
    async fn fetch_by_point(&self, point: GeoPoint) -> Result<Vec<LegislatorRecord>> {
        let query = [
            ("lat", point.latitude.to_string()),
            ("lng", point.longitude.to_string()),
            ("per_page", PER_PAGE.to_string()),
            ("include", "offices".to_string()),
            ("include", "links".to_string()),
        ];
        let body = self.get_json("people.geo", &query).await?;
        Ok(parse_people(&body, None))
    }
}

/// Turns any of the response shapes the people endpoints have produced into
/// lower-chamber records. `fallback` labels records whose own district is
/// missing or unreadable.
pub fn parse_people(body: &Value, fallback: Option<&DistrictLabel>) -> Vec<LegislatorRecord> {
    let items = body["results"]
        .as_array()
        .or_else(|| body["data"].as_array())
        .or_else(|| body.as_array());
    let Some(items) = items else {
        tracing::debug!("People response has no result list");
        return Vec::new();
    };

    items
        .iter()
        .filter(|item| is_lower_house(item, fallback))
        .filter_map(|item| parse_person(item, fallback))
        .collect()
}

fn person_of(item: &Value) -> &Value {
    if item["person"].is_object() {
        &item["person"]
    } else {
        item
    }
}

fn non_empty(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty())
}

fn lower_eq(value: &Value, expected: &str) -> bool {
    non_empty(value).is_some_and(|s| s.eq_ignore_ascii_case(expected))
}

/// District text attached to a record: `district` as a string or
/// `{name|label}`, then `current_role.district`.
fn district_text(item: &Value) -> Option<&str> {
    let person = person_of(item);
    let district = &item["district"];
    non_empty(district)
        .or_else(|| non_empty(&district["name"]))
        .or_else(|| non_empty(&district["label"]))
        .or_else(|| non_empty(&person["current_role"]["district"]))
        .or_else(|| non_empty(&person["current_role"]["district_name"]))
}

fn in_jurisdiction(item: &Value) -> bool {
    let person = person_of(item);
    let jurisdiction = [&item["jurisdiction"], &person["jurisdiction"]]
        .into_iter()
        .find(|j| !j.is_null());
    let Some(jurisdiction) = jurisdiction else {
        return true;
    };
    let text = [
        non_empty(jurisdiction),
        non_empty(&jurisdiction["name"]),
        non_empty(&jurisdiction["id"]),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ")
    .to_lowercase();
    text.is_empty() || text.contains("new hampshire") || text.contains("state:nh")
}

/// Lower-chamber check: jurisdiction, then organization / role
/// classification, then district wording, then whether the district reads as
/// a House label at all.
pub fn is_lower_house(item: &Value, fallback: Option<&DistrictLabel>) -> bool {
    if !in_jurisdiction(item) {
        return false;
    }
    let person = person_of(item);

    let organization = if item["organization"].is_object() {
        &item["organization"]
    } else {
        &item["org"]
    };
    if lower_eq(&organization["classification"], "lower") {
        return true;
    }
    if lower_eq(&organization["classification"], "upper") {
        return false;
    }

    let current = &person["current_role"];
    if lower_eq(&current["org_classification"], "lower") || lower_eq(&current["chamber"], "lower") {
        return true;
    }
    if lower_eq(&current["org_classification"], "upper") || lower_eq(&current["chamber"], "upper") {
        return false;
    }

    let roles = person["roles"]
        .as_array()
        .or_else(|| person["current_roles"].as_array());
    if roles.is_some_and(|roles| {
        roles
            .iter()
            .any(|r| lower_eq(&r["org_classification"], "lower") || lower_eq(&r["chamber"], "lower"))
    }) {
        return true;
    }

    let own = district_text(item);
    let text = [own, fallback.map(DistrictLabel::as_str)]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    if ["senate", "congress", "united states"].iter().any(|w| text.contains(w)) {
        return false;
    }
    if text.contains("house") {
        return true;
    }

    own.map(|raw| label::normalize(raw, None))
        .or_else(|| fallback.map(|l| Ok(l.clone())))
        .is_some_and(|l| l.is_ok_and(|l| l.is_canonical()))
}

fn parse_person(item: &Value, fallback: Option<&DistrictLabel>) -> Option<LegislatorRecord> {
    let person = person_of(item);

    let name = non_empty(&person["name"]).map(str::to_string).or_else(|| {
        let parts: Vec<&str> = [non_empty(&person["given_name"]), non_empty(&person["family_name"])]
            .into_iter()
            .flatten()
            .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    });
    let person_id = non_empty(&person["id"])
        .or_else(|| non_empty(&person["openstates_id"]))
        .map(str::to_string);
    if name.is_none() && person_id.is_none() {
        return None;
    }

    let district = district_text(item)
        .and_then(|raw| label::extract(raw).or_else(|| label::normalize(raw, None).ok()))
        .filter(DistrictLabel::is_canonical)
        .or_else(|| fallback.cloned())?;

    Some(LegislatorRecord {
        person_id,
        name: name.unwrap_or_default(),
        party: party_of(person),
        district,
        email: email_of(person),
        phone: phone_of(person),
        links: links_of(person),
        vote_map: Default::default(),
    })
}

/// `party` as a string, a list of strings or a list of `{name}` objects,
/// then `current_parties`.
fn party_of(person: &Value) -> Option<String> {
    [&person["party"], &person["current_parties"]]
        .into_iter()
        .find_map(|party| {
            non_empty(party).map(str::to_string).or_else(|| {
                party.as_array()?.iter().find_map(|p| {
                    non_empty(p)
                        .or_else(|| non_empty(&p["name"]))
                        .map(str::to_string)
                })
            })
        })
}

fn email_of(person: &Value) -> Option<String> {
    if let Some(email) = non_empty(&person["email"]) {
        return Some(email.to_string());
    }
    ["email_addresses", "emails"].iter().find_map(|key| {
        person[*key].as_array()?.iter().find_map(|e| {
            non_empty(e)
                .or_else(|| non_empty(&e["address"]))
                .or_else(|| non_empty(&e["value"]))
                .map(str::to_string)
        })
    })
}

fn phone_of(person: &Value) -> Option<String> {
    non_empty(&person["phone"])
        .or_else(|| {
            person["offices"]
                .as_array()?
                .iter()
                .find_map(|office| non_empty(&office["voice"]))
        })
        .map(str::to_string)
}

fn links_of(person: &Value) -> Vec<String> {
    let mut links: Vec<String> = person["links"]
        .as_array()
        .map(|links| {
            links
                .iter()
                .filter_map(|l| non_empty(l).or_else(|| non_empty(&l["url"])))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if let Some(url) = non_empty(&person["openstates_url"]) {
        if !links.iter().any(|l| l == url) {
            links.push(url.to_string());
        }
    }
    links
}
