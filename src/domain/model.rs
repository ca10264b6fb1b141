use crate::core::label::{County, DistrictLabel};
use crate::core::votes::VoteMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// WGS84 coordinate pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    pub fn offset(&self, d_lat: f64, d_lon: f64) -> Self {
        Self::new(self.latitude + d_lat, self.longitude + d_lon)
    }
}

/// Town and county a point falls in, as far as a geocoder could tell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locality {
    pub town: Option<String>,
    pub county: Option<County>,
}

impl Locality {
    pub fn is_empty(&self) -> bool {
        self.town.is_none() && self.county.is_none()
    }

    /// Keeps fields already known and fills the gaps from `other`.
    pub fn or(self, other: Locality) -> Locality {
        Locality {
            town: self.town.or(other.town),
            county: self.county.or(other.county),
        }
    }
}

/// A successful forward geocode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeocodeMatch {
    pub point: GeoPoint,
    pub locality: Locality,
    pub geocoder: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegislatorRecord {
    pub person_id: Option<String>,
    pub name: String,
    pub party: Option<String>,
    pub district: DistrictLabel,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub links: Vec<String>,
    /// Key votes by bill label. Empty when no vote table is configured or
    /// the person has no row in it.
    #[serde(default)]
    pub vote_map: VoteMap,
}

impl LegislatorRecord {
    /// Identity used for deduplication: the directory id when present,
    /// otherwise the display name as-is.
    pub fn identity_key(&self) -> &str {
        match self.person_id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => &self.name,
        }
    }
}

/// Collapses records sharing an identity key, keeping the first occurrence
/// and the original order.
pub fn dedupe_legislators(records: Vec<LegislatorRecord>) -> Vec<LegislatorRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| !r.identity_key().is_empty())
        .filter(|r| seen.insert(r.identity_key().to_string()))
        .collect()
}

/// Output of the district resolver.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Resolution {
    pub base: Option<DistrictLabel>,
    /// Bases confirmed by a secondary signal, in addition to `base`.
    pub extra_bases: BTreeSet<DistrictLabel>,
    pub floterials: BTreeSet<DistrictLabel>,
    pub locality: Locality,
    /// Set when the base-district source itself failed, as opposed to
    /// answering that no district contains the point.
    pub base_failure: Option<BaseFailure>,
    /// Whether the overlay snapshot used for this resolution was degraded.
    pub overlay_degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaseFailure {
    pub source: String,
    pub message: String,
}

impl Resolution {
    /// `{base} ∪ extra_bases ∪ floterials`, sorted and deduplicated.
    pub fn district_labels(&self) -> Vec<DistrictLabel> {
        let mut all: BTreeSet<DistrictLabel> = self.extra_bases.clone();
        all.extend(self.base.iter().cloned());
        all.extend(self.floterials.iter().cloned());
        all.into_iter().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistrictFailure {
    pub district: DistrictLabel,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub town: Option<String>,
    pub county: Option<County>,
    pub geocoder: Option<String>,
    pub base_source: String,
    pub queried_districts: Vec<DistrictLabel>,
    pub failed_districts: Vec<DistrictFailure>,
    pub point_source_used: bool,
    pub overlay_degraded: bool,
    /// Base-district source error, when it failed.
    pub base_error: Option<String>,
    /// People.geo records were kept without district filtering because the
    /// base-district source failed.
    pub point_fallback: bool,
    pub votes_degraded: bool,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionResult {
    pub address: Option<String>,
    pub point: GeoPoint,
    pub base_district: Option<DistrictLabel>,
    pub floterial_districts: BTreeSet<DistrictLabel>,
    pub legislators: Vec<LegislatorRecord>,
    pub diagnostics: Diagnostics,
}

impl ResolutionResult {
    pub fn districts(&self) -> Vec<DistrictLabel> {
        let mut all: BTreeSet<DistrictLabel> = self.floterial_districts.clone();
        all.extend(self.base_district.iter().cloned());
        all.into_iter().collect()
    }
}
