use crate::core::label::DistrictLabel;
use crate::domain::model::{GeoPoint, GeocodeMatch, LegislatorRecord, Locality};
use crate::utils::error::Result;
use async_trait::async_trait;

/// Reads raw text (overlay CSVs, boundary files) from a URL or local path.
pub trait TextSource: Send + Sync {
    fn read_text(
        &self,
        location: &str,
    ) -> impl std::future::Future<Output = Result<String>> + Send;
}

/// Address → coordinates.
#[async_trait]
pub trait Geocoder: Send + Sync {
    fn name(&self) -> &str;
    async fn geocode(&self, address: &str) -> Result<GeocodeMatch>;
}

/// Coordinates → town / county.
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn reverse(&self, point: GeoPoint) -> Result<Locality>;
}

/// Authoritative source for the base district containing a point.
#[async_trait]
pub trait BaseDistrictSource: Send + Sync {
    fn name(&self) -> &str;
    async fn base_district(&self, point: GeoPoint) -> Result<Option<DistrictLabel>>;
}

/// Current lower-chamber office holders for one district.
#[async_trait]
pub trait LegislatorDirectory: Send + Sync {
    async fn fetch_by_district(&self, label: &DistrictLabel) -> Result<Vec<LegislatorRecord>>;
}

/// Legislators whose districts contain a point.
#[async_trait]
pub trait PointLegislatorSource: Send + Sync {
    async fn fetch_by_point(&self, point: GeoPoint) -> Result<Vec<LegislatorRecord>>;
}
