//! Address → representatives pipeline.

use crate::core::label::{self, DistrictLabel};
use crate::core::overlay::OverlayStats;
use crate::core::resolver::DistrictResolver;
use crate::core::votes::VoteProvider;
use crate::domain::model::{
    dedupe_legislators, Diagnostics, DistrictFailure, GeoPoint, LegislatorRecord, Locality,
    ResolutionResult,
};
use crate::domain::ports::{Geocoder, LegislatorDirectory, PointLegislatorSource};
use crate::utils::error::{LookupError, Stage, StageError};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_DISTRICT_TIMEOUT: Duration = Duration::from_secs(20);

pub struct LookupService {
    geocoder: Arc<dyn Geocoder>,
    point_source: Option<Arc<dyn PointLegislatorSource>>,
    resolver: DistrictResolver,
    directory: Arc<dyn LegislatorDirectory>,
    votes: Option<Arc<dyn VoteProvider>>,
    district_timeout: Duration,
}

struct Located {
    address: Option<String>,
    point: GeoPoint,
    geocoder: Option<String>,
    hint: Option<Locality>,
}

impl LookupService {
    pub fn new(
        geocoder: Arc<dyn Geocoder>,
        resolver: DistrictResolver,
        directory: Arc<dyn LegislatorDirectory>,
    ) -> Self {
        Self {
            geocoder,
            point_source: None,
            resolver,
            directory,
            votes: None,
            district_timeout: DEFAULT_DISTRICT_TIMEOUT,
        }
    }

    /// Adds a legislator-by-point source used as a secondary district signal.
    pub fn with_point_source(mut self, source: Arc<dyn PointLegislatorSource>) -> Self {
        self.point_source = Some(source);
        self
    }

    /// Attaches key votes to every returned record.
    pub fn with_votes(mut self, votes: Arc<dyn VoteProvider>) -> Self {
        self.votes = Some(votes);
        self
    }

    pub fn with_district_timeout(mut self, timeout: Duration) -> Self {
        self.district_timeout = timeout;
        self
    }

    /// geocode → people.geo (optional) → resolve → legislators per district
    /// → merge, dedupe, diagnostics.
    pub async fn lookup(&self, address: &str) -> Result<ResolutionResult, StageError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(StageError::new(
                Stage::Input,
                LookupError::ClientInput {
                    message: "address is required".to_string(),
                },
            ));
        }

        let found = self
            .geocoder
            .geocode(address)
            .await
            .map_err(|e| StageError::new(Stage::Geocode, e))?;
        tracing::info!(
            "Geocoded '{}' via {} to ({:.5}, {:.5})",
            address,
            found.geocoder,
            found.point.latitude,
            found.point.longitude
        );

        self.complete(Located {
            address: Some(address.to_string()),
            point: found.point,
            geocoder: Some(found.geocoder),
            hint: Some(found.locality).filter(|l| !l.is_empty()),
        })
        .await
    }

    /// Same pipeline starting from coordinates.
    pub async fn lookup_point(&self, point: GeoPoint) -> Result<ResolutionResult, StageError> {
        if !point.is_valid() {
            return Err(StageError::new(
                Stage::Input,
                LookupError::ClientInput {
                    message: format!(
                        "coordinates out of range: ({}, {})",
                        point.latitude, point.longitude
                    ),
                },
            ));
        }
        self.complete(Located {
            address: None,
            point,
            geocoder: None,
            hint: None,
        })
        .await
    }

    /// Current members for a single district label in any accepted spelling.
    pub async fn district(&self, raw: &str) -> Result<(DistrictLabel, Vec<LegislatorRecord>), StageError> {
        let label = label::normalize(raw, None)
            .ok()
            .filter(DistrictLabel::is_canonical)
            .ok_or_else(|| {
                StageError::new(
                    Stage::Input,
                    LookupError::InvalidLabel {
                        raw: raw.to_string(),
                    },
                )
            })?;
        let mut records = self
            .directory
            .fetch_by_district(&label)
            .await
            .map_err(|e| StageError::new(Stage::Legislators, e))?;
        self.attach_votes(&mut records).await;
        Ok((label, records))
    }

    pub async fn overlay_stats(&self) -> OverlayStats {
        self.resolver.overlay().await.stats()
    }

    async fn complete(&self, located: Located) -> Result<ResolutionResult, StageError> {
        let point = located.point;

        let point_records = match &self.point_source {
            Some(source) => match source.fetch_by_point(point).await {
                Ok(records) => Some(records),
                Err(e) => {
                    tracing::warn!("{} lookup failed, continuing without it: {}", Stage::PeopleGeo, e);
                    None
                }
            },
            None => None,
        };
        let source_labels: Vec<String> = point_records
            .iter()
            .flatten()
            .map(|r| r.district.as_str().to_string())
            .collect();

        let resolution = self
            .resolver
            .resolve(point, &source_labels, located.hint.as_ref())
            .await;
        let districts = resolution.district_labels();
        // Without a working base source there is nothing to filter people.geo
        // against, so its records are kept as they came.
        let point_fallback = resolution.base_failure.is_some()
            && point_records.as_ref().is_some_and(|records| !records.is_empty());
        if districts.is_empty() && !point_fallback {
            return Err(match &resolution.base_failure {
                Some(failure) => StageError::new(
                    Stage::BaseDistrict,
                    LookupError::UpstreamUnavailable {
                        service: failure.source.clone(),
                        message: failure.message.clone(),
                    },
                ),
                None => StageError::new(
                    Stage::Resolve,
                    LookupError::NoDistrict {
                        latitude: point.latitude,
                        longitude: point.longitude,
                    },
                ),
            });
        }

        let mut legislators = Vec::new();
        let mut failed_districts = Vec::new();
        let mut last_error = None;
        for district in &districts {
            match self.fetch_district(district).await {
                Ok(records) => legislators.extend(records),
                Err(e) => {
                    tracing::warn!("Legislator fetch for {} failed: {}", district, e);
                    failed_districts.push(DistrictFailure {
                        district: district.clone(),
                        error: e.to_string(),
                    });
                    last_error = Some(e);
                }
            }
        }

        legislators.extend(
            point_records
                .iter()
                .flatten()
                .filter(|r| point_fallback || districts.contains(&r.district))
                .cloned(),
        );
        let mut legislators = dedupe_legislators(legislators);

        if !districts.is_empty() && failed_districts.len() == districts.len() && legislators.is_empty() {
            if let Some(e) = last_error {
                return Err(StageError::new(Stage::Legislators, e));
            }
        }

        let votes_degraded = !self.attach_votes(&mut legislators).await;
        if point_fallback {
            tracing::warn!(
                "Base district unavailable, returning {} unfiltered people.geo record(s)",
                legislators.len()
            );
        }
        tracing::info!(
            "Resolved {} district(s), {} legislator(s), {} failed",
            districts.len(),
            legislators.len(),
            failed_districts.len()
        );

        Ok(ResolutionResult {
            address: located.address,
            point,
            base_district: resolution.base.clone(),
            floterial_districts: resolution.floterials.clone(),
            legislators,
            diagnostics: Diagnostics {
                town: resolution.locality.town.clone(),
                county: resolution.locality.county,
                geocoder: located.geocoder,
                base_source: self.resolver.base_source_name().to_string(),
                queried_districts: districts,
                failed_districts,
                point_source_used: point_records.is_some(),
                overlay_degraded: resolution.overlay_degraded,
                base_error: resolution.base_failure.as_ref().map(|f| f.message.clone()),
                point_fallback,
                votes_degraded,
                resolved_at: Utc::now(),
            },
        })
    }

    /// Fills `vote_map` from the vote table. Returns false when a configured
    /// table could not be loaded.
    async fn attach_votes(&self, records: &mut [LegislatorRecord]) -> bool {
        let Some(votes) = &self.votes else {
            return true;
        };
        match votes.votes().await {
            Ok(table) => {
                table.attach(records);
                true
            }
            Err(e) => {
                tracing::warn!("Vote table unavailable, returning records without votes: {}", e);
                false
            }
        }
    }

    async fn fetch_district(&self, district: &DistrictLabel) -> crate::utils::error::Result<Vec<LegislatorRecord>> {
        match tokio::time::timeout(self.district_timeout, self.directory.fetch_by_district(district)).await {
            Ok(result) => result,
            Err(_) => Err(LookupError::UpstreamUnavailable {
                service: "legislator directory".to_string(),
                message: format!("timed out after {:?}", self.district_timeout),
            }),
        }
    }
}
