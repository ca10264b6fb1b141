//! Probe-ring retry around a legislator-by-point service.
//!
//! Some point lookups come back empty for addresses near district edges. When
//! that happens the same query is repeated at offset points on concentric
//! rings around the original point until enough results come back or the ring
//! budget is spent.

use crate::core::label::DistrictLabel;
use crate::domain::model::{GeoPoint, LegislatorRecord};
use crate::domain::ports::{BaseDistrictSource, PointLegislatorSource};
use crate::utils::cache::TtlCache;
use crate::utils::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_POINT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Eight compass bearings as unit (lat, lon) steps.
const BEARINGS: [(f64, f64); 8] = [
    (1.0, 0.0),
    (1.0, 1.0),
    (0.0, 1.0),
    (-1.0, 1.0),
    (-1.0, 0.0),
    (-1.0, -1.0),
    (0.0, -1.0),
    (1.0, -1.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeRingConfig {
    /// Offset of the first ring, in degrees.
    pub start_offset: f64,
    /// Added to the offset for every further ring, in degrees.
    pub step: f64,
    /// Number of rings; zero means only the original point is queried.
    pub rings: u32,
    /// A probe counts as a hit once it returns at least this many records.
    pub min_results: usize,
}

impl Default for ProbeRingConfig {
    fn default() -> Self {
        Self {
            start_offset: 0.0005,
            step: 0.0005,
            rings: 3,
            min_results: 1,
        }
    }
}

impl ProbeRingConfig {
    pub const MAX_RINGS: u32 = 10;

    /// Every point that may be queried, original point first.
    pub fn probe_points(&self, origin: GeoPoint) -> Vec<GeoPoint> {
        let rings = self.rings.min(Self::MAX_RINGS);
        let mut points = Vec::with_capacity(1 + rings as usize * BEARINGS.len());
        points.push(origin);
        for ring in 0..rings {
            let offset = self.start_offset + self.step * ring as f64;
            points.extend(
                BEARINGS
                    .iter()
                    .map(|(d_lat, d_lon)| origin.offset(d_lat * offset, d_lon * offset)),
            );
        }
        points
    }
}

/// Wraps a point source with probe-ring retries.
pub struct ProbeRing {
    source: Arc<dyn PointLegislatorSource>,
    config: ProbeRingConfig,
}

impl ProbeRing {
    pub fn new(source: Arc<dyn PointLegislatorSource>, config: ProbeRingConfig) -> Self {
        Self { source, config }
    }

    /// Queries the original point, then ring points, stopping at the first
    /// probe with enough results. Failed probes are skipped; if every probe
    /// fails the last error is returned.
    pub async fn probe(&self, origin: GeoPoint) -> Result<Vec<LegislatorRecord>> {
        let min_results = self.config.min_results.max(1);
        let mut last_error = None;
        let mut any_ok = false;

        for (attempt, point) in self.config.probe_points(origin).into_iter().enumerate() {
            match self.source.fetch_by_point(point).await {
                Ok(records) if records.len() >= min_results => {
                    if attempt > 0 {
                        tracing::debug!(
                            "Probe {} at ({:.5}, {:.5}) returned {} records",
                            attempt,
                            point.latitude,
                            point.longitude,
                            records.len()
                        );
                    }
                    return Ok(records);
                }
                Ok(_) => any_ok = true,
                Err(e) => {
                    tracing::debug!("Probe {} failed: {}", attempt, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if !any_ok => Err(e),
            _ => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl PointLegislatorSource for ProbeRing {
    async fn fetch_by_point(&self, point: GeoPoint) -> Result<Vec<LegislatorRecord>> {
        self.probe(point).await
    }
}

/// Remembers point answers for a short TTL so the base source and the
/// secondary signal can share one upstream call per point. Errors are not
/// remembered.
pub struct CachedPointSource {
    source: Arc<dyn PointLegislatorSource>,
    cache: TtlCache<(u64, u64), Vec<LegislatorRecord>>,
}

impl CachedPointSource {
    pub fn new(source: Arc<dyn PointLegislatorSource>, ttl: Duration) -> Self {
        Self {
            source,
            cache: TtlCache::new(ttl),
        }
    }
}

#[async_trait]
impl PointLegislatorSource for CachedPointSource {
    async fn fetch_by_point(&self, point: GeoPoint) -> Result<Vec<LegislatorRecord>> {
        let key = (point.latitude.to_bits(), point.longitude.to_bits());
        if let Some(records) = self.cache.get(&key) {
            return Ok(records.as_ref().clone());
        }
        let records = self.source.fetch_by_point(point).await?;
        Ok(self.cache.insert(key, records).as_ref().clone())
    }
}

/// Base district inferred from a legislator-by-point service: the label held
/// by the most returned records, ties broken by label order.
pub struct PointApiBaseSource {
    probe: ProbeRing,
}

impl PointApiBaseSource {
    pub fn new(probe: ProbeRing) -> Self {
        Self { probe }
    }
}

pub fn dominant_label(records: &[LegislatorRecord]) -> Option<DistrictLabel> {
    let mut counts: BTreeMap<&DistrictLabel, usize> = BTreeMap::new();
    for record in records.iter().filter(|r| r.district.is_canonical()) {
        *counts.entry(&record.district).or_default() += 1;
    }
    counts
        .into_iter()
        .fold(None, |best: Option<(&DistrictLabel, usize)>, (label, count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((label, count)),
        })
        .map(|(label, _)| label.clone())
}

#[async_trait]
impl BaseDistrictSource for PointApiBaseSource {
    fn name(&self) -> &str {
        "people.geo"
    }

    async fn base_district(&self, point: GeoPoint) -> Result<Option<DistrictLabel>> {
        let records = self.probe.probe(point).await?;
        Ok(dominant_label(&records))
    }
}
