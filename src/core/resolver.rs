use crate::core::label::{self, DistrictLabel};
use crate::core::overlay::{OverlayIndex, OverlayProvider};
use crate::domain::model::{BaseFailure, GeoPoint, Locality, Resolution};
use crate::domain::ports::{BaseDistrictSource, ReverseGeocoder};
use crate::utils::error::LookupError;
use std::sync::Arc;

/// Computes the base district and the floterial overlay for a point.
///
/// The base always comes from the configured [`BaseDistrictSource`]. Labels
/// from other signals can only add bases the overlay already knows about,
/// and floterials are only ever derived from bases and towns, never the
/// other way round.
pub struct DistrictResolver {
    base_source: Arc<dyn BaseDistrictSource>,
    reverse: Option<Arc<dyn ReverseGeocoder>>,
    overlay: Arc<dyn OverlayProvider>,
}

impl DistrictResolver {
    pub fn new(
        base_source: Arc<dyn BaseDistrictSource>,
        reverse: Option<Arc<dyn ReverseGeocoder>>,
        overlay: Arc<dyn OverlayProvider>,
    ) -> Self {
        Self {
            base_source,
            reverse,
            overlay,
        }
    }

    /// Resolver over a fixed overlay snapshot.
    pub fn with_index(
        base_source: Arc<dyn BaseDistrictSource>,
        reverse: Option<Arc<dyn ReverseGeocoder>>,
        index: OverlayIndex,
    ) -> Self {
        Self::new(base_source, reverse, Arc::new(Arc::new(index)))
    }

    pub fn base_source_name(&self) -> &str {
        self.base_source.name()
    }

    pub async fn overlay(&self) -> Arc<OverlayIndex> {
        self.overlay.overlay().await
    }

    /// `source_labels` are district labels reported by a secondary signal
    /// (e.g. a legislator-by-point service). `locality_hint` is used for any
    /// town/county the reverse geocoder cannot supply.
    pub async fn resolve(
        &self,
        point: GeoPoint,
        source_labels: &[String],
        locality_hint: Option<&Locality>,
    ) -> Resolution {
        let index = self.overlay.overlay().await;

        let mut base_failure = None;
        let base = match self.base_source.base_district(point).await {
            Ok(Some(label)) if label.is_canonical() => Some(label),
            Ok(Some(label)) => {
                tracing::warn!("{} returned incomplete base label '{}'", self.base_source.name(), label);
                None
            }
            Ok(None) => {
                tracing::info!(
                    "{} found no base district at ({:.5}, {:.5})",
                    self.base_source.name(),
                    point.latitude,
                    point.longitude
                );
                None
            }
            Err(e) => {
                tracing::warn!("{} base lookup failed: {}", self.base_source.name(), e);
                let message = match e {
                    LookupError::UpstreamUnavailable { message, .. } => message,
                    other => other.to_string(),
                };
                base_failure = Some(BaseFailure {
                    source: self.base_source.name().to_string(),
                    message,
                });
                None
            }
        };

        let extra_bases = source_labels
            .iter()
            .filter_map(|raw| match label::normalize(raw, None) {
                Ok(l) => Some(l),
                Err(e) => {
                    tracing::debug!("Skipping secondary label: {}", e);
                    None
                }
            })
            .filter(|l| index.is_known_base(l) && Some(l) != base.as_ref())
            .collect();

        let locality = self.locate(point).await;
        let locality = match locality_hint {
            Some(hint) => locality.or(hint.clone()),
            None => locality,
        };

        let mut resolution = Resolution {
            base,
            extra_bases,
            floterials: Default::default(),
            locality,
            base_failure,
            overlay_degraded: index.is_degraded(),
        };
        resolution.floterials = overlay_floterials(&index, &resolution);
        tracing::debug!(
            "Resolved base {:?}, floterials {:?}",
            resolution.base.as_ref().map(DistrictLabel::as_str),
            resolution.floterials
        );
        resolution
    }

    async fn locate(&self, point: GeoPoint) -> Locality {
        let Some(reverse) = &self.reverse else {
            return Locality::default();
        };
        match reverse.reverse(point).await {
            Ok(locality) => locality,
            Err(e) => {
                tracing::warn!("Reverse geocoding failed, town overlay skipped unless hinted: {}", e);
                Locality::default()
            }
        }
    }
}

/// `∪ base_to_floterials[b]` over every base, plus the town entry.
pub fn overlay_floterials(
    index: &OverlayIndex,
    resolution: &Resolution,
) -> std::collections::BTreeSet<DistrictLabel> {
    let mut floterials = std::collections::BTreeSet::new();
    for base in resolution.base.iter().chain(resolution.extra_bases.iter()) {
        if let Some(found) = index.floterials_for_base(base) {
            floterials.extend(found.iter().cloned());
        }
    }
    if let Some(town) = &resolution.locality.town {
        floterials.extend(index.floterials_for_town(town, resolution.locality.county));
    }
    floterials
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::label::County;
    use crate::domain::ports::BaseDistrictSource;
    use crate::utils::error::Result;
    use async_trait::async_trait;

    struct FixedBase(Option<&'static str>);

    #[async_trait]
    impl BaseDistrictSource for FixedBase {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn base_district(&self, _point: GeoPoint) -> Result<Option<DistrictLabel>> {
            Ok(self.0.map(|raw| label::normalize(raw, None).unwrap()))
        }
    }

    struct BrokenBase;

    #[async_trait]
    impl BaseDistrictSource for BrokenBase {
        fn name(&self) -> &str {
            "broken"
        }

        async fn base_district(&self, _point: GeoPoint) -> Result<Option<DistrictLabel>> {
            Err(LookupError::UpstreamUnavailable {
                service: "census".to_string(),
                message: "timeout".to_string(),
            })
        }
    }

    struct FixedTown(Option<Locality>);

    #[async_trait]
    impl ReverseGeocoder for FixedTown {
        async fn reverse(&self, _point: GeoPoint) -> Result<Locality> {
            self.0.clone().ok_or_else(|| LookupError::UpstreamUnavailable {
                service: "nominatim".to_string(),
                message: "down".to_string(),
            })
        }
    }

    fn cornish() -> Locality {
        Locality {
            town: Some("Cornish".to_string()),
            county: Some(County::Sullivan),
        }
    }

    fn index() -> OverlayIndex {
        OverlayIndex::load(
            "base_district,floterial_district\nSullivan 2,Sullivan 10\nSullivan 1,Sullivan 10\nGrafton 1,Grafton 17\n",
            "town,county,district\nCornish,Sullivan,Sullivan 10\nPlainfield,Sullivan,Sullivan 11\n",
        )
    }

    fn labels(resolution: &Resolution) -> Vec<String> {
        resolution
            .district_labels()
            .into_iter()
            .map(String::from)
            .collect()
    }

    const POINT: GeoPoint = GeoPoint {
        latitude: 43.47,
        longitude: -72.38,
    };

    #[tokio::test]
    async fn test_cornish_resolves_base_and_floterial() {
        let resolver = DistrictResolver::with_index(
            Arc::new(FixedBase(Some("Sullivan 02"))),
            Some(Arc::new(FixedTown(Some(cornish())))),
            index(),
        );
        let resolution = resolver.resolve(POINT, &[], None).await;
        assert_eq!(resolution.base.as_ref().unwrap().as_str(), "Sullivan 2");
        assert_eq!(labels(&resolution), vec!["Sullivan 2", "Sullivan 10"]);
        assert_eq!(resolution.locality.town.as_deref(), Some("Cornish"));
    }

    #[tokio::test]
    async fn test_floterial_base_does_not_leak_back() {
        // Sullivan 10 is a floterial of Sullivan 2; resolving at Sullivan 10
        // must not pull Sullivan 2 in.
        let resolver = DistrictResolver::with_index(
            Arc::new(FixedBase(Some("Sullivan 10"))),
            None,
            index(),
        );
        let resolution = resolver.resolve(POINT, &["Sullivan 10".to_string()], None).await;
        assert_eq!(labels(&resolution), vec!["Sullivan 10"]);
    }

    #[tokio::test]
    async fn test_secondary_labels_add_only_known_bases() {
        let resolver = DistrictResolver::with_index(
            Arc::new(FixedBase(Some("Sullivan 2"))),
            None,
            index(),
        );
        let secondary = vec!["SU01".to_string(), "Merrimack 4".to_string(), "".to_string()];
        let resolution = resolver.resolve(POINT, &secondary, None).await;
        assert_eq!(resolution.base.as_ref().unwrap().as_str(), "Sullivan 2");
        assert_eq!(
            resolution.extra_bases.iter().map(DistrictLabel::as_str).collect::<Vec<_>>(),
            vec!["Sullivan 1"]
        );
        assert_eq!(labels(&resolution), vec!["Sullivan 1", "Sullivan 2", "Sullivan 10"]);
    }

    #[tokio::test]
    async fn test_failed_base_source_still_applies_town_overlay() {
        let resolver = DistrictResolver::with_index(
            Arc::new(BrokenBase),
            Some(Arc::new(FixedTown(Some(cornish())))),
            index(),
        );
        let resolution = resolver.resolve(POINT, &[], None).await;
        assert!(resolution.base.is_none());
        assert_eq!(labels(&resolution), vec!["Sullivan 10"]);
        let failure = resolution.base_failure.unwrap();
        assert_eq!(failure.source, "broken");
        assert!(failure.message.contains("timeout"));
    }

    #[tokio::test]
    async fn test_base_not_found_is_not_a_failure() {
        let resolver = DistrictResolver::with_index(Arc::new(FixedBase(None)), None, index());
        let resolution = resolver.resolve(POINT, &[], None).await;
        assert!(resolution.district_labels().is_empty());
        assert!(resolution.base_failure.is_none());
        assert!(!resolution.overlay_degraded);
    }

    #[tokio::test]
    async fn test_reverse_failure_falls_back_to_hint_then_nothing() {
        let resolver = DistrictResolver::with_index(
            Arc::new(FixedBase(Some("Grafton 1"))),
            Some(Arc::new(FixedTown(None))),
            index(),
        );
        let plain = resolver.resolve(POINT, &[], None).await;
        assert_eq!(labels(&plain), vec!["Grafton 1", "Grafton 17"]);
        assert!(plain.locality.is_empty());

        let hint = Locality {
            town: Some("plainfield".to_string()),
            county: Some(County::Sullivan),
        };
        let hinted = resolver.resolve(POINT, &[], Some(&hint)).await;
        assert_eq!(labels(&hinted), vec!["Grafton 1", "Grafton 17", "Sullivan 11"]);
    }

    #[tokio::test]
    async fn test_resolution_is_deterministic_under_concurrency() {
        let resolver = Arc::new(DistrictResolver::with_index(
            Arc::new(FixedBase(Some("Sullivan 2"))),
            Some(Arc::new(FixedTown(Some(cornish())))),
            index(),
        ));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let resolver = Arc::clone(&resolver);
            handles.push(tokio::spawn(async move { resolver.resolve(POINT, &[], None).await }));
        }
        let expected = resolver.resolve(POINT, &[], None).await;
        for handle in handles {
            assert_eq!(handle.await.unwrap().floterials, expected.floterials);
        }
    }
}
