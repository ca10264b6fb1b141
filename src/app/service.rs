use crate::adapters::http::{build_client, DEFAULT_USER_AGENT};
use crate::adapters::{CensusClient, GeocoderChain, NominatimClient, OpenStatesClient, SourceReader};
use crate::config::toml_config::{AppConfig, BaseSourceKind};
use crate::core::boundary::BoundaryIndex;
use crate::core::lookup::LookupService;
use crate::core::overlay::OverlayCache;
use crate::core::probe::{CachedPointSource, PointApiBaseSource, ProbeRing, DEFAULT_POINT_CACHE_TTL};
use crate::core::resolver::DistrictResolver;
use crate::core::votes::VoteCache;
use crate::domain::ports::{BaseDistrictSource, PointLegislatorSource, ReverseGeocoder, TextSource};
use crate::utils::error::{LookupError, Result};
use crate::utils::throttle::Throttle;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Shared pieces the CLI needs besides the lookup service itself.
pub struct Components {
    pub service: LookupService,
    pub reader: SourceReader,
    pub openstates: Arc<OpenStatesClient>,
    /// Present when a vote CSV is configured.
    pub votes: Option<Arc<VoteCache<SourceReader>>>,
}

pub fn http_client(config: &AppConfig) -> Result<Client> {
    let user_agent = config.http.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
    build_client(config.http.timeout(), user_agent)
}

/// Builds the full lookup pipeline from configuration. Only the boundary
/// file (when selected) is read up front; overlay CSVs load lazily.
pub async fn build_service(config: &AppConfig) -> Result<Components> {
    let client = http_client(config)?;
    let reader = SourceReader::new(client.clone());

    let census = Arc::new(CensusClient::new(
        client.clone(),
        config.geocoder.census_url.as_str(),
        config.geocoder.benchmark.as_str(),
        config.geocoder.vintage.as_str(),
    ));
    let nominatim = Arc::new(
        NominatimClient::new(
            client.clone(),
            config.geocoder.nominatim_url.as_str(),
            config.geocoder.nominatim_email.as_deref(),
        )
        .with_throttle(Arc::new(Throttle::new(config.geocoder.nominatim_min_interval())))
        .with_retry_delay(config.http.retry_delay()),
    );
    let mut geocoder = GeocoderChain::new(census.clone());
    if config.geocoder.nominatim_fallback {
        geocoder = geocoder.with_fallback(nominatim.clone());
    }
    tracing::debug!("Geocoders: {:?}", geocoder.names());

    let openstates = Arc::new(
        OpenStatesClient::new(
            client.clone(),
            config.openstates.base_url.as_str(),
            config.openstates.api_key.clone(),
        )
        .with_jurisdiction(config.openstates.jurisdiction.as_str())
        .with_retry_delay(config.http.retry_delay())
        .with_throttle(Arc::new(Throttle::new(config.http.min_interval())))
        .with_cache_ttl(Duration::from_secs(config.openstates.cache_ttl_seconds)),
    );
    if !openstates.has_api_key() {
        tracing::warn!("OPENSTATES_API_KEY is not set, legislator lookups will fail");
    }

    // The people.geo base source and the secondary signal ask about the same
    // point, so they share one cache.
    let point_source: Arc<dyn PointLegislatorSource> =
        Arc::new(CachedPointSource::new(openstates.clone(), DEFAULT_POINT_CACHE_TTL));

    let base_source: Arc<dyn BaseDistrictSource> = match config.resolver.base_source {
        BaseSourceKind::Census => census,
        BaseSourceKind::Boundary => {
            let path = config.resolver.boundary_path.as_deref().ok_or_else(|| LookupError::Config {
                message: "resolver.boundary_path is required for the boundary base source".to_string(),
            })?;
            let index = BoundaryIndex::from_geojson_str(&reader.read_text(path).await?)?;
            tracing::info!("Loaded {} district boundaries from {}", index.len(), path);
            Arc::new(index)
        }
        BaseSourceKind::PeopleGeo => Arc::new(PointApiBaseSource::new(ProbeRing::new(
            point_source.clone(),
            config.resolver.probe,
        ))),
    };

    let reverse: Option<Arc<dyn ReverseGeocoder>> = if config.geocoder.reverse_geocoding {
        Some(nominatim as Arc<dyn ReverseGeocoder>)
    } else {
        None
    };

    let overlay = Arc::new(OverlayCache::new(
        reader.clone(),
        config.overlay.base_csv.clone(),
        config.overlay.town_csv.clone(),
        Duration::from_secs(config.overlay.ttl_seconds),
    ));
    if config.overlay.base_csv.is_none() && config.overlay.town_csv.is_none() {
        tracing::warn!("No overlay CSV configured, floterial districts will not be resolved");
    }

    let resolver = DistrictResolver::new(base_source, reverse, overlay);
    let mut service = LookupService::new(Arc::new(geocoder), resolver, openstates.clone())
        .with_district_timeout(config.http.district_timeout());
    if config.openstates.use_people_geo && openstates.has_api_key() {
        service = service.with_point_source(point_source);
    }

    let votes = config.votes.csv.as_ref().map(|location| {
        Arc::new(VoteCache::new(
            reader.clone(),
            location.clone(),
            Duration::from_secs(config.votes.ttl_seconds),
        ))
    });
    if let Some(votes) = &votes {
        service = service.with_votes(votes.clone());
    }

    Ok(Components {
        service,
        reader,
        openstates,
        votes,
    })
}
