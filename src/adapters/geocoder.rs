use crate::domain::model::GeocodeMatch;
use crate::domain::ports::Geocoder;
use crate::utils::error::{LookupError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Tries each geocoder in order and returns the first match. Any failure of
/// an earlier geocoder (network, status, empty result, bad body) falls
/// through to the next one.
pub struct GeocoderChain {
    geocoders: Vec<Arc<dyn Geocoder>>,
}

impl GeocoderChain {
    pub fn new(primary: Arc<dyn Geocoder>) -> Self {
        Self {
            geocoders: vec![primary],
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn Geocoder>) -> Self {
        self.geocoders.push(fallback);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.geocoders.iter().map(|g| g.name()).collect()
    }
}

#[async_trait]
impl Geocoder for GeocoderChain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn geocode(&self, address: &str) -> Result<GeocodeMatch> {
        let mut last: Option<(String, LookupError)> = None;
        for geocoder in &self.geocoders {
            match geocoder.geocode(address).await {
                Ok(found) => return Ok(found),
                Err(e) => {
                    tracing::info!("Geocoder {} failed: {}", geocoder.name(), e);
                    last = Some((geocoder.name().to_string(), e));
                }
            }
        }

        let (geocoder, cause) = match last {
            Some((name, LookupError::GeocodeFailed { cause, .. })) => (name, cause),
            Some((name, other)) => (name, other.to_string()),
            None => ("none".to_string(), "no geocoder configured".to_string()),
        };
        Err(LookupError::GeocodeFailed {
            address: address.to_string(),
            geocoder,
            cause,
        })
    }
}
