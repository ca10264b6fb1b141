// Adapters layer: concrete implementations of the domain ports for the
// external services (Census, Nominatim, Open States) and text sources.

pub mod census;
pub mod geocoder;
pub mod http;
pub mod nominatim;
pub mod openstates;
pub mod source;

pub use census::CensusClient;
pub use geocoder::GeocoderChain;
pub use nominatim::NominatimClient;
pub use openstates::OpenStatesClient;
pub use source::SourceReader;
