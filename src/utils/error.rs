use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("{message}")]
    ClientInput { message: String },

    #[error("geocoding failed for '{address}' ({geocoder}): {cause}")]
    GeocodeFailed {
        address: String,
        geocoder: String,
        cause: String,
    },

    #[error("{service} rate limited the request")]
    UpstreamRateLimited { service: String },

    #[error("{service} unavailable: {message}")]
    UpstreamUnavailable { service: String, message: String },

    #[error("overlay source '{source_name}' could not be loaded: {message}")]
    OverlayLoadDegraded {
        source_name: String,
        message: String,
    },

    #[error("no House district found at ({latitude:.5}, {longitude:.5})")]
    NoDistrict { latitude: f64, longitude: f64 },

    #[error("invalid district label: '{raw}'")]
    InvalidLabel { raw: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid value for '{field}': '{value}' ({reason})")]
    InvalidConfigValue {
        field: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Input,
    Upstream,
    Data,
    Configuration,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl LookupError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            LookupError::ClientInput { .. } => ErrorCategory::Input,
            LookupError::GeocodeFailed { .. }
            | LookupError::UpstreamRateLimited { .. }
            | LookupError::UpstreamUnavailable { .. }
            | LookupError::Http(_) => ErrorCategory::Upstream,
            LookupError::OverlayLoadDegraded { .. }
            | LookupError::NoDistrict { .. }
            | LookupError::InvalidLabel { .. }
            | LookupError::Csv(_)
            | LookupError::Serialization(_) => ErrorCategory::Data,
            LookupError::Config { .. } | LookupError::InvalidConfigValue { .. } => {
                ErrorCategory::Configuration
            }
            LookupError::Io(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            LookupError::OverlayLoadDegraded { .. } | LookupError::InvalidLabel { .. } => {
                ErrorSeverity::Low
            }
            LookupError::UpstreamRateLimited { .. }
            | LookupError::UpstreamUnavailable { .. }
            | LookupError::NoDistrict { .. }
            | LookupError::Http(_) => ErrorSeverity::Medium,
            LookupError::ClientInput { .. }
            | LookupError::GeocodeFailed { .. }
            | LookupError::Csv(_)
            | LookupError::Serialization(_) => ErrorSeverity::High,
            LookupError::Config { .. }
            | LookupError::InvalidConfigValue { .. }
            | LookupError::Io(_) => ErrorSeverity::Critical,
        }
    }

    /// Short machine-friendly name, used as the `type` field of error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            LookupError::ClientInput { .. } => "ClientInputError",
            LookupError::GeocodeFailed { .. } => "GeocodeFailed",
            LookupError::UpstreamRateLimited { .. } => "UpstreamRateLimited",
            LookupError::UpstreamUnavailable { .. } => "UpstreamUnavailable",
            LookupError::OverlayLoadDegraded { .. } => "OverlayLoadDegraded",
            LookupError::NoDistrict { .. } => "NoDistrict",
            LookupError::InvalidLabel { .. } => "InvalidLabel",
            LookupError::Http(_) => "HttpError",
            LookupError::Csv(_) => "CsvError",
            LookupError::Io(_) => "IoError",
            LookupError::Serialization(_) => "SerializationError",
            LookupError::Config { .. } => "ConfigError",
            LookupError::InvalidConfigValue { .. } => "InvalidConfigValue",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            LookupError::ClientInput { message } => message.clone(),
            LookupError::GeocodeFailed { address, .. } => {
                format!("Could not find a location for '{}'", address)
            }
            LookupError::UpstreamRateLimited { service } => {
                format!("{} is busy, please retry shortly", service)
            }
            LookupError::UpstreamUnavailable { service, .. } => {
                format!("{} could not be reached", service)
            }
            LookupError::NoDistrict { .. } => {
                "No New Hampshire House district covers this location".to_string()
            }
            LookupError::InvalidConfigValue { field, reason, .. } => {
                format!("Setting '{}' is invalid: {}", field, reason)
            }
            other => other.to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            LookupError::ClientInput { .. } => "Send a street address, e.g. '667 NH RT 120, Cornish, NH'",
            LookupError::GeocodeFailed { .. } => {
                "Check the spelling of the address and include the town and state"
            }
            LookupError::UpstreamRateLimited { .. } => "Wait a few seconds before retrying",
            LookupError::UpstreamUnavailable { .. } | LookupError::Http(_) => {
                "Check network connectivity and the upstream service status"
            }
            LookupError::OverlayLoadDegraded { .. } | LookupError::Csv(_) => {
                "Run `validate-csv` against the overlay file and fix its headers"
            }
            LookupError::NoDistrict { .. } => "Check that the address is in New Hampshire",
            LookupError::InvalidLabel { .. } => "Use a label such as 'Sullivan 2' or 'SU02'",
            LookupError::Config { .. } | LookupError::InvalidConfigValue { .. } => {
                "Review the configuration file and environment variables"
            }
            LookupError::Io(_) | LookupError::Serialization(_) => {
                "Check file paths and permissions"
            }
        }
    }
}

/// Pipeline stage a lookup failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    #[serde(rename = "input")]
    Input,
    #[serde(rename = "geocode")]
    Geocode,
    #[serde(rename = "people.geo")]
    PeopleGeo,
    #[serde(rename = "base_district")]
    BaseDistrict,
    #[serde(rename = "resolve")]
    Resolve,
    #[serde(rename = "legislators")]
    Legislators,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Input => "input",
            Stage::Geocode => "geocode",
            Stage::PeopleGeo => "people.geo",
            Stage::BaseDistrict => "base_district",
            Stage::Resolve => "resolve",
            Stage::Legislators => "legislators",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("{stage} failed: {error}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub error: LookupError,
}

/// Serialized form of a [`StageError`].
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub stage: Stage,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl StageError {
    pub fn new(stage: Stage, error: LookupError) -> Self {
        Self { stage, error }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self.error, LookupError::ClientInput { .. })
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: format!("{} failed", self.stage),
            stage: self.stage,
            message: self.error.to_string(),
            kind: self.error.kind().to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LookupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_body_names_stage() {
        let err = StageError::new(
            Stage::Geocode,
            LookupError::GeocodeFailed {
                address: "1 Nowhere Rd".to_string(),
                geocoder: "nominatim".to_string(),
                cause: "no match".to_string(),
            },
        );
        let body = err.body();
        assert_eq!(body.error, "geocode failed");
        assert_eq!(body.kind, "GeocodeFailed");
        assert!(body.message.contains("nominatim"));

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["stage"], "geocode");
        assert_eq!(json["type"], "GeocodeFailed");
    }

    #[test]
    fn test_client_input_is_terminal_input_error() {
        let err = LookupError::ClientInput {
            message: "address is required".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Input);
        assert!(StageError::new(Stage::Input, err).is_client_error());
    }

    #[test]
    fn test_overlay_degradation_is_low_severity() {
        let err = LookupError::OverlayLoadDegraded {
            source_name: "base".to_string(),
            message: "404".to_string(),
        };
        assert_eq!(err.severity(), ErrorSeverity::Low);
        assert_eq!(Stage::PeopleGeo.to_string(), "people.geo");
    }

    #[test]
    fn test_base_district_stage_serializes() {
        let err = StageError::new(
            Stage::BaseDistrict,
            LookupError::UpstreamUnavailable {
                service: "census".to_string(),
                message: "HTTP 503".to_string(),
            },
        );
        let json = serde_json::to_value(err.body()).unwrap();
        assert_eq!(json["stage"], "base_district");
        assert_eq!(json["error"], "base_district failed");
        assert_eq!(json["type"], "UpstreamUnavailable");
    }
}
