use crate::adapters::census::DEFAULT_CENSUS_URL;
use crate::adapters::nominatim::DEFAULT_NOMINATIM_URL;
use crate::adapters::openstates::{DEFAULT_JURISDICTION, DEFAULT_OPENSTATES_URL};
use crate::core::probe::ProbeRingConfig;
use crate::utils::error::{LookupError, Result};
use crate::utils::validation::{validate_location, validate_path, validate_positive_number, validate_range, validate_url, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("valid regex"));

/// Full application configuration. Every section is optional in the TOML
/// file and falls back to its defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub geocoder: GeocoderConfig,
    pub openstates: OpenStatesConfig,
    pub overlay: OverlayConfig,
    pub resolver: ResolverConfig,
    pub votes: VotesConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocoderConfig {
    pub census_url: String,
    pub benchmark: String,
    pub vintage: String,
    pub nominatim_url: String,
    pub nominatim_email: Option<String>,
    pub nominatim_fallback: bool,
    /// Minimum spacing between Nominatim calls, search variants included.
    pub nominatim_min_interval_ms: u64,
    /// Reverse-geocode points for the town overlay.
    pub reverse_geocoding: bool,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            census_url: DEFAULT_CENSUS_URL.to_string(),
            benchmark: "Public_AR_Current".to_string(),
            vintage: "Current_Current".to_string(),
            nominatim_url: DEFAULT_NOMINATIM_URL.to_string(),
            nominatim_email: None,
            nominatim_fallback: true,
            nominatim_min_interval_ms: 1000,
            reverse_geocoding: true,
        }
    }
}

impl GeocoderConfig {
    pub fn nominatim_min_interval(&self) -> Duration {
        Duration::from_millis(self.nominatim_min_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenStatesConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub jurisdiction: String,
    /// Per-district cache lifetime; zero disables the cache.
    pub cache_ttl_seconds: u64,
    /// Query `/people.geo` as a secondary district signal.
    pub use_people_geo: bool,
}

impl Default for OpenStatesConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OPENSTATES_URL.to_string(),
            api_key: None,
            jurisdiction: DEFAULT_JURISDICTION.to_string(),
            cache_ttl_seconds: 300,
            use_people_geo: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// URL, `file://` URL or path of the base → floterial CSV.
    pub base_csv: Option<String>,
    /// URL, `file://` URL or path of the town → floterial CSV.
    pub town_csv: Option<String>,
    pub ttl_seconds: u64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            base_csv: None,
            town_csv: None,
            ttl_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VotesConfig {
    /// URL, `file://` URL or path of the key-vote CSV.
    pub csv: Option<String>,
    pub ttl_seconds: u64,
}

impl Default for VotesConfig {
    fn default() -> Self {
        Self {
            csv: None,
            ttl_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseSourceKind {
    #[default]
    Census,
    Boundary,
    PeopleGeo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub base_source: BaseSourceKind,
    /// GeoJSON file with House district polygons, for `base_source = "boundary"`.
    pub boundary_path: Option<String>,
    pub probe: ProbeRingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
    pub district_timeout_seconds: u64,
    pub retry_delay_ms: u64,
    /// Minimum spacing between Open States calls.
    pub min_interval_ms: u64,
    pub user_agent: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 15,
            district_timeout_seconds: 20,
            retry_delay_ms: 500,
            min_interval_ms: 200,
            user_agent: None,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn district_timeout(&self) -> Duration {
        Duration::from_secs(self.district_timeout_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

impl AppConfig {
    /// Reads a TOML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = Self::substitute_env_vars(content);
        let mut config: AppConfig = toml::from_str(&processed).map_err(|e| LookupError::Config {
            message: format!("TOML parsing error: {}", e),
        })?;
        config.drop_unresolved();
        Ok(config)
    }

    /// Replaces `${VAR}` with the environment value. Unset variables are left
    /// in place.
    fn substitute_env_vars(content: &str) -> String {
        ENV_VAR_RE
            .replace_all(content, |caps: &regex::Captures| {
                let name = &caps[1];
                std::env::var(name).unwrap_or_else(|_| format!("${{{}}}", name))
            })
            .into_owned()
    }

    /// Optional settings still holding a `${VAR}` placeholder are treated as
    /// unset.
    fn drop_unresolved(&mut self) {
        for value in [
            &mut self.openstates.api_key,
            &mut self.geocoder.nominatim_email,
            &mut self.overlay.base_csv,
            &mut self.overlay.town_csv,
            &mut self.votes.csv,
            &mut self.resolver.boundary_path,
            &mut self.http.user_agent,
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty() || ENV_VAR_RE.is_match(v)) {
                *value = None;
            }
        }
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// `OPENSTATES_API_KEY`, `FLOTERIAL_BASE_CSV_URL`, `FLOTERIAL_TOWN_CSV_URL`,
    /// `VOTES_CSV_URL`, `VOTES_TTL_SECONDS`, `NOMINATIM_EMAIL` and
    /// `NOMINATIM_FALLBACK` take precedence over the file.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(key) = get("OPENSTATES_API_KEY") {
            self.openstates.api_key = Some(key);
        }
        if let Some(url) = get("FLOTERIAL_BASE_CSV_URL") {
            self.overlay.base_csv = Some(url);
        }
        if let Some(url) = get("FLOTERIAL_TOWN_CSV_URL") {
            self.overlay.town_csv = Some(url);
        }
        if let Some(url) = get("VOTES_CSV_URL") {
            self.votes.csv = Some(url);
        }
        if let Some(ttl) = get("VOTES_TTL_SECONDS") {
            match ttl.trim().parse() {
                Ok(seconds) => self.votes.ttl_seconds = seconds,
                Err(_) => tracing::warn!("Ignoring VOTES_TTL_SECONDS='{}'", ttl),
            }
        }
        if let Some(email) = get("NOMINATIM_EMAIL") {
            self.geocoder.nominatim_email = Some(email);
        }
        if let Some(flag) = get("NOMINATIM_FALLBACK") {
            match parse_flag(&flag) {
                Some(enabled) => self.geocoder.nominatim_fallback = enabled,
                None => tracing::warn!("Ignoring NOMINATIM_FALLBACK='{}'", flag),
            }
        }
    }

    pub fn validate_config(&self) -> Result<()> {
        validate_url("geocoder.census_url", &self.geocoder.census_url)?;
        validate_url("geocoder.nominatim_url", &self.geocoder.nominatim_url)?;
        validate_url("openstates.base_url", &self.openstates.base_url)?;
        for (field, location) in [
            ("overlay.base_csv", &self.overlay.base_csv),
            ("overlay.town_csv", &self.overlay.town_csv),
            ("votes.csv", &self.votes.csv),
        ] {
            if let Some(location) = location {
                validate_location(field, location)?;
            }
        }

        if self.resolver.base_source == BaseSourceKind::Boundary {
            let path = self.resolver.boundary_path.as_deref().ok_or_else(|| LookupError::Config {
                message: "resolver.boundary_path is required when base_source = \"boundary\"".to_string(),
            })?;
            validate_path("resolver.boundary_path", path)?;
        }
        validate_range("resolver.probe.rings", self.resolver.probe.rings, 0, ProbeRingConfig::MAX_RINGS)?;
        if !(self.resolver.probe.start_offset > 0.0 && self.resolver.probe.step >= 0.0) {
            return Err(LookupError::InvalidConfigValue {
                field: "resolver.probe".to_string(),
                value: format!("{}/{}", self.resolver.probe.start_offset, self.resolver.probe.step),
                reason: "start_offset must be positive and step non-negative".to_string(),
            });
        }

        validate_positive_number("http.timeout_seconds", self.http.timeout_seconds as usize, 1)?;
        validate_positive_number(
            "http.district_timeout_seconds",
            self.http.district_timeout_seconds as usize,
            1,
        )?;
        Ok(())
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
