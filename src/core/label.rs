//! District label normalization.
//!
//! Every district label that enters the system (CSV cells, geocoder layers,
//! directory responses, user input) goes through [`normalize`] so that
//! `"Sullivan 02"`, `"SU2"`, `"su 02"` and `"Sullivan  2"` all compare equal.

use crate::utils::error::{LookupError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

/// The ten New Hampshire counties. This table is the only county mapping in
/// the crate; overlay loading and district resolution both go through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum County {
    Belknap,
    Carroll,
    Cheshire,
    Coos,
    Grafton,
    Hillsborough,
    Merrimack,
    Rockingham,
    Strafford,
    Sullivan,
}

impl County {
    pub const ALL: [County; 10] = [
        County::Belknap,
        County::Carroll,
        County::Cheshire,
        County::Coos,
        County::Grafton,
        County::Hillsborough,
        County::Merrimack,
        County::Rockingham,
        County::Strafford,
        County::Sullivan,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            County::Belknap => "Belknap",
            County::Carroll => "Carroll",
            County::Cheshire => "Cheshire",
            County::Coos => "Coos",
            County::Grafton => "Grafton",
            County::Hillsborough => "Hillsborough",
            County::Merrimack => "Merrimack",
            County::Rockingham => "Rockingham",
            County::Strafford => "Strafford",
            County::Sullivan => "Sullivan",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            County::Belknap => "BE",
            County::Carroll => "CA",
            County::Cheshire => "CH",
            County::Coos => "CO",
            County::Grafton => "GR",
            County::Hillsborough => "HI",
            County::Merrimack => "ME",
            County::Rockingham => "RO",
            County::Strafford => "ST",
            County::Sullivan => "SU",
        }
    }

    pub fn from_code(code: &str) -> Option<County> {
        let code = code.trim();
        County::ALL
            .into_iter()
            .find(|c| c.code().eq_ignore_ascii_case(code))
    }

    /// Matches a full county name, ignoring case, a trailing "County" and the
    /// diaeresis in "Coös".
    pub fn from_name(name: &str) -> Option<County> {
        let cleaned = strip_county_suffix(&name.replace(['ö', 'Ö'], "o"));
        County::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(&cleaned))
    }

    /// Accepts either a full name or a two-letter code.
    pub fn parse(raw: &str) -> Option<County> {
        County::from_name(raw).or_else(|| County::from_code(raw))
    }
}

impl fmt::Display for County {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Canonical district label, `"<County> <Number>"` when fully qualified.
///
/// Labels that could not be qualified (a bare number with no county context,
/// or an unrecognised passthrough) are still representable; check
/// [`DistrictLabel::is_canonical`] before trusting them as a district key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DistrictLabel {
    text: String,
    county: Option<County>,
    number: Option<u32>,
}

impl DistrictLabel {
    /// Canonical label; district numbers start at 1.
    pub fn new(county: County, number: u32) -> Result<Self> {
        if number == 0 {
            return Err(LookupError::InvalidLabel {
                raw: format!("{} 0", county.name()),
            });
        }
        Ok(Self {
            text: format!("{} {}", county.name(), number),
            county: Some(county),
            number: Some(number),
        })
    }

    fn bare(number: u32) -> Self {
        Self {
            text: number.to_string(),
            county: None,
            number: Some(number),
        }
    }

    fn passthrough(text: String) -> Self {
        Self {
            text,
            county: None,
            number: None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn county(&self) -> Option<County> {
        self.county
    }

    pub fn number(&self) -> Option<u32> {
        self.number
    }

    pub fn is_canonical(&self) -> bool {
        self.county.is_some() && self.number.is_some()
    }
}

impl PartialEq for DistrictLabel {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for DistrictLabel {}

impl Hash for DistrictLabel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.text.hash(state);
    }
}

impl Ord for DistrictLabel {
    // County first, then numerically, so "Sullivan 2" sorts before "Sullivan 10".
    fn cmp(&self, other: &Self) -> Ordering {
        (self.county.is_none(), self.county, self.number, &self.text).cmp(&(
            other.county.is_none(),
            other.county,
            other.number,
            &other.text,
        ))
    }
}

impl PartialOrd for DistrictLabel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for DistrictLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl TryFrom<String> for DistrictLabel {
    type Error = LookupError;

    fn try_from(value: String) -> Result<Self> {
        normalize(&value, None)
    }
}

impl From<DistrictLabel> for String {
    fn from(label: DistrictLabel) -> Self {
        label.text
    }
}

impl std::str::FromStr for DistrictLabel {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self> {
        normalize(s, None)
    }
}

static CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z]{2})\s*(\d+)$").expect("valid regex"));
static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-zÖö][A-Za-zÖö .'-]*?)\s*(\d+)$").expect("valid regex")
});
static DIGITS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)$").expect("valid regex"));
static EMBEDDED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-zÖö]+)\s*(?:County\s*)?(\d+)").expect("valid regex"));

/// Normalizes any supported spelling of a district label.
///
/// `county_hint` is only consulted for digit-only input. A hint that does not
/// name a known county is ignored.
pub fn normalize(raw: &str, county_hint: Option<&str>) -> Result<DistrictLabel> {
    let cleaned = collapse_whitespace(
        raw.trim()
            .trim_matches(|c: char| c == '"' || c == '\'' || c == '\u{feff}'),
    );
    if cleaned.is_empty() {
        return Err(LookupError::InvalidLabel {
            raw: raw.to_string(),
        });
    }

    if let Some(caps) = CODE_RE.captures(&cleaned) {
        if let Some(county) = County::from_code(&caps[1]) {
            return DistrictLabel::new(county, parse_number(raw, &caps[2])?);
        }
    }

    if let Some(caps) = NAME_RE.captures(&cleaned) {
        if let Some(county) = County::from_name(caps[1].trim()) {
            return DistrictLabel::new(county, parse_number(raw, &caps[2])?);
        }
    }

    if let Some(caps) = DIGITS_RE.captures(&cleaned) {
        let number = parse_number(raw, &caps[1])?;
        return match county_hint.and_then(County::parse) {
            Some(county) => DistrictLabel::new(county, number),
            None => {
                tracing::debug!("District label '{}' has no county context", raw);
                Ok(DistrictLabel::bare(number))
            }
        };
    }

    Ok(DistrictLabel::passthrough(title_case(&cleaned)))
}

/// Finds the first `"<County> <n>"` embedded in free text such as
/// `"State House District Sullivan 2"`.
pub fn extract(text: &str) -> Option<DistrictLabel> {
    EMBEDDED_RE.captures_iter(text).find_map(|caps| {
        let county = County::from_name(&caps[1])?;
        let number = caps[2].parse::<u32>().ok()?;
        DistrictLabel::new(county, number).ok()
    })
}

/// Splits a multi-valued cell (`"Sullivan 10; Sullivan 11"`) into its parts.
pub fn split_labels(cell: &str) -> impl Iterator<Item = &str> {
    cell.split([';', ',']).map(str::trim).filter(|s| !s.is_empty())
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Removes a trailing `" County"` (any case) and surrounding whitespace.
pub fn strip_county_suffix(s: &str) -> String {
    let trimmed = collapse_whitespace(s);
    let cut = trimmed.len().saturating_sub("county".len());
    match (trimmed.get(..cut), trimmed.get(cut..)) {
        (Some(head), Some(tail))
            if tail.eq_ignore_ascii_case("county") && (head.is_empty() || head.ends_with(' ')) =>
        {
            head.trim().to_string()
        }
        _ => trimmed,
    }
}

fn parse_number(raw: &str, digits: &str) -> Result<u32> {
    digits
        .parse::<u32>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| LookupError::InvalidLabel {
            raw: raw.to_string(),
        })
}
