//! Floterial overlay tables.
//!
//! Two CSV sources feed the overlay: one maps base districts to the floterial
//! seats riding along with them, the other maps towns to floterial seats. The
//! headers of both files have drifted over time, so columns are located by
//! a normalized key rather than by exact name.

use crate::core::label::{self, collapse_whitespace, strip_county_suffix, title_case, County, DistrictLabel};
use crate::domain::ports::TextSource;
use crate::utils::cache::TtlCache;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

const BASE_COLUMNS: &[&str] = &["basedistrict", "base", "baselabel"];
const FLOTERIAL_COLUMNS: &[&str] = &["floterialdistrict", "floterial", "floterials", "district"];
const TOWN_COLUMNS: &[&str] = &["town", "townname", "municipality"];
const COUNTY_COLUMNS: &[&str] = &["county", "countyname"];
const TOWN_DISTRICT_COLUMNS: &[&str] = &["district", "floterialdistrict", "floterial", "floterials"];

pub const DEFAULT_OVERLAY_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlaySide {
    Base,
    Town,
}

impl std::fmt::Display for OverlaySide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverlaySide::Base => f.write_str("base"),
            OverlaySide::Town => f.write_str("town"),
        }
    }
}

/// `(town, county)` key of the town table. Town names are whitespace-collapsed
/// and title-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TownKey {
    pub town: String,
    pub county: County,
}

impl TownKey {
    pub fn new(town: &str, county: County) -> Self {
        Self {
            town: normalize_town(town),
            county,
        }
    }
}

pub fn normalize_town(raw: &str) -> String {
    title_case(&collapse_whitespace(raw))
}

/// Snapshot of both overlay tables. Built once, then only read.
#[derive(Debug, Clone, Default)]
pub struct OverlayIndex {
    base_to_floterials: HashMap<DistrictLabel, BTreeSet<DistrictLabel>>,
    town_to_floterials: HashMap<TownKey, BTreeSet<DistrictLabel>>,
    degraded: BTreeSet<OverlaySide>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayStats {
    pub base_to_floterial_count: usize,
    pub town_to_floterial_count: usize,
    pub base_keys_sample: Vec<String>,
    pub town_keys_sample: Vec<String>,
    pub degraded: Vec<OverlaySide>,
}

impl OverlayIndex {
    /// Parses both tables. A blob that yields nothing simply leaves its side
    /// of the index empty.
    pub fn load(base_text: &str, town_text: &str) -> Self {
        Self {
            base_to_floterials: parse_base_table(base_text),
            town_to_floterials: parse_town_table(town_text),
            degraded: BTreeSet::new(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn mark_degraded(&mut self, side: OverlaySide) {
        self.degraded.insert(side);
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    pub fn is_known_base(&self, label: &DistrictLabel) -> bool {
        self.base_to_floterials.contains_key(label)
    }

    pub fn floterials_for_base(&self, base: &DistrictLabel) -> Option<&BTreeSet<DistrictLabel>> {
        self.base_to_floterials.get(base)
    }

    /// Floterials for a town. Without a county the town name alone is used,
    /// but only when it is unambiguous across counties.
    pub fn floterials_for_town(&self, town: &str, county: Option<County>) -> BTreeSet<DistrictLabel> {
        let town = normalize_town(town);
        if let Some(county) = county {
            return self
                .town_to_floterials
                .get(&TownKey {
                    town,
                    county,
                })
                .cloned()
                .unwrap_or_default();
        }

        let matches: Vec<_> = self
            .town_to_floterials
            .iter()
            .filter(|(key, _)| key.town == town)
            .collect();
        match matches.as_slice() {
            [(_, floterials)] => (*floterials).clone(),
            _ => BTreeSet::new(),
        }
    }

    pub fn stats(&self) -> OverlayStats {
        let mut base_keys: Vec<_> = self.base_to_floterials.keys().collect();
        base_keys.sort();
        let mut town_keys: Vec<_> = self.town_to_floterials.keys().collect();
        town_keys.sort();

        OverlayStats {
            base_to_floterial_count: self.base_to_floterials.values().map(BTreeSet::len).sum(),
            town_to_floterial_count: self.town_to_floterials.values().map(BTreeSet::len).sum(),
            base_keys_sample: base_keys.iter().take(5).map(|k| k.to_string()).collect(),
            town_keys_sample: town_keys
                .iter()
                .take(5)
                .map(|k| format!("{},{}", k.town, k.county))
                .collect(),
            degraded: self.degraded.iter().copied().collect(),
        }
    }
}

/// Something that can hand out the current overlay snapshot.
#[async_trait]
pub trait OverlayProvider: Send + Sync {
    async fn overlay(&self) -> Arc<OverlayIndex>;
}

#[async_trait]
impl OverlayProvider for Arc<OverlayIndex> {
    async fn overlay(&self) -> Arc<OverlayIndex> {
        Arc::clone(self)
    }
}

/// Loads both overlay sources through a [`TextSource`] and keeps the result
/// for a fixed TTL.
pub struct OverlayCache<S: TextSource> {
    source: S,
    base_location: Option<String>,
    town_location: Option<String>,
    cache: TtlCache<(), OverlayIndex>,
}

impl<S: TextSource> OverlayCache<S> {
    pub fn new(
        source: S,
        base_location: Option<String>,
        town_location: Option<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            source,
            base_location: base_location.filter(|l| !l.trim().is_empty()),
            town_location: town_location.filter(|l| !l.trim().is_empty()),
            cache: TtlCache::new(ttl),
        }
    }

    pub async fn snapshot(&self) -> Arc<OverlayIndex> {
        if let Some(index) = self.cache.get(&()) {
            return index;
        }
        let index = self.reload().await;
        self.cache.insert((), index)
    }

    async fn reload(&self) -> OverlayIndex {
        let (base_text, base_ok) = self.fetch(OverlaySide::Base, self.base_location.as_deref()).await;
        let (town_text, town_ok) = self.fetch(OverlaySide::Town, self.town_location.as_deref()).await;

        let mut index = OverlayIndex::load(&base_text, &town_text);
        if !base_ok {
            index.mark_degraded(OverlaySide::Base);
        }
        if !town_ok {
            index.mark_degraded(OverlaySide::Town);
        }

        let stats = index.stats();
        tracing::info!(
            "Overlay loaded: {} base→floterial, {} town→floterial entries",
            stats.base_to_floterial_count,
            stats.town_to_floterial_count
        );
        index
    }

    async fn fetch(&self, side: OverlaySide, location: Option<&str>) -> (String, bool) {
        let Some(location) = location else {
            tracing::debug!("No {} overlay source configured", side);
            return (String::new(), true);
        };
        match self.source.read_text(location).await {
            Ok(text) => (text, true),
            Err(e) => {
                let degraded = crate::utils::error::LookupError::OverlayLoadDegraded {
                    source_name: side.to_string(),
                    message: e.to_string(),
                };
                tracing::warn!("{}", degraded);
                (String::new(), false)
            }
        }
    }
}

#[async_trait]
impl<S: TextSource> OverlayProvider for OverlayCache<S> {
    async fn overlay(&self) -> Arc<OverlayIndex> {
        self.snapshot().await
    }
}

/// Result of checking a CSV blob's header row against the accepted families.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderCheck {
    pub side: OverlaySide,
    pub headers: Vec<String>,
    pub ok: bool,
    pub missing: Vec<&'static str>,
}

pub fn validate_headers(side: OverlaySide, text: &str) -> HeaderCheck {
    let table = read_table(text);
    let headers = table.as_ref().map(|t| t.raw_headers.clone()).unwrap_or_default();
    let missing = match (&table, side) {
        (None, _) => vec!["header row"],
        (Some(t), OverlaySide::Base) => {
            let mut missing = Vec::new();
            if base_columns(&t.keys).is_none() {
                let has_base = find_column(&t.keys, BASE_COLUMNS).is_some();
                if !has_base {
                    missing.push("base_district");
                }
                if has_base || find_column(&t.keys, FLOTERIAL_COLUMNS).is_none() {
                    missing.push("floterial_district");
                }
            }
            missing
        }
        (Some(t), OverlaySide::Town) => {
            let mut missing = Vec::new();
            if find_column(&t.keys, TOWN_COLUMNS).is_none() {
                missing.push("town");
            }
            if find_column(&t.keys, TOWN_DISTRICT_COLUMNS).is_none() {
                missing.push("district");
            }
            missing
        }
    };
    HeaderCheck {
        side,
        headers,
        ok: missing.is_empty(),
        missing,
    }
}

pub(crate) struct Table {
    pub(crate) raw_headers: Vec<String>,
    pub(crate) keys: Vec<String>,
    pub(crate) rows: Vec<csv::StringRecord>,
}

/// Lowercase with everything but ASCII letters and digits removed, so
/// `"Base District"`, `"base_district"` and `"\u{feff}\"BASE-DISTRICT"` agree.
pub(crate) fn header_key(raw: &str) -> String {
    raw.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn sanitize(text: &str) -> String {
    let text = text.trim_start_matches('\u{feff}');
    // Quote characters in the header row are never meaningful and an
    // unbalanced one would swallow the following lines.
    match text.split_once('\n') {
        Some((header, rest)) => format!("{}\n{}", strip_quotes(header), rest),
        None => strip_quotes(text),
    }
}

fn strip_quotes(line: &str) -> String {
    line.chars()
        .filter(|c| !matches!(c, '"' | '\'' | '\u{feff}'))
        .collect()
}

pub(crate) fn read_table(text: &str) -> Option<Table> {
    let sanitized = sanitize(text);
    if sanitized.trim().is_empty() {
        return None;
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(sanitized.as_bytes());

    let raw_headers: Vec<String> = reader.headers().ok()?.iter().map(str::to_string).collect();
    let keys = raw_headers.iter().map(|h| header_key(h)).collect();
    let rows = reader
        .records()
        .filter_map(|row| match row {
            Ok(row) => Some(row),
            Err(e) => {
                tracing::trace!("Skipping unreadable CSV row: {}", e);
                None
            }
        })
        .collect();

    Some(Table {
        raw_headers,
        keys,
        rows,
    })
}

pub(crate) fn find_column(keys: &[String], candidates: &[&str]) -> Option<usize> {
    candidates
        .iter()
        .find_map(|candidate| keys.iter().position(|k| k == candidate))
}

/// Locates `(base, floterial)` columns. A lone `district` column is the
/// floterial side unless a dedicated floterial column exists, in which case
/// it is the base.
fn base_columns(keys: &[String]) -> Option<(usize, usize)> {
    let specific_floterial = find_column(keys, &FLOTERIAL_COLUMNS[..3]);
    let base = find_column(keys, BASE_COLUMNS)
        .or_else(|| specific_floterial.and_then(|_| find_column(keys, &["district"])))?;
    let floterial = FLOTERIAL_COLUMNS
        .iter()
        .filter_map(|candidate| keys.iter().position(|k| k == candidate))
        .find(|idx| *idx != base)?;
    Some((base, floterial))
}

pub(crate) fn cell(row: &csv::StringRecord, idx: usize) -> &str {
    row.get(idx).unwrap_or("").trim()
}

fn parse_labels(cell: &str, county_hint: Option<&str>) -> Vec<DistrictLabel> {
    label::split_labels(cell)
        .filter_map(|raw| match label::normalize(raw, county_hint) {
            Ok(l) if l.is_canonical() => Some(l),
            Ok(l) => {
                tracing::debug!("Ignoring incomplete overlay label '{}'", l);
                None
            }
            Err(e) => {
                tracing::debug!("{}", e);
                None
            }
        })
        .collect()
}

fn parse_base_table(text: &str) -> HashMap<DistrictLabel, BTreeSet<DistrictLabel>> {
    let mut out: HashMap<DistrictLabel, BTreeSet<DistrictLabel>> = HashMap::new();
    let Some(table) = read_table(text) else {
        return out;
    };
    let Some((base_idx, floterial_idx)) = base_columns(&table.keys) else {
        tracing::warn!("Base overlay CSV has no recognizable columns: {:?}", table.raw_headers);
        return out;
    };

    for row in &table.rows {
        let Ok(base) = label::normalize(cell(row, base_idx), None) else {
            continue;
        };
        if !base.is_canonical() {
            continue;
        }
        let floterials = parse_labels(cell(row, floterial_idx), base.county().map(|c| c.name()));
        if floterials.is_empty() {
            continue;
        }
        out.entry(base).or_default().extend(floterials);
    }
    out
}

fn parse_town_table(text: &str) -> HashMap<TownKey, BTreeSet<DistrictLabel>> {
    let mut out: HashMap<TownKey, BTreeSet<DistrictLabel>> = HashMap::new();
    let Some(table) = read_table(text) else {
        return out;
    };
    let (Some(town_idx), Some(district_idx)) = (
        find_column(&table.keys, TOWN_COLUMNS),
        find_column(&table.keys, TOWN_DISTRICT_COLUMNS),
    ) else {
        tracing::warn!("Town overlay CSV has no recognizable columns: {:?}", table.raw_headers);
        return out;
    };
    let county_idx = find_column(&table.keys, COUNTY_COLUMNS);

    for row in &table.rows {
        let town = cell(row, town_idx);
        if town.is_empty() {
            continue;
        }
        let county_cell = county_idx
            .map(|idx| strip_county_suffix(cell(row, idx)))
            .filter(|c| !c.is_empty());
        let floterials = parse_labels(cell(row, district_idx), county_cell.as_deref());
        let county = county_cell
            .as_deref()
            .and_then(County::parse)
            .or_else(|| floterials.iter().find_map(DistrictLabel::county));
        let Some(county) = county else {
            continue;
        };
        if floterials.is_empty() {
            continue;
        }
        out.entry(TownKey::new(town, county)).or_default().extend(floterials);
    }
    out
}
