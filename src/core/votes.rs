//! Key-vote table: how each representative voted on a short list of bills.
//!
//! The CSV comes in two layouts. Long files have one row per person and bill
//! with `bill` and `vote` columns; wide files have one row per person and one
//! column per bill. Rows are keyed by person id, by name plus district and by
//! name alone, so directory records without an id can still be matched.

use crate::core::label;
use crate::core::overlay::{cell, find_column, header_key, read_table};
use crate::domain::model::LegislatorRecord;
use crate::domain::ports::TextSource;
use crate::utils::cache::TtlCache;
use crate::utils::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_VOTES_TTL: Duration = Duration::from_secs(300);

const ID_COLUMNS: &[&str] = &["openstatespersonid", "personid", "id"];
const RESERVED_COLUMNS: &[&str] = &[
    "openstatespersonid",
    "personid",
    "id",
    "name",
    "district",
    "party",
    "bill",
    "vote",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteValue {
    For,
    Against,
    #[serde(rename = "No Vote")]
    NoVote,
}

impl VoteValue {
    /// Yea / nay spellings map to For / Against. Blanks, absences and
    /// anything unrecognized count as No Vote.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "for" | "y" | "yes" | "yea" | "aye" | "support" => VoteValue::For,
            "against" | "n" | "no" | "nay" | "oppose" => VoteValue::Against,
            _ => VoteValue::NoVote,
        }
    }
}

/// Bill label → vote for one person.
pub type VoteMap = BTreeMap<String, VoteValue>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VoteTable {
    /// Bill labels, in column order (wide) or first-seen order (long).
    pub columns: Vec<String>,
    /// Keyed by person id, `name:<name>` and `nd:<name>|<district>`.
    pub votes: BTreeMap<String, VoteMap>,
    pub rows: usize,
}

/// `vote-map` output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteMapReport<'a> {
    pub columns: &'a [String],
    pub votes: &'a BTreeMap<String, VoteMap>,
    pub rows: usize,
    pub source: &'a str,
}

fn district_key(raw: &str) -> String {
    match label::normalize(raw, None) {
        Ok(l) if l.is_canonical() => header_key(l.as_str()),
        _ => header_key(raw),
    }
}

fn row_keys(
    row: &csv::StringRecord,
    id_idx: Option<usize>,
    name_idx: Option<usize>,
    district_idx: Option<usize>,
) -> Vec<String> {
    let mut keys = Vec::with_capacity(3);
    if let Some(id) = id_idx.map(|idx| cell(row, idx)).filter(|id| !id.is_empty()) {
        keys.push(id.to_string());
    }
    let name = name_idx.map(|idx| header_key(cell(row, idx))).unwrap_or_default();
    if !name.is_empty() {
        let district = district_idx
            .map(|idx| district_key(cell(row, idx)))
            .unwrap_or_default();
        keys.push(format!("nd:{}|{}", name, district));
        keys.push(format!("name:{}", name));
    }
    keys
}

impl VoteTable {
    pub fn parse(text: &str) -> Self {
        let Some(table) = read_table(text) else {
            return Self::default();
        };
        let id_idx = find_column(&table.keys, ID_COLUMNS);
        let name_idx = find_column(&table.keys, &["name"]);
        let district_idx = find_column(&table.keys, &["district"]);
        let long = find_column(&table.keys, &["bill"]).zip(find_column(&table.keys, &["vote"]));

        let mut out = VoteTable {
            rows: table.rows.len(),
            ..Default::default()
        };

        match long {
            Some((bill_idx, vote_idx)) => {
                for row in &table.rows {
                    let bill = cell(row, bill_idx);
                    if bill.is_empty() {
                        continue;
                    }
                    if !out.columns.iter().any(|c| c == bill) {
                        out.columns.push(bill.to_string());
                    }
                    let vote = VoteValue::parse(cell(row, vote_idx));
                    for key in row_keys(row, id_idx, name_idx, district_idx) {
                        out.votes.entry(key).or_default().insert(bill.to_string(), vote);
                    }
                }
            }
            None => {
                let bills: Vec<(usize, String)> = table
                    .raw_headers
                    .iter()
                    .enumerate()
                    .filter(|(idx, _)| !RESERVED_COLUMNS.contains(&table.keys[*idx].as_str()))
                    .map(|(idx, header)| (idx, header.trim().to_string()))
                    .filter(|(_, header)| !header.is_empty())
                    .collect();
                out.columns = bills.iter().map(|(_, bill)| bill.clone()).collect();
                for row in &table.rows {
                    let votes: VoteMap = bills
                        .iter()
                        .map(|(idx, bill)| (bill.clone(), VoteValue::parse(cell(row, *idx))))
                        .collect();
                    for key in row_keys(row, id_idx, name_idx, district_idx) {
                        out.votes.insert(key, votes.clone());
                    }
                }
            }
        }
        out
    }

    /// Votes for a directory record: by id, then by name and district, then
    /// by name alone.
    pub fn votes_for(&self, record: &LegislatorRecord) -> Option<&VoteMap> {
        let by_id = record
            .person_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .and_then(|id| self.votes.get(id));
        if by_id.is_some() {
            return by_id;
        }
        let name = header_key(&record.name);
        if name.is_empty() {
            return None;
        }
        self.votes
            .get(&format!("nd:{}|{}", name, header_key(record.district.as_str())))
            .or_else(|| self.votes.get(&format!("name:{}", name)))
    }

    pub fn attach(&self, records: &mut [LegislatorRecord]) {
        for record in records {
            if let Some(votes) = self.votes_for(record) {
                record.vote_map = votes.clone();
            }
        }
    }

    pub fn report<'a>(&'a self, source: &'a str) -> VoteMapReport<'a> {
        VoteMapReport {
            columns: &self.columns,
            votes: &self.votes,
            rows: self.rows,
            source,
        }
    }
}

/// Something that can hand out the current vote table.
#[async_trait]
pub trait VoteProvider: Send + Sync {
    async fn votes(&self) -> Result<Arc<VoteTable>>;
}

/// Reads the vote CSV through a [`TextSource`] and keeps the parsed table for
/// a fixed TTL. Failed loads are not cached.
pub struct VoteCache<S: TextSource> {
    source: S,
    location: String,
    cache: TtlCache<(), VoteTable>,
}

impl<S: TextSource> VoteCache<S> {
    pub fn new(source: S, location: impl Into<String>, ttl: Duration) -> Self {
        Self {
            source,
            location: location.into(),
            cache: TtlCache::new(ttl),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub async fn table(&self) -> Result<Arc<VoteTable>> {
        if let Some(table) = self.cache.get(&()) {
            return Ok(table);
        }
        let text = self.source.read_text(&self.location).await?;
        let table = VoteTable::parse(&text);
        tracing::info!(
            "Vote table loaded: {} rows, {} bills",
            table.rows,
            table.columns.len()
        );
        Ok(self.cache.insert((), table))
    }

    /// The CSV exactly as the source serves it.
    pub async fn raw_csv(&self) -> Result<String> {
        self.source.read_text(&self.location).await
    }
}

#[async_trait]
impl<S: TextSource> VoteProvider for VoteCache<S> {
    async fn votes(&self) -> Result<Arc<VoteTable>> {
        self.table().await
    }
}
