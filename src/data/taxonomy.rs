//! Taxonomic assignments for features
//!
//! Lineage strings such as `k__Bacteria; p__Firmicutes; c__Bacilli` are
//! normalised to exactly seven ranks. Unresolved ranks hold [`UNASSIGNED`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{DaaError, Result};

/// Marker stored for a rank with no assignment
pub const UNASSIGNED: &str = "Unassigned";

/// Number of ranks in a lineage
pub const N_RANKS: usize = 7;

const RANK_PREFIXES: [char; 8] = ['k', 'd', 'p', 'c', 'o', 'f', 'g', 's'];

/// Taxonomic ranks, Kingdom to Species
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaxRank {
    Kingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
}

impl TaxRank {
    /// All ranks in order
    pub const fn all() -> [TaxRank; N_RANKS] {
        [
            TaxRank::Kingdom,
            TaxRank::Phylum,
            TaxRank::Class,
            TaxRank::Order,
            TaxRank::Family,
            TaxRank::Genus,
            TaxRank::Species,
        ]
    }

    /// Zero-based position (Kingdom = 0)
    pub const fn depth(self) -> usize {
        match self {
            TaxRank::Kingdom => 0,
            TaxRank::Phylum => 1,
            TaxRank::Class => 2,
            TaxRank::Order => 3,
            TaxRank::Family => 4,
            TaxRank::Genus => 5,
            TaxRank::Species => 6,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            TaxRank::Kingdom => "Kingdom",
            TaxRank::Phylum => "Phylum",
            TaxRank::Class => "Class",
            TaxRank::Order => "Order",
            TaxRank::Family => "Family",
            TaxRank::Genus => "Genus",
            TaxRank::Species => "Species",
        }
    }
}

impl fmt::Display for TaxRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TaxRank {
    type Err = DaaError;

    fn from_str(s: &str) -> Result<Self> {
        TaxRank::all()
            .into_iter()
            .find(|r| r.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DaaError::InvalidInput {
                reason: format!("unknown taxonomic rank '{}'", s),
            })
    }
}

/// Seven-rank lineage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lineage {
    ranks: [String; N_RANKS],
}

impl Lineage {
    /// Lineage with every rank unassigned
    pub fn unassigned() -> Self {
        Self {
            ranks: std::array::from_fn(|_| UNASSIGNED.to_string()),
        }
    }

    pub fn at(&self, rank: TaxRank) -> &str {
        &self.ranks[rank.depth()]
    }

    pub fn ranks(&self) -> &[String; N_RANKS] {
        &self.ranks
    }
}

/// Options for lineage string parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyParseOptions {
    /// Strip `k__`-style rank prefixes
    pub strip_prefixes: bool,
}

impl Default for TaxonomyParseOptions {
    fn default() -> Self {
        Self {
            strip_prefixes: true,
        }
    }
}

fn strip_rank_prefix(segment: &str) -> &str {
    let mut chars = segment.chars();
    match (chars.next(), segment.get(1..3)) {
        (Some(c), Some("__")) if RANK_PREFIXES.contains(&c.to_ascii_lowercase()) => &segment[3..],
        _ => segment,
    }
}

/// Parse a `;`-delimited lineage into seven ranks
pub fn parse_lineage(feature_id: &str, raw: &str, options: &TaxonomyParseOptions) -> Result<Lineage> {
    let mut segments: Vec<&str> = raw.split(';').map(str::trim).collect();
    while segments.last().is_some_and(|s| s.is_empty()) {
        segments.pop();
    }

    if segments.len() > N_RANKS {
        return Err(DaaError::MalformedTaxonomyString {
            feature_id: feature_id.to_string(),
            reason: format!("{} ranks, at most {} allowed", segments.len(), N_RANKS),
        });
    }

    let mut lineage = Lineage::unassigned();
    for (slot, segment) in lineage.ranks.iter_mut().zip(segments) {
        let name = if options.strip_prefixes {
            strip_rank_prefix(segment).trim()
        } else {
            segment
        };
        if !name.is_empty() {
            *slot = name.to_string();
        }
    }
    Ok(lineage)
}

/// One row of a taxonomy file, before parsing
#[derive(Debug, Clone, PartialEq)]
pub struct TaxonomyRecord {
    pub feature_id: String,
    pub taxon: String,
    pub confidence: Option<f64>,
}

impl TaxonomyRecord {
    pub fn new(feature_id: impl Into<String>, taxon: impl Into<String>) -> Self {
        Self {
            feature_id: feature_id.into(),
            taxon: taxon.into(),
            confidence: None,
        }
    }
}

/// Feature key -> lineage, in a fixed feature order
#[derive(Debug, Clone, PartialEq)]
pub struct TaxonomyTable {
    feature_ids: Vec<String>,
    lineages: Vec<Lineage>,
    /// Classifier confidence, kept for provenance
    confidence: Vec<Option<f64>>,
    index: HashMap<String, usize>,
}

impl TaxonomyTable {
    /// Parse records into a table. Malformed lineages and duplicate keys are fatal.
    pub fn from_records(records: Vec<TaxonomyRecord>, options: &TaxonomyParseOptions) -> Result<Self> {
        let mut table = Self {
            feature_ids: Vec::with_capacity(records.len()),
            lineages: Vec::with_capacity(records.len()),
            confidence: Vec::with_capacity(records.len()),
            index: HashMap::with_capacity(records.len()),
        };

        for record in records {
            let lineage = parse_lineage(&record.feature_id, &record.taxon, options)?;
            if table.index.contains_key(&record.feature_id) {
                return Err(DaaError::InvalidInput {
                    reason: format!("Duplicate taxonomy entry for feature '{}'", record.feature_id),
                });
            }
            table.index.insert(record.feature_id.clone(), table.feature_ids.len());
            table.feature_ids.push(record.feature_id);
            table.lineages.push(lineage);
            table.confidence.push(record.confidence);
        }

        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.feature_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feature_ids.is_empty()
    }

    pub fn feature_ids(&self) -> &[String] {
        &self.feature_ids
    }

    pub fn contains(&self, feature_id: &str) -> bool {
        self.index.contains_key(feature_id)
    }

    pub fn lineage(&self, feature_id: &str) -> Option<&Lineage> {
        self.index.get(feature_id).map(|&i| &self.lineages[i])
    }

    pub fn confidence(&self, feature_id: &str) -> Option<f64> {
        self.index.get(feature_id).and_then(|&i| self.confidence[i])
    }

    /// Re-key to exactly `feature_ids`, in that order
    pub fn select(&self, feature_ids: &[String]) -> Result<Self> {
        let mut table = Self {
            feature_ids: Vec::with_capacity(feature_ids.len()),
            lineages: Vec::with_capacity(feature_ids.len()),
            confidence: Vec::with_capacity(feature_ids.len()),
            index: HashMap::with_capacity(feature_ids.len()),
        };
        for id in feature_ids {
            let &i = self.index.get(id).ok_or_else(|| DaaError::MissingAnnotation {
                feature_id: id.clone(),
            })?;
            table.index.insert(id.clone(), table.feature_ids.len());
            table.feature_ids.push(id.clone());
            table.lineages.push(self.lineages[i].clone());
            table.confidence.push(self.confidence[i]);
        }
        Ok(table)
    }
}
