//! Core domain types for sei-dl

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::OnceLock;

/// The two inbox partitions the portal splits a unit's cases into
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Cases received by the active unit
    Received,
    /// Cases generated by the active unit
    Generated,
}

impl Category {
    /// Both categories, in the order the portal lists them
    pub const ALL: [Category; 2] = [Category::Received, Category::Generated];

    /// The group token the portal uses in table ids and form field names
    /// (`tblProcessosRecebidos`, `hdnGeradosPaginaAtual`, ...)
    pub fn portal_group(&self) -> &'static str {
        match self {
            Category::Received => "Recebidos",
            Category::Generated => "Gerados",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Received => write!(f, "received"),
            Category::Generated => write!(f, "generated"),
        }
    }
}

fn case_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Portal case numbers: 0000.01.0000000/0000-00, with optional stray
        // whitespace around separators and typographic dashes.
        Regex::new(r"\b\d{4}\.\s?\d{2}\.\s?\d{7}\s*/\s*\d{4}\s*[-\u{2013}\u{2014}]\s*\d{2}\b")
            .unwrap_or_else(|e| panic!("invalid case number regex: {e}"))
    })
}

/// Find the first case number in a text fragment, canonicalized
pub fn find_case_number(text: &str) -> Option<String> {
    case_number_re()
        .find(text)
        .map(|m| canonical_case_number(m.as_str()))
}

/// Normalize the textual representation of a case number.
///
/// The portal renders the same number with non-breaking spaces, spaced
/// separators and typographic dashes depending on the page; all variants
/// canonicalize to one stable key.
pub fn canonical_case_number(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let cleaned = raw.replace('\u{a0}', " ");
    let mut chars = cleaned.trim().chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '.' | '/' => {
                while out.ends_with(' ') {
                    out.pop();
                }
                out.push(c);
                while chars.peek() == Some(&' ') {
                    chars.next();
                }
            }
            '-' | '\u{2013}' | '\u{2014}' => {
                while out.ends_with(' ') {
                    out.pop();
                }
                // A dash never follows another dash in a canonical number
                if !out.ends_with('-') {
                    out.push('-');
                }
                while chars.peek() == Some(&' ') {
                    chars.next();
                }
            }
            _ => out.push(c),
        }
    }
    out.trim().to_string()
}

/// An organizational unit name with normalized equality.
///
/// Two unit names are the same unit when they match case-insensitively after
/// collapsing internal whitespace and trimming.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitName(String);

impl UnitName {
    /// Wrap a raw unit label as displayed by the portal
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The label as given, untouched
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The normalized comparison key (lowercased, whitespace collapsed)
    pub fn normalized(&self) -> String {
        self.0
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

impl PartialEq for UnitName {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Eq for UnitName {}

impl std::fmt::Display for UnitName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.trim())
    }
}

impl From<&str> for UnitName {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// A document listed inside a case's document subtree
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Document {
    /// Internal document id assigned by the portal
    pub id: String,
    /// Display label of the tree node
    pub title: Option<String>,
    /// Node type as reported by the tree
    pub doc_type: Option<String>,
    /// Absolute URL of the document page
    pub url: Option<String>,
    /// Access hash carried in the document URL
    pub access_hash: Option<String>,
    /// Direct download URL for attached files, when present
    pub download_url: Option<String>,
    /// Inline viewing URL, when present
    pub view_url: Option<String>,
    /// CSS/status indicators attached to the node
    pub indicators: Vec<String>,
    /// Names extracted from signature actions
    pub signers: Vec<String>,
    /// Restricted access level detected on the node
    pub confidential: bool,
    /// Whether the node carries at least one signature
    pub signed: bool,
    /// Whether the node is flagged unvisited/new
    pub is_new: bool,
    /// Open-ended metadata (order index, icons, access level text, ...)
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// A tracked case in the portal, identified by its canonical case number
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Case {
    /// Canonical case number (identity; stable across formatting variants)
    pub case_number: String,
    /// Internal procedure id, secondary key used for paging continuity
    pub procedure_id: String,
    /// Absolute URL of the case page
    pub url: String,
    /// Whether the active user already viewed the case
    pub viewed: bool,
    /// Which inbox listed the case first
    pub category: Category,
    /// Tooltip title
    pub title: Option<String>,
    /// Tooltip type/specificity
    pub case_type: Option<String>,
    /// Assignee display name
    pub assignee_name: Option<String>,
    /// Assignee login/id shown next to the case
    pub assignee_id: Option<String>,
    /// Marker/status labels attached to the row
    pub markers: Vec<String>,
    /// Row carries the new-documents indicator
    pub has_new_documents: bool,
    /// Row carries the annotations indicator
    pub has_annotations: bool,
    /// Restricted access level detected during enrichment
    pub confidential: bool,
    /// Case-level signer names detected during enrichment
    pub signers: Vec<String>,
    /// Access hash carried in the case URL
    pub access_hash: String,
    /// Documents attached by the enricher (empty until enrichment)
    pub documents: Vec<Document>,
    /// Open-ended metadata map
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Case {
    /// Create a minimal case record as parsed from a listing row
    pub fn new(case_number: impl Into<String>, procedure_id: impl Into<String>, category: Category) -> Self {
        Self {
            case_number: case_number.into(),
            procedure_id: procedure_id.into(),
            url: String::new(),
            viewed: false,
            category,
            title: None,
            case_type: None,
            assignee_name: None,
            assignee_id: None,
            markers: Vec::new(),
            has_new_documents: false,
            has_annotations: false,
            confidential: false,
            signers: Vec::new(),
            access_hash: String::new(),
            documents: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Merge another sighting of the same case into this record.
    ///
    /// Total merge rule, applied field by field:
    /// - identity (`case_number`) never changes; `procedure_id`/`url`/
    ///   `access_hash` are filled only when currently empty
    /// - `category` keeps the side that classified the case first
    /// - optional scalars: last non-null wins
    /// - lists: last non-empty wins
    /// - sticky flags (`has_new_documents`, `has_annotations`, `confidential`)
    ///   are OR-ed; `viewed` takes the last sighting
    /// - metadata is merged key-wise, incoming value wins per key
    pub fn absorb(&mut self, other: Case) {
        debug_assert_eq!(self.case_number, other.case_number);

        if self.procedure_id.is_empty() {
            self.procedure_id = other.procedure_id;
        }
        if self.url.is_empty() {
            self.url = other.url;
        }
        if self.access_hash.is_empty() {
            self.access_hash = other.access_hash;
        }

        self.viewed = other.viewed;
        self.has_new_documents |= other.has_new_documents;
        self.has_annotations |= other.has_annotations;
        self.confidential |= other.confidential;

        if other.title.is_some() {
            self.title = other.title;
        }
        if other.case_type.is_some() {
            self.case_type = other.case_type;
        }
        if other.assignee_name.is_some() {
            self.assignee_name = other.assignee_name;
        }
        if other.assignee_id.is_some() {
            self.assignee_id = other.assignee_id;
        }
        if !other.markers.is_empty() {
            self.markers = other.markers;
        }
        if !other.signers.is_empty() {
            self.signers = other.signers;
        }
        if !other.documents.is_empty() {
            self.documents = other.documents;
        }
        for (key, value) in other.metadata {
            self.metadata.insert(key, value);
        }
    }
}

impl std::fmt::Display for Case {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}, {})",
            self.case_number,
            self.category,
            if self.viewed { "viewed" } else { "unviewed" }
        )
    }
}

/// Visibility filter over the viewed flag
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Keep all cases regardless of the viewed flag
    #[default]
    Any,
    /// Keep only cases the user already viewed
    Viewed,
    /// Keep only cases not yet viewed
    Unviewed,
}

/// Pure, order-independent predicates applied to the merged case set.
///
/// All populated criteria must hold for a case to pass (single conjunction);
/// list-valued criteria match when any of their substrings matches
/// (case-insensitive).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FilterCriteria {
    /// Viewed-flag filter
    #[serde(default)]
    pub visibility: Visibility,
    /// Restrict to a category subset (None keeps both)
    #[serde(default)]
    pub categories: Option<BTreeSet<Category>>,
    /// Assignee-name substrings, OR-matched
    #[serde(default)]
    pub assignees: Vec<String>,
    /// Type/specificity substrings, OR-matched
    #[serde(default)]
    pub types: Vec<String>,
    /// Marker substrings, OR-matched
    #[serde(default)]
    pub markers: Vec<String>,
    /// Require (or exclude, with `Some(false)`) the new-documents indicator
    #[serde(default)]
    pub with_new_documents: Option<bool>,
    /// Require (or exclude, with `Some(false)`) the annotations indicator
    #[serde(default)]
    pub with_annotations: Option<bool>,
    /// Cap on the number of cases returned after filtering
    #[serde(default)]
    pub limit: Option<usize>,
}

fn matches_any(target: Option<&str>, terms: &[String]) -> bool {
    if terms.is_empty() {
        return true;
    }
    let target = target.unwrap_or("").to_lowercase();
    terms.iter().any(|t| target.contains(&t.to_lowercase()))
}

impl FilterCriteria {
    /// Whether a case satisfies every populated criterion
    pub fn matches(&self, case: &Case) -> bool {
        match self.visibility {
            Visibility::Any => {}
            Visibility::Viewed if !case.viewed => return false,
            Visibility::Unviewed if case.viewed => return false,
            _ => {}
        }

        if let Some(categories) = &self.categories {
            if !categories.contains(&case.category) {
                return false;
            }
        }

        if let Some(required) = self.with_new_documents {
            if case.has_new_documents != required {
                return false;
            }
        }
        if let Some(required) = self.with_annotations {
            if case.has_annotations != required {
                return false;
            }
        }

        if !matches_any(case.assignee_name.as_deref(), &self.assignees) {
            return false;
        }
        if !matches_any(case.case_type.as_deref(), &self.types) {
            return false;
        }
        if !self.markers.is_empty() {
            let hit = case.markers.iter().any(|marker| {
                let marker = marker.to_lowercase();
                self.markers.iter().any(|t| marker.contains(&t.to_lowercase()))
            });
            if !hit {
                return false;
            }
        }

        true
    }
}

/// Pagination metadata computed from a category's listing table
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageInfo {
    /// Total records the portal reports for the category
    pub total_records: u32,
    /// Zero-based page currently displayed
    pub current_page: u32,
    /// Total pages derived from records and page size
    pub total_pages: u32,
    /// Records per page
    pub items_per_page: u32,
}

impl PageInfo {
    /// Derive page math from raw counters, defending against zeroes
    pub fn derive(total_records: u32, current_page: u32, items_per_page: u32) -> Self {
        let items_per_page = if items_per_page == 0 {
            total_records.max(1)
        } else {
            items_per_page
        };
        let total_pages = total_records.div_ceil(items_per_page).max(1);
        Self {
            total_records,
            current_page,
            total_pages,
            items_per_page,
        }
    }

    /// Whether any page follows the given zero-based page index
    pub fn has_next(&self, page: u32) -> bool {
        page + 1 < self.total_pages
    }
}

/// Terminal outcome of one case's artifact retrieval
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DownloadOutcome {
    /// The artifact was written to disk
    Succeeded {
        /// Where the artifact was written
        path: PathBuf,
        /// Artifact size in bytes
        bytes: u64,
        /// Attempts spent, including the successful one
        attempts: u32,
        /// Wall-clock seconds spent on this case
        elapsed_seconds: f64,
    },
    /// Every attempt failed
    Failed {
        /// Last error observed
        reason: String,
        /// Attempts spent
        attempts: u32,
        /// Wall-clock seconds spent on this case
        elapsed_seconds: f64,
    },
}

impl DownloadOutcome {
    /// Whether this outcome is a success
    pub fn succeeded(&self) -> bool {
        matches!(self, DownloadOutcome::Succeeded { .. })
    }
}

/// One case's entry in the batch report
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// Canonical case number
    pub case_number: String,
    /// Terminal outcome for the case
    pub outcome: DownloadOutcome,
}

/// Aggregated result of a batch download run
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BatchReport {
    /// Per-case terminal outcomes (completion order in parallel mode)
    pub records: Vec<DownloadRecord>,
    /// Count of succeeded cases
    pub succeeded: usize,
    /// Count of failed cases
    pub failed: usize,
    /// Total wall-clock seconds for the whole batch
    pub elapsed_seconds: f64,
}

impl BatchReport {
    /// Append a record, keeping aggregate counts in sync
    pub fn push(&mut self, record: DownloadRecord) {
        if record.outcome.succeeded() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.records.push(record);
    }

    /// Number of cases attempted
    pub fn attempted(&self) -> usize {
        self.records.len()
    }
}
