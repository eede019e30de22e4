//! Portal adapter: the capability interface between the orchestration core
//! and the portal's HTTP/HTML surface.
//!
//! The core never touches raw markup. It consumes [`PageNode`] values — parsed
//! page structures (forms, tables, links, frames, scripts) — produced by a
//! [`PortalAdapter`] implementation. The shipped implementation is
//! [`HttpPortalAdapter`]; tests drive the core with a deterministic fake.

mod http;
mod parse;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod fake;

pub use http::{HttpConnector, HttpPortalAdapter};
pub use parse::parse_page;

use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Errors produced by a portal adapter, classified for the retry loops
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The call exceeded its caller-supplied timeout (transient)
    #[error("timeout fetching {url}")]
    Timeout {
        /// URL that timed out
        url: String,
    },

    /// Connection-level failure (transient)
    #[error("transport error for {url}: {message}")]
    Transport {
        /// URL that failed
        url: String,
        /// Underlying cause
        message: String,
    },

    /// The portal answered with a failure status
    #[error("HTTP {status} for {url}")]
    Http {
        /// URL that failed
        url: String,
        /// Response status code
        status: u16,
    },

    /// The portal demanded authentication for a page that should be in-session
    #[error("session expired: portal demanded authentication")]
    SessionExpired,

    /// The response did not have the expected shape
    #[error("unexpected page shape: {0}")]
    UnexpectedShape(String),

    /// I/O failure while persisting debug artifacts
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    /// Whether the retry loops should consider this failure transient
    pub fn is_transient(&self) -> bool {
        match self {
            AdapterError::Timeout { .. } | AdapterError::Transport { .. } => true,
            AdapterError::Http { status, .. } => *status == 429 || *status >= 500,
            AdapterError::SessionExpired
            | AdapterError::UnexpectedShape(_)
            | AdapterError::Io(_) => false,
        }
    }
}

/// A `<select>` element and its options
#[derive(Clone, Debug, Default)]
pub struct SelectNode {
    /// Field name
    pub name: String,
    /// Value of the selected option (first option when none is marked)
    pub selected: Option<String>,
    /// All options, in document order
    pub options: Vec<OptionNode>,
}

/// One `<option>` of a select
#[derive(Clone, Debug)]
pub struct OptionNode {
    /// Submitted value
    pub value: String,
    /// Visible label
    pub label: String,
}

/// A parsed `<form>`: serialized fields ready for resubmission
#[derive(Clone, Debug, Default)]
pub struct FormNode {
    /// Element id
    pub id: Option<String>,
    /// Element name
    pub name: Option<String>,
    /// Action target (may be relative; the adapter resolves it)
    pub action: String,
    /// HTTP method, lowercased ("post"/"get")
    pub method: String,
    /// Serialized input/textarea values (checked radios and checkboxes only;
    /// unmarked radio groups fall back to their first value)
    pub fields: BTreeMap<String, String>,
    /// Select elements, kept separately so callers can inspect options
    pub selects: Vec<SelectNode>,
}

impl FormNode {
    /// The full submission payload: fields plus each select's selected value
    pub fn payload(&self) -> BTreeMap<String, String> {
        let mut data = self.fields.clone();
        for select in &self.selects {
            let value = select
                .selected
                .clone()
                .or_else(|| select.options.first().map(|o| o.value.clone()))
                .unwrap_or_default();
            data.insert(select.name.clone(), value);
        }
        data
    }

    /// Find a select by field name
    pub fn select(&self, name: &str) -> Option<&SelectNode> {
        self.selects.iter().find(|s| s.name == name)
    }
}

/// An anchor element with the attributes the core reads
#[derive(Clone, Debug, Default)]
pub struct LinkNode {
    /// Href as written in the page
    pub href: String,
    /// Visible text
    pub text: String,
    /// Title attribute
    pub title: Option<String>,
    /// Class list
    pub classes: Vec<String>,
    /// Raw onmouseover attribute (tooltips live here)
    pub onmouseover: Option<String>,
}

/// An image element, with the tooltip of its enclosing anchor when present
#[derive(Clone, Debug, Default)]
pub struct ImageNode {
    /// Src as written in the page
    pub src: String,
    /// Alt text
    pub alt: Option<String>,
    /// Class list
    pub classes: Vec<String>,
    /// onmouseover of the anchor wrapping the image, when any
    pub anchor_tooltip: Option<String>,
}

/// A table row, scoped to the links and images it contains
#[derive(Clone, Debug, Default)]
pub struct RowNode {
    /// Row id attribute
    pub id: Option<String>,
    /// Concatenated cell text
    pub text: String,
    /// Anchors inside the row
    pub links: Vec<LinkNode>,
    /// Images inside the row
    pub images: Vec<ImageNode>,
}

/// A parsed table
#[derive(Clone, Debug, Default)]
pub struct TableNode {
    /// Element id
    pub id: Option<String>,
    /// Caption text
    pub caption: Option<String>,
    /// Rows in document order
    pub rows: Vec<RowNode>,
}

/// An iframe/frame element
#[derive(Clone, Debug)]
pub struct FrameNode {
    /// Element id
    pub id: Option<String>,
    /// Src as written in the page
    pub src: String,
}

/// A parsed page: the unit of exchange between adapter and core
#[derive(Clone, Debug, Default)]
pub struct PageNode {
    /// Final URL the page was fetched from
    pub url: String,
    /// Raw markup as fetched (kept only for debug dumps, never re-parsed)
    pub raw: String,
    /// Visible text (tag-stripped), for marker scans
    pub text: String,
    /// Forms in document order
    pub forms: Vec<FormNode>,
    /// Tables in document order
    pub tables: Vec<TableNode>,
    /// Every anchor on the page
    pub links: Vec<LinkNode>,
    /// Iframes and frames
    pub frames: Vec<FrameNode>,
    /// Inline script bodies
    pub scripts: Vec<String>,
    /// Portal message/alert box texts
    pub alerts: Vec<String>,
}

fn quoted_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"['"]([^'"]*acao=[A-Za-z_]+[^'"]*)['"]"#)
            .unwrap_or_else(|e| panic!("invalid quoted url regex: {e}"))
    })
}

impl PageNode {
    /// Find a table by element id
    pub fn table(&self, id: &str) -> Option<&TableNode> {
        self.tables.iter().find(|t| t.id.as_deref() == Some(id))
    }

    /// Find a form by element id or name
    pub fn form(&self, key: &str) -> Option<&FormNode> {
        self.forms
            .iter()
            .find(|f| f.id.as_deref() == Some(key) || f.name.as_deref() == Some(key))
    }

    /// Find a frame by element id
    pub fn frame(&self, id: &str) -> Option<&FrameNode> {
        self.frames.iter().find(|f| f.id.as_deref() == Some(id))
    }

    /// First anchor whose href contains the needle
    pub fn link_containing(&self, needle: &str) -> Option<&LinkNode> {
        self.links.iter().find(|l| l.href.contains(needle))
    }

    /// A hidden/serialized field value, searched across every form
    pub fn field(&self, name: &str) -> Option<&str> {
        self.forms
            .iter()
            .find_map(|f| f.fields.get(name).map(String::as_str))
    }

    /// A select element, searched across every form
    pub fn select(&self, name: &str) -> Option<&SelectNode> {
        self.forms.iter().find_map(|f| f.select(name))
    }

    /// Whether the visible text contains the needle
    pub fn contains_text(&self, needle: &str) -> bool {
        self.text.contains(needle)
    }

    /// All inline scripts joined, for tree-node extraction
    pub fn script_text(&self) -> String {
        self.scripts.join("\n")
    }

    /// Locate a URL mentioning the given portal action, looking at frames,
    /// anchors, and quoted strings inside scripts, in that order
    pub fn url_with_action(&self, action: &str) -> Option<String> {
        let needle = format!("acao={action}");
        if let Some(frame) = self.frames.iter().find(|f| f.src.contains(&needle)) {
            return Some(frame.src.clone());
        }
        if let Some(link) = self.link_containing(&needle) {
            return Some(link.href.clone());
        }
        for script in &self.scripts {
            for captures in quoted_url_re().captures_iter(script) {
                let candidate = &captures[1];
                if candidate.contains(&needle) {
                    return Some(candidate.to_string());
                }
            }
        }
        None
    }
}

/// A fetched binary artifact with the headers the core validates
#[derive(Clone, Debug)]
pub struct BinaryPayload {
    /// Response body
    pub bytes: Vec<u8>,
    /// Content-Type header, lowercased
    pub content_type: Option<String>,
    /// Content-Disposition header
    pub disposition: Option<String>,
}

impl BinaryPayload {
    /// Whether the payload looks like a PDF by headers
    pub fn looks_like_pdf(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("application/pdf"))
            || self
                .disposition
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(".pdf"))
    }
}

/// Capability interface the orchestration core consumes.
///
/// Implementations own the authenticated HTTP state (cookies) behind the
/// calls; the core never sees tokens. All calls are subject to the
/// implementation's configured timeouts and classify their failures through
/// [`AdapterError`].
#[async_trait]
pub trait PortalAdapter: Send + Sync {
    /// Fetch a page. `path` may be absolute or portal-relative; `query`
    /// pairs are appended to whatever query the path already carries.
    async fn fetch(&self, path: &str, query: &[(String, String)]) -> Result<PageNode, AdapterError>;

    /// Submit a form with the given field overrides applied over
    /// [`FormNode::payload`]
    async fn submit_form(
        &self,
        form: &FormNode,
        overrides: &[(String, String)],
    ) -> Result<PageNode, AdapterError>;

    /// Fetch a binary artifact
    async fn fetch_binary(&self, path: &str) -> Result<BinaryPayload, AdapterError>;
}

/// Factory minting independent portal sessions.
///
/// Parallel download workers are shared-nothing with respect to session
/// state: each worker connects its own adapter (own cookie store) through
/// this trait.
pub trait PortalConnector: Send + Sync {
    /// Create a fresh, unauthenticated adapter
    fn connect(&self) -> Result<Arc<dyn PortalAdapter>, AdapterError>;
}
