//! Document enrichment: attach each case's document subtree.
//!
//! The portal renders a case's documents as a JavaScript-built tree inside
//! the case page's `ifrArvore` frame: `Nos[i] = new infraArvoreNo(...)` node
//! constructors, per-node property assignments, and `NosAcoes[i] = new
//! infraArvoreAcao(...)` actions (signatures, access levels). Document
//! records are extracted from that script text. A per-case failure empties
//! that case's document list and moves on; it never aborts the rest of the
//! batch.

use crate::adapter::{AdapterError, PageNode, PortalAdapter};
use crate::config::EnrichmentConfig;
use crate::error::{Result, Warning};
use crate::session::SessionManager;
use crate::types::{Case, Document};
use crate::utils::{query_param, sanitize_filename};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

const TREE_FRAME: &str = "ifrArvore";
const DEFAULT_DUMP_CAP: usize = 5;

fn node_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)Nos\[(\d+)\]\s*=\s*new\s+infraArvoreNo\((.*?)\);")
            .unwrap_or_else(|e| panic!("invalid node regex: {e}"))
    })
}

fn assignment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)Nos\[(\d+)\]\.(\w+)\s*=\s*('(?:\\.|[^'])*'|"(?:\\.|[^"])*"|[^;]+);"#)
            .unwrap_or_else(|e| panic!("invalid assignment regex: {e}"))
    })
}

fn action_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)NosAcoes\[(\d+)\]\s*=\s*new\s+infraArvoreAcao\((.*?)\);")
            .unwrap_or_else(|e| panic!("invalid action regex: {e}"))
    })
}

fn alert_single_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)alert\('((?:\\.|[^'])*)'\)")
            .unwrap_or_else(|e| panic!("invalid alert regex: {e}"))
    })
}

fn alert_double_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)alert\("((?:\\.|[^"])*)"\)"#)
            .unwrap_or_else(|e| panic!("invalid alert regex: {e}"))
    })
}

fn href_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"href\s*=\s*["']([^"']+)["']"#)
            .unwrap_or_else(|e| panic!("invalid href regex: {e}"))
    })
}

/// Fetches document subtrees for a bounded subset of cases
pub struct DocumentEnricher {
    adapter: Arc<dyn PortalAdapter>,
    config: EnrichmentConfig,
    default_dump_dir: PathBuf,
}

impl DocumentEnricher {
    /// Bind an enricher to an adapter and its configuration. `debug_dir` is
    /// the base for tree dumps when no explicit dump directory is set.
    pub fn new(adapter: Arc<dyn PortalAdapter>, config: EnrichmentConfig, debug_dir: &std::path::Path) -> Self {
        Self {
            adapter,
            config,
            default_dump_dir: debug_dir.join("trees"),
        }
    }

    /// Enrich at most `config.limit` cases (input order) with their document
    /// subtrees, replacing any previously attached list. Returns the per-case
    /// warnings; only authentication collapse is a hard error.
    pub async fn enrich(
        &self,
        session: &mut SessionManager,
        cases: &mut [Case],
    ) -> Result<Vec<Warning>> {
        if !self.config.collect_documents && !self.config.dump_trees {
            return Ok(Vec::new());
        }

        let limit = self.config.limit.unwrap_or(cases.len()).min(cases.len());
        let dump_cap = self
            .config
            .dump_limit
            .unwrap_or(DEFAULT_DUMP_CAP);
        let dump_dir = self
            .config
            .dump_dir
            .clone()
            .unwrap_or_else(|| self.default_dump_dir.clone());

        tracing::info!(cases = limit, "collecting documents");
        let mut warnings = Vec::new();

        for index in 0..limit {
            let case_number = cases[index].case_number.clone();
            let case_url = cases[index].url.clone();

            let tree = match self.load_tree(session, &case_url).await? {
                Ok(tree) => tree,
                Err(reason) => {
                    tracing::warn!(case = %case_number, reason = %reason, "enrichment failed");
                    cases[index].documents = Vec::new();
                    warnings.push(Warning::Enrichment {
                        case_number,
                        reason,
                    });
                    continue;
                }
            };

            if self.config.dump_trees && index < dump_cap {
                dump_tree(&dump_dir, index, &case_number, &tree);
            }

            if self.config.collect_documents {
                let case = &mut cases[index];
                // Full subtree refresh: case-level findings are recomputed
                case.signers = Vec::new();
                case.confidential = false;
                case.documents = parse_documents(&tree.script_text(), case);
                tracing::debug!(
                    case = %case.case_number,
                    documents = case.documents.len(),
                    "documents attached"
                );
            }
        }

        Ok(warnings)
    }

    /// Open the case page and fetch its tree frame. The inner `Result` is the
    /// per-case failure channel; the outer one is fatal (authentication).
    async fn load_tree(
        &self,
        session: &mut SessionManager,
        case_url: &str,
    ) -> Result<std::result::Result<PageNode, String>> {
        let case_page = match self.fetch_reauth(session, case_url).await? {
            Ok(page) => page,
            Err(reason) => return Ok(Err(reason)),
        };
        let Some(frame) = case_page.frame(TREE_FRAME) else {
            return Ok(Err(format!("frame '{TREE_FRAME}' not found")));
        };
        if frame.src.is_empty() {
            return Ok(Err(format!("frame '{TREE_FRAME}' has no src")));
        }
        let src = frame.src.clone();
        self.fetch_reauth(session, &src).await
    }

    /// One fetch with a single transparent re-authentication on expiry
    async fn fetch_reauth(
        &self,
        session: &mut SessionManager,
        url: &str,
    ) -> Result<std::result::Result<PageNode, String>> {
        match self.adapter.fetch(url, &[]).await {
            Ok(page) => {
                session.note_success();
                Ok(Ok(page))
            }
            Err(AdapterError::SessionExpired) => {
                session.note_expiry();
                session.ensure_ready().await?;
                match self.adapter.fetch(url, &[]).await {
                    Ok(page) => {
                        session.note_success();
                        Ok(Ok(page))
                    }
                    Err(e) => Ok(Err(e.to_string())),
                }
            }
            Err(e) => Ok(Err(e.to_string())),
        }
    }
}

fn dump_tree(dir: &std::path::Path, index: usize, case_number: &str, tree: &PageNode) {
    let safe = sanitize_filename(case_number, "processo");
    let path = dir.join(format!("{:03}_{safe}.html", index + 1));
    let write = std::fs::create_dir_all(dir).and_then(|()| std::fs::write(&path, &tree.raw));
    match write {
        Ok(()) => tracing::info!(case = %case_number, path = %path.display(), "tree dumped"),
        Err(e) => tracing::warn!(case = %case_number, error = %e, "tree dump failed"),
    }
}

/// A loosely-typed JavaScript literal from the tree script
fn js_value(token: &str) -> Option<String> {
    let cleaned = token.trim();
    if cleaned.is_empty() || cleaned == "null" {
        return None;
    }
    if cleaned == "true" || cleaned == "false" {
        return Some(cleaned.to_string());
    }
    let bytes = cleaned.as_bytes();
    if bytes.len() >= 2 && (bytes[0] == b'\'' || bytes[0] == b'"') && bytes[bytes.len() - 1] == bytes[0]
    {
        return Some(unescape(&cleaned[1..cleaned.len() - 1]));
    }
    Some(cleaned.to_string())
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Split a JS argument list at top level, respecting quotes and parentheses
fn split_args(args: &str) -> Vec<Option<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut depth = 0usize;

    for c in args.chars() {
        if let Some(q) = quote {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                current.push(c);
            }
            '(' | '[' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                tokens.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() || !tokens.is_empty() {
        tokens.push(current);
    }

    tokens
        .into_iter()
        .map(|t| js_value(strip_concat(&t)))
        .collect()
}

/// Drop trailing empty-string `.concat()` noise the portal appends
fn strip_concat(token: &str) -> &str {
    let trimmed = token.trim();
    trimmed
        .strip_suffix(".concat('')")
        .or_else(|| trimmed.strip_suffix(".concat(\"\")"))
        .or_else(|| trimmed.strip_suffix(".concat()"))
        .unwrap_or(trimmed)
}

fn extract_alert_text(js_code: &str) -> Option<String> {
    alert_single_re()
        .captures(js_code)
        .or_else(|| alert_double_re().captures(js_code))
        .map(|c| unescape(&c[1]))
}

/// Signer names from a portal signature alert: blank-line separated groups,
/// each led by an optional "Assinado por" header
fn signer_names(alert_text: &str) -> Vec<String> {
    let mut names = Vec::new();
    for group in alert_text.split("\n\n") {
        let mut lines = group
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .peekable();
        if lines
            .peek()
            .is_some_and(|l| l.to_lowercase().starts_with("assinado por"))
        {
            lines.next();
        }
        if let Some(name) = lines.next() {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    names
}

fn tag_strip(fragment: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?s)<[^>]+>").unwrap_or_else(|e| panic!("invalid strip regex: {e}"))
    });
    re.replace_all(fragment, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse document records out of the tree script, attaching case-level
/// findings (signers, access level) to `case` as a side effect
pub(crate) fn parse_documents(script: &str, case: &mut Case) -> Vec<Document> {
    let mut by_index: BTreeMap<usize, Document> = BTreeMap::new();

    for captures in node_re().captures_iter(script) {
        let Ok(index) = captures[1].parse::<usize>() else {
            continue;
        };
        let args = split_args(&captures[2]);
        if args.len() < 7 {
            continue;
        }

        let node_type = args[0].clone().unwrap_or_default();
        if !node_type.to_uppercase().contains("DOCUMENTO") {
            continue;
        }

        let id = args[1].clone().unwrap_or_default();
        let parent_id = args.get(2).cloned().flatten();
        let href = args.get(3).cloned().flatten().filter(|h| !h.is_empty());
        let frame_target = args.get(4).cloned().flatten();
        let aux = args.get(5).cloned().flatten();
        let label = args
            .get(6)
            .cloned()
            .flatten()
            .or(aux)
            .or_else(|| Some(id.clone()));
        let icon = args.get(7).cloned().flatten();
        let css_class = args.get(14).cloned().flatten();
        let doc_number = args.get(15).cloned().flatten();

        let mut doc = Document {
            id,
            title: label,
            doc_type: Some(node_type.clone()),
            access_hash: href.as_deref().and_then(|h| query_param(h, "infra_hash")),
            url: href,
            ..Default::default()
        };

        if let Some(number) = doc_number {
            doc.metadata
                .insert("document_number".to_string(), serde_json::json!(number));
        }
        if let Some(parent) = parent_id {
            if !parent.is_empty() {
                doc.metadata
                    .insert("parent_id".to_string(), serde_json::json!(parent));
            }
        }
        if let Some(target) = frame_target {
            if !target.is_empty() {
                doc.metadata
                    .insert("frame_target".to_string(), serde_json::json!(target));
            }
        }
        doc.metadata
            .insert("node_type".to_string(), serde_json::json!(node_type));
        if let Some(icon) = icon {
            if icon.to_lowercase().contains("sigilo") {
                doc.confidential = true;
            }
            let slug = icon
                .rsplit('/')
                .next()
                .unwrap_or(&icon)
                .split('?')
                .next()
                .unwrap_or(&icon)
                .to_string();
            doc.metadata
                .insert("icon".to_string(), serde_json::json!(icon));
            doc.metadata
                .insert("icon_slug".to_string(), serde_json::json!(slug));
        }
        if let Some(css) = css_class {
            if css.to_lowercase().contains("naovisitado") {
                doc.is_new = true;
            }
            doc.indicators.push(css.clone());
            doc.metadata
                .insert("css_class".to_string(), serde_json::json!(css));
        }
        doc.metadata
            .insert("order".to_string(), serde_json::json!(index));

        by_index.insert(index, doc);
    }

    if by_index.is_empty() {
        return Vec::new();
    }

    let id_to_index: BTreeMap<String, usize> = by_index
        .iter()
        .filter(|(_, d)| !d.id.is_empty())
        .map(|(i, d)| (d.id.clone(), *i))
        .collect();

    for captures in assignment_re().captures_iter(script) {
        let Ok(index) = captures[1].parse::<usize>() else {
            continue;
        };
        let prop = &captures[2];
        let Some(doc) = by_index.get_mut(&index) else {
            continue;
        };
        let Some(value) = js_value(strip_concat(&captures[3])) else {
            continue;
        };

        match prop {
            "assinatura" => {
                let text = tag_strip(&value);
                if !text.is_empty() {
                    doc.signed = true;
                    doc.signers = vec![text.clone()];
                    doc.metadata
                        .insert("signature_text".to_string(), serde_json::json!(text));
                }
            }
            "src" => {
                if !value.is_empty() {
                    if value.to_lowercase().contains("documento_visualizar") {
                        doc.view_url = Some(value.clone());
                    } else {
                        doc.download_url = Some(value.clone());
                    }
                    doc.metadata
                        .entry("src_original".to_string())
                        .or_insert_with(|| serde_json::json!(value));
                }
            }
            "html" => {
                if !value.is_empty() {
                    if let Some(captures) = href_re().captures(&value) {
                        doc.view_url = Some(captures[1].to_string());
                    }
                    doc.metadata
                        .insert("html_fragment".to_string(), serde_json::json!(value));
                }
            }
            _ => {}
        }
    }

    let mut case_signers: Vec<String> = Vec::new();
    for captures in action_re().captures_iter(script) {
        let args = split_args(&captures[2]);
        if args.is_empty() {
            continue;
        }
        let kind = args[0].clone().unwrap_or_default().to_uppercase();
        let target_id = args.get(2).cloned().flatten().unwrap_or_default();
        let js_code = args.get(3).cloned().flatten().unwrap_or_default();
        let label = args.get(5).cloned().flatten();
        let icon = args.get(6).cloned().flatten();

        let target_index = id_to_index.get(&target_id).copied();

        match kind.as_str() {
            "ASSINATURA" => {
                let alert = extract_alert_text(&js_code)
                    .or(label)
                    .unwrap_or_default();
                let names = signer_names(&alert);
                if let Some(doc) = target_index.and_then(|i| by_index.get_mut(&i)) {
                    if !alert.is_empty() {
                        doc.metadata
                            .entry("signature_alert".to_string())
                            .or_insert_with(|| serde_json::json!(alert));
                    }
                    if !names.is_empty() {
                        doc.signed = true;
                        for name in names {
                            if !doc.signers.iter().any(|n| *n == name) {
                                doc.signers.push(name);
                            }
                        }
                    }
                } else if target_id == case.procedure_id {
                    if !alert.is_empty() {
                        case.metadata
                            .entry("signature_alerts".to_string())
                            .or_insert_with(|| serde_json::json!([]));
                        if let Some(serde_json::Value::Array(list)) =
                            case.metadata.get_mut("signature_alerts")
                        {
                            list.push(serde_json::json!(alert));
                        }
                    }
                    for name in names {
                        if !case_signers.iter().any(|n| *n == name) {
                            case_signers.push(name);
                        }
                    }
                }
            }
            "NIVEL_ACESSO" => {
                let alert = extract_alert_text(&js_code)
                    .or(label)
                    .unwrap_or_default();
                if let Some(doc) = target_index.and_then(|i| by_index.get_mut(&i)) {
                    doc.confidential = true;
                    if !alert.is_empty() {
                        doc.metadata
                            .entry("access_level".to_string())
                            .or_insert_with(|| serde_json::json!(alert));
                    }
                } else if target_id == case.procedure_id {
                    case.confidential = true;
                    if !alert.is_empty() {
                        case.metadata
                            .entry("access_level".to_string())
                            .or_insert_with(|| serde_json::json!(alert));
                    }
                }
            }
            _ => {
                if let (Some(doc), Some(icon)) =
                    (target_index.and_then(|i| by_index.get_mut(&i)), icon)
                {
                    doc.metadata
                        .entry("action_icons".to_string())
                        .or_insert_with(|| serde_json::json!([]));
                    if let Some(serde_json::Value::Array(list)) =
                        doc.metadata.get_mut("action_icons")
                    {
                        list.push(serde_json::json!(icon));
                    }
                }
            }
        }
    }

    if !case_signers.is_empty() {
        case.signers = case_signers;
    }

    by_index.into_values().collect()
}
