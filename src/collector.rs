//! Case collection: paginate both inbox categories, merge, filter.
//!
//! Each category is paged independently by resubmitting the control form with
//! the target page number. Records land in one running map keyed by the
//! canonical case number; a repeated sighting merges field-by-field through
//! [`Case::absorb`] without moving the record in the output order. Merging is
//! idempotent, so re-running a collection over the same pages yields the same
//! set.

use crate::adapter::{AdapterError, PageNode, PortalAdapter, RowNode};
use crate::config::{PaginationCaps, RetryConfig};
use crate::error::{Error, Result, Warning};
use crate::retry::fetch_with_retry;
use crate::session::SessionManager;
use crate::types::{Case, Category, FilterCriteria, PageInfo, find_case_number};
use crate::utils::query_param;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

const CONTROL_FORM: &str = "frmProcedimentoControlar";
const CASE_LINK_ACTION: &str = "acao=procedimento_trabalhar";
const ASSIGNEE_LINK_ACTION: &str = "acao=procedimento_atribuicao_listar";

fn tooltip_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"infraTooltipMostrar\('([^']*)'(?:,\s*'([^']*)')?\)")
            .unwrap_or_else(|e| panic!("invalid tooltip regex: {e}"))
    })
}

fn caption_total_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d+)\s+registros").unwrap_or_else(|e| panic!("invalid caption regex: {e}"))
    })
}

fn caption_range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"-\s*(\d+)\s*a\s*(\d+)")
            .unwrap_or_else(|e| panic!("invalid caption range regex: {e}"))
    })
}

/// Result of a collection run
#[derive(Debug, Default)]
pub struct CollectOutcome {
    /// Merged, filtered, capped cases in first-seen order
    pub cases: Vec<Case>,
    /// Cases collected before filtering
    pub total_collected: usize,
    /// Non-fatal conditions hit along the way
    pub warnings: Vec<Warning>,
}

/// Running merge map preserving first-seen insertion order
#[derive(Default)]
struct CaseSet {
    cases: Vec<Case>,
    index: HashMap<String, usize>,
}

impl CaseSet {
    /// Merge a batch, returning how many were new (non-duplicate)
    fn merge(&mut self, batch: Vec<Case>) -> usize {
        let mut added = 0;
        for case in batch {
            match self.index.get(&case.case_number) {
                Some(&position) => self.cases[position].absorb(case),
                None => {
                    self.index.insert(case.case_number.clone(), self.cases.len());
                    self.cases.push(case);
                    added += 1;
                }
            }
        }
        added
    }
}

/// Paginates the two inbox categories and produces the canonical case set
pub struct CaseCollector {
    adapter: Arc<dyn PortalAdapter>,
    caps: PaginationCaps,
    retry: RetryConfig,
}

impl CaseCollector {
    /// Bind a collector to an adapter and its pagination/retry configuration
    pub fn new(adapter: Arc<dyn PortalAdapter>, caps: PaginationCaps, retry: RetryConfig) -> Self {
        Self {
            adapter,
            caps,
            retry,
        }
    }

    /// Collect, merge, and filter cases across both categories.
    ///
    /// One portal session expiry mid-collection is absorbed by resetting the
    /// session and re-running the collection (merging is idempotent); a second
    /// consecutive expiry is fatal via the session manager.
    pub async fn collect(
        &self,
        session: &mut SessionManager,
        criteria: &FilterCriteria,
    ) -> Result<CollectOutcome> {
        match self.collect_once(session, criteria).await {
            Err(Error::Adapter(AdapterError::SessionExpired)) => {
                session.note_expiry();
                session.ensure_ready().await?;
                let outcome = self.collect_once(session, criteria).await?;
                session.note_success();
                Ok(outcome)
            }
            Ok(outcome) => {
                session.note_success();
                Ok(outcome)
            }
            Err(e) => Err(e),
        }
    }

    async fn collect_once(
        &self,
        session: &mut SessionManager,
        criteria: &FilterCriteria,
    ) -> Result<CollectOutcome> {
        let ready = session.ensure_ready().await?;
        let control = ready.control.clone();
        let control_url = ready.control_url.clone();

        let mut set = CaseSet::default();
        let mut warnings = Vec::new();

        // Page zero of both categories is the control page itself
        for category in Category::ALL {
            set.merge(extract_cases(&control, category));
        }

        let mut failed_categories = 0;
        for category in Category::ALL {
            if let Err(warning) = self
                .paginate_category(&control, &control_url, category, &mut set)
                .await?
            {
                failed_categories += 1;
                warnings.push(warning);
            }
        }

        if set.cases.is_empty() && failed_categories == Category::ALL.len() {
            return Err(Error::Collection(
                "no page could be read from either category".to_string(),
            ));
        }

        let total_collected = set.cases.len();
        tracing::info!(
            total = total_collected,
            received = set.cases.iter().filter(|c| c.category == Category::Received).count(),
            generated = set.cases.iter().filter(|c| c.category == Category::Generated).count(),
            "collection finished"
        );

        let mut cases: Vec<Case> = set
            .cases
            .into_iter()
            .filter(|c| criteria.matches(c))
            .collect();
        if let Some(limit) = criteria.limit {
            if cases.len() > limit {
                cases.truncate(limit);
                tracing::info!(limit, "result cap applied");
            }
        }
        if cases.len() != total_collected {
            tracing::info!(after_filters = cases.len(), "filters applied");
        }

        Ok(CollectOutcome {
            cases,
            total_collected,
            warnings,
        })
    }

    /// Walk one category's pages past page zero. The inner `Result` carries
    /// the partial-failure warning; session expiry propagates as a hard error
    /// so the caller can reset and re-run.
    async fn paginate_category(
        &self,
        control: &PageNode,
        control_url: &str,
        category: Category,
        set: &mut CaseSet,
    ) -> Result<std::result::Result<(), Warning>> {
        let info = page_info(control, category);
        let cap = self.caps.cap_for(category, info.total_pages);
        tracing::debug!(
            category = %category,
            total_pages = info.total_pages,
            cap,
            records = info.total_records,
            "pagination plan"
        );

        let mut current = control.clone();
        for target in (info.current_page + 1)..cap {
            tracing::info!(category = %category, page = target + 1, of = info.total_pages, "loading page");
            let fetched = fetch_with_retry(&self.retry, || {
                self.request_page(&current, category, target, control_url)
            })
            .await;

            let page = match fetched {
                Ok(page) => page,
                Err(AdapterError::SessionExpired) => {
                    return Err(Error::Adapter(AdapterError::SessionExpired));
                }
                Err(e) => {
                    // Keep what this category already yielded
                    return Ok(Err(Warning::Pagination {
                        category,
                        page: target,
                        reason: e.to_string(),
                    }));
                }
            };

            let added = set.merge(extract_cases(&page, category));
            if added == 0 {
                tracing::debug!(category = %category, page = target + 1, "no new records, stopping");
                break;
            }
            current = page;
        }

        Ok(Ok(()))
    }

    /// Resubmit the control form asking for a specific zero-based page
    async fn request_page(
        &self,
        current: &PageNode,
        category: Category,
        target: u32,
        control_url: &str,
    ) -> std::result::Result<PageNode, AdapterError> {
        let group = category.portal_group();
        let Some(form) = current.form(CONTROL_FORM) else {
            return Err(AdapterError::UnexpectedShape(format!(
                "control form missing on {control_url}"
            )));
        };
        let page_field = format!("hdn{group}PaginaAtual");
        if !form.fields.contains_key(&page_field) {
            return Err(AdapterError::UnexpectedShape(format!(
                "pagination unavailable for {group}"
            )));
        }

        let target_value = target.to_string();
        let overrides = vec![
            (format!("sel{group}PaginacaoSuperior"), target_value.clone()),
            (format!("sel{group}PaginacaoInferior"), target_value.clone()),
            (page_field, target_value),
        ];
        self.adapter.submit_form(form, &overrides).await
    }
}

/// Pull this category's case records out of a fetched page
pub(crate) fn extract_cases(page: &PageNode, category: Category) -> Vec<Case> {
    let table_id = format!("tblProcessos{}", category.portal_group());
    let Some(table) = page.table(&table_id) else {
        return Vec::new();
    };
    table
        .rows
        .iter()
        .filter(|row| row.id.as_deref().is_some_and(|id| id.starts_with('P')))
        .filter_map(|row| case_from_row(row, category))
        .collect()
}

fn case_from_row(row: &RowNode, category: Category) -> Option<Case> {
    let link = row
        .links
        .iter()
        .find(|l| l.href.contains(CASE_LINK_ACTION))?;

    let number = find_case_number(&link.text)
        .or_else(|| link.title.as_deref().and_then(find_case_number))
        .or_else(|| find_case_number(&link.href))?;

    let mut case = Case::new(
        number,
        query_param(&link.href, "id_procedimento").unwrap_or_default(),
        category,
    );
    case.url = link.href.clone();
    case.access_hash = query_param(&link.href, "infra_hash").unwrap_or_default();
    case.viewed = link.classes.iter().any(|c| c == "processoVisualizado");

    if let Some(captures) = link
        .onmouseover
        .as_deref()
        .and_then(|t| tooltip_re().captures(t))
    {
        case.title = captures
            .get(1)
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty());
        case.case_type = captures
            .get(2)
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty());
    }

    if let Some(assignee) = row
        .links
        .iter()
        .find(|l| l.href.contains(ASSIGNEE_LINK_ACTION))
    {
        case.assignee_name = assignee
            .title
            .as_deref()
            .map(|t| t.replace("Atribuído para ", ""))
            .filter(|s| !s.is_empty());
        case.assignee_id = Some(assignee.text.clone()).filter(|s| !s.is_empty());
    }

    for image in &row.images {
        if image.classes.iter().any(|c| c == "imagemStatus") {
            if let Some(captures) = image
                .anchor_tooltip
                .as_deref()
                .and_then(|t| tooltip_re().captures(t))
            {
                if let Some(marker) = captures.get(1) {
                    let marker = marker.as_str().trim();
                    if !marker.is_empty() {
                        case.markers.push(marker.to_string());
                    }
                }
            }
        }
    }

    case.has_new_documents = row.images.iter().any(|i| i.src.contains("exclamacao.svg"));
    case.has_annotations = row.images.iter().any(|i| i.src.contains("anotacao"));

    Some(case)
}

/// Read a category's pagination counters from caption and hidden fields
pub(crate) fn page_info(page: &PageNode, category: Category) -> PageInfo {
    let group = category.portal_group();
    let mut total_records = 0u32;
    let mut items_per_page = 0u32;

    if let Some(table) = page.table(&format!("tblProcessos{group}")) {
        if let Some(caption) = &table.caption {
            if let Some(captures) = caption_total_re().captures(caption) {
                total_records = captures[1].parse().unwrap_or(0);
            }
            if let Some(captures) = caption_range_re().captures(caption) {
                let start: u32 = captures[1].parse().unwrap_or(0);
                let end: u32 = captures[2].parse().unwrap_or(0);
                items_per_page = end.saturating_sub(start).saturating_add(1);
            }
        }
        let row_count = table
            .rows
            .iter()
            .filter(|r| r.id.as_deref().is_some_and(|id| id.starts_with('P')))
            .count() as u32;
        if items_per_page == 0 {
            items_per_page = row_count;
        }
        if total_records == 0 {
            total_records = row_count;
        }
    }

    if items_per_page == 0 {
        if let Some(value) = page.field(&format!("hdn{group}NroItens")) {
            items_per_page = value.parse().unwrap_or(0);
        }
    }
    if total_records == 0 {
        if let Some(value) = page.field(&format!("hdn{group}Itens")) {
            total_records = value.split(',').filter(|s| !s.is_empty()).count() as u32;
        }
    }

    let current_page = page
        .field(&format!("hdn{group}PaginaAtual"))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    PageInfo::derive(total_records, current_page, items_per_page)
}
