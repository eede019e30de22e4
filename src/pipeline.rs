//! Pipeline facade: Session → Collect → Enrich → Download, in that order.
//!
//! The single end-to-end entry point consumed by CLI/storage layers. Fatal
//! conditions (authentication, configuration, total collection failure) stop
//! the run; everything else is absorbed into the outcome's warning list so
//! the best-effort result set always comes back.

use crate::adapter::{HttpConnector, PortalConnector};
use crate::collector::CaseCollector;
use crate::config::Config;
use crate::downloader::DownloadOrchestrator;
use crate::enricher::DocumentEnricher;
use crate::error::{Result, Warning};
use crate::session::SessionManager;
use crate::storage;
use crate::types::{BatchReport, Case};
use std::sync::Arc;

/// Everything a run produced: the ordered case set (documents attached when
/// enrichment ran), the batch report when downloads ran, and the non-fatal
/// conditions hit along the way
#[derive(Debug, Default)]
pub struct PipelineOutcome {
    /// Filtered, merged cases in first-seen order
    pub cases: Vec<Case>,
    /// Cases collected before filtering
    pub total_collected: usize,
    /// Download results, when the download stage ran
    pub report: Option<BatchReport>,
    /// Non-fatal warnings in order of occurrence
    pub warnings: Vec<Warning>,
}

/// Composes the orchestration core into one end-to-end run
pub struct Pipeline {
    config: Config,
    connector: Arc<dyn PortalConnector>,
}

impl Pipeline {
    /// Build a pipeline over the HTTP portal adapter
    pub fn new(config: Config) -> Result<Self> {
        let connector = Arc::new(HttpConnector::new(
            config.portal.clone(),
            config.credentials.org_code.clone(),
            config.debug.clone(),
        ));
        Self::with_connector(config, connector)
    }

    /// Build a pipeline over a caller-supplied connector (tests use a
    /// deterministic fake). Validates the configuration before any network
    /// activity.
    pub fn with_connector(config: Config, connector: Arc<dyn PortalConnector>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, connector })
    }

    /// Run the full pipeline
    pub async fn run(&self) -> Result<PipelineOutcome> {
        let adapter = self.connector.connect()?;
        let mut session = SessionManager::new(
            adapter.clone(),
            self.config.credentials.clone(),
            self.config.portal.clone(),
        );

        session.ensure_ready().await?;

        let collector = CaseCollector::new(
            adapter.clone(),
            self.config.pagination,
            self.config.retry.clone(),
        );
        let collected = collector.collect(&mut session, &self.config.filter).await?;

        let mut outcome = PipelineOutcome {
            cases: collected.cases,
            total_collected: collected.total_collected,
            report: None,
            warnings: collected.warnings,
        };

        if self.config.enrichment.collect_documents || self.config.enrichment.dump_trees {
            let enricher = DocumentEnricher::new(
                adapter.clone(),
                self.config.enrichment.clone(),
                &self.config.debug.html_dir,
            );
            let warnings = enricher.enrich(&mut session, &mut outcome.cases).await?;
            outcome.warnings.extend(warnings);
        }

        if self.config.history.enabled {
            if let Err(e) = storage::save_history(&self.config.history.path, &outcome.cases) {
                outcome.warnings.push(Warning::History {
                    path: self.config.history.path.clone(),
                    reason: e.to_string(),
                });
            }
        }

        if self.config.download.enabled {
            let orchestrator = DownloadOrchestrator::new(
                self.connector.clone(),
                self.config.credentials.clone(),
                self.config.portal.clone(),
                self.config.download.clone(),
                self.config.retry.clone(),
            );
            let (report, warnings) = orchestrator
                .download_all(&mut session, &outcome.cases)
                .await?;
            outcome.report = Some(report);
            outcome.warnings.extend(warnings);
        }

        // Session-level warnings (unit switch, re-auth degradations) come
        // first: they happened first
        let mut session_warnings = session.take_warnings();
        session_warnings.extend(std::mem::take(&mut outcome.warnings));
        outcome.warnings = session_warnings;

        tracing::info!(
            cases = outcome.cases.len(),
            warnings = outcome.warnings.len(),
            downloaded = outcome.report.as_ref().map(|r| r.succeeded).unwrap_or(0),
            "pipeline finished"
        );
        Ok(outcome)
    }
}
