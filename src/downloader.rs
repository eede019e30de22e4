//! Batch artifact retrieval: per-case PDF generation and download.
//!
//! Each case runs the same flow the portal's UI drives: case page → document
//! tree frame → "generate PDF" link → options form (submitted with the
//! generate flag) → download URL → binary fetch, validated and written under
//! a deterministic filename. A case retries its whole flow from a fresh
//! request up to the configured attempt count; the batch never retries as a
//! whole and one case's permanent failure never stops the rest.
//!
//! Parallel mode partitions the case list across workers. Workers are
//! shared-nothing with respect to session state — each runs its own session
//! machine on an adapter minted by the connector — and report completions
//! over a channel to a single aggregator.

use crate::adapter::{AdapterError, BinaryPayload, PortalAdapter, PortalConnector};
use crate::config::{Credentials, DownloadConfig, PortalConfig, RetryConfig};
use crate::error::{Error, Result, Warning};
use crate::retry::backoff_delay;
use crate::session::SessionManager;
use crate::types::{BatchReport, Case, DownloadOutcome, DownloadRecord};
use crate::utils::artifact_path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

const TREE_FRAME: &str = "ifrArvore";
const GENERATE_PDF_ACTION: &str = "procedimento_gerar_pdf";
const DOWNLOAD_ACTION: &str = "exibir_arquivo";

/// Coordinates sequential or parallel artifact downloads
#[derive(Clone)]
pub struct DownloadOrchestrator {
    connector: Arc<dyn PortalConnector>,
    credentials: Credentials,
    portal: PortalConfig,
    config: DownloadConfig,
    retry: RetryConfig,
}

impl DownloadOrchestrator {
    /// Bind an orchestrator to a connector (for per-worker sessions) and its
    /// configuration
    pub fn new(
        connector: Arc<dyn PortalConnector>,
        credentials: Credentials,
        portal: PortalConfig,
        config: DownloadConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            connector,
            credentials,
            portal,
            config,
            retry,
        }
    }

    /// Download an artifact per case, up to the process cap.
    ///
    /// Sequential mode reuses the caller's session; parallel mode ignores it
    /// and gives every worker an independently owned session.
    pub async fn download_all(
        &self,
        session: &mut SessionManager,
        cases: &[Case],
    ) -> Result<(BatchReport, Vec<Warning>)> {
        let mut targets: Vec<Case> = cases.to_vec();
        if let Some(cap) = self.config.process_cap {
            targets.truncate(cap);
        }
        if targets.is_empty() {
            tracing::warn!("no cases to download");
            return Ok((BatchReport::default(), Vec::new()));
        }

        tokio::fs::create_dir_all(&self.config.target_dir).await?;

        tracing::info!(
            cases = targets.len(),
            parallel = self.config.parallel,
            "starting batch download"
        );
        let started = Instant::now();

        let mut report = if self.config.parallel {
            self.parallel_run(targets).await?
        } else {
            self.sequential_run(session, &targets).await
        };
        report.elapsed_seconds = started.elapsed().as_secs_f64();

        let warnings: Vec<Warning> = report
            .records
            .iter()
            .filter_map(|record| match &record.outcome {
                DownloadOutcome::Failed {
                    reason, attempts, ..
                } => Some(Warning::Download {
                    case_number: record.case_number.clone(),
                    attempts: *attempts,
                    reason: reason.clone(),
                }),
                DownloadOutcome::Succeeded { .. } => None,
            })
            .collect();

        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            elapsed_seconds = format!("{:.1}", report.elapsed_seconds),
            "batch download finished"
        );
        for warning in warnings.iter().take(5) {
            tracing::warn!(%warning, "download failure");
        }

        Ok((report, warnings))
    }

    async fn sequential_run(&self, session: &mut SessionManager, targets: &[Case]) -> BatchReport {
        let mut report = BatchReport::default();
        for (index, case) in targets.iter().enumerate() {
            tracing::info!(
                position = index + 1,
                of = targets.len(),
                case = %case.case_number,
                "downloading artifact"
            );
            report.push(self.download_case(session, case).await);
            if index + 1 < targets.len() && !self.config.sequential_delay.is_zero() {
                tokio::time::sleep(self.config.sequential_delay).await;
            }
        }
        report
    }

    async fn parallel_run(&self, targets: Vec<Case>) -> Result<BatchReport> {
        let workers = self.config.workers.max(1).min(targets.len());
        tracing::info!(workers, "parallel mode: one independent session per worker");

        // Round-robin partition keeps slices balanced without shared state
        let mut slices: Vec<Vec<Case>> = vec![Vec::new(); workers];
        for (index, case) in targets.into_iter().enumerate() {
            slices[index % workers].push(case);
        }

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<DownloadRecord>();
        let mut handles = Vec::with_capacity(workers);
        for (worker_id, slice) in slices.into_iter().enumerate() {
            let orchestrator = self.clone();
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                orchestrator.worker_run(worker_id, slice, tx).await;
            }));
        }
        drop(tx);

        let mut report = BatchReport::default();
        while let Some(record) = rx.recv().await {
            report.push(record);
        }
        for join in futures::future::join_all(handles).await {
            if let Err(e) = join {
                tracing::error!(error = %e, "download worker panicked");
            }
        }
        Ok(report)
    }

    /// One worker: own session machine, local retry loop, records reported
    /// through the aggregator channel
    async fn worker_run(
        &self,
        worker_id: usize,
        slice: Vec<Case>,
        tx: tokio::sync::mpsc::UnboundedSender<DownloadRecord>,
    ) {
        let adapter = match self.connector.connect() {
            Ok(adapter) => adapter,
            Err(e) => {
                tracing::error!(worker = worker_id, error = %e, "worker could not open a session");
                for case in slice {
                    let _ = tx.send(DownloadRecord {
                        case_number: case.case_number,
                        outcome: DownloadOutcome::Failed {
                            reason: format!("worker session unavailable: {e}"),
                            attempts: 0,
                            elapsed_seconds: 0.0,
                        },
                    });
                }
                return;
            }
        };

        let mut session =
            SessionManager::new(adapter, self.credentials.clone(), self.portal.clone());
        for case in slice {
            tracing::debug!(worker = worker_id, case = %case.case_number, "worker downloading");
            let record = self.download_case(&mut session, &case).await;
            if tx.send(record).is_err() {
                tracing::warn!(worker = worker_id, "aggregator gone, stopping worker");
                return;
            }
        }
    }

    /// Per-case retry loop: each attempt re-runs the whole flow from a fresh
    /// request on the same session; a session expiry resets the session
    /// between attempts
    async fn download_case(&self, session: &mut SessionManager, case: &Case) -> DownloadRecord {
        let started = Instant::now();
        let retries = self.config.retries.max(1);
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=retries {
            tracing::info!(attempt, of = retries, case = %case.case_number, "artifact attempt");

            if let Err(e) = session.ensure_ready().await {
                last_error = e.to_string();
                tracing::error!(case = %case.case_number, error = %last_error, "session unavailable");
                return DownloadRecord {
                    case_number: case.case_number.clone(),
                    outcome: DownloadOutcome::Failed {
                        reason: last_error,
                        attempts: attempt,
                        elapsed_seconds: started.elapsed().as_secs_f64(),
                    },
                };
            }

            let adapter = session.adapter();
            match self.attempt(&adapter, case).await {
                Ok((path, bytes)) => {
                    session.note_success();
                    tracing::info!(
                        case = %case.case_number,
                        path = %path.display(),
                        kib = bytes / 1024,
                        "artifact saved"
                    );
                    return DownloadRecord {
                        case_number: case.case_number.clone(),
                        outcome: DownloadOutcome::Succeeded {
                            path,
                            bytes,
                            attempts: attempt,
                            elapsed_seconds: started.elapsed().as_secs_f64(),
                        },
                    };
                }
                Err(Error::Adapter(AdapterError::SessionExpired)) => {
                    last_error = "session expired mid-download".to_string();
                    session.note_expiry();
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            tracing::warn!(
                attempt,
                of = retries,
                case = %case.case_number,
                error = %last_error,
                "artifact attempt failed"
            );
            if attempt < retries {
                tokio::time::sleep(backoff_delay(&self.retry, attempt)).await;
            }
        }

        DownloadRecord {
            case_number: case.case_number.clone(),
            outcome: DownloadOutcome::Failed {
                reason: last_error,
                attempts: retries,
                elapsed_seconds: started.elapsed().as_secs_f64(),
            },
        }
    }

    /// One full artifact attempt: navigate, generate, fetch, validate, write
    async fn attempt(
        &self,
        adapter: &Arc<dyn PortalAdapter>,
        case: &Case,
    ) -> Result<(PathBuf, u64)> {
        let case_page = adapter.fetch(&case.url, &[]).await?;
        let Some(frame) = case_page.frame(TREE_FRAME) else {
            return Err(Error::Artifact(format!(
                "frame '{TREE_FRAME}' not found for {}",
                case.case_number
            )));
        };
        let tree = adapter.fetch(&frame.src, &[]).await?;

        let Some(pdf_link) = tree.url_with_action(GENERATE_PDF_ACTION) else {
            return Err(Error::Artifact(format!(
                "'{GENERATE_PDF_ACTION}' link not found for {}",
                case.case_number
            )));
        };

        let options_page = adapter.fetch(&pdf_link, &[]).await?;
        let form = options_page
            .forms
            .iter()
            .find(|f| f.action.contains(GENERATE_PDF_ACTION))
            .or_else(|| options_page.forms.first())
            .ok_or_else(|| {
                Error::Artifact(format!(
                    "no generation form on options page for {}",
                    case.case_number
                ))
            })?;

        let payload = form.payload();
        let mut overrides = vec![("hdnFlagGerar".to_string(), "1".to_string())];
        if !payload.contains_key("rdoTipo") {
            overrides.push(("rdoTipo".to_string(), "T".to_string()));
        }
        if !payload.contains_key("btnGerar") {
            overrides.push(("btnGerar".to_string(), "Gerar".to_string()));
        }
        let response = adapter.submit_form(form, &overrides).await?;

        let download_url = match response.url_with_action(DOWNLOAD_ACTION) {
            Some(url) => url,
            None => {
                return Err(Error::Artifact(match response.alerts.first() {
                    Some(alert) => format!("portal refused generation: {alert}"),
                    None => format!("no '{DOWNLOAD_ACTION}' URL in generation response"),
                }));
            }
        };

        let payload = adapter.fetch_binary(&download_url).await?;
        self.validate_artifact(&payload, case)?;

        let path = artifact_path(&self.config.target_dir, &case.case_number);
        tokio::fs::write(&path, &payload.bytes).await?;
        Ok((path, payload.bytes.len() as u64))
    }

    fn validate_artifact(&self, payload: &BinaryPayload, case: &Case) -> Result<()> {
        if !payload.looks_like_pdf() {
            return Err(Error::Artifact(format!(
                "response for {} is not a PDF (content type {:?})",
                case.case_number, payload.content_type
            )));
        }
        if payload.bytes.is_empty() {
            return Err(Error::Artifact(format!(
                "empty artifact body for {}",
                case.case_number
            )));
        }
        if payload.bytes.len() as u64 > self.config.max_artifact_bytes {
            return Err(Error::Artifact(format!(
                "artifact too large for {}: {} bytes",
                case.case_number,
                payload.bytes.len()
            )));
        }
        Ok(())
    }
}

/// Render one artifact with a single attempt (the single-case convenience
/// path: same flow as the batch, `retries = 1`)
pub async fn download_single(
    orchestrator: &DownloadOrchestrator,
    session: &mut SessionManager,
    case: &Case,
) -> Result<DownloadRecord> {
    let mut single = orchestrator.clone();
    single.config.retries = 1;
    single.config.process_cap = Some(1);
    let (mut report, _) = single.download_all(session, std::slice::from_ref(case)).await?;
    report
        .records
        .pop()
        .ok_or_else(|| Error::Artifact("no record produced".to_string()))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::fake::{FakeAdapter, FakeConnector, FakeError};
    use crate::adapter::{FormNode, FrameNode, LinkNode, PageNode};
    use crate::types::Category;
    use std::collections::BTreeMap;

    fn sample_case(n: u32) -> Case {
        let mut case = Case::new(
            format!("1500.01.{n:07}/2024-{:02}", n % 100),
            n.to_string(),
            Category::Received,
        );
        case.url = format!("controlador.php?acao=procedimento_trabalhar&id_procedimento={n}");
        case
    }

    fn pdf_payload() -> BinaryPayload {
        BinaryPayload {
            bytes: b"%PDF-1.7 minimal".to_vec(),
            content_type: Some("application/pdf".to_string()),
            disposition: None,
        }
    }

    /// Script the whole happy-path flow with sticky routes shared by every case
    fn script_flow(adapter: &FakeAdapter) {
        adapter.on_fetch(
            "procedimento_trabalhar",
            PageNode {
                frames: vec![FrameNode {
                    id: Some(TREE_FRAME.to_string()),
                    src: "controlador.php?acao=arvore_visualizar&id_arvore=1".to_string(),
                }],
                ..Default::default()
            },
        );
        adapter.on_fetch(
            "arvore_visualizar",
            PageNode {
                links: vec![LinkNode {
                    href: "controlador.php?acao=procedimento_gerar_pdf&id=1".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            },
        );
        adapter.on_fetch(
            "procedimento_gerar_pdf",
            PageNode {
                forms: vec![FormNode {
                    action: "controlador.php?acao=procedimento_gerar_pdf&id=1".to_string(),
                    method: "post".to_string(),
                    fields: BTreeMap::from([("hdnFlagGerar".to_string(), "0".to_string())]),
                    ..Default::default()
                }],
                ..Default::default()
            },
        );
        adapter.on_submit(
            "hdnFlagGerar=1",
            PageNode {
                frames: vec![FrameNode {
                    id: Some("ifrDownload".to_string()),
                    src: "controlador.php?acao=exibir_arquivo&id=1".to_string(),
                }],
                ..Default::default()
            },
        );
    }

    fn script_session(adapter: &FakeAdapter) {
        adapter.on_fetch("login.php", PageNode::default());
        adapter.on_submit(
            "login.php",
            PageNode {
                text: "Sair".to_string(),
                ..Default::default()
            },
        );
        adapter.on_fetch("procedimento_controlar", PageNode::default());
    }

    fn orchestrator(
        adapter: Arc<FakeAdapter>,
        config: DownloadConfig,
    ) -> DownloadOrchestrator {
        DownloadOrchestrator::new(
            Arc::new(FakeConnector::sticky(adapter)),
            Credentials {
                login: "u".to_string(),
                secret: "p".to_string(),
                org_code: "28".to_string(),
            },
            PortalConfig {
                unit_name: crate::types::UnitName::new("SEPLAG/X"),
                ..Default::default()
            },
            config,
            RetryConfig {
                initial_delay: std::time::Duration::from_millis(1),
                jitter: false,
                ..Default::default()
            },
        )
    }

    async fn ready_session(adapter: &Arc<FakeAdapter>) -> SessionManager {
        let mut session = SessionManager::new(
            adapter.clone() as Arc<dyn PortalAdapter>,
            Credentials {
                login: "u".to_string(),
                secret: "p".to_string(),
                org_code: "28".to_string(),
            },
            PortalConfig {
                unit_name: crate::types::UnitName::new("SEPLAG/X"),
                ..Default::default()
            },
        );
        session.ensure_ready().await.unwrap();
        session.take_warnings();
        session
    }

    fn download_config(dir: &std::path::Path) -> DownloadConfig {
        DownloadConfig {
            enabled: true,
            target_dir: dir.to_path_buf(),
            retries: 3,
            sequential_delay: std::time::Duration::ZERO,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn success_after_two_failed_attempts_is_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = Arc::new(FakeAdapter::new());
        script_session(&adapter);
        script_flow(&adapter);
        // Two failing binary fetches, then the PDF
        adapter.on_binary_err("exibir_arquivo", FakeError::Timeout);
        adapter.on_binary_err("exibir_arquivo", FakeError::Transport("reset".to_string()));
        adapter.on_binary("exibir_arquivo", pdf_payload());

        let mut session = ready_session(&adapter).await;
        let orchestrator = orchestrator(adapter, download_config(dir.path()));
        let (report, warnings) = orchestrator
            .download_all(&mut session, &[sample_case(1)])
            .await
            .unwrap();

        assert_eq!(report.attempted(), 1, "failures before success are not separate records");
        assert_eq!(report.succeeded, 1);
        assert!(warnings.is_empty());
        match &report.records[0].outcome {
            DownloadOutcome::Succeeded { attempts, path, bytes, .. } => {
                assert_eq!(*attempts, 3);
                assert!(path.exists());
                assert_eq!(*bytes, b"%PDF-1.7 minimal".len() as u64);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exhausted_case_fails_without_stopping_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = Arc::new(FakeAdapter::new());
        script_session(&adapter);
        script_flow(&adapter);
        // Case 1 burns its three attempts on timeouts; the sticky success
        // that follows serves case 2
        adapter.on_binary_err("exibir_arquivo", FakeError::Timeout);
        adapter.on_binary_err("exibir_arquivo", FakeError::Timeout);
        adapter.on_binary_err("exibir_arquivo", FakeError::Timeout);
        adapter.on_binary("exibir_arquivo", pdf_payload());

        let mut session = ready_session(&adapter).await;
        let orchestrator = orchestrator(adapter, download_config(dir.path()));
        let (report, warnings) = orchestrator
            .download_all(&mut session, &[sample_case(1), sample_case(2)])
            .await
            .unwrap();

        assert_eq!(report.attempted(), 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(warnings.len(), 1);
        assert!(matches!(
            &report.records[0].outcome,
            DownloadOutcome::Failed { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn non_pdf_response_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = Arc::new(FakeAdapter::new());
        script_session(&adapter);
        script_flow(&adapter);
        adapter.on_binary(
            "exibir_arquivo",
            BinaryPayload {
                bytes: b"<html>intermediate page</html>".to_vec(),
                content_type: Some("text/html".to_string()),
                disposition: None,
            },
        );

        let mut session = ready_session(&adapter).await;
        let mut config = download_config(dir.path());
        config.retries = 1;
        let orchestrator = orchestrator(adapter, config);
        let (report, _) = orchestrator
            .download_all(&mut session, &[sample_case(1)])
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        match &report.records[0].outcome {
            DownloadOutcome::Failed { reason, .. } => {
                assert!(reason.contains("not a PDF"), "reason: {reason}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn parallel_mode_reports_every_case_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = Arc::new(FakeAdapter::new());
        script_session(&adapter);
        script_flow(&adapter);
        adapter.on_binary("exibir_arquivo", pdf_payload());

        let cases: Vec<Case> = (1..=40).map(sample_case).collect();
        let mut config = download_config(dir.path());
        config.parallel = true;
        config.workers = 4;

        let mut session = ready_session(&adapter).await;
        let orchestrator = orchestrator(adapter, config);
        let (report, _) = orchestrator
            .download_all(&mut session, &cases)
            .await
            .unwrap();

        assert_eq!(report.attempted(), 40);
        assert_eq!(report.succeeded + report.failed, 40);

        let mut seen: Vec<&str> = report
            .records
            .iter()
            .map(|r| r.case_number.as_str())
            .collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 40, "every case appears exactly once");
    }

    #[tokio::test]
    async fn process_cap_bounds_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = Arc::new(FakeAdapter::new());
        script_session(&adapter);
        script_flow(&adapter);
        adapter.on_binary("exibir_arquivo", pdf_payload());

        let mut config = download_config(dir.path());
        config.process_cap = Some(2);

        let mut session = ready_session(&adapter).await;
        let orchestrator = orchestrator(adapter, config);
        let cases: Vec<Case> = (1..=5).map(sample_case).collect();
        let (report, _) = orchestrator
            .download_all(&mut session, &cases)
            .await
            .unwrap();

        assert_eq!(report.attempted(), 2);
    }

    #[tokio::test]
    async fn single_download_uses_one_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = Arc::new(FakeAdapter::new());
        script_session(&adapter);
        script_flow(&adapter);
        adapter.on_binary_err("exibir_arquivo", FakeError::Timeout);

        let mut session = ready_session(&adapter).await;
        let orchestrator = orchestrator(adapter, download_config(dir.path()));
        let record = download_single(&orchestrator, &mut session, &sample_case(1))
            .await
            .unwrap();
        assert!(matches!(
            record.outcome,
            DownloadOutcome::Failed { attempts: 1, .. }
        ));
    }
}
