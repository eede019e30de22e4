//! # sei-dl
//!
//! Backend library for harvesting cases from a SEI case-management portal:
//! authenticate, normalize the active organizational unit, enumerate a user's
//! cases across both inbox categories, enrich each case with its document
//! tree, and bulk-retrieve rendered case PDFs.
//!
//! ## Design Philosophy
//!
//! - **Orchestration first** - the session state machine, the deduplicating
//!   collection pipeline, and the bounded-concurrency download engine are the
//!   product; page transport/parsing sits behind a capability interface
//! - **Best-effort results** - partial failures are returned as structured
//!   warnings next to the data, never silently dropped
//! - **Library-first** - no CLI or UI, purely a Rust crate for embedding
//!
//! ## Quick Start
//!
//! ```no_run
//! use sei_dl::{Config, Credentials, Pipeline, UnitName};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config {
//!         credentials: Credentials {
//!             login: "user".to_string(),
//!             secret: "secret".to_string(),
//!             org_code: "28".to_string(),
//!         },
//!         ..Default::default()
//!     };
//!     config.portal.unit_name = UnitName::new("SEPLAG/AUTOMATIZAMG");
//!     config.download.enabled = true;
//!
//!     let outcome = Pipeline::new(config)?.run().await?;
//!     for warning in &outcome.warnings {
//!         eprintln!("warning: {warning}");
//!     }
//!     println!("collected {} cases", outcome.cases.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Portal adapter interface and HTTP implementation
pub mod adapter;
/// Case collection across both inbox categories
pub mod collector;
/// Configuration types
pub mod config;
/// Batch artifact download engine
pub mod downloader;
/// Document subtree enrichment
pub mod enricher;
/// Error types and structured warnings
pub mod error;
/// End-to-end pipeline facade
pub mod pipeline;
/// Retry logic with exponential backoff
pub mod retry;
/// Session life-cycle state machine
pub mod session;
/// History snapshot persistence
pub mod storage;
/// Core domain types
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use adapter::{
    AdapterError, BinaryPayload, FormNode, HttpConnector, HttpPortalAdapter, PageNode,
    PortalAdapter, PortalConnector,
};
pub use collector::{CaseCollector, CollectOutcome};
pub use config::{
    Config, Credentials, DebugConfig, DownloadConfig, EnrichmentConfig, HistoryConfig,
    PaginationCaps, PortalConfig, RetryConfig,
};
pub use downloader::DownloadOrchestrator;
pub use enricher::DocumentEnricher;
pub use error::{Error, Result, Warning};
pub use pipeline::{Pipeline, PipelineOutcome};
pub use session::{ReadySession, SessionManager, SessionState};
pub use storage::HistoryEntry;
pub use types::{
    BatchReport, Case, Category, Document, DownloadOutcome, DownloadRecord, FilterCriteria,
    UnitName, Visibility,
};
