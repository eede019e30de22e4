//! HTTP portal adapter: reqwest transport + page parsing.
//!
//! Owns the cookie session. Pages are decoded as ISO-8859-1 (the portal's
//! encoding) and parsed into [`PageNode`]s; binary fetches return raw bytes
//! with the headers the core validates. A fresh adapter is unauthenticated —
//! the session manager drives the login flow through the generic
//! `fetch`/`submit_form` calls.

use super::{AdapterError, BinaryPayload, FormNode, PageNode, PortalAdapter, PortalConnector};
use crate::config::{DebugConfig, PortalConfig};
use async_trait::async_trait;
use reqwest::cookie::Jar;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use url::Url;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_PDF: &str = "application/pdf, */*;q=0.8";

/// Portal adapter over a cookie-carrying reqwest client
pub struct HttpPortalAdapter {
    client: reqwest::Client,
    base_url: Url,
    login_marker: String,
    request_timeout: Duration,
    download_timeout: Duration,
    debug: DebugConfig,
    page_counter: AtomicU64,
}

impl HttpPortalAdapter {
    /// Build an unauthenticated adapter with the organization cookie pre-set,
    /// the way the portal expects it before the login form is even submitted
    pub fn new(
        portal: &PortalConfig,
        org_code: &str,
        debug: &DebugConfig,
    ) -> Result<Self, AdapterError> {
        let base_url = Url::parse(&portal.base_url).map_err(|e| {
            AdapterError::UnexpectedShape(format!("invalid base url {}: {e}", portal.base_url))
        })?;

        let jar = Arc::new(Jar::default());
        if !org_code.is_empty() {
            jar.add_cookie_str(
                &format!("{}={org_code}", portal.org_cookie),
                &base_url,
            );
        }

        let client = reqwest::Client::builder()
            .cookie_provider(jar)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| AdapterError::Transport {
                url: portal.base_url.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url,
            login_marker: "login.php".to_string(),
            request_timeout: portal.request_timeout,
            download_timeout: portal.download_timeout,
            debug: debug.clone(),
            page_counter: AtomicU64::new(0),
        })
    }

    /// Resolve a possibly-relative portal href against `<base>/sei/`
    fn absolute(&self, href: &str) -> Result<Url, AdapterError> {
        if href.starts_with("http://") || href.starts_with("https://") {
            return Url::parse(href).map_err(|e| {
                AdapterError::UnexpectedShape(format!("invalid absolute url {href}: {e}"))
            });
        }
        let root = self.base_url.join("/sei/").map_err(|e| {
            AdapterError::UnexpectedShape(format!("cannot derive portal root: {e}"))
        })?;
        root.join(href.trim_start_matches('/')).map_err(|e| {
            AdapterError::UnexpectedShape(format!("cannot resolve href {href}: {e}"))
        })
    }

    fn map_send_error(url: &Url, error: reqwest::Error) -> AdapterError {
        if error.is_timeout() {
            AdapterError::Timeout {
                url: url.to_string(),
            }
        } else {
            AdapterError::Transport {
                url: url.to_string(),
                message: error.to_string(),
            }
        }
    }

    fn check_status(url: &Url, response: &reqwest::Response) -> Result<(), AdapterError> {
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(AdapterError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    fn save_debug_html(&self, url: &Url, html: &str) {
        if !self.debug.save_html {
            return;
        }
        let index = self.page_counter.fetch_add(1, Ordering::Relaxed);
        let slug: String = url
            .path()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let path = self.debug.html_dir.join(format!("{index:04}_{slug}.html"));
        let write = std::fs::create_dir_all(&self.debug.html_dir)
            .and_then(|()| std::fs::write(&path, html));
        match write {
            Ok(()) => tracing::debug!(path = %path.display(), chars = html.len(), "saved debug html"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to save debug html"),
        }
    }

    async fn read_page(&self, url: Url, response: reqwest::Response) -> Result<PageNode, AdapterError> {
        Self::check_status(&url, &response)?;
        let final_url = response.url().clone();
        let html = response
            .text_with_charset("iso-8859-1")
            .await
            .map_err(|e| Self::map_send_error(&final_url, e))?;
        self.save_debug_html(&final_url, &html);

        let page = super::parse_page(final_url.to_string(), &html);

        // An in-session request that lands on the login form means the portal
        // dropped the session
        if !final_url.as_str().contains(&self.login_marker)
            && page.field("pwdSenha").is_some()
        {
            return Err(AdapterError::SessionExpired);
        }
        Ok(page)
    }
}

#[async_trait]
impl PortalAdapter for HttpPortalAdapter {
    async fn fetch(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<PageNode, AdapterError> {
        let mut url = self.absolute(path)?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        tracing::debug!(url = %url, "fetching page");
        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, ACCEPT_HTML)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| Self::map_send_error(&url, e))?;
        self.read_page(url, response).await
    }

    async fn submit_form(
        &self,
        form: &FormNode,
        overrides: &[(String, String)],
    ) -> Result<PageNode, AdapterError> {
        let url = self.absolute(&form.action)?;
        let mut payload: BTreeMap<String, String> = form.payload();
        for (key, value) in overrides {
            payload.insert(key.clone(), value.clone());
        }

        tracing::debug!(url = %url, method = %form.method, fields = payload.len(), "submitting form");
        let request = if form.method == "get" {
            self.client.get(url.clone()).query(&payload)
        } else {
            self.client.post(url.clone()).form(&payload)
        };
        let response = request
            .header(reqwest::header::ACCEPT, ACCEPT_HTML)
            .header(reqwest::header::REFERER, self.base_url.as_str())
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| Self::map_send_error(&url, e))?;
        self.read_page(url, response).await
    }

    async fn fetch_binary(&self, path: &str) -> Result<BinaryPayload, AdapterError> {
        let url = self.absolute(path)?;
        tracing::debug!(url = %url, "fetching binary");
        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, ACCEPT_PDF)
            .timeout(self.download_timeout)
            .send()
            .await
            .map_err(|e| Self::map_send_error(&url, e))?;
        Self::check_status(&url, &response)?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_lowercase());
        let disposition = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Self::map_send_error(&url, e))?
            .to_vec();

        Ok(BinaryPayload {
            bytes,
            content_type,
            disposition,
        })
    }
}

/// Connector minting independent HTTP sessions (one per parallel worker)
pub struct HttpConnector {
    portal: PortalConfig,
    org_code: String,
    debug: DebugConfig,
}

impl HttpConnector {
    /// Capture the parameters every minted session shares
    pub fn new(portal: PortalConfig, org_code: impl Into<String>, debug: DebugConfig) -> Self {
        Self {
            portal,
            org_code: org_code.into(),
            debug,
        }
    }
}

impl PortalConnector for HttpConnector {
    fn connect(&self) -> Result<Arc<dyn PortalAdapter>, AdapterError> {
        Ok(Arc::new(HttpPortalAdapter::new(
            &self.portal,
            &self.org_code,
            &self.debug,
        )?))
    }
}
