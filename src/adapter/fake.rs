//! Deterministic scripted portal adapter for orchestration-core tests.
//!
//! Routes are registered as substring needles over a canonical call target:
//! `path?query` for fetches and binaries, `action::k=v&k=v` (sorted) for form
//! submissions. Each route holds a queue of responses; a single-entry queue is
//! sticky, longer queues pop in order. Every call is recorded so tests can
//! assert call counts and ordering.

use super::{AdapterError, BinaryPayload, FormNode, PageNode, PortalAdapter, PortalConnector};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Cloneable stand-in for `AdapterError` (which owns non-clone variants)
#[derive(Clone, Debug)]
pub(crate) enum FakeError {
    Timeout,
    Transport(String),
    Http(u16),
    SessionExpired,
    Shape(String),
}

impl From<FakeError> for AdapterError {
    fn from(e: FakeError) -> Self {
        match e {
            FakeError::Timeout => AdapterError::Timeout {
                url: "fake://".to_string(),
            },
            FakeError::Transport(message) => AdapterError::Transport {
                url: "fake://".to_string(),
                message,
            },
            FakeError::Http(status) => AdapterError::Http {
                url: "fake://".to_string(),
                status,
            },
            FakeError::SessionExpired => AdapterError::SessionExpired,
            FakeError::Shape(message) => AdapterError::UnexpectedShape(message),
        }
    }
}

type Scripted<T> = Result<T, FakeError>;

struct Route<T> {
    needle: String,
    queue: VecDeque<Scripted<T>>,
}

struct Routes<T> {
    routes: Vec<Route<T>>,
}

impl<T: Clone> Routes<T> {
    fn new() -> Self {
        Self { routes: Vec::new() }
    }

    fn add(&mut self, needle: &str, response: Scripted<T>) {
        if let Some(route) = self.routes.iter_mut().find(|r| r.needle == needle) {
            route.queue.push_back(response);
        } else {
            self.routes.push(Route {
                needle: needle.to_string(),
                queue: VecDeque::from([response]),
            });
        }
    }

    fn resolve(&mut self, target: &str) -> Option<Scripted<T>> {
        let route = self
            .routes
            .iter_mut()
            .find(|r| target.contains(&r.needle))?;
        if route.queue.len() > 1 {
            route.queue.pop_front()
        } else {
            route.queue.front().cloned()
        }
    }
}

/// One recorded adapter call
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Call {
    Fetch(String),
    Submit(String),
    Binary(String),
}

impl Call {
    fn target(&self) -> &str {
        match self {
            Call::Fetch(t) | Call::Submit(t) | Call::Binary(t) => t,
        }
    }
}

/// Scripted in-memory portal adapter
pub(crate) struct FakeAdapter {
    pages: Mutex<Routes<PageNode>>,
    submissions: Mutex<Routes<PageNode>>,
    binaries: Mutex<Routes<BinaryPayload>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeAdapter {
    pub(crate) fn new() -> Self {
        Self {
            pages: Mutex::new(Routes::new()),
            submissions: Mutex::new(Routes::new()),
            binaries: Mutex::new(Routes::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn on_fetch(&self, needle: &str, page: PageNode) -> &Self {
        self.pages.lock().unwrap().add(needle, Ok(page));
        self
    }

    pub(crate) fn on_fetch_err(&self, needle: &str, error: FakeError) -> &Self {
        self.pages.lock().unwrap().add(needle, Err(error));
        self
    }

    pub(crate) fn on_submit(&self, needle: &str, page: PageNode) -> &Self {
        self.submissions.lock().unwrap().add(needle, Ok(page));
        self
    }

    pub(crate) fn on_submit_err(&self, needle: &str, error: FakeError) -> &Self {
        self.submissions.lock().unwrap().add(needle, Err(error));
        self
    }

    pub(crate) fn on_binary(&self, needle: &str, payload: BinaryPayload) -> &Self {
        self.binaries.lock().unwrap().add(needle, Ok(payload));
        self
    }

    pub(crate) fn on_binary_err(&self, needle: &str, error: FakeError) -> &Self {
        self.binaries.lock().unwrap().add(needle, Err(error));
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn submit_count(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, Call::Submit(t) if t.contains(needle)))
            .count()
    }

    pub(crate) fn fetch_count(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, Call::Fetch(t) if t.contains(needle)))
            .count()
    }

    fn record(&self, call: Call) {
        tracing::trace!(target = call.target(), "fake adapter call");
        self.calls.lock().unwrap().push(call);
    }

    fn submit_target(form: &FormNode, overrides: &[(String, String)]) -> String {
        let mut payload = form.payload();
        for (key, value) in overrides {
            payload.insert(key.clone(), value.clone());
        }
        let fields: Vec<String> = payload
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        format!("{}::{}", form.action, fields.join("&"))
    }
}

#[async_trait]
impl PortalAdapter for FakeAdapter {
    async fn fetch(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<PageNode, AdapterError> {
        let mut target = path.to_string();
        for (key, value) in query {
            target.push_str(&format!("&{key}={value}"));
        }
        self.record(Call::Fetch(target.clone()));
        match self.pages.lock().unwrap().resolve(&target) {
            Some(Ok(page)) => Ok(page),
            Some(Err(e)) => Err(e.into()),
            None => Err(AdapterError::UnexpectedShape(format!(
                "no scripted fetch for {target}"
            ))),
        }
    }

    async fn submit_form(
        &self,
        form: &FormNode,
        overrides: &[(String, String)],
    ) -> Result<PageNode, AdapterError> {
        let target = Self::submit_target(form, overrides);
        self.record(Call::Submit(target.clone()));
        match self.submissions.lock().unwrap().resolve(&target) {
            Some(Ok(page)) => Ok(page),
            Some(Err(e)) => Err(e.into()),
            None => Err(AdapterError::UnexpectedShape(format!(
                "no scripted submission for {target}"
            ))),
        }
    }

    async fn fetch_binary(&self, path: &str) -> Result<BinaryPayload, AdapterError> {
        self.record(Call::Binary(path.to_string()));
        match self.binaries.lock().unwrap().resolve(path) {
            Some(Ok(payload)) => Ok(payload),
            Some(Err(e)) => Err(e.into()),
            None => Err(AdapterError::UnexpectedShape(format!(
                "no scripted binary for {path}"
            ))),
        }
    }
}

/// Connector handing the same scripted adapter to every `connect` call
pub(crate) struct FakeConnector {
    adapter: Arc<FakeAdapter>,
}

impl FakeConnector {
    pub(crate) fn sticky(adapter: Arc<FakeAdapter>) -> Self {
        Self { adapter }
    }
}

impl PortalConnector for FakeConnector {
    fn connect(&self) -> Result<Arc<dyn PortalAdapter>, AdapterError> {
        Ok(self.adapter.clone())
    }
}
