//! Session life-cycle state machine.
//!
//! No read from the portal is trustworthy until the session is authenticated
//! AND the configured organizational unit is active — case listings are
//! unit-scoped. `ensure_ready` drives the machine
//! `Unauthenticated → Authenticating → Authenticated → UnitVerifying →
//! [UnitSwitching →] Ready`, with a `Degraded → Ready` fallback when the unit
//! switch fails: switching is best-effort, the pipeline continues on the
//! prior unit with a recorded warning.

use crate::adapter::{FormNode, PageNode, PortalAdapter};
use crate::config::{Credentials, PortalConfig};
use crate::error::{Error, Result, Warning};
use crate::types::UnitName;
use std::sync::Arc;

/// Name of the unit selector on the case-control page
const UNIT_SELECT: &str = "selInfraUnidades";
/// Portal action that opens the case-control page
const CONTROL_ACTION: &str = "acao=procedimento_controlar";

/// States of the session machine, each carrying what the next step needs
#[derive(Debug)]
pub enum SessionState {
    /// No session yet
    Unauthenticated,
    /// Credentials are being submitted
    Authenticating,
    /// Logged in; landing page in hand
    Authenticated {
        /// Post-login page
        landing: PageNode,
    },
    /// Control page loaded; reading the active unit
    UnitVerifying {
        /// Case-control page
        control: PageNode,
        /// URL it was fetched from
        control_url: String,
    },
    /// Active unit differs from the configured one; switching
    UnitSwitching {
        /// Case-control page
        control: PageNode,
        /// URL it was fetched from
        control_url: String,
        /// Unit that is currently active, when readable
        active: Option<UnitName>,
    },
    /// Unit switch failed; continuing on the prior unit
    Degraded {
        /// Case-control page to keep using
        control: PageNode,
        /// URL it was fetched from
        control_url: String,
        /// Unit that stayed active
        active: Option<UnitName>,
        /// Why the switch did not happen
        reason: String,
    },
    /// Downstream components may proceed
    Ready,
}

impl SessionState {
    fn name(&self) -> &'static str {
        match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Authenticating => "authenticating",
            SessionState::Authenticated { .. } => "authenticated",
            SessionState::UnitVerifying { .. } => "unit-verifying",
            SessionState::UnitSwitching { .. } => "unit-switching",
            SessionState::Degraded { .. } => "degraded",
            SessionState::Ready => "ready",
        }
    }
}

/// The known-good context downstream components read from
#[derive(Debug)]
pub struct ReadySession {
    /// Case-control page as last fetched
    pub control: PageNode,
    /// URL the control page was fetched from (pagination referer)
    pub control_url: String,
    /// Unit that is active for the session, when the page exposes it
    pub active_unit: Option<UnitName>,
}

/// Owns authentication and active-unit state; produces [`ReadySession`]s
pub struct SessionManager {
    adapter: Arc<dyn PortalAdapter>,
    credentials: Credentials,
    portal: PortalConfig,
    state: SessionState,
    ready: Option<ReadySession>,
    warnings: Vec<Warning>,
    expiry_resets: u32,
}

impl SessionManager {
    /// Bind a session manager to an adapter and configuration
    pub fn new(
        adapter: Arc<dyn PortalAdapter>,
        credentials: Credentials,
        portal: PortalConfig,
    ) -> Self {
        Self {
            adapter,
            credentials,
            portal,
            state: SessionState::Unauthenticated,
            ready: None,
            warnings: Vec::new(),
            expiry_resets: 0,
        }
    }

    /// The adapter this session runs on (shared with downstream components)
    pub fn adapter(&self) -> Arc<dyn PortalAdapter> {
        self.adapter.clone()
    }

    /// Current machine state (diagnostics)
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Drain warnings recorded so far
    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    /// The portal dropped the session: reset to `Unauthenticated` so the next
    /// `ensure_ready` re-authenticates. A second reset without an intervening
    /// successful read makes the next `ensure_ready` fatal.
    pub fn note_expiry(&mut self) {
        self.expiry_resets += 1;
        self.state = SessionState::Unauthenticated;
        self.ready = None;
        tracing::warn!(resets = self.expiry_resets, "portal session expired, resetting");
    }

    /// A read on the re-established session succeeded; expiry accounting clears
    pub fn note_success(&mut self) {
        self.expiry_resets = 0;
    }

    /// Drive the machine to `Ready`. Idempotent: once ready, a no-op until
    /// [`Self::note_expiry`] resets it.
    pub async fn ensure_ready(&mut self) -> Result<&ReadySession> {
        if self.ready.is_none() {
            if self.expiry_resets > 1 {
                return Err(Error::Authentication(
                    "session expired again right after re-authentication".to_string(),
                ));
            }
            loop {
                let state = std::mem::replace(&mut self.state, SessionState::Unauthenticated);
                tracing::debug!(state = state.name(), "session step");
                let next = self.step(state).await?;
                if let SessionState::Ready = next {
                    self.state = SessionState::Ready;
                    break;
                }
                self.state = next;
            }
        }

        self.ready.as_ref().ok_or_else(|| {
            Error::Authentication("session machine reached Ready without a control page".to_string())
        })
    }

    async fn step(&mut self, state: SessionState) -> Result<SessionState> {
        match state {
            SessionState::Unauthenticated => Ok(SessionState::Authenticating),

            SessionState::Authenticating => {
                let landing = self.authenticate().await?;
                Ok(SessionState::Authenticated { landing })
            }

            SessionState::Authenticated { landing } => {
                let (control, control_url) = self.open_control(&landing).await?;
                Ok(SessionState::UnitVerifying {
                    control,
                    control_url,
                })
            }

            SessionState::UnitVerifying {
                control,
                control_url,
            } => {
                let active = read_active_unit(&control);
                match &active {
                    Some(unit) if *unit == self.portal.unit_name => {
                        tracing::info!(unit = %unit, "desired unit already active");
                        self.finish(control, control_url, active);
                        Ok(SessionState::Ready)
                    }
                    _ => {
                        tracing::info!(
                            active = active.as_ref().map(UnitName::as_str).unwrap_or("<unknown>"),
                            desired = self.portal.unit_name.as_str(),
                            "active unit differs, switching"
                        );
                        Ok(SessionState::UnitSwitching {
                            control,
                            control_url,
                            active,
                        })
                    }
                }
            }

            SessionState::UnitSwitching {
                control,
                control_url,
                active,
            } => match self.switch_unit(&control, &control_url).await {
                Ok((new_control, confirmed)) => {
                    if confirmed {
                        let active = read_active_unit(&new_control);
                        self.finish(new_control, control_url, active);
                        Ok(SessionState::Ready)
                    } else {
                        Ok(SessionState::Degraded {
                            control: new_control,
                            control_url,
                            active,
                            reason: "switch submitted but the portal kept the prior unit"
                                .to_string(),
                        })
                    }
                }
                Err(reason) => Ok(SessionState::Degraded {
                    control,
                    control_url,
                    active,
                    reason,
                }),
            },

            SessionState::Degraded {
                control,
                control_url,
                active,
                reason,
            } => {
                tracing::warn!(
                    requested = self.portal.unit_name.as_str(),
                    active = active.as_ref().map(UnitName::as_str).unwrap_or("<unknown>"),
                    reason = %reason,
                    "unit switch failed, continuing on prior unit"
                );
                self.warnings.push(Warning::UnitSwitch {
                    requested: self.portal.unit_name.as_str().to_string(),
                    active: active.as_ref().map(|u| u.as_str().to_string()),
                    reason,
                });
                self.finish(control, control_url, active);
                Ok(SessionState::Ready)
            }

            SessionState::Ready => Ok(SessionState::Ready),
        }
    }

    fn finish(&mut self, control: PageNode, control_url: String, active: Option<UnitName>) {
        self.ready = Some(ReadySession {
            control,
            control_url,
            active_unit: active,
        });
    }

    /// Submit credentials to the portal's login form
    async fn authenticate(&self) -> Result<PageNode> {
        let login_url = self.portal.login_url();
        tracing::info!("opening login page");
        self.adapter
            .fetch(&login_url, &[])
            .await
            .map_err(|e| Error::Authentication(format!("login page unreachable: {e}")))?;

        let form = FormNode {
            action: login_url.clone(),
            method: "post".to_string(),
            fields: [
                ("txtUsuario", self.credentials.login.as_str()),
                ("pwdSenha", self.credentials.secret.as_str()),
                ("selOrgao", self.credentials.org_code.as_str()),
                ("hdnAcao", "2"),
                ("Acessar", "Acessar"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
            ..Default::default()
        };

        tracing::info!("submitting credentials");
        let landing = self
            .adapter
            .submit_form(&form, &[])
            .await
            .map_err(|e| Error::Authentication(format!("login request failed: {e}")))?;

        if landing.contains_text("Sair") || landing.contains_text("Controle de Processos") {
            tracing::info!("authenticated");
            return Ok(landing);
        }

        let lowered = landing.text.to_lowercase();
        if lowered.contains("usuário ou senha") || lowered.contains("inval") {
            Err(Error::Authentication("invalid credentials".to_string()))
        } else if lowered.contains("bloquead") {
            Err(Error::Authentication("account locked".to_string()))
        } else {
            Err(Error::Authentication(
                "login not confirmed by the portal".to_string(),
            ))
        }
    }

    /// Open the case-control page, preferring the link the landing page offers
    async fn open_control(&self, landing: &PageNode) -> Result<(PageNode, String)> {
        let url = landing
            .link_containing(CONTROL_ACTION)
            .map(|l| l.href.clone())
            .unwrap_or_else(|| self.portal.control_path.clone());
        tracing::info!(url = %url, "opening case-control page");
        let control = self.adapter.fetch(&url, &[]).await?;
        let control_url = control.url.clone();
        let control_url = if control_url.is_empty() { url } else { control_url };
        Ok((control, control_url))
    }

    /// Locate the desired unit in the selector and submit the switch.
    /// Returns the refreshed control page and whether the switch stuck.
    /// Any failure is reported as a reason string — switch failures are
    /// non-fatal by contract.
    async fn switch_unit(
        &self,
        control: &PageNode,
        control_url: &str,
    ) -> std::result::Result<(PageNode, bool), String> {
        let Some(select) = control.select(UNIT_SELECT) else {
            return Err("control page exposes no unit selector".to_string());
        };
        let Some(option) = select
            .options
            .iter()
            .find(|o| UnitName::new(o.label.clone()) == self.portal.unit_name)
        else {
            return Err(format!(
                "unit '{}' not among the {} offered",
                self.portal.unit_name,
                select.options.len()
            ));
        };
        let Some(form) = control.forms.iter().find(|f| f.select(UNIT_SELECT).is_some()) else {
            return Err("unit selector is not inside a form".to_string());
        };

        tracing::info!(unit = %self.portal.unit_name, value = %option.value, "submitting unit switch");
        let overrides = vec![(UNIT_SELECT.to_string(), option.value.clone())];
        if let Err(e) = self.adapter.submit_form(form, &overrides).await {
            return Err(format!("switch request failed: {e}"));
        }

        // Reload the control page to confirm consistent state
        let refreshed = self
            .adapter
            .fetch(control_url, &[])
            .await
            .map_err(|e| format!("control reload after switch failed: {e}"))?;
        let confirmed = read_active_unit(&refreshed)
            .map(|active| active == self.portal.unit_name)
            .unwrap_or(false);
        Ok((refreshed, confirmed))
    }
}

/// Read the active unit from the control page's selector
fn read_active_unit(control: &PageNode) -> Option<UnitName> {
    let select = control.select(UNIT_SELECT)?;
    let selected = select
        .selected
        .clone()
        .or_else(|| select.options.first().map(|o| o.value.clone()))?;
    select
        .options
        .iter()
        .find(|o| o.value == selected)
        .map(|o| UnitName::new(o.label.clone()))
}
