// src/panel.rs
// Bot control state machine and the operator-facing result surface. Every
// mutation of bot status, signal, or surface goes through the transition
// methods here; nothing else writes this state.

use crate::api::{reported_active, AnalyzeRequest, ApiClient, BotConfig, HealthReport, Signal};
use crate::error::{Error, Result};
use crate::poller::{self, PollerHandle};
use log::info;
use std::sync::{Arc, Mutex};

/// Which operation the machine is currently busy with. Exactly one busy
/// phase at a time; entering one requires the machine to be idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Saving,
    Toggling,
    Analyzing,
}

/// Last outcome shown to the operator. Cleared when an action starts; after
/// completion exactly one of success/error is active.
#[derive(Debug, Clone, Default)]
pub struct ResultSurface {
    pub message: Option<String>,
    pub is_error: bool,
}

impl ResultSurface {
    fn clear(&mut self) {
        self.message = None;
        self.is_error = false;
    }

    fn set_success(&mut self, message: String) {
        self.message = Some(message);
        self.is_error = false;
    }

    fn set_error(&mut self, message: String) {
        self.message = Some(message);
        self.is_error = true;
    }
}

/// The explicit panel state object shared between operator actions and the
/// signal poller.
#[derive(Debug)]
pub struct PanelState {
    phase: Phase,
    bot_active: bool,
    last_signal: Option<Signal>,
    result: ResultSurface,
}

impl Default for PanelState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            bot_active: false,
            last_signal: None,
            result: ResultSurface::default(),
        }
    }
}

impl PanelState {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_loading(&self) -> bool {
        self.phase != Phase::Idle
    }

    pub fn bot_active(&self) -> bool {
        self.bot_active
    }

    pub fn last_signal(&self) -> Option<&Signal> {
        self.last_signal.as_ref()
    }

    pub fn result(&self) -> &ResultSurface {
        &self.result
    }

    /// Enter a busy phase. Rejected unless the machine is idle; the result
    /// surface is always cleared before the request goes out.
    pub(crate) fn begin(&mut self, phase: Phase) -> Result<()> {
        if self.phase != Phase::Idle {
            return Err(Error::Busy);
        }
        self.result.clear();
        self.phase = phase;
        Ok(())
    }

    pub(crate) fn complete_success(&mut self, message: String) {
        self.phase = Phase::Idle;
        self.result.set_success(message);
    }

    pub(crate) fn complete_error(&mut self, error: &Error) {
        self.phase = Phase::Idle;
        self.result.set_error(error.to_string());
    }

    /// Only the toggle completion path may call this, with the
    /// backend-confirmed value.
    pub(crate) fn confirm_bot_active(&mut self, active: bool) {
        self.bot_active = active;
    }

    pub(crate) fn replace_signal(&mut self, signal: Signal) {
        self.last_signal = Some(signal);
    }
}

/// Shared state handle used by the panel and the poller
pub type SharedState = Arc<Mutex<PanelState>>;

fn format_confidence(confidence: f64) -> String {
    if confidence.fract() == 0.0 {
        format!("{:.0}", confidence)
    } else {
        format!("{}", confidence)
    }
}

/// Human-readable composite for the result surface. Missing fields degrade
/// to neutral placeholders upstream (see [`Signal::from_payload`]), so this
/// never fails.
pub fn signal_message(signal: &Signal) -> String {
    let mut message = format!(
        "{}: {} at {}% confidence",
        signal.symbol,
        signal.direction,
        format_confidence(signal.confidence)
    );
    if let Some(price) = signal.price {
        message.push_str(&format!(" (price {})", price));
    }
    message
}

/// Analysis transition shared by operator actions and poller ticks. On
/// success the signal is replaced wholesale; on failure it is left
/// untouched and only the surface reports the error.
pub(crate) async fn run_analysis(
    api: &ApiClient,
    state: &SharedState,
    request: &AnalyzeRequest,
) -> Result<()> {
    state.lock().unwrap().begin(Phase::Analyzing)?;

    let outcome = api.analyze(request).await;

    let mut panel_state = state.lock().unwrap();
    match outcome {
        Ok(payload) => {
            let signal = Signal::from_payload(payload, &request.symbol);
            let message = signal_message(&signal);
            panel_state.replace_signal(signal);
            panel_state.complete_success(message);
            Ok(())
        }
        Err(error) => {
            panel_state.complete_error(&error);
            Err(error)
        }
    }
}

/// Control panel facade: wires the gateway, the shared state, and the armed
/// poller handle together.
pub struct Panel {
    api: ApiClient,
    state: SharedState,
    poller: Option<PollerHandle>,
    watch_target: AnalyzeRequest,
}

impl Panel {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            state: Arc::new(Mutex::new(PanelState::default())),
            poller: None,
            watch_target: AnalyzeRequest::new("EUR/USD", "1min"),
        }
    }

    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        self.api.config().poll_interval
    }

    /// What the poller analyzes on each tick while the bot is enabled
    pub fn set_watch_target(&mut self, request: AnalyzeRequest) {
        self.watch_target = request;
    }

    /// Liveness check. A plain read; does not touch the state machine.
    pub async fn check_status(&self) -> Result<HealthReport> {
        self.api.health().await
    }

    /// Store the notification channel settings on the backend
    pub async fn save_config(&self, config: BotConfig) -> Result<()> {
        self.state.lock().unwrap().begin(Phase::Saving)?;

        let outcome = self.api.save_bot_config(&config).await;

        let mut panel_state = self.state.lock().unwrap();
        match outcome {
            Ok(_) => {
                panel_state.complete_success("Bot configuration saved".to_string());
                Ok(())
            }
            Err(error) => {
                panel_state.complete_error(&error);
                Err(error)
            }
        }
    }

    /// Enable or disable the bot. The request is always dispatched, even
    /// when the flag already matches, so the client reconciles with the
    /// backend-authoritative status. Enabling arms the poller, disabling
    /// disarms it.
    pub async fn toggle_bot(&mut self, enable: bool) -> Result<()> {
        self.state.lock().unwrap().begin(Phase::Toggling)?;

        let outcome = self.api.set_bot_active(enable).await;

        match outcome {
            Ok(ack) => {
                let active = reported_active(&ack).unwrap_or(enable);
                {
                    let mut panel_state = self.state.lock().unwrap();
                    panel_state.confirm_bot_active(active);
                    let message = if active {
                        "Bot enabled".to_string()
                    } else {
                        "Bot disabled".to_string()
                    };
                    panel_state.complete_success(message);
                }
                if active {
                    self.arm_poller();
                } else {
                    self.disarm_poller().await;
                }
                Ok(())
            }
            Err(error) => {
                // Bot status stays as it was; only the surface changes
                self.state.lock().unwrap().complete_error(&error);
                Err(error)
            }
        }
    }

    /// On-demand market analysis
    pub async fn request_analysis(&self, request: AnalyzeRequest) -> Result<()> {
        run_analysis(&self.api, &self.state, &request).await
    }

    /// Fetch the most recent signal without triggering new analysis. Uses
    /// the same busy guard and surface as analysis.
    pub async fn fetch_live(&self) -> Result<()> {
        self.state.lock().unwrap().begin(Phase::Analyzing)?;

        let outcome = self.api.live_signal().await;

        let mut panel_state = self.state.lock().unwrap();
        match outcome {
            Ok(payload) => {
                let fallback = payload.symbol.clone().unwrap_or_else(|| "live".to_string());
                let signal = Signal::from_payload(payload, &fallback);
                let message = signal_message(&signal);
                panel_state.replace_signal(signal);
                panel_state.complete_success(message);
                Ok(())
            }
            Err(error) => {
                panel_state.complete_error(&error);
                Err(error)
            }
        }
    }

    /// Disarm the poller and drop the handle. Safe to call repeatedly.
    pub async fn shutdown(&mut self) {
        self.disarm_poller().await;
    }

    fn arm_poller(&mut self) {
        if self.poller.is_some() {
            // Already armed from a previous enable; keep the running timer
            return;
        }
        let handle = poller::arm(
            self.api.clone(),
            self.state.clone(),
            self.watch_target.clone(),
            self.api.config().poll_interval,
        );
        info!("Signal poller armed (generation {})", handle.generation());
        self.poller = Some(handle);
    }

    async fn disarm_poller(&mut self) {
        if let Some(handle) = self.poller.take() {
            handle.disarm().await;
        }
    }
}
