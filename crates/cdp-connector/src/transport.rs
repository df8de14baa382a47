//! Pluggable DevTools transport.
//!
//! `ChromiumTransport` drives a real browser over the raw CDP websocket
//! connection, either by launching a Chromium child process or by attaching
//! to an existing one via its websocket URL. `NoopTransport` stands in where
//! no browser is available (tests).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide_types::{CallId, Message, MethodId, Response};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::ConnectorError;
use crate::util::extract_ws_url;
use crate::ConnectorConfig;

/// Whether a command is addressed to the browser endpoint or to an attached
/// page session.
#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn start(&self) -> Result<(), ConnectorError>;

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, ConnectorError>;
}

/// Transport that always fails; used where no browser is wired up.
#[derive(Default)]
pub struct NoopTransport;

#[async_trait]
impl CdpTransport for NoopTransport {
    async fn start(&self) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn send_command(
        &self,
        _target: CommandTarget,
        method: &str,
        _params: Value,
    ) -> Result<Value, ConnectorError> {
        Err(ConnectorError::CdpIo(format!(
            "transport not available for method {method}"
        )))
    }
}

pub struct ChromiumTransport {
    cfg: ConnectorConfig,
    state: Arc<OnceCell<Mutex<Option<Arc<RuntimeState>>>>>,
}

impl ChromiumTransport {
    pub fn new(cfg: ConnectorConfig) -> Self {
        Self {
            cfg,
            state: Arc::new(OnceCell::new()),
        }
    }

    /// Current runtime, recreated when the previous connection died.
    async fn runtime(&self) -> Result<Arc<RuntimeState>, ConnectorError> {
        let cell = self.state.get_or_init(|| async { Mutex::new(None) }).await;
        let mut guard = cell.lock().await;

        if let Some(rt) = guard.as_ref() {
            if rt.is_alive() {
                return Ok(rt.clone());
            }
        }

        let runtime = Arc::new(RuntimeState::start(self.cfg.clone()).await?);
        *guard = Some(runtime.clone());
        Ok(runtime)
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn start(&self) -> Result<(), ConnectorError> {
        let runtime = self.runtime().await?;
        let deadline = Duration::from_millis(self.cfg.default_deadline_ms);

        runtime
            .send_internal(
                CommandTarget::Browser,
                "Target.setDiscoverTargets",
                serde_json::json!({ "discover": true }),
                deadline,
            )
            .await?;
        Ok(())
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, ConnectorError> {
        let runtime = self.runtime().await?;
        runtime
            .send_internal(
                target,
                method,
                params,
                Duration::from_millis(self.cfg.default_deadline_ms),
            )
            .await
    }
}

struct ControlMessage {
    target: CommandTarget,
    method: String,
    params: Value,
    responder: oneshot::Sender<Result<Value, ConnectorError>>,
}

struct RuntimeState {
    command_tx: mpsc::Sender<ControlMessage>,
    loop_task: JoinHandle<()>,
    child: Mutex<Option<Child>>,
    alive: Arc<AtomicBool>,
}

impl RuntimeState {
    async fn start(cfg: ConnectorConfig) -> Result<Self, ConnectorError> {
        let (child, ws_url) = if let Some(url) = cfg.websocket_url.clone() {
            (None, url)
        } else {
            let browser_cfg = Self::browser_config(&cfg)?;
            Self::launch_browser(browser_cfg).await?
        };

        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| ConnectorError::ConnectFailed(err.to_string()))?;

        let (command_tx, command_rx) = mpsc::channel(128);
        let alive = Arc::new(AtomicBool::new(true));
        let loop_alive = alive.clone();

        let loop_task = tokio::spawn(async move {
            if let Err(err) = Self::run_loop(conn, command_rx).await {
                warn!(target: "cdp-connector", ?err, "transport loop terminated with error");
            }
            loop_alive.store(false, Ordering::Relaxed);
        });

        info!(target: "cdp-connector", url = %ws_url, "chromium connection established");

        Ok(Self {
            command_tx,
            loop_task,
            child: Mutex::new(child),
            alive,
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn send_internal(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, ConnectorError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let message = ControlMessage {
            target,
            method: method.to_string(),
            params,
            responder: resp_tx,
        };

        self.command_tx
            .send(message)
            .await
            .map_err(|err| ConnectorError::CdpIo(err.to_string()))?;

        match tokio::time::timeout(deadline, resp_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ConnectorError::CdpIo(
                "command response channel closed".to_string(),
            )),
            Err(_) => Err(ConnectorError::Timeout(format!(
                "command {method} timed out"
            ))),
        }
    }

    fn browser_config(cfg: &ConnectorConfig) -> Result<BrowserConfig, ConnectorError> {
        if !cfg.executable.as_os_str().is_empty() && !cfg.executable.exists() {
            return Err(ConnectorError::ConnectFailed(format!(
                "chrome executable not found at {} (set FLOWPILOT_CHROME)",
                cfg.executable.display()
            )));
        }

        let profile_dir = if cfg.user_data_dir.is_absolute() {
            cfg.user_data_dir.clone()
        } else {
            std::env::current_dir()
                .map_err(|err| ConnectorError::Internal(err.to_string()))?
                .join(&cfg.user_data_dir)
        };
        std::fs::create_dir_all(&profile_dir)
            .map_err(|err| ConnectorError::Internal(format!("user-data-dir: {err}")))?;

        let mut builder = BrowserConfig::builder()
            .request_timeout(Duration::from_millis(cfg.default_deadline_ms))
            .launch_timeout(Duration::from_secs(20));

        if !cfg.headless {
            builder = builder.with_head();
        }

        let mut args = vec![
            "--disable-background-networking",
            "--disable-default-apps",
            "--disable-extensions",
            "--disable-popup-blocking",
            "--disable-sync",
            "--no-first-run",
            "--no-default-browser-check",
            "--remote-allow-origins=*",
        ];
        if cfg.headless {
            args.push("--headless=new");
            args.push("--hide-scrollbars");
            args.push("--mute-audio");
        }
        builder = builder.args(args);

        if !cfg.executable.as_os_str().is_empty() {
            builder = builder.chrome_executable(cfg.executable.clone());
        }
        builder = builder.user_data_dir(profile_dir);

        builder
            .build()
            .map_err(|err| ConnectorError::Internal(format!("browser config error: {err}")))
    }

    async fn launch_browser(
        config: BrowserConfig,
    ) -> Result<(Option<Child>, String), ConnectorError> {
        let mut child = config
            .launch()
            .map_err(|err| ConnectorError::ConnectFailed(format!("launch failed: {err}")))?;

        let ws_url = extract_ws_url(&mut child)
            .await
            .map_err(|err| ConnectorError::ConnectFailed(err.to_string()))?;

        Ok((Some(child), ws_url))
    }

    async fn run_loop(
        mut conn: Connection<CdpEventMessage>,
        mut command_rx: mpsc::Receiver<ControlMessage>,
    ) -> Result<(), ConnectorError> {
        let mut inflight: HashMap<CallId, oneshot::Sender<Result<Value, ConnectorError>>> =
            HashMap::new();

        loop {
            tokio::select! {
                Some(cmd) = command_rx.recv() => {
                    Self::submit(&mut conn, cmd, &mut inflight)?;
                }
                message = conn.next() => {
                    match message {
                        Some(Ok(Message::Response(resp))) => {
                            Self::resolve(resp, &mut inflight);
                        }
                        Some(Ok(Message::Event(_))) => {
                            // Unsolicited events are not consumed by the connector.
                        }
                        Some(Err(err)) => {
                            let err = ConnectorError::CdpIo(err.to_string());
                            for (_, sender) in inflight.drain() {
                                let _ = sender.send(Err(err.clone()));
                            }
                            return Err(err);
                        }
                        None => {
                            let err = ConnectorError::CdpIo("cdp connection closed".to_string());
                            for (_, sender) in inflight.drain() {
                                let _ = sender.send(Err(err.clone()));
                            }
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn submit(
        conn: &mut Connection<CdpEventMessage>,
        cmd: ControlMessage,
        inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, ConnectorError>>>,
    ) -> Result<(), ConnectorError> {
        let session = match cmd.target {
            CommandTarget::Browser => None,
            CommandTarget::Session(session_id) => Some(CdpSessionId::from(session_id)),
        };

        let method_id: MethodId = cmd.method.clone().into();
        match conn.submit_command(method_id, session, cmd.params) {
            Ok(call_id) => {
                inflight.insert(call_id, cmd.responder);
                Ok(())
            }
            Err(err) => {
                let err = ConnectorError::CdpIo(err.to_string());
                let _ = cmd.responder.send(Err(err.clone()));
                Err(err)
            }
        }
    }

    fn resolve(
        resp: Response,
        inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, ConnectorError>>>,
    ) {
        let entry = inflight.remove(&resp.id);
        let result = if let Some(result) = resp.result {
            Ok(result)
        } else if let Some(error) = resp.error {
            Err(ConnectorError::CdpIo(format!(
                "cdp error {}: {}",
                error.code, error.message
            )))
        } else {
            Err(ConnectorError::Internal("empty cdp response".to_string()))
        };

        match entry {
            Some(sender) => {
                let _ = sender.send(result);
            }
            None => debug!(target: "cdp-connector", id = ?resp.id, "response for unknown call"),
        }
    }
}

impl Drop for RuntimeState {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.loop_task.abort();

        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(mut child) = guard.take() {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        if let Err(err) = child.kill().await {
                            warn!(target: "cdp-connector", ?err, "failed to kill chromium child");
                        }
                    });
                } else {
                    debug!(target: "cdp-connector", "no runtime available to kill chromium child");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_transport_rejects_commands() {
        let transport = NoopTransport;
        transport.start().await.unwrap();
        let err = transport
            .send_command(CommandTarget::Browser, "Browser.getVersion", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::CdpIo(_)));
    }
}
