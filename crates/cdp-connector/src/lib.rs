//! FlowPilot CDP connector.
//!
//! Owns the lifecycle of one remote-browser session: connect, liveness
//! probing with reconnect-on-expiry, screenshots, and the page verbs the
//! flow executor needs. The DevTools wire protocol sits behind a pluggable
//! transport so tests can run without a browser.

use std::{env, path::PathBuf};

use which::which;

pub mod connector;
pub mod errors;
pub mod transport;
mod util;

pub use connector::{BrowserDriver, CdpConnector, PageMetrics, ScreenshotOptions};
pub use errors::ConnectorError;
pub use transport::{CdpTransport, ChromiumTransport, CommandTarget, NoopTransport};

/// Configuration for launching or attaching to a browser.
#[derive(Clone, Debug)]
pub struct ConnectorConfig {
    pub executable: PathBuf,
    pub user_data_dir: PathBuf,
    pub headless: bool,
    pub default_deadline_ms: u64,
    /// Attach to an already-running browser instead of launching one.
    pub websocket_url: Option<String>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            executable: detect_chrome_executable().unwrap_or_default(),
            user_data_dir: default_profile_dir(),
            headless: resolve_headless_default(),
            default_deadline_ms: 30_000,
            websocket_url: resolve_websocket_url(),
        }
    }
}

fn resolve_headless_default() -> bool {
    // FLOWPILOT_HEADLESS: "0", "false", "no", "off" means headful.
    match env::var("FLOWPILOT_HEADLESS") {
        Ok(value) => {
            let lower = value.to_ascii_lowercase();
            !matches!(lower.as_str(), "0" | "false" | "no" | "off")
        }
        Err(_) => true,
    }
}

fn resolve_websocket_url() -> Option<String> {
    match env::var("FLOWPILOT_WS_URL") {
        Ok(value) => {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Err(_) => None,
    }
}

fn default_profile_dir() -> PathBuf {
    if let Ok(path) = env::var("FLOWPILOT_CHROME_PROFILE") {
        return PathBuf::from(path);
    }
    PathBuf::from("./.flowpilot-profile")
}

/// Locate a Chrome/Chromium executable: explicit env override first, then
/// PATH, then well-known install locations.
pub fn detect_chrome_executable() -> Option<PathBuf> {
    if let Ok(raw) = env::var("FLOWPILOT_CHROME") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let candidate = PathBuf::from(trimmed);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    for name in chrome_executable_names() {
        if let Ok(path) = which(name) {
            return Some(path);
        }
    }

    for candidate in os_specific_chrome_paths() {
        if candidate.exists() {
            return Some(candidate);
        }
    }

    None
}

fn chrome_executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome.exe", "chromium.exe", "msedge.exe"]
    }

    #[cfg(not(target_os = "windows"))]
    {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium",
            "chromium-browser",
        ]
    }
}

fn os_specific_chrome_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(target_os = "linux")]
    {
        vec![
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/chromium"),
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        Vec::new()
    }
}
