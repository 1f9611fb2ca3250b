//! Chrome/Chromium discovery and scoped subprocess launch.
//!
//! Finds an installed Chrome-family binary, starts it with the CDP debug
//! port open and a unique user-data directory, and resolves the browser's
//! WebSocket endpoint from `/json/version`. The subprocess is scoped: if
//! startup fails after the process is launched but before the WebSocket is
//! healthy, the caller kills the child before propagating the failure.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::process::{Child, Command};

use periscope_types::BrowserConfig;

/// Errors that can occur while launching or locating the browser.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("no Chrome or Chromium binary found on this system")]
    NoChromeFound,

    #[error("failed to spawn browser process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("browser process exited during startup with {status}")]
    ProcessExited { status: String },

    #[error("debug endpoint not reachable: {reason}")]
    DebugEndpoint { reason: String },
}

// ---------------------------------------------------------------------------
// Binary discovery
// ---------------------------------------------------------------------------

/// Well-known Chrome/Chromium binary locations for the current platform.
fn platform_candidate_paths() -> &'static [&'static str] {
    #[cfg(target_os = "macos")]
    {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    }

    #[cfg(target_os = "linux")]
    {
        &[
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium-browser",
            "/usr/bin/chromium",
            "/snap/bin/chromium",
            "/opt/google/chrome/chrome",
        ]
    }

    #[cfg(target_os = "windows")]
    {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        &[]
    }
}

/// Binary names probed on `$PATH` after the fixed candidates.
const PATH_CANDIDATES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
];

/// Locate a Chrome binary. A configured path wins when it exists; then the
/// platform candidates; then `$PATH`.
pub fn discover_chrome(configured: Option<&Path>) -> Result<PathBuf, LaunchError> {
    if let Some(path) = configured {
        if path.exists() {
            tracing::info!(path = %path.display(), "using configured browser binary");
            return Ok(path.to_path_buf());
        }
    }

    for candidate in platform_candidate_paths() {
        let path = Path::new(candidate);
        if path.exists() {
            tracing::info!(path = candidate, "found browser binary");
            return Ok(path.to_path_buf());
        }
    }

    for name in PATH_CANDIDATES {
        if let Some(path) = search_path(name) {
            tracing::info!(path = %path.display(), "found browser binary on PATH");
            return Ok(path);
        }
    }

    Err(LaunchError::NoChromeFound)
}

fn search_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

// ---------------------------------------------------------------------------
// Launch
// ---------------------------------------------------------------------------

/// Command-line flags for a CDP-debuggable browser instance.
pub fn chrome_args(config: &BrowserConfig) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", config.port),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-extensions".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--remote-allow-origins=*".to_string(),
        format!("--user-data-dir={}", config.user_data_dir.display()),
        format!(
            "--window-size={},{}",
            config.viewport_width, config.viewport_height
        ),
    ];
    if config.headless {
        args.push("--headless=new".to_string());
        args.push("--disable-gpu".to_string());
        args.push("--mute-audio".to_string());
    }
    args.push("about:blank".to_string());
    args
}

/// A launched browser subprocess.
pub struct LaunchedBrowser {
    child: Child,
}

impl LaunchedBrowser {
    /// Spawn the browser with the configured flags.
    pub fn spawn(config: &BrowserConfig, binary: &Path) -> Result<Self, LaunchError> {
        let child = Command::new(binary)
            .args(chrome_args(config))
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()?;
        tracing::info!(pid = ?child.id(), binary = %binary.display(), "launched browser");
        Ok(Self { child })
    }

    /// True when the process has already exited; returns its status string.
    pub fn exited(&mut self) -> Option<String> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.to_string()),
            Ok(None) => None,
            Err(e) => Some(format!("unknown ({e})")),
        }
    }

    /// Kill the process and await it; safe to call on an already-dead child.
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!(error = %e, "browser child kill failed (already gone?)");
        }
        let _ = self.child.wait().await;
    }
}

// ---------------------------------------------------------------------------
// Debug endpoint
// ---------------------------------------------------------------------------

/// Resolve the browser-level WebSocket URL from `/json/version`.
pub async fn fetch_ws_url(host: &str, port: u16) -> Result<String, LaunchError> {
    let endpoint = format!("http://{host}:{port}/json/version");
    let response = reqwest::Client::new()
        .get(&endpoint)
        .timeout(Duration::from_secs(2))
        .send()
        .await
        .map_err(|e| LaunchError::DebugEndpoint {
            reason: e.to_string(),
        })?;

    let body: serde_json::Value =
        response.json().await.map_err(|e| LaunchError::DebugEndpoint {
            reason: format!("invalid /json/version payload: {e}"),
        })?;

    body["webSocketDebuggerUrl"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| LaunchError::DebugEndpoint {
            reason: "missing webSocketDebuggerUrl".to_string(),
        })
}

/// Poll the debug endpoint until it answers, failing fast if the launched
/// process dies first.
pub async fn wait_for_endpoint(
    host: &str,
    port: u16,
    child: &mut LaunchedBrowser,
    attempts: u32,
) -> Result<String, LaunchError> {
    let mut last = String::new();
    for _ in 0..attempts {
        if let Some(status) = child.exited() {
            return Err(LaunchError::ProcessExited { status });
        }
        match fetch_ws_url(host, port).await {
            Ok(url) => return Ok(url),
            Err(e) => last = e.to_string(),
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    Err(LaunchError::DebugEndpoint {
        reason: format!("browser did not open the debug port: {last}"),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
