//! Configuration for the browser core.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Output format for `Page.captureScreenshot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenshotFormat {
    Jpeg,
    Png,
}

impl ScreenshotFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScreenshotFormat::Jpeg => "jpeg",
            ScreenshotFormat::Png => "png",
        }
    }
}

/// Configuration options for the browser core.
///
/// Timeouts are in seconds. `user_data_dir` defaults to a unique per-instance
/// temp path so parallel browser instances never share a profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// CDP debug endpoint host.
    pub host: String,
    /// CDP debug endpoint port.
    pub port: u16,
    pub page_load_timeout: f64,
    pub action_timeout: f64,
    /// Overall budget for the DOM/Snapshot/AX fetch.
    pub dom_fetch_timeout: f64,
    /// Quiet period after load before navigation is considered settled.
    pub network_idle_timeout: f64,
    pub screenshot_format: ScreenshotFormat,
    /// 0..100, only meaningful for jpeg.
    pub screenshot_quality: u8,
    /// Elements scoring below this are dropped from the inventory.
    pub min_confidence: f64,
    pub user_data_dir: PathBuf,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            host: "localhost".to_string(),
            port: 9222,
            page_load_timeout: 15.0,
            action_timeout: 5.0,
            dom_fetch_timeout: 30.0,
            network_idle_timeout: 0.5,
            screenshot_format: ScreenshotFormat::Jpeg,
            screenshot_quality: 80,
            min_confidence: 0.3,
            user_data_dir: default_user_data_dir(),
        }
    }
}

/// Unique user-data directory so parallel instances do not collide.
pub fn default_user_data_dir() -> PathBuf {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    std::env::temp_dir().join(format!("periscope-chrome-{}", &suffix[..8]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = BrowserConfig::default();
        assert!(cfg.headless);
        assert_eq!(cfg.port, 9222);
        assert_eq!(cfg.viewport_width, 1280);
        assert_eq!(cfg.screenshot_format, ScreenshotFormat::Jpeg);
        assert!((cfg.min_confidence - 0.3).abs() < f64::EPSILON);
        assert!(cfg.dom_fetch_timeout >= cfg.page_load_timeout);
    }

    #[test]
    fn user_data_dirs_are_unique() {
        let a = default_user_data_dir();
        let b = default_user_data_dir();
        assert_ne!(a, b);
        assert!(a.to_string_lossy().contains("periscope-chrome-"));
    }

    #[test]
    fn screenshot_format_strings() {
        assert_eq!(ScreenshotFormat::Jpeg.as_str(), "jpeg");
        assert_eq!(ScreenshotFormat::Png.as_str(), "png");
    }
}
