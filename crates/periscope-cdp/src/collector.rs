//! Raw data collection: the three orthogonal page snapshots plus layout
//! metrics, fetched concurrently for one page session.
//!
//! Each source is independently allowed to fail; downstream analysis accepts
//! any subset and degrades gracefully. The whole gather runs under a single
//! overall timeout.

use std::time::Duration;

use serde_json::{json, Value};

use periscope_types::{CdpError, RawSnapshot, Viewport, COMPUTED_STYLE_PROPS};

use crate::client::CdpClient;

/// Fetch DOM, DOMSnapshot, AX tree, and layout metrics for a session.
///
/// Returns a [`RawSnapshot`] whose `missing_sources` lists anything that
/// failed. Only the overall timeout is an error.
pub async fn collect_raw_snapshot(
    client: &CdpClient,
    session_id: &str,
    overall_timeout: Duration,
) -> Result<RawSnapshot, CdpError> {
    let gather = async {
        tokio::join!(
            client.send_to_session_with_timeout(
                session_id,
                "DOM.getDocument",
                json!({ "depth": -1, "pierce": true }),
                overall_timeout,
            ),
            client.send_to_session_with_timeout(
                session_id,
                "DOMSnapshot.captureSnapshot",
                json!({
                    "computedStyles": COMPUTED_STYLE_PROPS,
                    "includePaintOrder": true,
                    "includeDOMRects": true,
                }),
                overall_timeout,
            ),
            client.send_to_session_with_timeout(
                session_id,
                "Accessibility.getFullAXTree",
                json!({}),
                overall_timeout,
            ),
            client.send_to_session_with_timeout(
                session_id,
                "Page.getLayoutMetrics",
                json!({}),
                overall_timeout,
            ),
        )
    };

    let (dom, snapshot, ax, metrics) = tokio::time::timeout(overall_timeout, gather)
        .await
        .map_err(|_| CdpError::Timeout {
            method: "collect_raw_snapshot".into(),
            duration: overall_timeout,
        })?;

    let mut missing = Vec::new();
    let dom = keep_or_report(dom, "dom", &mut missing);
    let snapshot = keep_or_report(snapshot, "snapshot", &mut missing);
    let ax = keep_or_report(ax, "ax", &mut missing);
    let metrics = keep_or_report(metrics, "metrics", &mut missing);

    let (viewport, device_pixel_ratio) = match &metrics {
        Some(m) => (viewport_from_metrics(m), dpr_from_metrics(m)),
        None => (Viewport::default(), 1.0),
    };

    if !missing.is_empty() {
        tracing::warn!(?missing, session = session_id, "partial snapshot collection");
    }

    Ok(RawSnapshot {
        dom,
        snapshot,
        ax,
        viewport,
        device_pixel_ratio,
        missing_sources: missing,
    })
}

fn keep_or_report(
    result: Result<Value, CdpError>,
    name: &str,
    missing: &mut Vec<String>,
) -> Option<Value> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(source = name, error = %e, "snapshot source failed");
            missing.push(name.to_string());
            None
        }
    }
}

/// CSS-pixel viewport from `Page.getLayoutMetrics`.
pub fn viewport_from_metrics(metrics: &Value) -> Viewport {
    let vp = &metrics["cssVisualViewport"];
    Viewport {
        width: vp["clientWidth"].as_f64().unwrap_or(1280.0),
        height: vp["clientHeight"].as_f64().unwrap_or(720.0),
    }
}

/// Device pixel ratio from `Page.getLayoutMetrics`: the ratio between the
/// device-pixel visual viewport and the CSS visual viewport.
pub fn dpr_from_metrics(metrics: &Value) -> f64 {
    let device_width = metrics["visualViewport"]["clientWidth"]
        .as_f64()
        .unwrap_or(0.0);
    let css_width = metrics["cssVisualViewport"]["clientWidth"]
        .as_f64()
        .unwrap_or(0.0);
    if css_width > 0.0 && device_width > 0.0 {
        device_width / css_width
    } else {
        1.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
