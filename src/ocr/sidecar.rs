//! PaddleOCR sidecar engine.
//!
//! The sidecar keeps the detection/recognition models loaded and exposes
//! `POST /ocr` (multipart image upload) and `GET /health`.

use super::{BoundingBox, DetectionLine, OcrEngine};
use crate::config::OcrSettings;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info, warn};

/// Sidecar response (private deserialization types).
#[derive(Debug, Deserialize)]
struct SidecarResponse {
    #[serde(default)]
    lines: Vec<SidecarLine>,
}

#[derive(Debug, Deserialize)]
struct SidecarLine {
    /// Quadrilateral corners, clockwise from top-left.
    #[serde(rename = "box")]
    quad: Vec<[f32; 2]>,
    text: String,
    score: f32,
}

pub struct SidecarEngine {
    url: String,
    lang: String,
    det_threshold: f32,
    box_threshold: f32,
    drop_score: f32,
    client: reqwest::Client,
}

impl SidecarEngine {
    pub fn new(settings: &OcrSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("failed to build sidecar HTTP client")?;
        Ok(Self {
            url: settings.sidecar_url.clone(),
            lang: settings.lang.clone(),
            det_threshold: settings.det_threshold,
            box_threshold: settings.box_threshold,
            drop_score: settings.min_confidence,
            client,
        })
    }
}

#[async_trait::async_trait]
impl OcrEngine for SidecarEngine {
    fn name(&self) -> &str {
        "paddle_sidecar"
    }

    async fn warm_up(&self) -> Result<()> {
        // The sidecar may still be loading models; requests will surface errors.
        match self.client.get(format!("{}/health", self.url)).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!("PaddleOCR sidecar reachable at {}", self.url);
            }
            Ok(resp) => warn!("PaddleOCR sidecar health check returned {}", resp.status()),
            Err(e) => warn!("PaddleOCR sidecar not reachable at {}: {}", self.url, e),
        }
        Ok(())
    }

    async fn recognize(&self, path: &Path) -> Result<Vec<DetectionLine>> {
        use reqwest::multipart::{Form, Part};

        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {:?}", path))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "receipt.png".to_string());

        let part = Part::bytes(data).file_name(filename).mime_str("image/png")?;
        let form = Form::new()
            .part("file", part)
            .text("lang", self.lang.clone())
            .text("det_db_thresh", self.det_threshold.to_string())
            .text("det_db_box_thresh", self.box_threshold.to_string())
            .text("drop_score", self.drop_score.to_string());

        let response = self
            .client
            .post(format!("{}/ocr", self.url))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("PaddleOCR sidecar error ({}): {}", status, error_text);
        }

        let result: SidecarResponse = response
            .json()
            .await
            .context("Failed to parse sidecar response")?;
        debug!("PaddleOCR sidecar returned {} lines", result.lines.len());

        Ok(result.lines.into_iter().map(into_detection).collect())
    }
}

fn into_detection(line: SidecarLine) -> DetectionLine {
    DetectionLine {
        bbox: quad_to_bbox(&line.quad),
        text: line.text,
        confidence: line.score.clamp(0.0, 1.0),
    }
}

/// Axis-aligned bounds of a (possibly rotated) quadrilateral.
fn quad_to_bbox(points: &[[f32; 2]]) -> BoundingBox {
    if points.is_empty() {
        return BoundingBox::default();
    }
    let (mut min_x, mut min_y) = (f32::MAX, f32::MAX);
    let (mut max_x, mut max_y) = (f32::MIN, f32::MIN);
    for [x, y] in points {
        min_x = min_x.min(*x);
        min_y = min_y.min(*y);
        max_x = max_x.max(*x);
        max_y = max_y.max(*y);
    }
    let (min_x, min_y) = (min_x.max(0.0), min_y.max(0.0));
    BoundingBox {
        left: min_x.round() as u32,
        top: min_y.round() as u32,
        width: (max_x - min_x).max(0.0).round() as u32,
        height: (max_y - min_y).max(0.0).round() as u32,
    }
}
