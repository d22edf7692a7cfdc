//! OCR engine abstraction.
//!
//! Defines the [`OcrEngine`] trait and the unified [`DetectionLine`] output so
//! the Tesseract CLI and the PaddleOCR sidecar can be swapped via config. The
//! engine is built once at startup and shared through [`SharedEngine`], which
//! serializes calls and bounds their duration.

pub mod sidecar;
pub mod tesseract;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::OcrSettings;
use crate::error::ReceiptError;

/// Axis-aligned pixel box around a detected line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Smallest box containing both `self` and `other`.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let left = self.left.min(other.left);
        let top = self.top.min(other.top);
        let right = (self.left + self.width).max(other.left + other.width);
        let bottom = (self.top + self.height).max(other.top + other.height);
        BoundingBox {
            left,
            top,
            width: right - left,
            height: bottom - top,
        }
    }
}

/// One line of OCR output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionLine {
    pub bbox: BoundingBox,
    pub text: String,
    /// 0.0..=1.0
    pub confidence: f32,
}

/// Async trait implemented by each OCR backend.
#[async_trait::async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    /// One-time startup initialization (model load, binary check, health check).
    async fn warm_up(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Recognize text in the image at `path`, in reading order.
    async fn recognize(&self, path: &Path) -> anyhow::Result<Vec<DetectionLine>>;
}

/// Known engine identifiers used for config lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OcrEngineKind {
    Tesseract,
    Sidecar,
}

impl OcrEngineKind {
    /// Parse a config string into an engine kind.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "tesseract" => Some(Self::Tesseract),
            "sidecar" | "paddle_sidecar" => Some(Self::Sidecar),
            _ => None,
        }
    }
}

/// Build the configured engine.
pub fn build_engine(settings: &OcrSettings) -> anyhow::Result<Arc<dyn OcrEngine>> {
    let engine: Arc<dyn OcrEngine> = match settings.backend {
        OcrEngineKind::Tesseract => Arc::new(tesseract::TesseractEngine::new(settings)),
        OcrEngineKind::Sidecar => Arc::new(sidecar::SidecarEngine::new(settings)?),
    };
    Ok(engine)
}

/// Process-wide engine handle. One recognition runs at a time.
#[derive(Clone)]
pub struct SharedEngine {
    engine: Arc<dyn OcrEngine>,
    lock: Arc<Mutex<()>>,
    timeout: Duration,
}

impl SharedEngine {
    pub fn new(engine: Arc<dyn OcrEngine>, timeout: Duration) -> Self {
        Self {
            engine,
            lock: Arc::new(Mutex::new(())),
            timeout,
        }
    }

    pub fn name(&self) -> &str {
        self.engine.name()
    }

    pub async fn warm_up(&self) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        self.engine.warm_up().await
    }

    pub async fn recognize(&self, path: &Path) -> Result<Vec<DetectionLine>, ReceiptError> {
        let _guard = self.lock.lock().await;
        debug!("Running OCR engine '{}' on {:?}", self.engine.name(), path);

        let lines = tokio::time::timeout(self.timeout, self.engine.recognize(path))
            .await
            .map_err(|_| ReceiptError::Timeout {
                stage: "OCR",
                after: self.timeout,
            })??;

        debug!("OCR engine '{}' returned {} lines", self.engine.name(), lines.len());
        Ok(lines)
    }
}
