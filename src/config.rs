//! Process configuration.
//!
//! Read once at startup from the environment (a `.env` file is honored via
//! `dotenvy`). Everything here is static for the lifetime of the process.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::ocr::OcrEngineKind;

const DEFAULT_FRONTEND_BASE_URL: &str = "http://localhost:3000";
const DEFAULT_SIDECAR_URL: &str = "http://localhost:8866";

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    /// Base address that root-relative image URLs are resolved against.
    pub frontend_base_url: String,
    pub fetch_timeout: Duration,
    /// Upper bound for downloaded images and inbound WebSocket messages.
    pub max_image_bytes: usize,
    /// Directory for per-request temporary images (`None` = system temp dir).
    pub tmp_dir: Option<PathBuf>,
    pub ocr: OcrSettings,
}

/// OCR engine selection and tuning.
#[derive(Debug, Clone)]
pub struct OcrSettings {
    pub backend: OcrEngineKind,
    pub lang: String,
    /// Lines scoring below this (0..1) are dropped by the engine.
    pub min_confidence: f32,
    pub det_threshold: f32,
    pub box_threshold: f32,
    pub timeout: Duration,
    pub tesseract_bin: String,
    pub tesseract_psm: u32,
    pub sidecar_url: String,
}

impl BridgeConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = match var("OCR_BACKEND") {
            Some(raw) => OcrEngineKind::from_str(raw.trim()).ok_or_else(|| {
                anyhow::anyhow!("OCR_BACKEND must be `tesseract` or `sidecar`, got {:?}", raw)
            })?,
            None => OcrEngineKind::Tesseract,
        };

        let min_confidence: f32 = parse_or(&var, "OCR_MIN_CONFIDENCE", 0.5)?;
        let det_threshold: f32 = parse_or(&var, "OCR_DET_THRESHOLD", 0.3)?;
        let box_threshold: f32 = parse_or(&var, "OCR_BOX_THRESHOLD", 0.6)?;
        for (name, value) in [
            ("OCR_MIN_CONFIDENCE", min_confidence),
            ("OCR_DET_THRESHOLD", det_threshold),
            ("OCR_BOX_THRESHOLD", box_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("{} must be between 0 and 1, got {}", name, value);
            }
        }

        let ocr = OcrSettings {
            backend,
            lang: var("OCR_LANG").unwrap_or_else(|| "ind".to_string()),
            min_confidence,
            det_threshold,
            box_threshold,
            timeout: Duration::from_secs(parse_or(&var, "OCR_TIMEOUT_SECS", 120)?),
            tesseract_bin: var("TESSERACT_BIN").unwrap_or_else(|| "tesseract".to_string()),
            tesseract_psm: parse_or(&var, "TESSERACT_PSM", 6)?,
            sidecar_url: var("OCR_SIDECAR_URL")
                .unwrap_or_else(|| DEFAULT_SIDECAR_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        };

        let frontend_base_url =
            var("FRONTEND_BASE_URL").unwrap_or_else(|| DEFAULT_FRONTEND_BASE_URL.to_string());
        reqwest::Url::parse(&frontend_base_url)
            .with_context(|| format!("FRONTEND_BASE_URL is not a valid URL: {}", frontend_base_url))?;

        let max_image_bytes: usize = parse_or(&var, "MAX_IMAGE_BYTES", 20 * 1024 * 1024)?;
        if max_image_bytes == 0 {
            anyhow::bail!("MAX_IMAGE_BYTES must be greater than zero");
        }

        Ok(Self {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&var, "PORT", 5000)?,
            frontend_base_url,
            fetch_timeout: Duration::from_secs(parse_or(&var, "FETCH_TIMEOUT_SECS", 30)?),
            max_image_bytes,
            tmp_dir: var("RECEIPT_TMP_DIR").map(PathBuf::from),
            ocr,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Largest WebSocket frame accepted: the base64 size of the biggest
    /// allowed image plus room for the JSON envelope.
    pub fn max_message_bytes(&self) -> usize {
        (self.max_image_bytes / 3)
            .saturating_add(1)
            .saturating_mul(4)
            .saturating_add(4096)
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<BridgeConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BridgeConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.listen_addr(), "0.0.0.0:5000");
        assert_eq!(config.frontend_base_url, "http://localhost:3000");
        assert_eq!(config.ocr.backend, OcrEngineKind::Tesseract);
        assert_eq!(config.ocr.lang, "ind");
        assert_eq!(config.ocr.timeout, Duration::from_secs(120));
        assert!(config.tmp_dir.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("PORT", "8080"),
            ("OCR_BACKEND", "sidecar"),
            ("OCR_SIDECAR_URL", "http://ocr:9000/"),
            ("OCR_MIN_CONFIDENCE", "0.7"),
            ("RECEIPT_TMP_DIR", "/var/tmp/receipts"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.ocr.backend, OcrEngineKind::Sidecar);
        assert_eq!(config.ocr.sidecar_url, "http://ocr:9000");
        assert!((config.ocr.min_confidence - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.tmp_dir, Some(PathBuf::from("/var/tmp/receipts")));
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = config_from(&[("PORT", "  "), ("OCR_LANG", "")]).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.ocr.lang, "ind");
    }

    #[test]
    fn test_rejects_bad_values() {
        let err = config_from(&[("PORT", "not-a-port")]).unwrap_err();
        assert!(err.to_string().contains("PORT"));

        let err = config_from(&[("OCR_BACKEND", "paddle")]).unwrap_err();
        assert!(err.to_string().contains("OCR_BACKEND"));

        let err = config_from(&[("OCR_BOX_THRESHOLD", "1.5")]).unwrap_err();
        assert!(err.to_string().contains("OCR_BOX_THRESHOLD"));

        assert!(config_from(&[("FRONTEND_BASE_URL", "not a url")]).is_err());
        assert!(config_from(&[("MAX_IMAGE_BYTES", "0")]).is_err());
    }

    #[test]
    fn test_max_message_bytes() {
        let config = config_from(&[("MAX_IMAGE_BYTES", "3000")]).unwrap();
        assert_eq!(config.max_message_bytes(), 4004 + 4096);

        let huge = usize::MAX.to_string();
        let config = config_from(&[("MAX_IMAGE_BYTES", huge.as_str())]).unwrap();
        assert_eq!(config.max_message_bytes(), usize::MAX);
    }
}
