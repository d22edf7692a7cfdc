//! Tesseract CLI OCR engine.
//!
//! Runs `tesseract <image> stdout -l <lang> --psm <psm> tsv` and groups the
//! word-level TSV rows into lines.

use super::{BoundingBox, DetectionLine, OcrEngine};
use crate::config::OcrSettings;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// TSV row level for a single word.
const WORD_LEVEL: u32 = 5;

pub struct TesseractEngine {
    bin: String,
    lang: String,
    psm: u32,
    min_confidence: f32,
}

impl TesseractEngine {
    pub fn new(settings: &OcrSettings) -> Self {
        Self {
            bin: settings.tesseract_bin.clone(),
            lang: settings.lang.clone(),
            psm: settings.tesseract_psm,
            min_confidence: settings.min_confidence,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {} (is it installed?)", self.bin))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("tesseract failed ({}): {}", output.status, stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait::async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn warm_up(&self) -> Result<()> {
        // `--list-langs` prints a header line followed by one language per line.
        let listing = self.run(&["--list-langs"]).await?;
        let available: Vec<&str> = listing.lines().skip(1).map(str::trim).collect();

        for lang in self.lang.split('+') {
            if !available.contains(&lang) {
                anyhow::bail!(
                    "tesseract language '{}' is not installed (available: {})",
                    lang,
                    available.join(", ")
                );
            }
        }
        info!("tesseract languages available: {}", available.len());
        Ok(())
    }

    async fn recognize(&self, path: &Path) -> Result<Vec<DetectionLine>> {
        let path_arg = path.to_string_lossy().into_owned();
        let psm = self.psm.to_string();
        let tsv = self
            .run(&[
                path_arg.as_str(),
                "stdout",
                "-l",
                self.lang.as_str(),
                "--psm",
                psm.as_str(),
                "tsv",
            ])
            .await?;

        let lines = parse_tsv(&tsv, self.min_confidence);
        debug!("tesseract: {} lines kept from {} TSV rows", lines.len(), tsv.lines().count());
        Ok(lines)
    }
}

#[derive(Default)]
struct LineAcc {
    words: Vec<String>,
    bbox: Option<BoundingBox>,
    conf_sum: f32,
}

/// Group word rows of Tesseract TSV output into lines, in reading order.
///
/// Columns: level, page_num, block_num, par_num, line_num, word_num, left,
/// top, width, height, conf, text. Line confidence is the mean word
/// confidence scaled to 0..1; lines below `min_confidence` are dropped.
pub fn parse_tsv(tsv: &str, min_confidence: f32) -> Vec<DetectionLine> {
    let mut lines: BTreeMap<(u32, u32, u32, u32), LineAcc> = BTreeMap::new();

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 {
            continue;
        }
        if cols[0].parse::<u32>().ok() != Some(WORD_LEVEL) {
            continue;
        }

        let num = |i: usize| cols[i].trim().parse::<u32>().unwrap_or(0);
        let conf: f32 = cols[10].trim().parse().unwrap_or(-1.0);
        let text = cols[11].trim();
        if text.is_empty() || conf < 0.0 {
            continue;
        }

        let word_box = BoundingBox {
            left: num(6),
            top: num(7),
            width: num(8),
            height: num(9),
        };

        let acc = lines.entry((num(1), num(2), num(3), num(4))).or_default();
        acc.words.push(text.to_string());
        acc.conf_sum += conf;
        acc.bbox = Some(match acc.bbox {
            Some(bbox) => bbox.union(&word_box),
            None => word_box,
        });
    }

    lines
        .into_values()
        .filter_map(|acc| {
            let confidence = acc.conf_sum / acc.words.len() as f32 / 100.0;
            (confidence >= min_confidence).then(|| DetectionLine {
                bbox: acc.bbox.unwrap_or_default(),
                text: acc.words.join(" "),
                confidence,
            })
        })
        .collect()
}
