//! Flattens OCR lines into the text sent back to the client.

use crate::ocr::DetectionLine;

const SEPARATOR: &str = " ";

/// Join line texts in engine order with a single space and trim the result.
pub fn assemble_text(lines: &[DetectionLine]) -> String {
    lines
        .iter()
        .map(|line| line.text.as_str())
        .collect::<Vec<_>>()
        .join(SEPARATOR)
        .trim()
        .to_string()
}
