//! Tesseract OCR through its command-line tool.
//!
//! The raster is written to a temporary PNG and recognized with the `tsv`
//! output config, which reports one row per word with its pixel box.

use pagemark_core::coords::ScreenRect;
use pagemark_core::engine::Raster;
use pagemark_core::ocr::{OcrEngine, OcrError, OcrWord};
use serde::Deserialize;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;
use tracing::debug;

/// TSV row level for single words.
const WORD_LEVEL: u8 = 5;

#[derive(Debug, Clone)]
pub struct TesseractOcr {
    language: String,
    binary: String,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self::new()
    }
}

impl TesseractOcr {
    pub fn new() -> Self {
        Self { language: "eng".to_string(), binary: "tesseract".to_string() }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Use a specific executable instead of `tesseract` from `PATH`.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn run(&self, image_path: &Path) -> Result<String, OcrError> {
        let output = Command::new(&self.binary)
            .arg(image_path)
            .arg("stdout")
            .args(["-l", &self.language])
            .arg("tsv")
            .output();

        match output {
            Ok(output) if output.status.success() => {
                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(OcrError::Failed(format!("tesseract failed: {}", stderr.trim())))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(OcrError::BackendNotAvailable(
                format!("{} not found (install tesseract-ocr)", self.binary),
            )),
            Err(e) => Err(OcrError::Io(e)),
        }
    }
}

impl OcrEngine for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&self, raster: &Raster) -> Result<Vec<OcrWord>, OcrError> {
        if !raster.is_valid() {
            return Err(OcrError::InvalidRaster);
        }
        let image = image::RgbaImage::from_raw(raster.width, raster.height, raster.pixels.clone())
            .ok_or(OcrError::InvalidRaster)?;

        let temp_dir = TempDir::new()?;
        let image_path = temp_dir.path().join("page.png");
        image
            .save(&image_path)
            .map_err(|e| OcrError::Failed(format!("failed to write page image: {e}")))?;

        let tsv = self.run(&image_path)?;
        let words = parse_tsv(&tsv);
        debug!(words = words.len(), width = raster.width, height = raster.height, "tesseract finished");
        Ok(words)
    }
}

/// One row of Tesseract TSV output, matched to the header by column name.
#[derive(Debug, Deserialize)]
struct TsvRow {
    level: u8,
    left: f32,
    top: f32,
    width: f32,
    height: f32,
    #[serde(deserialize_with = "csv::invalid_option")]
    conf: Option<f32>,
    #[serde(default)]
    text: String,
}

/// Parse Tesseract TSV output into words.
///
/// Only word rows with non-blank text are kept; malformed rows are skipped.
pub fn parse_tsv(tsv: &str) -> Vec<OcrWord> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .flexible(true)
        .from_reader(tsv.as_bytes());

    reader
        .deserialize::<TsvRow>()
        .filter_map(|row| match row {
            Ok(row) => Some(row),
            Err(e) => {
                debug!(error = %e, "skipping malformed tsv row");
                None
            }
        })
        .filter(|row| row.level == WORD_LEVEL)
        .filter_map(|row| {
            let text = row.text.trim();
            if text.is_empty() {
                return None;
            }
            Some(OcrWord {
                text: text.to_string(),
                bbox: ScreenRect::new(row.left, row.top, row.width, row.height),
                confidence: row.conf.unwrap_or(0.0).clamp(0.0, 100.0),
            })
        })
        .collect()
}
