use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("could not extract a product id from {0}")]
    InvalidUrl(String),
    #[error("could not create output directory under {0:?}")]
    OutputDir(PathBuf),
    #[error("browser launch failed after all fallback executables")]
    Launch,
    #[error("navigation to {0} failed after retry")]
    Navigation(String),
    #[error("no sticker elements found on the page")]
    NoCandidates,
}

/// Which executable lookup order to use when launching the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    /// Chrome found by `default_executable`, falling back to known
    /// system install locations.
    Auto,
    /// Known system install locations only.
    System,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// One page element hypothesized to be a sticker image, before capture.
#[derive(Debug, Clone)]
pub struct StickerCandidate {
    /// Image url rewritten to the higher-resolution variant.
    pub url: String,
    pub original_url: String,
    pub bbox: BoundingBox,
    pub selector: &'static str,
    pub main_area: bool,
    pub score: u32,
}

#[derive(Debug, Serialize)]
pub struct CaptureResult {
    pub success: bool,
    pub output_dir: Option<PathBuf>,
    pub captured_count: usize,
    pub total_elements: usize,
    pub product_id: Option<String>,
    pub error: Option<String>,
}

impl CaptureResult {
    pub fn failure(err: &anyhow::Error) -> Self {
        CaptureResult {
            success: false,
            output_dir: None,
            captured_count: 0,
            total_elements: 0,
            product_id: None,
            error: Some(format!("{:#}", err)),
        }
    }
}

/// Durable record written next to the captured files.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionMeta {
    pub timestamp: String,
    pub source_url: String,
    pub product_id: String,
    pub sticker_count: usize,
    pub tool_version: String,
}

/// Coarse progress callback: (current step, total steps, status text).
/// Steps are monotonically non-decreasing over a run.
pub type ProgressFn = dyn Fn(u32, u32, &str) + Send + Sync;
