use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use chrono::Local;

use crate::{
    browser_controller::BrowserController,
    fetcher::AssetFetcher,
    locator::StickerLocator,
    recorder::SessionRecorder,
    types::{CaptureError, CaptureResult, Engine, ProgressFn},
    utils::extract_product_id,
};

pub const TOTAL_STEPS: u32 = 100;

/// Everything one capture run needs; created once per run, immutable.
#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct CaptureRequest {
    // product page url
    pub url: String,
    // base directory the timestamped session directory goes under
    pub output_dir: PathBuf,
    #[builder(default = "Engine::Auto")]
    pub engine: Engine,
    // explicit browser binary, tried before any lookup
    #[builder(default = "None")]
    pub browser_path: Option<PathBuf>,
    #[builder(default = "true")]
    pub headless: bool,
    // wait budget for overlay dismissal in seconds
    #[builder(default = "30")]
    pub popup_wait_secs: u64,
}

impl CaptureRequest {
    pub fn default_builder() -> CaptureRequestBuilder {
        CaptureRequestBuilder::default()
    }
}

fn report(progress: Option<&ProgressFn>, step: u32, msg: &str) {
    if let Some(p) = progress {
        p(step, TOTAL_STEPS, msg);
    }
}

/// Drives one capture run end to end. A fresh browser session is built
/// per invocation and owned exclusively by it; concurrent runs each get
/// their own `Runner`.
pub struct Runner {
    request: CaptureRequest,
}

impl Runner {
    pub fn new(request: CaptureRequest) -> Self {
        Runner { request }
    }

    /// Runs the whole pipeline. Fatal errors surface as a failed
    /// [`CaptureResult`]; the browser is released on every exit path.
    pub async fn capture(&self, progress: Option<&ProgressFn>) -> CaptureResult {
        match self.run(progress).await {
            Ok(result) => result,
            Err(e) => {
                error!("capture failed: {:#}", e);
                CaptureResult::failure(&e)
            }
        }
    }

    async fn run(&self, progress: Option<&ProgressFn>) -> Result<CaptureResult> {
        report(progress, 0, "initializing");

        // validated before any browser resources are touched
        let product_id = extract_product_id(&self.request.url)
            .ok_or_else(|| CaptureError::InvalidUrl(self.request.url.clone()))?;
        info!("product id: {}", product_id);

        let mut recorder =
            SessionRecorder::create(&self.request.output_dir, &product_id, &Local::now())
                .map_err(|e| e.context(CaptureError::OutputDir(self.request.output_dir.clone())))?;

        report(progress, 5, "launching browser");
        let mut controller = BrowserController::launch(
            self.request.engine,
            self.request.browser_path.clone(),
            self.request.headless,
        )
        .map_err(|e| e.context(CaptureError::Launch))?;

        let result = self
            .drive(&controller, &mut recorder, &product_id, progress)
            .await;
        controller.close();
        result
    }

    async fn drive(
        &self,
        controller: &BrowserController,
        recorder: &mut SessionRecorder,
        product_id: &str,
        progress: Option<&ProgressFn>,
    ) -> Result<CaptureResult> {
        report(progress, 10, "loading page");
        controller
            .navigate(&self.request.url)
            .await
            .map_err(|e| e.context(CaptureError::Navigation(self.request.url.clone())))?;

        report(progress, 20, "checking for popups");
        let budget = Duration::from_secs(self.request.popup_wait_secs);
        match controller.dismiss_overlays(budget, &self.request.url).await {
            Ok(true) => {}
            Ok(false) => warn!("popup dismissal unconfirmed, captures may contain the overlay"),
            Err(e) => warn!("overlay handling failed: {:#}", e),
        }

        report(progress, 40, "loading lazy content");
        controller.settle_content().await?;

        report(progress, 60, "locating stickers");
        let candidates = StickerLocator::new(controller).locate().await?;
        if candidates.is_empty() {
            return Err(CaptureError::NoCandidates.into());
        }
        info!("found {} sticker candidates", candidates.len());

        let fetcher = AssetFetcher::new(controller);
        let total = candidates.len();
        for (i, candidate) in candidates.iter().enumerate() {
            let step = 70 + (i as u32 * 25) / total as u32;
            report(
                progress,
                step,
                &format!("capturing sticker {}/{}", i + 1, total),
            );
            match fetcher.capture(candidate).await {
                Ok(bytes) => {
                    if let Err(e) = recorder.save_asset(&bytes) {
                        warn!("could not save candidate {}: {:#}", i + 1, e);
                    }
                }
                Err(e) => {
                    warn!(
                        "could not capture candidate {} ({}): {:#}",
                        i + 1,
                        candidate.url,
                        e
                    );
                }
            }
        }

        report(progress, 95, "writing metadata");
        recorder.write_summary(&self.request.url, product_id)?;

        report(progress, 100, "done");
        info!(
            "capture complete: {}/{} stickers saved to {:?}",
            recorder.captured_count(),
            total,
            recorder.output_dir()
        );

        Ok(CaptureResult {
            success: true,
            output_dir: Some(recorder.output_dir().to_path_buf()),
            captured_count: recorder.captured_count(),
            total_elements: total,
            product_id: Some(product_id.to_string()),
            error: None,
        })
    }
}
