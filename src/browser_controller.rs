use anyhow::{anyhow, Context, Result};
use headless_chrome::protocol::cdp::Page;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::Tab;
use headless_chrome::{browser::default_executable, Browser, LaunchOptions};
use rand::Rng;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt};
use tokio::time::sleep;

use crate::selectors::{
    POPUP_STRUCTURAL_INDICATORS, POPUP_TEXT_INDICATORS, SAFE_CLICK_POSITIONS, SYSTEM_CHROME_PATHS,
};
use crate::types::Engine;
use crate::utils::is_product_page;

pub const VIEWPORT: (u32, u32) = (1200, 800);
/// Pixel density multiplier for clipped element screenshots.
pub const SCREENSHOT_SCALE: f64 = 2.0;

const NAV_TIMEOUT_LENIENT: Duration = Duration::from_secs(60);
const NAV_TIMEOUT_STRICT: Duration = Duration::from_secs(90);
const OVERLAY_POLL_INTERVAL: Duration = Duration::from_secs(5);
const SCROLL_STEP_PAUSE: Duration = Duration::from_millis(800);
const MAX_SCROLL_STEPS: u32 = 30;

lazy_static! {
    static ref OVERLAY_PROBE: String = overlay_probe_script();
}

/// Returns the first matching overlay indicator as a JSON string, or null.
/// Text indicators are matched against leaf-node text content since CSS
/// cannot express text matches.
fn overlay_probe_script() -> String {
    let structural = serde_json::to_string(POPUP_STRUCTURAL_INDICATORS).unwrap();
    let texts = serde_json::to_string(POPUP_TEXT_INDICATORS).unwrap();
    format!(
        r#"(() => {{
            const structural = {structural};
            const texts = {texts};
            for (const sel of structural) {{
                try {{ if (document.querySelector(sel)) return JSON.stringify(sel); }} catch (e) {{}}
            }}
            for (const node of document.querySelectorAll('div, section, p, span, button')) {{
                if (node.childElementCount !== 0) continue;
                const t = node.textContent || '';
                for (const marker of texts) {{
                    if (t.includes(marker)) return JSON.stringify('text:' + marker);
                }}
            }}
            return JSON.stringify(null);
        }})()"#
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OverlayState {
    Unchecked,
    Detected,
    Waiting,
    Resolved,
    Unresolved,
}

/// Owns the lifetime of one browser instance and one tab. A fresh
/// controller is built per capture run; nothing here is shared.
pub struct BrowserController {
    browser: Option<Browser>,
    tab: Option<Arc<Tab>>,
}

impl BrowserController {
    /// Tries executable candidates in order until one launches: an
    /// explicitly configured path, then (for [`Engine::Auto`]) the bundled
    /// lookup, then known system install locations.
    pub fn launch(engine: Engine, browser_path: Option<PathBuf>, headless: bool) -> Result<Self> {
        let candidates = Self::executable_candidates(engine, browser_path);
        if candidates.is_empty() {
            return Err(anyhow!("no browser executable found"));
        }

        let mut last_err = anyhow!("no browser executable found");
        for path in candidates {
            debug!("trying browser executable {:?}", path);
            match Self::try_launch(&path, headless) {
                Ok(controller) => return Ok(controller),
                Err(e) => {
                    warn!("could not launch {:?}: {}", path, e);
                    last_err = e;
                }
            }
        }
        Err(last_err.context("browser launching error"))
    }

    fn executable_candidates(engine: Engine, explicit: Option<PathBuf>) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(p) = explicit {
            candidates.push(p);
        }
        if engine == Engine::Auto {
            match default_executable() {
                Ok(p) => candidates.push(p),
                Err(e) => debug!("no bundled chrome executable: {}", e),
            }
        }
        for p in SYSTEM_CHROME_PATHS {
            let path = PathBuf::from(p);
            if path.exists() {
                candidates.push(path);
            }
        }
        candidates
    }

    fn try_launch(path: &PathBuf, headless: bool) -> Result<Self> {
        let is_docker = std::env::var("IN_DOCKER").is_ok();
        let options = LaunchOptions::default_builder()
            .path(Some(path.clone()))
            .headless(headless)
            .window_size(Some(VIEWPORT))
            .idle_browser_timeout(Duration::from_secs(90))
            // warning only do this if in docker env
            .sandbox(!is_docker)
            .build()
            .map_err(|e| anyhow!("could not build launch options: {}", e))?;
        let browser = Browser::new(options).context("browser launching error")?;

        // we create a new incognito window (no context)
        let tab = {
            let ctx = browser
                .new_context()
                .context("could not create incognito context")?;
            ctx.new_tab().context("could not create new tab")?
        };
        tab.set_default_timeout(NAV_TIMEOUT_LENIENT);

        Ok(BrowserController {
            browser: Some(browser),
            tab: Some(tab),
        })
    }

    /// Loads the page under a lenient wait; on failure retries once under
    /// a stricter fully-loaded condition with a longer timeout. Failure
    /// after both attempts is fatal to the run.
    pub async fn navigate(&self, url: &str) -> Result<()> {
        let tab = self.tab()?;

        tab.set_default_timeout(NAV_TIMEOUT_LENIENT);
        let first = tab
            .navigate_to(url)
            .and_then(|t| t.wait_until_navigated())
            .map(|_| ());

        if let Err(e) = first {
            warn!("navigation to {} failed, retrying fully loaded: {}", url, e);
            tab.set_default_timeout(NAV_TIMEOUT_STRICT);
            tab.navigate_to(url)
                .context("retry navigation failed")?
                .wait_until_navigated()
                .context("retry navigation never settled")?;
            self.wait_for_ready_state().await;
        }

        let rndm = {
            let mut rng = rand::thread_rng();
            rng.gen_range(3..6)
        };
        debug!("sleeping for {} seconds after navigation", rndm);
        sleep(Duration::from_secs(rndm)).await;

        Ok(())
    }

    async fn wait_for_ready_state(&self) {
        for _ in 0..10 {
            match self.eval_string("document.readyState") {
                Ok(state) if state == "complete" => return,
                Ok(state) => debug!("document.readyState = {}", state),
                Err(e) => debug!("readyState probe failed: {}", e),
            }
            sleep(Duration::from_secs(1)).await;
        }
    }

    /// Best-effort overlay dismissal. Returns `Ok(true)` when no indicator
    /// remains, `Ok(false)` when an overlay survived the budget and the
    /// cleanup pass; the capture proceeds either way.
    pub async fn dismiss_overlays(
        &self,
        wait_budget: Duration,
        original_url: &str,
    ) -> Result<bool> {
        let tab = self.tab()?;
        let mut remaining = wait_budget;
        let mut state = OverlayState::Unchecked;

        loop {
            state = match state {
                OverlayState::Unchecked => match self.overlay_indicator() {
                    None => {
                        info!("no popup detected");
                        OverlayState::Resolved
                    }
                    Some(indicator) => {
                        info!("popup detected via {}", indicator);
                        OverlayState::Detected
                    }
                },
                OverlayState::Detected => OverlayState::Waiting,
                OverlayState::Waiting => {
                    if remaining.is_zero() {
                        self.cleanup_overlays().await;
                        if self.overlay_indicator().is_none() {
                            info!("popup cleanup succeeded");
                            OverlayState::Resolved
                        } else {
                            OverlayState::Unresolved
                        }
                    } else {
                        let step = OVERLAY_POLL_INTERVAL.min(remaining);
                        sleep(step).await;
                        remaining -= step;

                        let current = tab.get_url();
                        if !is_product_page(&current) {
                            warn!("url drifted to {} during popup wait, navigating back", current);
                            match self.navigate(original_url).await {
                                Ok(()) => OverlayState::Resolved,
                                Err(e) => {
                                    warn!("could not navigate back: {}", e);
                                    OverlayState::Unresolved
                                }
                            }
                        } else if self.overlay_indicator().is_none() {
                            info!("popup dismissed");
                            OverlayState::Resolved
                        } else {
                            info!(
                                "popup still present, {}s of wait budget left",
                                remaining.as_secs()
                            );
                            OverlayState::Waiting
                        }
                    }
                }
                OverlayState::Resolved => return Ok(true),
                OverlayState::Unresolved => {
                    warn!("popup still present, captures may contain the overlay");
                    return Ok(false);
                }
            };
        }
    }

    fn overlay_indicator(&self) -> Option<String> {
        match self.eval_json::<Option<String>>(&OVERLAY_PROBE) {
            Ok(indicator) => indicator,
            Err(e) => {
                debug!("overlay probe failed: {}", e);
                None
            }
        }
    }

    async fn cleanup_overlays(&self) {
        debug!("running best-effort popup cleanup");
        if let Ok(tab) = self.tab() {
            for _ in 0..3 {
                if let Err(e) = tab.press_key("Escape") {
                    debug!("escape press failed: {}", e);
                }
                sleep(Duration::from_millis(500)).await;
            }
            for (x, y) in SAFE_CLICK_POSITIONS {
                let script = format!(
                    "document.elementFromPoint({}, {})?.dispatchEvent(new MouseEvent('click', {{bubbles: true}}))",
                    x, y
                );
                if let Err(e) = tab.evaluate(&script, false) {
                    debug!("cleanup click at ({}, {}) failed: {}", x, y, e);
                }
                sleep(Duration::from_millis(300)).await;
            }
        }
        sleep(Duration::from_secs(2)).await;
    }

    /// Scrolls top-to-bottom in steps with pauses so lazy content loads,
    /// then returns to the top. A heuristic approximation of "fully
    /// rendered", not a completion signal.
    pub async fn settle_content(&self) -> Result<()> {
        let tab = self.tab()?;

        let mut page_height = self.eval_f64("document.body.scrollHeight").unwrap_or(0.0);
        let viewport_height = self
            .eval_f64("window.innerHeight")
            .unwrap_or(VIEWPORT.1 as f64);
        if page_height <= 0.0 || viewport_height <= 0.0 {
            debug!("page reports no height, skipping settle scroll");
            return Ok(());
        }

        let steps = ((page_height / viewport_height) as u32 + 2)
            .max(5)
            .min(MAX_SCROLL_STEPS);
        debug!("scrolling through the page in {} steps", steps);

        for step in 0..=steps {
            let pos = (step as f64 * page_height) / steps as f64;
            if let Err(e) = tab.evaluate(&format!("window.scrollTo(0, {})", pos as u64), false) {
                debug!("scroll step {} failed: {}", step, e);
            }
            sleep(SCROLL_STEP_PAUSE).await;

            if let Ok(h) = self.eval_f64("document.body.scrollHeight") {
                if h > page_height {
                    debug!("page height grew to {}px", h);
                    page_height = h;
                }
            }
        }

        if let Err(e) = tab.evaluate("window.scrollTo(0, 0)", false) {
            debug!("scroll back to top failed: {}", e);
        }
        sleep(Duration::from_secs(1)).await;
        // give lazy images a final moment to decode
        sleep(Duration::from_secs(2)).await;

        Ok(())
    }

    /// Scrolls so the given page-coordinate y lands at viewport center.
    pub async fn scroll_to_center(&self, y: f64) -> Result<()> {
        let tab = self.tab()?;
        let script = format!(
            "window.scrollTo(0, Math.max(0, {} - window.innerHeight / 2))",
            y
        );
        tab.evaluate(&script, false)?;
        sleep(Duration::from_millis(500)).await;
        Ok(())
    }

    /// Clipped screenshot of a page-coordinate region at
    /// [`SCREENSHOT_SCALE`] pixel density.
    pub fn screenshot_region(&self, x: f64, y: f64, width: f64, height: f64) -> Result<Vec<u8>> {
        let tab = self.tab()?;
        let clip = Page::Viewport {
            x,
            y,
            width,
            height,
            scale: SCREENSHOT_SCALE,
        };
        let png = tab
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, Some(clip), true)
            .context("region screenshot could not be captured")?;
        Ok(png)
    }

    /// Evaluates a script whose result is a `JSON.stringify`d value.
    pub fn eval_json<T: DeserializeOwned>(&self, script: &str) -> Result<T> {
        let tab = self.tab()?;
        let obj = tab.evaluate(script, true)?;
        let value = obj.value.ok_or_else(|| anyhow!("script returned no value"))?;
        let s = value
            .as_str()
            .ok_or_else(|| anyhow!("script did not return a string"))?;
        Ok(serde_json::from_str(s)?)
    }

    pub fn eval_f64(&self, expr: &str) -> Result<f64> {
        let tab = self.tab()?;
        let obj = tab.evaluate(expr, false)?;
        obj.value
            .and_then(|v| v.as_f64())
            .ok_or_else(|| anyhow!("expression {} did not return a number", expr))
    }

    fn eval_string(&self, expr: &str) -> Result<String> {
        let tab = self.tab()?;
        let obj = tab.evaluate(expr, false)?;
        obj.value
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .ok_or_else(|| anyhow!("expression {} did not return a string", expr))
    }

    fn tab(&self) -> Result<&Arc<Tab>> {
        self.tab
            .as_ref()
            .ok_or_else(|| anyhow!("browser session already closed"))
    }

    /// Releases the browser. Idempotent, safe to call when already closed.
    pub fn close(&mut self) {
        self.tab.take();
        if let Some(browser) = self.browser.take() {
            if let Some(pid) = browser.get_process_id() {
                let s = System::new_all();
                if let Some(process) = s.process(Pid::from_u32(pid)) {
                    debug!("killing browser process with id {}", pid);
                    process.kill();
                }
            }
        }
    }
}

impl Drop for BrowserController {
    fn drop(&mut self) {
        self.close();
    }
}
