use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use tokio::task;

use crate::browser_controller::BrowserController;
use crate::types::StickerCandidate;

/// Screenshot fallbacks always clip at least this square, centered on
/// the element.
const MIN_CLIP_SIZE: f64 = 250.0;

#[derive(Debug, Clone, Copy, Deserialize)]
struct CurrentRect {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

#[derive(Debug, Deserialize)]
struct InPageFetchResult {
    b64: Option<String>,
    err: Option<String>,
}

fn is_absolute_http(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Clip region covering at least [`MIN_CLIP_SIZE`] on both axes,
/// centered on the element, clamped to the page origin.
fn clip_region(rect: &CurrentRect) -> (f64, f64, f64, f64) {
    let clip_w = rect.width.max(MIN_CLIP_SIZE);
    let clip_h = rect.height.max(MIN_CLIP_SIZE);
    let clip_x = (rect.x - (clip_w - rect.width) / 2.0).max(0.0);
    let clip_y = (rect.y - (clip_h - rect.height) / 2.0).max(0.0);
    (
        clip_x.round(),
        clip_y.round(),
        clip_w.round(),
        clip_h.round(),
    )
}

/// Materializes candidates as raw image bytes. Per candidate, an ordered
/// list of strategies tried in sequence, stopping at the first success:
/// in-page fetch, direct download, clipped screenshot.
pub struct AssetFetcher<'a> {
    controller: &'a BrowserController,
}

impl<'a> AssetFetcher<'a> {
    pub fn new(controller: &'a BrowserController) -> Self {
        AssetFetcher { controller }
    }

    pub async fn capture(&self, candidate: &StickerCandidate) -> Result<Vec<u8>> {
        match self.download_in_page(candidate) {
            Ok(bytes) => return Ok(bytes),
            Err(e) => debug!("in-page fetch failed for {}: {}", candidate.url, e),
        }
        match self.download_direct(candidate).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) => debug!("direct download failed for {}: {}", candidate.url, e),
        }
        self.screenshot_fallback(candidate).await
    }

    /// Fetches the resolved url from inside the page so session cookies
    /// and referer apply; bytes come back base64-encoded.
    fn download_in_page(&self, candidate: &StickerCandidate) -> Result<Vec<u8>> {
        if !is_absolute_http(&candidate.url) {
            return Err(anyhow!("not an absolute http(s) url"));
        }
        let url = serde_json::to_string(&candidate.url)?;
        let script = format!(
            r#"new Promise(async (resolve) => {{
                try {{
                    const res = await fetch({url});
                    if (!res.ok) {{ resolve(JSON.stringify({{ err: 'http ' + res.status }})); return; }}
                    const buf = new Uint8Array(await res.arrayBuffer());
                    let bin = '';
                    for (let i = 0; i < buf.length; i++) bin += String.fromCharCode(buf[i]);
                    resolve(JSON.stringify({{ b64: btoa(bin) }}));
                }} catch (e) {{
                    resolve(JSON.stringify({{ err: String(e) }}));
                }}
            }})"#
        );

        let res: InPageFetchResult = self.controller.eval_json(&script)?;
        if let Some(err) = res.err {
            return Err(anyhow!("in-page fetch failed: {}", err));
        }
        let b64 = res.b64.ok_or_else(|| anyhow!("in-page fetch returned nothing"))?;
        let bytes = general_purpose::STANDARD
            .decode(b64)
            .context("could not decode fetched bytes")?;
        if bytes.is_empty() {
            return Err(anyhow!("in-page fetch returned an empty body"));
        }
        Ok(bytes)
    }

    async fn download_direct(&self, candidate: &StickerCandidate) -> Result<Vec<u8>> {
        if !is_absolute_http(&candidate.url) {
            return Err(anyhow!("not an absolute http(s) url"));
        }
        let url = candidate.url.clone();
        let bytes = task::spawn_blocking(move || -> Result<Vec<u8>> {
            let res = reqwest::blocking::get(url.as_str()).context("request failed")?;
            if !res.status().is_success() {
                return Err(anyhow!("http status {}", res.status()));
            }
            Ok(res.bytes().context("could not read body")?.to_vec())
        })
        .await
        .context("download task panicked")??;

        if bytes.is_empty() {
            return Err(anyhow!("direct download returned an empty body"));
        }
        Ok(bytes)
    }

    /// Scrolls the candidate into view, re-locates it by source url (it
    /// may have shifted since the locator pass) and screenshots a clipped
    /// region around it. A vanished or zero-sized element is an error,
    /// the caller skips the candidate.
    async fn screenshot_fallback(&self, candidate: &StickerCandidate) -> Result<Vec<u8>> {
        debug!("falling back to a screenshot for {}", candidate.url);
        self.controller.scroll_to_center(candidate.bbox.y).await?;

        let rect = self
            .relocate(candidate)?
            .ok_or_else(|| anyhow!("element no longer on the page"))?;
        if rect.width <= 0.0 || rect.height <= 0.0 {
            return Err(anyhow!("element has zero size"));
        }

        let (x, y, width, height) = clip_region(&rect);
        self.controller.screenshot_region(x, y, width, height)
    }

    fn relocate(&self, candidate: &StickerCandidate) -> Result<Option<CurrentRect>> {
        let original = serde_json::to_string(&candidate.original_url)?;
        let resolved = serde_json::to_string(&candidate.url)?;
        let script = format!(
            r#"(() => {{
                const wanted = [{original}, {resolved}];
                for (const img of document.querySelectorAll('img')) {{
                    const src = img.currentSrc || img.src || '';
                    if (wanted.includes(src)) {{
                        const rect = img.getBoundingClientRect();
                        return JSON.stringify({{
                            x: rect.x + window.scrollX,
                            y: rect.y + window.scrollY,
                            width: rect.width,
                            height: rect.height,
                        }});
                    }}
                }}
                return JSON.stringify(null);
            }})()"#
        );
        self.controller.eval_json(&script)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn clip_expands_small_elements_to_the_minimum() {
        let rect = CurrentRect {
            x: 500.0,
            y: 600.0,
            width: 150.0,
            height: 150.0,
        };
        let (x, y, w, h) = clip_region(&rect);
        assert_eq!((w, h), (250.0, 250.0));
        // centered on the element
        assert_eq!(x, 450.0);
        assert_eq!(y, 550.0);
    }

    #[test]
    fn clip_keeps_large_elements_as_is() {
        let rect = CurrentRect {
            x: 100.0,
            y: 100.0,
            width: 320.0,
            height: 300.0,
        };
        assert_eq!(clip_region(&rect), (100.0, 100.0, 320.0, 300.0));
    }

    #[test]
    fn clip_clamps_to_page_origin() {
        let rect = CurrentRect {
            x: 10.0,
            y: 5.0,
            width: 100.0,
            height: 100.0,
        };
        let (x, y, ..) = clip_region(&rect);
        assert_eq!((x, y), (0.0, 0.0));
    }

    #[test]
    fn only_absolute_urls_are_downloadable() {
        assert!(is_absolute_http("https://obs.line-scdn.net/sticker/1"));
        assert!(is_absolute_http("http://example.com/a.png"));
        assert!(!is_absolute_http("data:image/png;base64,AAAA"));
        assert!(!is_absolute_http("//obs.line-scdn.net/sticker/1"));
        assert!(!is_absolute_http(""));
    }
}
