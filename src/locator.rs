use std::time::Duration;

use anyhow::Result;
use itertools::Itertools;
use serde::Deserialize;
use tokio::time::sleep;

use crate::browser_controller::BrowserController;
use crate::selectors::{
    StickerSelector, ANCESTOR_WALK_LEVELS, EXCLUDED_ANCESTOR_MARKERS, EXCLUDED_HEADING_MARKERS,
    STICKER_SELECTORS, URL_MARKERS,
};
use crate::types::{BoundingBox, StickerCandidate};
use crate::utils::normalize_resolution;

/// Minimum rendered size on both axes for a plausible sticker thumbnail.
const MIN_STICKER_DIM: f64 = 80.0;
/// Sticker thumbnails on the product grid render inside this size band.
const TYPICAL_MIN: f64 = 100.0;
const TYPICAL_MAX: f64 = 400.0;
/// Main content region: below the page header, left of the sidebar.
const MAIN_BAND_MIN_Y: f64 = 150.0;
const MAIN_BAND_MAX_X: f64 = 975.0;
/// Aggregate score a candidate must reach to be selected.
const SCORE_FLOOR: u32 = 40;
/// Candidates within one vertical band are ordered left to right.
const ROW_BAND_PX: f64 = 50.0;

/// Raw record produced by the in-page probe for one matched element.
/// Coordinates are page coordinates (scroll offsets folded in).
#[derive(Debug, Clone, Deserialize)]
struct RawCandidate {
    src: String,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    excluded: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct LooseImage {
    src: String,
    alt: String,
    class: String,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

fn probe_script(selector: &StickerSelector) -> String {
    let sel = serde_json::to_string(selector.css).unwrap();
    let class_markers = serde_json::to_string(EXCLUDED_ANCESTOR_MARKERS).unwrap();
    let heading_markers = serde_json::to_string(EXCLUDED_HEADING_MARKERS).unwrap();
    format!(
        r#"(() => {{
            const out = [];
            const classMarkers = {class_markers};
            const headingMarkers = {heading_markers};
            document.querySelectorAll({sel}).forEach((el) => {{
                const img = el.tagName === 'IMG' ? el : el.querySelector('img');
                if (!img) return;
                const rect = img.getBoundingClientRect();
                const src = img.currentSrc || img.src || img.dataset.src || img.dataset.original || '';
                let excluded = false;
                let node = img.parentElement;
                for (let i = 0; i < {levels} && node; i++) {{
                    const hay = (((node.getAttribute && node.getAttribute('class')) || '') + ' ' + (node.id || '')).toLowerCase();
                    for (const marker of classMarkers) {{
                        if (hay.includes(marker)) {{ excluded = true; break; }}
                    }}
                    if (!excluded && (node.tagName === 'SECTION' || node.tagName === 'ASIDE')) {{
                        const heading = node.querySelector('h2, h3');
                        const t = heading ? heading.textContent.toLowerCase() : '';
                        for (const marker of headingMarkers) {{
                            if (t.includes(marker)) {{ excluded = true; break; }}
                        }}
                    }}
                    if (excluded) break;
                    node = node.parentElement;
                }}
                out.push({{
                    src: src,
                    alt: img.alt || '',
                    x: rect.x + window.scrollX,
                    y: rect.y + window.scrollY,
                    width: rect.width,
                    height: rect.height,
                    excluded: excluded,
                }});
            }});
            return JSON.stringify(out);
        }})()"#,
        levels = ANCESTOR_WALK_LEVELS,
    )
}

fn loose_probe_script() -> String {
    r#"(() => {
        const out = [];
        document.querySelectorAll('img').forEach((img) => {
            const rect = img.getBoundingClientRect();
            out.push({
                src: img.currentSrc || img.src || img.dataset.src || img.dataset.original || '',
                alt: img.alt || '',
                class: (img.getAttribute('class') || ''),
                x: rect.x + window.scrollX,
                y: rect.y + window.scrollY,
                width: rect.width,
                height: rect.height,
            });
        });
        return JSON.stringify(out);
    })()"#
        .to_string()
}

fn url_marker_weight(url: &str) -> Option<u32> {
    URL_MARKERS
        .iter()
        .filter(|(marker, _)| url.contains(marker))
        .map(|(_, weight)| *weight)
        .max()
}

fn passes_filters(raw: &RawCandidate) -> bool {
    !raw.excluded
        && raw.width >= MIN_STICKER_DIM
        && raw.height >= MIN_STICKER_DIM
        && url_marker_weight(&raw.src).is_some()
}

fn in_main_band(raw: &RawCandidate) -> bool {
    raw.y >= MAIN_BAND_MIN_Y && raw.x + raw.width <= MAIN_BAND_MAX_X
}

/// The one scoring function applied uniformly to every candidate from
/// every pass; selection is score-above-floor, never pass order.
fn score(raw: &RawCandidate, selector: &StickerSelector) -> u32 {
    let mut score = selector.confidence + url_marker_weight(&raw.src).unwrap_or(0);
    let typical = (TYPICAL_MIN..=TYPICAL_MAX).contains(&raw.width)
        && (TYPICAL_MIN..=TYPICAL_MAX).contains(&raw.height);
    if typical {
        score += 10;
    }
    if selector.main_area && in_main_band(raw) {
        score += 10;
    }
    score
}

fn to_candidate(raw: &RawCandidate, selector: &StickerSelector) -> StickerCandidate {
    StickerCandidate {
        url: normalize_resolution(&raw.src),
        original_url: raw.src.clone(),
        bbox: BoundingBox {
            x: raw.x,
            y: raw.y,
            width: raw.width,
            height: raw.height,
        },
        selector: selector.css,
        main_area: selector.main_area && in_main_band(raw),
        score: score(raw, selector),
    }
}

/// Dedup by resolved url (first occurrence wins), drop everything under
/// the score floor, sort reading order.
pub fn select_candidates(all: Vec<StickerCandidate>) -> Vec<StickerCandidate> {
    let mut selected: Vec<StickerCandidate> = all
        .into_iter()
        .unique_by(|c| c.url.clone())
        .filter(|c| c.score >= SCORE_FLOOR)
        .collect();
    sort_candidates(&mut selected);
    selected
}

/// Top-to-bottom in [`ROW_BAND_PX`] bands, left-to-right inside a band.
pub fn sort_candidates(candidates: &mut [StickerCandidate]) {
    candidates.sort_by_key(|c| ((c.bbox.y / ROW_BAND_PX) as i64, c.bbox.x as i64));
}

pub struct StickerLocator<'a> {
    controller: &'a BrowserController,
}

impl<'a> StickerLocator<'a> {
    pub fn new(controller: &'a BrowserController) -> Self {
        StickerLocator { controller }
    }

    /// Runs every cascade selector, scores all matches uniformly and
    /// returns the selected candidates in reading order. An empty result
    /// after the loose fallback is the caller's cue to abort.
    pub async fn locate(&self) -> Result<Vec<StickerCandidate>> {
        let mut all = Vec::new();

        for selector in STICKER_SELECTORS {
            // small pause between passes so late content can attach
            sleep(Duration::from_millis(500)).await;

            let raws: Vec<RawCandidate> = match self.controller.eval_json(&probe_script(selector)) {
                Ok(raws) => raws,
                Err(e) => {
                    debug!("selector probe '{}' failed: {}", selector.css, e);
                    continue;
                }
            };
            debug!("selector '{}' matched {} elements", selector.css, raws.len());

            for raw in &raws {
                if passes_filters(raw) {
                    all.push(to_candidate(raw, selector));
                }
            }
        }

        let selected = select_candidates(all);
        if !selected.is_empty() {
            info!("selected {} unique sticker candidates", selected.len());
            return Ok(selected);
        }

        warn!("no candidate passed the scored cascade, falling back to a loose image scan");
        self.loose_image_scan()
    }

    /// Diagnostic fallback: every image on the page, kept on a loose
    /// sticker match. The result may be empty.
    fn loose_image_scan(&self) -> Result<Vec<StickerCandidate>> {
        let images: Vec<LooseImage> = match self.controller.eval_json(&loose_probe_script()) {
            Ok(images) => images,
            Err(e) => {
                debug!("loose image probe failed: {}", e);
                return Ok(vec![]);
            }
        };

        info!("page carries {} images in total", images.len());
        for img in images.iter().take(5) {
            debug!("image src: {}", img.src);
        }

        let mut out: Vec<StickerCandidate> = images
            .into_iter()
            .filter(|img| {
                img.width > 0.0
                    && img.height > 0.0
                    && (img.src.to_lowercase().contains("sticker")
                        || img.alt.to_lowercase().contains("sticker")
                        || img.class.to_lowercase().contains("sticker"))
            })
            .map(|img| StickerCandidate {
                url: normalize_resolution(&img.src),
                original_url: img.src.clone(),
                bbox: BoundingBox {
                    x: img.x,
                    y: img.y,
                    width: img.width,
                    height: img.height,
                },
                selector: "img",
                main_area: false,
                score: 0,
            })
            .unique_by(|c| c.url.clone())
            .collect();
        sort_candidates(&mut out);

        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn raw(src: &str, x: f64, y: f64, w: f64, h: f64) -> RawCandidate {
        RawCandidate {
            src: src.into(),
            x,
            y,
            width: w,
            height: h,
            excluded: false,
        }
    }

    fn main_selector() -> &'static StickerSelector {
        &STICKER_SELECTORS[0]
    }

    fn candidate(url: &str, x: f64, y: f64, score: u32) -> StickerCandidate {
        StickerCandidate {
            url: url.into(),
            original_url: url.into(),
            bbox: BoundingBox {
                x,
                y,
                width: 160.0,
                height: 160.0,
            },
            selector: ".mdCMN09Image",
            main_area: true,
            score,
        }
    }

    #[test]
    fn filters_reject_small_excluded_and_unmarked() {
        let ok = raw("https://obs.line-scdn.net/sticker/1.png", 10.0, 200.0, 160.0, 160.0);
        assert!(passes_filters(&ok));

        let mut excluded = ok.clone();
        excluded.excluded = true;
        assert!(!passes_filters(&excluded));

        let small = raw("https://obs.line-scdn.net/sticker/1.png", 10.0, 200.0, 40.0, 160.0);
        assert!(!passes_filters(&small));

        let unmarked = raw("https://example.com/logo.png", 10.0, 200.0, 160.0, 160.0);
        assert!(!passes_filters(&unmarked));
    }

    #[test]
    fn score_takes_strongest_url_marker() {
        let strong = raw(
            "https://sdl.example/products/1/sticker_png/w/96",
            10.0,
            200.0,
            160.0,
            160.0,
        );
        let weak = raw("https://obs.line-scdn.net/x/1.webp", 10.0, 200.0, 160.0, 160.0);
        assert!(score(&strong, main_selector()) > score(&weak, main_selector()));
    }

    #[test]
    fn main_band_bonus_only_for_main_area_selectors() {
        let inside = raw("https://obs.line-scdn.net/sticker/1.png", 10.0, 200.0, 160.0, 160.0);
        let loose = &STICKER_SELECTORS[STICKER_SELECTORS.len() - 1];
        assert!(!loose.main_area);
        assert_eq!(
            score(&inside, loose),
            loose.confidence + url_marker_weight(&inside.src).unwrap() + 10
        );
        assert_eq!(
            score(&inside, main_selector()),
            main_selector().confidence + url_marker_weight(&inside.src).unwrap() + 10 + 10
        );
    }

    #[test]
    fn candidate_url_is_normalized() {
        let r = raw(
            "https://obs.line-scdn.net/sticker/1=w120",
            10.0,
            200.0,
            160.0,
            160.0,
        );
        let c = to_candidate(&r, main_selector());
        assert_eq!(c.url, "https://obs.line-scdn.net/sticker/1=w300");
        assert_eq!(c.original_url, "https://obs.line-scdn.net/sticker/1=w120");
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let first = candidate("https://obs.line-scdn.net/sticker/1", 0.0, 200.0, 90);
        let mut second = candidate("https://obs.line-scdn.net/sticker/1", 50.0, 400.0, 95);
        second.selector = "[class*='sticker'] img";
        let selected = select_candidates(vec![first, second]);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].selector, ".mdCMN09Image");
        assert_eq!(selected[0].score, 90);
    }

    #[test]
    fn selection_enforces_score_floor() {
        let strong = candidate("https://obs.line-scdn.net/sticker/1", 0.0, 200.0, 80);
        let weak = candidate("https://example.com/decoration.png", 0.0, 200.0, SCORE_FLOOR - 1);
        let selected = select_candidates(vec![strong, weak]);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].url, "https://obs.line-scdn.net/sticker/1");
    }

    #[test]
    fn sort_orders_left_to_right_within_a_band() {
        let a = candidate("https://obs.line-scdn.net/sticker/a", 50.0, 100.0, 90);
        let b = candidate("https://obs.line-scdn.net/sticker/b", 10.0, 110.0, 90);
        let mut v = vec![a, b];
        sort_candidates(&mut v);
        assert_eq!(v[0].url, "https://obs.line-scdn.net/sticker/b");
        assert_eq!(v[1].url, "https://obs.line-scdn.net/sticker/a");
    }

    #[test]
    fn sort_orders_by_row_across_bands() {
        let high = candidate("https://obs.line-scdn.net/sticker/high", 500.0, 100.0, 90);
        let low = candidate("https://obs.line-scdn.net/sticker/low", 0.0, 300.0, 90);
        let mut v = vec![low, high];
        sort_candidates(&mut v);
        assert_eq!(v[0].url, "https://obs.line-scdn.net/sticker/high");
        assert_eq!(v[1].url, "https://obs.line-scdn.net/sticker/low");
    }
}
