//! Selector and indicator tables for LINE STORE sticker product pages.
//! Centralized so markup drift only touches this file.

/// One pass of the locator cascade.
#[derive(Debug, Clone, Copy)]
pub struct StickerSelector {
    pub css: &'static str,
    /// Contribution to the candidate score; higher means the selector is
    /// more specific to the known page layout.
    pub confidence: u32,
    /// Whether matches of this selector are expected inside the main
    /// content region (enables the positional band bonus).
    pub main_area: bool,
}

/// Ordered cascade, most layout-specific first.
pub const STICKER_SELECTORS: &[StickerSelector] = &[
    StickerSelector { css: ".mdCMN09Image", confidence: 30, main_area: true },
    StickerSelector { css: ".FnStickerPreviewItem img", confidence: 30, main_area: true },
    StickerSelector { css: "li img[src*='stickershop']", confidence: 25, main_area: true },
    StickerSelector { css: "img[src*='sticker_png']", confidence: 25, main_area: false },
    StickerSelector { css: "img[src*='sticker.png']", confidence: 25, main_area: false },
    StickerSelector { css: "img[src*='/sticker/']", confidence: 20, main_area: false },
    StickerSelector { css: "img[src*='obs.line-scdn.net']", confidence: 20, main_area: false },
    StickerSelector { css: "li img[data-src*='sticker']", confidence: 15, main_area: false },
    StickerSelector { css: "img[data-original*='sticker']", confidence: 15, main_area: false },
    StickerSelector { css: "[class*='Sticker'] img", confidence: 10, main_area: false },
    StickerSelector { css: "[class*='sticker'] img", confidence: 10, main_area: false },
];

/// Url substrings that mark an image as a sticker asset, with their score
/// contribution. A candidate must carry at least one of these.
pub const URL_MARKERS: &[(&str, u32)] = &[
    ("sticker_png", 25),
    ("sticker.png", 25),
    ("/sticker/", 15),
    ("stickershop", 15),
    ("obs.line-scdn.net", 10),
];

/// Class/id substrings that disqualify a candidate when found on any
/// ancestor within [`ANCESTOR_WALK_LEVELS`].
pub const EXCLUDED_ANCESTOR_MARKERS: &[&str] = &["related", "recommend", "similar", "sidebar"];

/// Section-heading texts that disqualify everything under that section.
pub const EXCLUDED_HEADING_MARKERS: &[&str] =
    &["related", "recommended", "similar", "sample", "preview"];

pub const ANCESTOR_WALK_LEVELS: u32 = 6;

/// Structural overlay indicators. These must stay valid CSS, they are fed
/// to `querySelectorAll` inside the probe script.
pub const POPUP_STRUCTURAL_INDICATORS: &[&str] = &[
    "[class*='popup']",
    "[class*='modal']",
    "[class*='overlay']",
    "[class*='dialog']",
    "[class*='banner']",
    "[class*='promotion']",
    "[class*='advertisement']",
    "[role='dialog']",
    "[role='alertdialog']",
    "[aria-modal='true']",
];

/// Texts that show up inside LINE STORE interstitials; checked against
/// element text content since CSS cannot express text matches.
pub const POPUP_TEXT_INDICATORS: &[&str] = &[
    "メッセージを長押し",
    "リアクション",
    "今すぐチェック",
    "閉じる",
    "キャンペーン",
];

/// Coordinates clicked during best-effort overlay cleanup; chosen to sit
/// outside any plausible modal.
pub const SAFE_CLICK_POSITIONS: &[(u32, u32)] = &[(10, 10), (100, 100), (10, 300)];

/// Locally-installed browser binaries tried when the bundled lookup fails.
pub const SYSTEM_CHROME_PATHS: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/usr/bin/google-chrome",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
];
