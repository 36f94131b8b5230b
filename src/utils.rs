use chrono::{DateTime, Local};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use std::{fs, path::PathBuf};

/// Fixed path shape every product page url must carry.
pub const PRODUCT_PATH: &str = "/stickershop/product/";
/// Full prefix used to detect url drift away from the product page.
pub const PRODUCT_URL_PREFIX: &str = "https://store.line.me/stickershop/product/";

/// Width token value requested for the higher-resolution image variant.
pub const HIGH_RES_WIDTH: u32 = 300;

pub const DIR_TS_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Extracts the numeric product id from a product page url.
/// Returns `None` when the url does not match
/// `…/stickershop/product/<digits>/…`.
pub fn extract_product_id(url: &str) -> Option<String> {
    let start = url.find(PRODUCT_PATH)? + PRODUCT_PATH.len();
    let rest = &url[start..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() || !rest[digits.len()..].starts_with('/') {
        return None;
    }
    Some(digits)
}

pub fn is_product_page(url: &str) -> bool {
    url.starts_with(PRODUCT_URL_PREFIX)
}

/// Rewrites an embedded width token (`/w/<n>` or `=w<n>`) to the fixed
/// high-resolution value. Urls without a width token pass through.
pub fn normalize_resolution(url: &str) -> String {
    for token in ["/w/", "=w"] {
        if let Some(pos) = url.find(token) {
            let digits_start = pos + token.len();
            let digits_len = url[digits_start..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .count();
            if digits_len > 0 {
                return format!(
                    "{}{}{}",
                    &url[..digits_start],
                    HIGH_RES_WIDTH,
                    &url[digits_start + digits_len..]
                );
            }
        }
    }
    url.to_string()
}

/// `<product_id>_<YYYYMMDD_HHMMSS>`, the per-run output directory name.
pub fn session_dir_name(product_id: &str, t: &DateTime<Local>) -> String {
    format!("{}_{}", product_id, t.format(DIR_TS_FORMAT))
}

/// Rewrites the trailing two-letter language segment of a product url,
/// e.g. `…/4891267/ja` to `…/4891267/en`.
pub fn override_language(url: &str, lang: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((head, tail)) if tail.len() == 2 && tail.chars().all(|c| c.is_ascii_lowercase()) => {
            format!("{}/{}", head, lang)
        }
        _ => url.to_string(),
    }
}

pub fn get_random_string(len: i32) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len as usize)
        .map(char::from)
        .collect()
}

pub fn create_random_tmp_folder() -> anyhow::Result<PathBuf> {
    let rand_folder_name: String = get_random_string(11);

    let path = std::env::temp_dir().join(format!("stickergrab-{}", rand_folder_name));
    fs::create_dir(&path)?;
    Ok(path)
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn extracts_product_id() {
        assert_eq!(
            extract_product_id("https://store.line.me/stickershop/product/4891267/ja"),
            Some("4891267".into())
        );
        assert_eq!(
            extract_product_id("https://store.line.me/stickershop/product/12345/en"),
            Some("12345".into())
        );
    }

    #[test]
    fn rejects_malformed_urls() {
        // no numeric id
        assert_eq!(
            extract_product_id("https://store.line.me/stickershop/product/abc/ja"),
            None
        );
        // id not followed by a path segment
        assert_eq!(
            extract_product_id("https://store.line.me/stickershop/product/12345"),
            None
        );
        assert_eq!(extract_product_id("https://store.line.me/themeshop/1/ja"), None);
        assert_eq!(extract_product_id(""), None);
    }

    #[test]
    fn rewrites_width_tokens() {
        assert_eq!(
            normalize_resolution("https://sdl-stickershop.line.naver.jp/products/0/0/1/4891267/android/stickers/1234.png;compress=true/w/96"),
            "https://sdl-stickershop.line.naver.jp/products/0/0/1/4891267/android/stickers/1234.png;compress=true/w/300"
        );
        assert_eq!(
            normalize_resolution("https://obs.line-scdn.net/sticker/1234=w120"),
            "https://obs.line-scdn.net/sticker/1234=w300"
        );
    }

    #[test]
    fn leaves_urls_without_width_token_alone() {
        let url = "https://obs.line-scdn.net/sticker/1234.png";
        assert_eq!(normalize_resolution(url), url);
    }

    #[test]
    fn session_dir_name_format() {
        let t = Local.with_ymd_and_hms(2023, 4, 5, 6, 7, 8).unwrap();
        assert_eq!(session_dir_name("4891267", &t), "4891267_20230405_060708");
    }

    #[test]
    fn overrides_trailing_language() {
        assert_eq!(
            override_language("https://store.line.me/stickershop/product/4891267/ja", "en"),
            "https://store.line.me/stickershop/product/4891267/en"
        );
        // urls without a language segment pass through
        assert_eq!(
            override_language("https://store.line.me/stickershop/product/4891267", "en"),
            "https://store.line.me/stickershop/product/4891267"
        );
    }

    #[test]
    fn creates_a_random_folder() {
        let p = create_random_tmp_folder().unwrap();
        assert!(p.exists());
        fs::remove_dir(p).unwrap();
    }
}
