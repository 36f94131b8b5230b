use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

use crate::types::SessionMeta;
use crate::utils::session_dir_name;

pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Writes sequentially-numbered capture files plus the `meta.json`
/// summary into one timestamped directory. No business logic here.
pub struct SessionRecorder {
    output_dir: PathBuf,
    seq: u32,
}

impl SessionRecorder {
    pub fn create(base: &Path, product_id: &str, t: &DateTime<Local>) -> Result<Self> {
        let output_dir = base.join(session_dir_name(product_id, t));
        fs::create_dir_all(&output_dir)
            .context(format!("could not create output directory {:?}", output_dir))?;
        info!("output directory: {:?}", output_dir);
        Ok(SessionRecorder { output_dir, seq: 0 })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn captured_count(&self) -> usize {
        self.seq as usize
    }

    /// Writes the next numbered file, `0001.png` first. The sequence
    /// advances only on a successful write, so numbering stays gap-free
    /// when candidates fail.
    pub fn save_asset(&mut self, bytes: &[u8]) -> Result<PathBuf> {
        let filename = format!("{:04}.png", self.seq + 1);
        let path = self.output_dir.join(&filename);
        fs::write(&path, bytes).context(format!("could not write {:?}", path))?;
        self.seq += 1;
        debug!("saved {}", filename);
        Ok(path)
    }

    pub fn write_summary(&self, source_url: &str, product_id: &str) -> Result<PathBuf> {
        let meta = SessionMeta {
            timestamp: Local::now().to_rfc3339(),
            source_url: source_url.into(),
            product_id: product_id.into(),
            sticker_count: self.captured_count(),
            tool_version: TOOL_VERSION.into(),
        };
        let path = self.output_dir.join("meta.json");
        fs::write(&path, serde_json::to_string_pretty(&meta)?)
            .context(format!("could not write {:?}", path))?;
        info!("metadata saved to {:?}", path);
        Ok(path)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::utils::create_random_tmp_folder;
    use chrono::TimeZone;

    fn test_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2023, 4, 5, 6, 7, 8).unwrap()
    }

    #[test]
    fn numbering_counts_successes_only() {
        let base = create_random_tmp_folder().unwrap();
        let mut recorder = SessionRecorder::create(&base, "12345", &test_time()).unwrap();

        recorder.save_asset(b"a").unwrap();
        // a failed candidate never reaches save_asset; the next success
        // takes the next number with no gap
        recorder.save_asset(b"c").unwrap();

        assert!(recorder.output_dir().join("0001.png").exists());
        assert!(recorder.output_dir().join("0002.png").exists());
        assert!(!recorder.output_dir().join("0003.png").exists());
        assert_eq!(recorder.captured_count(), 2);

        fs::remove_dir_all(base).unwrap();
    }

    #[test]
    fn directory_creation_is_idempotent() {
        let base = create_random_tmp_folder().unwrap();
        let a = SessionRecorder::create(&base, "12345", &test_time()).unwrap();
        let b = SessionRecorder::create(&base, "12345", &test_time()).unwrap();
        assert_eq!(a.output_dir(), b.output_dir());
        assert!(a.output_dir().ends_with("12345_20230405_060708"));
        fs::remove_dir_all(base).unwrap();
    }

    #[test]
    fn summary_round_trips() {
        let base = create_random_tmp_folder().unwrap();
        let mut recorder = SessionRecorder::create(&base, "4891267", &test_time()).unwrap();
        recorder.save_asset(b"png").unwrap();

        let path = recorder
            .write_summary("https://store.line.me/stickershop/product/4891267/ja", "4891267")
            .unwrap();
        let meta: SessionMeta = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(meta.product_id, "4891267");
        assert_eq!(meta.sticker_count, 1);
        assert_eq!(meta.tool_version, TOOL_VERSION);
        assert_eq!(
            meta.source_url,
            "https://store.line.me/stickershop/product/4891267/ja"
        );

        fs::remove_dir_all(base).unwrap();
    }
}
