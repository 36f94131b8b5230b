use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use log::info;

use stickergrab::{
    runner::{CaptureRequest, Runner},
    types::Engine,
    utils::override_language,
};

#[derive(ValueEnum, Debug, Clone, Copy)]
enum EngineArg {
    /// Bundled chrome lookup, then known system install locations
    Auto,
    /// Known system install locations only
    System,
}

impl From<EngineArg> for Engine {
    fn from(arg: EngineArg) -> Self {
        match arg {
            EngineArg::Auto => Engine::Auto,
            EngineArg::System => Engine::System,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "LINE STORE sticker capture CLI", long_about = None)]
struct Args {
    /// Product page url, e.g. https://store.line.me/stickershop/product/4891267/ja
    #[arg(short = 'u', long)]
    url: String,
    /// Base directory the timestamped session directory goes under
    #[arg(short = 'o', long, default_value = "output")]
    outdir: PathBuf,
    /// Browser executable lookup order
    #[arg(long, value_enum, default_value_t = EngineArg::Auto)]
    engine: EngineArg,
    /// Explicit browser binary, tried before any lookup
    #[arg(long)]
    browser_path: Option<PathBuf>,
    /// Run the browser headless (pass false to watch the capture)
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    headless: bool,
    /// Seconds to wait for interstitial popups to go away
    #[arg(long, default_value_t = 30)]
    popup_wait: u64,
    /// Override the page language segment of the url (e.g. ja, en)
    #[arg(long)]
    lang: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();

    let mut url = args.url.clone();
    if let Some(lang) = &args.lang {
        url = override_language(&url, lang);
        info!("language override: {}", lang);
    }

    let request = CaptureRequest::default_builder()
        .url(url)
        .output_dir(args.outdir)
        .engine(Engine::from(args.engine))
        .browser_path(args.browser_path)
        .headless(args.headless)
        .popup_wait_secs(args.popup_wait)
        .build()?;

    let progress = |step: u32, total: u32, msg: &str| {
        info!("[{:3}/{}] {}", step, total, msg);
    };

    let result = Runner::new(request).capture(Some(&progress)).await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        std::process::exit(1);
    }

    Ok(())
}
