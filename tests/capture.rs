use std::{path::PathBuf, time::Duration};

use headless_chrome::{browser::default_executable, Browser, LaunchOptions};
use stickergrab::{
    runner::{CaptureRequest, Runner},
    types::Engine,
};

macro_rules! aw {
    ($e:expr) => {
        tokio_test::block_on($e)
    };
}

/*
RUST_LOG=debug cargo test --test capture -- capture_product_page --exact --ignored
*/
#[test]
#[ignore = "hits store.line.me and needs a local chrome"]
fn capture_product_page() -> anyhow::Result<()> {
    env_logger::init();
    let request = CaptureRequest::default_builder()
        .url("https://store.line.me/stickershop/product/4891267/ja")
        .output_dir(PathBuf::from("output"))
        .engine(Engine::Auto)
        .headless(true)
        .popup_wait_secs(10u64)
        .build()?;

    let result = aw!(Runner::new(request).capture(None));
    println!("{result:#?}");

    assert!(result.success);
    assert!(result.captured_count > 0);
    assert!(result.captured_count <= result.total_elements);
    let dir = result.output_dir.unwrap();
    assert!(dir.join("0001.png").exists());
    assert!(dir.join("meta.json").exists());
    Ok(())
}

#[test]
#[ignore = "needs a local chrome"]
fn headless_chrome() -> anyhow::Result<()> {
    env_logger::init();
    let options = LaunchOptions::default_builder()
        .path(Some(default_executable().unwrap()))
        .window_size(Some((1200, 800)))
        .idle_browser_timeout(Duration::from_secs(45))
        .sandbox(true)
        .build()
        .expect("Couldn't find appropriate Chrome binary.");
    let browser = Browser::new(options)?;
    let ctx = browser.new_context()?;
    let tab = ctx.new_tab()?;
    let nv = tab.navigate_to("https://store.line.me/stickershop/product/4891267/ja")?;
    nv.wait_until_navigated()?;
    let elems = nv.find_elements("img")?;
    println!("{} images on the page", elems.len());

    Ok(())
}
