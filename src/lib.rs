#[macro_use]
extern crate log;
#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate lazy_static;

pub mod browser_controller;
pub mod fetcher;
pub mod locator;
pub mod recorder;
pub mod runner;
pub mod selectors;
pub mod types;
pub mod utils;
