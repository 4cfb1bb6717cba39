pub mod analyzer;
pub mod cancel;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod constants;
pub mod decoder;
pub mod inference;
pub mod logging;
pub mod mapper;
pub mod metadata;
pub mod meter;
pub mod pipeline;
pub mod plausibility;
pub mod tracker;
pub mod util;
