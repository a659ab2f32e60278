//! Animate-Video: conditioned video generation on Candle.
//!
//! This crate assembles a stable-diffusion base model, a motion adapter and
//! an ordered set of conditioning networks into a single pipeline that turns
//! a YAML run configuration plus conditioning GIFs into an animated GIF.

pub mod config;
pub mod frames;
pub mod loader;
pub mod lora;
pub mod models;
pub mod pipeline;
pub mod scheduler;
pub mod staging;
pub mod utils;

pub use config::GenerationConfig;
pub use pipeline::{GenerationParams, SchedulerKind, VideoPipeline};
