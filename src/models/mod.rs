//! Model components not provided by the base diffusion ecosystem.

pub mod controlnet;
pub mod motion;

pub use controlnet::{ControlNetConfig, ControlNetModel, MultiControlNet};
pub use motion::{MotionAdapter, MotionAdapterConfig};
