// THEORY:
// This file is the main entry point for the `ale_vision` library crate.
//
// The public face of the engine is `VisionPipeline`: feed it one palette-indexed
// frame and the action that produced it, and it maintains blobs, composite
// objects, prototype classes and the identity of the agent's own sprite.
// `InstancePool` runs many pipelines side by side for multi-instance training,
// `calibration` reads and writes reference masks, and `render` draws the
// tracked state for debugging. The layers themselves live in `core_modules`.

pub mod calibration;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;
pub mod render;

pub use core_modules::action::Action;
pub use core_modules::frame::{ColorIndex, Frame, Palette};
pub use error::{Result, VisionError};
pub use parallel_pipeline::InstancePool;
pub use pipeline::{FrameSummary, PipelineConfig, VisionPipeline};
