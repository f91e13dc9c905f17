//! 视觉理解：截图、视觉模型、单次查看模式

pub mod capture;
pub mod client;
pub mod mode;

pub use capture::{CaptureScope, CommandCapture, ScreenCapture, ScreenshotFile};
pub use client::{MockVisionClient, OpenAiVisionClient, VisionClient};
pub use mode::{VisualMode, VisualOutcome};
