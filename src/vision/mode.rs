//! 视觉理解模式：截图 -> 视觉模型 -> 描述
//!
//! 单次执行，不重试；截图文件无论成败都会删除。播报由 ExecutionSupervisor 负责。

use std::path::PathBuf;
use std::sync::Arc;

use crate::core::AgentError;
use crate::vision::{CaptureScope, ScreenCapture, ScreenshotFile, VisionClient};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisualOutcome {
    Described { scope: CaptureScope, description: String },
    Failed { scope: CaptureScope, reason: String },
}

impl VisualOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, VisualOutcome::Described { .. })
    }
}

pub struct VisualMode {
    capture: Arc<dyn ScreenCapture>,
    vision: Arc<dyn VisionClient>,
    screenshot_dir: PathBuf,
}

impl VisualMode {
    pub fn new(
        capture: Arc<dyn ScreenCapture>,
        vision: Arc<dyn VisionClient>,
        screenshot_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            capture,
            vision,
            screenshot_dir: screenshot_dir.into(),
        }
    }

    /// 按命令文本推断范围并执行
    pub async fn run(&self, text: &str) -> VisualOutcome {
        let scope = CaptureScope::infer(text);
        match self.describe(scope, text).await {
            Ok(description) => {
                tracing::info!(scope = scope.as_arg(), chars = description.chars().count(), "screen understood");
                VisualOutcome::Described { scope, description }
            }
            Err(e) => {
                tracing::error!(scope = scope.as_arg(), error = %e, "visual understanding failed");
                VisualOutcome::Failed {
                    scope,
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn describe(&self, scope: CaptureScope, text: &str) -> Result<String, AgentError> {
        let shot = ScreenshotFile::allocate(&self.screenshot_dir)
            .map_err(|e| AgentError::CaptureError(format!("screenshot dir: {e}")))?;
        self.capture.capture(scope, shot.path()).await?;

        let image = tokio::fs::read(shot.path())
            .await
            .map_err(|e| AgentError::CaptureError(format!("read screenshot: {e}")))?;
        let question = format!("{}。用户的原话：{}", scope.question(), text.trim());
        self.vision.describe(&image, "image/png", &question).await
    }
}
