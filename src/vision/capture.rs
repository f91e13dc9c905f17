//! 截图
//!
//! 截图由外部程序完成（[capture] program + args），参数模板中 `{{path}}` 替换为输出 PNG 路径，
//! `{{scope}}` 替换为 browser / active / full。执行时无 shell，直接 exec。

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::CaptureSection;
use crate::core::AgentError;

/// 截图范围；当前窗口优先于全屏，控制图片大小与费用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureScope {
    Browser,
    ActiveWindow,
    FullScreen,
}

const BROWSER_TERMS: &[&str] = &["浏览器", "网页", "页面", "browser", "web page", "webpage"];
const FULL_SCREEN_TERMS: &[&str] = &["全屏", "整个屏幕", "所有屏幕", "full screen", "whole screen", "entire screen"];

impl CaptureScope {
    /// 从命令文本推断范围：提到浏览器 / 网页取浏览器窗口，明确说全屏才截全屏，否则当前窗口
    pub fn infer(text: &str) -> Self {
        let text = text.to_lowercase();
        if BROWSER_TERMS.iter().any(|t| text.contains(t)) {
            CaptureScope::Browser
        } else if FULL_SCREEN_TERMS.iter().any(|t| text.contains(t)) {
            CaptureScope::FullScreen
        } else {
            CaptureScope::ActiveWindow
        }
    }

    /// 模板中的 {{scope}}
    pub fn as_arg(&self) -> &'static str {
        match self {
            CaptureScope::Browser => "browser",
            CaptureScope::ActiveWindow => "active",
            CaptureScope::FullScreen => "full",
        }
    }

    /// 播报用名称
    pub fn display_name(&self) -> &'static str {
        match self {
            CaptureScope::Browser => "浏览器窗口",
            CaptureScope::ActiveWindow => "当前窗口",
            CaptureScope::FullScreen => "整个屏幕",
        }
    }

    pub fn question(&self) -> &'static str {
        match self {
            CaptureScope::Browser => "请描述浏览器中显示的内容",
            CaptureScope::ActiveWindow => "请描述窗口中的内容",
            CaptureScope::FullScreen => "请描述屏幕上的所有内容",
        }
    }
}

/// 截图器：把指定范围保存为 PNG 到 path
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    async fn capture(&self, scope: CaptureScope, path: &Path) -> Result<(), AgentError>;
}

/// 外部程序截图
pub struct CommandCapture {
    program: Option<String>,
    args_template: Vec<String>,
    timeout: Duration,
}

impl CommandCapture {
    pub fn new(section: &CaptureSection) -> Self {
        Self {
            program: section.program.clone(),
            args_template: section.args.clone(),
            timeout: Duration::from_secs(15),
        }
    }

    fn substitute(&self, scope: CaptureScope, path: &Path) -> Vec<String> {
        let path_str = path.to_string_lossy();
        self.args_template
            .iter()
            .map(|tpl| {
                tpl.replace("{{path}}", &path_str)
                    .replace("{{scope}}", scope.as_arg())
            })
            .collect()
    }
}

#[async_trait]
impl ScreenCapture for CommandCapture {
    async fn capture(&self, scope: CaptureScope, path: &Path) -> Result<(), AgentError> {
        let Some(program) = &self.program else {
            return Err(AgentError::CaptureError(
                "no screenshot program configured ([capture] program)".to_string(),
            ));
        };
        let args = self.substitute(scope, path);
        tracing::info!(program = %program, scope = scope.as_arg(), "capturing screen");

        let child = Command::new(program)
            .args(&args)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::CaptureError(format!("spawn failed: {e}")))?;
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                AgentError::CaptureError(format!("timeout after {}s", self.timeout.as_secs()))
            })?
            .map_err(|e| AgentError::CaptureError(format!("wait failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AgentError::CaptureError(format!(
                "exit {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }
        if !path.exists() {
            return Err(AgentError::CaptureError(format!(
                "program exited but {} was not written",
                path.display()
            )));
        }
        Ok(())
    }
}

/// 截图临时文件：离开作用域即删除（成功或失败都一样）
pub struct ScreenshotFile {
    path: PathBuf,
}

impl ScreenshotFile {
    /// 在 dir 下分配一个唯一文件名（不创建文件）
    pub fn allocate(dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(format!("screen-{}.png", uuid::Uuid::new_v4())),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScreenshotFile {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove screenshot");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_inference() {
        assert_eq!(CaptureScope::infer("看看网页上写了什么"), CaptureScope::Browser);
        assert_eq!(CaptureScope::infer("Describe the browser"), CaptureScope::Browser);
        assert_eq!(CaptureScope::infer("分析一下整个屏幕"), CaptureScope::FullScreen);
        assert_eq!(CaptureScope::infer("这个窗口显示的是什么"), CaptureScope::ActiveWindow);
        assert_eq!(CaptureScope::infer("看看"), CaptureScope::ActiveWindow);
    }

    #[test]
    fn test_substitute() {
        let capture = CommandCapture::new(&CaptureSection {
            program: Some("shot".into()),
            args: vec!["--scope={{scope}}".into(), "-o".into(), "{{path}}".into()],
        });
        let args = capture.substitute(CaptureScope::FullScreen, Path::new("/tmp/s.png"));
        assert_eq!(args, vec!["--scope=full", "-o", "/tmp/s.png"]);
    }

    #[tokio::test]
    async fn test_unconfigured_capture_fails() {
        let capture = CommandCapture::new(&CaptureSection::default());
        let err = capture
            .capture(CaptureScope::ActiveWindow, Path::new("x.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::CaptureError(_)));
    }

    #[test]
    fn test_screenshot_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let file = ScreenshotFile::allocate(dir.path()).unwrap();
            std::fs::write(file.path(), b"png").unwrap();
            assert!(file.path().exists());
            file.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
