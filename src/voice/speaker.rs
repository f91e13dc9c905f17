//! 语音播报
//!
//! Speaker 接口：speak（等待播完）、speak_async（立即返回）、stop（立即打断）、is_playing。
//! 播报串行进行；stop 会打断正在播放的与排队中的所有播报。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::SpeechCommandSection;
use crate::core::AgentError;

#[async_trait]
pub trait Speaker: Send + Sync {
    /// 播报并等待结束（被 stop 打断也会返回）
    async fn speak(&self, text: &str);

    /// 后台播报，立即返回
    fn speak_async(&self, text: &str);

    /// 立即停止所有播报
    fn stop(&self);

    fn is_playing(&self) -> bool;
}

/// 把较长的描述截到 max_chars 个字符再播报
pub fn truncate_for_speech(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}

/// 只写日志的播报器；记录播报内容，供无音频环境与测试使用
#[derive(Debug, Default)]
pub struct LogSpeaker {
    spoken: Mutex<Vec<String>>,
    stops: AtomicUsize,
}

impl LogSpeaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    fn record(&self, text: &str) {
        tracing::info!(text = %text, "speak");
        if let Ok(mut s) = self.spoken.lock() {
            s.push(text.to_string());
        }
    }
}

#[async_trait]
impl Speaker for LogSpeaker {
    async fn speak(&self, text: &str) {
        self.record(text);
    }

    fn speak_async(&self, text: &str) {
        self.record(text);
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn is_playing(&self) -> bool {
        false
    }
}

/// 外部 TTS 程序播报：参数模板中 {{text}} 替换为播报文本，stop 时直接结束子进程
pub struct CommandSpeaker {
    inner: Arc<SpeakerInner>,
}

struct SpeakerInner {
    program: String,
    args_template: Vec<String>,
    /// 当前一代播报的令牌；stop 取消旧令牌并换新
    generation: Mutex<CancellationToken>,
    /// 串行播放
    playback: tokio::sync::Mutex<()>,
    active: AtomicUsize,
}

impl CommandSpeaker {
    pub fn new(section: &SpeechCommandSection) -> Self {
        Self {
            inner: Arc::new(SpeakerInner {
                program: section.program.clone(),
                args_template: section.args.clone(),
                generation: Mutex::new(CancellationToken::new()),
                playback: tokio::sync::Mutex::new(()),
                active: AtomicUsize::new(0),
            }),
        }
    }
}

impl SpeakerInner {
    fn current_token(&self) -> CancellationToken {
        self.generation
            .lock()
            .map(|t| t.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn substitute(&self, text: &str) -> Vec<String> {
        self.args_template
            .iter()
            .map(|tpl| tpl.replace("{{text}}", text))
            .collect()
    }

    /// 启动一次 TTS 进程并等待结束；token 取消时结束子进程（不算失败）
    async fn run_program(&self, text: &str, token: &CancellationToken) -> Result<(), AgentError> {
        let mut child = Command::new(&self.program)
            .args(self.substitute(text))
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::SpeechError(format!("failed to start {}: {e}", self.program)))?;

        tokio::select! {
            _ = token.cancelled() => {
                if let Err(e) = child.kill().await {
                    tracing::debug!(error = %e, "speech process already gone");
                }
                tracing::info!("speech interrupted");
                Ok(())
            }
            status = child.wait() => {
                let status = status
                    .map_err(|e| AgentError::SpeechError(format!("wait for {} failed: {e}", self.program)))?;
                if status.success() {
                    Ok(())
                } else {
                    Err(AgentError::SpeechError(format!(
                        "{} exited with {:?}",
                        self.program,
                        status.code()
                    )))
                }
            }
        }
    }

    async fn play(self: Arc<Self>, text: String) {
        let token = self.current_token();
        self.active.fetch_add(1, Ordering::SeqCst);

        let _turn = tokio::select! {
            _ = token.cancelled() => {
                self.active.fetch_sub(1, Ordering::SeqCst);
                return;
            }
            turn = self.playback.lock() => turn,
        };

        if let Err(e) = self.run_program(&text, &token).await {
            tracing::warn!(error = %e, "speech failed");
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Speaker for CommandSpeaker {
    async fn speak(&self, text: &str) {
        Arc::clone(&self.inner).play(text.to_string()).await;
    }

    fn speak_async(&self, text: &str) {
        tokio::spawn(Arc::clone(&self.inner).play(text.to_string()));
    }

    fn stop(&self) {
        let mut generation = match self.inner.generation.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        generation.cancel();
        *generation = CancellationToken::new();
    }

    fn is_playing(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_truncate_for_speech() {
        let long = "字".repeat(250);
        let short = truncate_for_speech(&long, 200);
        assert_eq!(short.chars().count(), 203);
        assert!(short.ends_with("..."));
        assert_eq!(truncate_for_speech("好的", 200), "好的");
    }

    #[tokio::test]
    async fn test_log_speaker_records() {
        let speaker = LogSpeaker::new();
        speaker.speak_async("我在");
        speaker.speak("好的，让我来处理").await;
        speaker.stop();
        assert_eq!(speaker.spoken(), vec!["我在", "好的，让我来处理"]);
        assert_eq!(speaker.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_program_is_speech_error() {
        let speaker = CommandSpeaker::new(&SpeechCommandSection {
            program: "xiaozhi-no-such-tts-program".into(),
            args: vec!["{{text}}".into()],
        });
        let err = speaker
            .inner
            .run_program("你好", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::SpeechError(ref m) if m.contains("failed to start")));
        // 播报失败只记录日志
        speaker.speak("你好").await;
        assert!(!speaker.is_playing());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_speech_error() {
        let speaker = CommandSpeaker::new(&SpeechCommandSection {
            program: "false".into(),
            args: vec![],
        });
        let err = speaker
            .inner
            .run_program("你好", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exited with"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_interrupts_playback() {
        let speaker = Arc::new(CommandSpeaker::new(&SpeechCommandSection {
            program: "sleep".into(),
            args: vec!["{{text}}".into()],
        }));
        let playing = {
            let speaker = Arc::clone(&speaker);
            tokio::spawn(async move { speaker.speak("10").await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(speaker.is_playing());

        speaker.stop();
        tokio::time::timeout(Duration::from_secs(2), playing)
            .await
            .unwrap()
            .unwrap();
        assert!(!speaker.is_playing());
    }
}
