//! 执行监管：单飞门闩、中断握手、播报
//!
//! - 同一时间最多一条命令在执行；门闩被占用时新命令直接丢弃（记录日志，不排队）。
//! - 门闩以 RAII 票据持有：命令正常结束、中止或 panic（任务 future 被丢弃）都会释放，且只释放一次。
//! - 唤醒时先停止播报；若有命令在执行则取消它，新的话语丢弃。
//! - 播报：开始确认、成功时播报最终回答、失败或步数耗尽时致歉；被中断的命令不再播报。

use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, PhrasesSection};
use crate::core::router::{TaskMode, TaskRouter};
use crate::react::{react_loop, CommandOutcome, Planner, ReactResult, ReactSession};
use crate::tools::ToolExecutor;
use crate::vision::{CaptureScope, VisualMode, VisualOutcome};
use crate::voice::{truncate_for_speech, Recognition, Speaker};

/// 监管层的播报与步数设置
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub enable_voice: bool,
    pub max_steps: usize,
    pub speak_preview_chars: usize,
    pub phrases: PhrasesSection,
}

impl SupervisorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            enable_voice: config.app.enable_voice,
            max_steps: config.agent.max_steps,
            speak_preview_chars: config.voice.speak_preview_chars,
            phrases: config.voice.phrases.clone(),
        }
    }
}

/// 一条命令的执行许可；Drop 时释放门闩
pub struct CommandTicket {
    token: CancellationToken,
    current: Arc<Mutex<Option<CancellationToken>>>,
    _guard: OwnedMutexGuard<()>,
}

impl CommandTicket {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for CommandTicket {
    fn drop(&mut self) {
        // 先清掉当前令牌，再由 _guard 释放门闩
        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }
        tracing::debug!("execution gate released");
    }
}

/// 一条命令的结果
#[derive(Debug)]
pub enum CommandReport {
    Actuation(ReactResult),
    Informational(VisualOutcome),
}

impl CommandReport {
    pub fn is_success(&self) -> bool {
        match self {
            CommandReport::Actuation(r) => r.outcome.is_success(),
            CommandReport::Informational(v) => v.is_success(),
        }
    }
}

pub struct ExecutionSupervisor {
    gate: Arc<tokio::sync::Mutex<()>>,
    current: Arc<Mutex<Option<CancellationToken>>>,
    router: TaskRouter,
    planner: Planner,
    executor: ToolExecutor,
    visual: VisualMode,
    speaker: Arc<dyn Speaker>,
    settings: SupervisorSettings,
}

impl ExecutionSupervisor {
    pub fn new(
        router: TaskRouter,
        planner: Planner,
        executor: ToolExecutor,
        visual: VisualMode,
        speaker: Arc<dyn Speaker>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            gate: Arc::new(tokio::sync::Mutex::new(())),
            current: Arc::new(Mutex::new(None)),
            router,
            planner,
            executor,
            visual,
            speaker,
            settings,
        }
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    /// 非阻塞获取执行许可；已有命令在执行时返回 None
    pub fn try_begin(&self) -> Option<CommandTicket> {
        let guard = Arc::clone(&self.gate).try_lock_owned().ok()?;
        let token = CancellationToken::new();
        if let Ok(mut current) = self.current.lock() {
            *current = Some(token.clone());
        }
        Some(CommandTicket {
            token,
            current: Arc::clone(&self.current),
            _guard: guard,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    /// 请求中断正在执行的命令；没有命令在执行时返回 false
    pub fn interrupt(&self) -> bool {
        let token = self.current.lock().ok().and_then(|c| c.clone());
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// 处理一次唤醒
    pub fn handle_wake(self: &Arc<Self>, recognition: Recognition) -> Option<JoinHandle<CommandReport>> {
        self.speaker.stop();

        if self.is_busy() {
            self.interrupt();
            tracing::info!(?recognition, "wake while a command is running: interrupted it, new utterance dropped");
            return None;
        }

        match recognition {
            Recognition::NoSpeech => {
                tracing::info!("wake without speech");
                self.narrate_async(&self.settings.phrases.not_heard);
                None
            }
            Recognition::Utterance(text) => {
                self.narrate_async(&self.settings.phrases.wake_reply);
                self.dispatch(text)
            }
        }
    }

    /// 在独立任务中执行命令；忙时丢弃
    pub fn dispatch(self: &Arc<Self>, text: String) -> Option<JoinHandle<CommandReport>> {
        let Some(ticket) = self.try_begin() else {
            tracing::warn!(command = %text, "a command is already running, dropping new command");
            return None;
        };
        let this = Arc::clone(self);
        Some(tokio::spawn(async move { this.run_command(ticket, &text).await }))
    }

    /// 路由并执行一条命令，持有 ticket 直到播报结束
    pub async fn run_command(&self, ticket: CommandTicket, text: &str) -> CommandReport {
        let mode = self.router.classify(text);
        tracing::info!(command = %text, ?mode, "executing command");

        let report = match mode {
            TaskMode::Actuation => {
                self.narrate_async(&self.settings.phrases.acknowledge);
                let session = ReactSession::new(
                    &self.planner,
                    &self.executor,
                    ticket.token().clone(),
                    self.settings.max_steps,
                );
                let result = react_loop(&session, text).await;
                self.narrate_actuation(&result.outcome).await;
                CommandReport::Actuation(result)
            }
            TaskMode::Informational => {
                let scope = CaptureScope::infer(text);
                self.narrate_async(
                    &self
                        .settings
                        .phrases
                        .looking
                        .replace("{target}", scope.display_name()),
                );
                let outcome = self.visual.run(text).await;
                if ticket.token().is_cancelled() {
                    tracing::info!("visual result discarded, command was interrupted");
                } else {
                    self.narrate_visual(&outcome).await;
                }
                CommandReport::Informational(outcome)
            }
        };

        drop(ticket);
        report
    }

    async fn narrate_actuation(&self, outcome: &CommandOutcome) {
        match outcome {
            CommandOutcome::Completed { message, .. } => self.narrate(message).await,
            CommandOutcome::ThinkingFailed { .. } | CommandOutcome::BudgetExhausted { .. } => {
                self.narrate(&self.settings.phrases.apology).await
            }
            CommandOutcome::Interrupted { .. } => {}
        }
    }

    async fn narrate_visual(&self, outcome: &VisualOutcome) {
        match outcome {
            VisualOutcome::Described { description, .. } => {
                let spoken = truncate_for_speech(description, self.settings.speak_preview_chars);
                self.narrate(&spoken).await
            }
            VisualOutcome::Failed { .. } => self.narrate(&self.settings.phrases.vision_apology).await,
        }
    }

    async fn narrate(&self, text: &str) {
        if self.settings.enable_voice {
            self.speaker.speak(text).await;
        } else {
            tracing::info!(text = %text, "voice disabled, not speaking");
        }
    }

    fn narrate_async(&self, text: &str) {
        if self.settings.enable_voice {
            self.speaker.speak_async(text);
        } else {
            tracing::info!(text = %text, "voice disabled, not speaking");
        }
    }

    /// 中断当前命令、停止播报并关闭所有工具服务
    pub async fn shutdown(&self) {
        self.interrupt();
        self.speaker.stop();
        self.executor.registry().stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouterSection;
    use crate::llm::MockLlmClient;
    use crate::tools::{FnTool, LocalProvider, ProviderSpec, ToolRegistry};
    use crate::vision::{CommandCapture, MockVisionClient};
    use crate::voice::LogSpeaker;
    use std::time::Duration;

    async fn supervisor(llm: MockLlmClient, speaker: Arc<LogSpeaker>) -> Arc<ExecutionSupervisor> {
        let provider = LocalProvider::new("desktop").with_tool(FnTool::new(
            "App-Tool",
            "Manage applications",
            |_| Ok("launched".into()),
        ));
        let registry = ToolRegistry::start(vec![ProviderSpec::new(
            Arc::new(provider),
            true,
            Duration::from_secs(5),
        )])
        .await
        .unwrap();
        let visual = VisualMode::new(
            Arc::new(CommandCapture::new(&Default::default())),
            Arc::new(MockVisionClient::failing()),
            std::env::temp_dir(),
        );
        Arc::new(ExecutionSupervisor::new(
            TaskRouter::new(&RouterSection::default()),
            Planner::new(Arc::new(llm), 3),
            ToolExecutor::new(Arc::new(registry), 5),
            visual,
            speaker,
            SupervisorSettings::from_config(&AppConfig::default()),
        ))
    }

    #[tokio::test]
    async fn test_ticket_is_exclusive_and_released() {
        let sup = supervisor(MockLlmClient::new(), Arc::new(LogSpeaker::new())).await;
        let ticket = sup.try_begin().unwrap();
        assert!(sup.is_busy());
        assert!(sup.try_begin().is_none());
        drop(ticket);
        assert!(!sup.is_busy());
        assert!(!sup.interrupt());
    }

    #[tokio::test]
    async fn test_actuation_narration() {
        let speaker = Arc::new(LogSpeaker::new());
        let llm = MockLlmClient::with_responses([
            "Thought: open it\nAction: App-Tool\nAction Input: {\"action\": \"launch\", \"app_name\": \"calculator\"}",
            "Final Answer: 计算器已打开",
        ]);
        let sup = supervisor(llm, speaker.clone()).await;
        let report = sup
            .handle_wake(Recognition::Utterance("打开计算器".into()))
            .unwrap()
            .await
            .unwrap();
        assert!(report.is_success());
        assert_eq!(speaker.spoken(), vec!["我在", "好的，让我来处理", "计算器已打开"]);
        assert!(!sup.is_busy());
    }

    #[tokio::test]
    async fn test_budget_exhausted_apologises() {
        let speaker = Arc::new(LogSpeaker::new());
        let llm = MockLlmClient::repeating("Thought: again\nAction: App-Tool\nAction Input: {}");
        let sup = supervisor(llm, speaker.clone()).await;
        let report = sup.dispatch("open everything".into()).unwrap().await.unwrap();
        assert!(!report.is_success());
        assert_eq!(speaker.spoken().last().map(String::as_str), Some("抱歉，任务未能完成"));
    }

    #[tokio::test]
    async fn test_visual_failure_apologises() {
        let speaker = Arc::new(LogSpeaker::new());
        let sup = supervisor(MockLlmClient::new(), speaker.clone()).await;
        let report = sup.dispatch("describe this window".into()).unwrap().await.unwrap();
        assert!(matches!(report, CommandReport::Informational(VisualOutcome::Failed { .. })));
        assert_eq!(speaker.spoken(), vec!["正在为您查看当前窗口", "抱歉，我没能看清屏幕内容"]);
    }

    #[tokio::test]
    async fn test_no_speech() {
        let speaker = Arc::new(LogSpeaker::new());
        let sup = supervisor(MockLlmClient::new(), speaker.clone()).await;
        assert!(sup.handle_wake(Recognition::NoSpeech).is_none());
        assert_eq!(speaker.spoken(), vec!["抱歉，我没听清"]);
        assert_eq!(speaker.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_wake_while_busy_interrupts_and_drops() {
        let speaker = Arc::new(LogSpeaker::new());
        let sup = supervisor(MockLlmClient::new(), speaker.clone()).await;
        let ticket = sup.try_begin().unwrap();
        assert!(sup.handle_wake(Recognition::Utterance("打开记事本".into())).is_none());
        assert!(ticket.token().is_cancelled());
        assert!(speaker.spoken().is_empty());
    }

    #[tokio::test]
    async fn test_voice_disabled_is_silent() {
        let speaker = Arc::new(LogSpeaker::new());
        let mut sup = supervisor(MockLlmClient::new(), speaker.clone()).await;
        Arc::get_mut(&mut sup).unwrap().settings.enable_voice = false;
        sup.dispatch("打开计算器".into()).unwrap().await.unwrap();
        assert!(speaker.spoken().is_empty());
    }
}
