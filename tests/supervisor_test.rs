//! 执行监管集成测试：单飞门闩、中断、监听循环

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::Notify;
    use xiaozhi::agent::{build_supervisor, run_listener};
    use xiaozhi::config::AppConfig;
    use xiaozhi::core::{
        AgentError, CommandReport, ExecutionSupervisor, SupervisorSettings, TaskRouter,
    };
    use xiaozhi::llm::MockLlmClient;
    use xiaozhi::react::{CommandOutcome, Planner};
    use xiaozhi::tools::{FnTool, LocalProvider, ProviderSpec, Tool, ToolExecutor, ToolRegistry};
    use xiaozhi::vision::{
        CaptureScope, MockVisionClient, ScreenCapture, VisualMode, VisualOutcome,
    };
    use xiaozhi::voice::{LogSpeaker, Recognition, ScriptedRecognizer, Speaker};

    const LAUNCH: &str = "Thought: launch it\nAction: App-Tool\nAction Input: {\"action\": \"launch\", \"app_name\": \"calculator\"}";

    /// 在 release 之前一直阻塞的工具
    struct GatedTool {
        release: Arc<Notify>,
        started: Arc<Notify>,
    }

    #[async_trait]
    impl Tool for GatedTool {
        fn name(&self) -> &str {
            "App-Tool"
        }

        fn description(&self) -> &str {
            "Manage applications"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            self.started.notify_one();
            self.release.notified().await;
            Ok("launched".into())
        }
    }

    /// speak_async 直接 panic，模拟命令任务崩溃
    struct PanickingSpeaker {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Speaker for PanickingSpeaker {
        async fn speak(&self, _text: &str) {}

        fn speak_async(&self, _text: &str) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            panic!("audio device lost");
        }

        fn stop(&self) {}

        fn is_playing(&self) -> bool {
            false
        }
    }

    /// 写一个假 PNG 并记下截图范围
    #[derive(Default)]
    struct FakeCapture {
        scopes: std::sync::Mutex<Vec<CaptureScope>>,
    }

    #[async_trait]
    impl ScreenCapture for FakeCapture {
        async fn capture(&self, scope: CaptureScope, path: &Path) -> Result<(), AgentError> {
            self.scopes.lock().unwrap().push(scope);
            tokio::fs::write(path, b"\x89PNG fake")
                .await
                .map_err(|e| AgentError::CaptureError(e.to_string()))
        }
    }

    fn config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.app.data_dir = std::env::temp_dir().join("xiaozhi-supervisor-test");
        cfg.agent.max_steps = 5;
        cfg
    }

    async fn supervisor_with(
        llm: MockLlmClient,
        speaker: Arc<dyn Speaker>,
        provider: LocalProvider,
    ) -> Arc<ExecutionSupervisor> {
        build_supervisor(
            &config(),
            Arc::new(llm),
            Arc::new(MockVisionClient::replying("屏幕上是一个计算器窗口")),
            speaker,
            vec![ProviderSpec::new(Arc::new(provider), true, Duration::from_secs(5))],
        )
        .await
        .unwrap()
    }

    fn app_provider() -> LocalProvider {
        LocalProvider::new("desktop").with_tool(FnTool::new("App-Tool", "Manage applications", |_| {
            Ok("launched".into())
        }))
    }

    #[tokio::test]
    async fn test_second_command_rejected_while_running() {
        let release = Arc::new(Notify::new());
        let started = Arc::new(Notify::new());
        let provider = LocalProvider::new("desktop").with_tool(GatedTool {
            release: Arc::clone(&release),
            started: Arc::clone(&started),
        });
        let llm = MockLlmClient::with_responses([LAUNCH, "Final Answer: 已打开"]);
        let sup = supervisor_with(llm, Arc::new(LogSpeaker::new()), provider).await;

        let first = sup.dispatch("打开计算器".into()).unwrap();
        started.notified().await;

        assert!(sup.is_busy());
        assert!(sup.dispatch("打开记事本".into()).is_none());

        release.notify_one();
        let report = first.await.unwrap();
        assert!(report.is_success());
        assert!(!sup.is_busy());

        // 门闩释放后可以再次进入
        let ticket = sup.try_begin();
        assert!(ticket.is_some());
    }

    #[tokio::test]
    async fn test_gate_released_after_thinking_failure() {
        let llm = MockLlmClient::with_responses(["I am not sure what to do here."]);
        let sup = supervisor_with(llm, Arc::new(LogSpeaker::new()), app_provider()).await;

        let report = sup.dispatch("打开计算器".into()).unwrap().await.unwrap();

        match report {
            CommandReport::Actuation(result) => {
                assert!(matches!(result.outcome, CommandOutcome::ThinkingFailed { .. }))
            }
            other => panic!("unexpected report: {other:?}"),
        }
        assert!(!sup.is_busy());
    }

    #[tokio::test]
    async fn test_gate_released_after_panic() {
        let speaker = Arc::new(PanickingSpeaker {
            calls: AtomicUsize::new(0),
        });
        let sup = supervisor_with(MockLlmClient::new(), speaker.clone(), app_provider()).await;

        let handle = sup.dispatch("打开计算器".into()).unwrap();
        let joined = handle.await;

        assert!(joined.is_err());
        assert_eq!(speaker.calls.load(Ordering::SeqCst), 1);
        assert!(!sup.is_busy());
        assert!(sup.try_begin().is_some());
    }

    #[tokio::test]
    async fn test_wake_interrupts_running_command() {
        let release = Arc::new(Notify::new());
        let started = Arc::new(Notify::new());
        let provider = LocalProvider::new("desktop").with_tool(GatedTool {
            release: Arc::clone(&release),
            started: Arc::clone(&started),
        });
        let llm = MockLlmClient::repeating(LAUNCH);
        let speaker = Arc::new(LogSpeaker::new());
        let sup = supervisor_with(llm, speaker.clone(), provider).await;

        let first = sup
            .handle_wake(Recognition::Utterance("打开计算器".into()))
            .unwrap();
        started.notified().await;

        // 第二次唤醒：打断，不开始新命令
        assert!(sup
            .handle_wake(Recognition::Utterance("打开浏览器".into()))
            .is_none());
        release.notify_one();

        let report = first.await.unwrap();
        match report {
            CommandReport::Actuation(result) => {
                assert_eq!(result.outcome, CommandOutcome::Interrupted { steps: 1 })
            }
            other => panic!("unexpected report: {other:?}"),
        }
        assert!(!sup.is_busy());
        // 被中断的命令不播报结果
        assert_eq!(speaker.spoken(), vec!["我在", "好的，让我来处理"]);
    }

    #[tokio::test]
    async fn test_listener_runs_scripted_session() {
        let speaker = Arc::new(LogSpeaker::new());
        let llm = MockLlmClient::with_responses([LAUNCH, "Final Answer: 计算器已打开"]);
        let sup = supervisor_with(llm, speaker.clone(), app_provider()).await;
        let mut recognizer = ScriptedRecognizer::new([
            Recognition::NoSpeech,
            Recognition::Utterance("打开计算器".into()),
        ]);

        let reports = run_listener(&mut recognizer, &sup).await;

        assert_eq!(reports.len(), 1);
        assert!(reports[0].is_success());
        assert_eq!(
            speaker.spoken(),
            vec!["抱歉，我没听清", "我在", "好的，让我来处理", "计算器已打开"]
        );
        assert!(!sup.is_busy());
    }

    #[tokio::test]
    async fn test_informational_capture_failure_apologises() {
        let speaker = Arc::new(LogSpeaker::new());
        let sup = supervisor_with(MockLlmClient::new(), speaker.clone(), app_provider()).await;

        let report = sup.dispatch("帮我看看屏幕".into()).unwrap().await.unwrap();

        // 未配置截图程序：截图失败，致歉
        assert!(!report.is_success());
        assert_eq!(
            speaker.spoken().last().map(String::as_str),
            Some("抱歉，我没能看清屏幕内容")
        );
    }

    #[tokio::test]
    async fn test_shutdown_closes_tools() {
        let sup = supervisor_with(MockLlmClient::new(), Arc::new(LogSpeaker::new()), app_provider()).await;
        sup.shutdown().await;
        let result = sup
            .executor()
            .execute("App-Tool", serde_json::json!({}))
            .await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_informational_command_speaks_truncated_description() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config();
        cfg.voice.speak_preview_chars = 10;
        let description = "窗".repeat(30);

        let registry = ToolRegistry::start(vec![ProviderSpec::new(
            Arc::new(app_provider()),
            true,
            Duration::from_secs(5),
        )])
        .await
        .unwrap();
        let capture = Arc::new(FakeCapture::default());
        let vision = Arc::new(MockVisionClient::replying(description.clone()));
        let speaker = Arc::new(LogSpeaker::new());
        let llm = Arc::new(MockLlmClient::new());
        let sup = Arc::new(ExecutionSupervisor::new(
            TaskRouter::new(&cfg.router),
            Planner::new(llm.clone(), cfg.agent.history_window),
            ToolExecutor::new(Arc::new(registry), cfg.agent.tool_timeout_secs),
            VisualMode::new(capture.clone(), vision.clone(), dir.path().join("screenshots")),
            speaker.clone(),
            SupervisorSettings::from_config(&cfg),
        ));

        let report = sup.dispatch("描述一下当前窗口".into()).unwrap().await.unwrap();

        match &report {
            CommandReport::Informational(VisualOutcome::Described { scope, description: seen }) => {
                assert_eq!(*scope, CaptureScope::ActiveWindow);
                // 报告保留完整描述，只有播报被截断
                assert_eq!(seen, &description);
            }
            other => panic!("unexpected report: {other:?}"),
        }
        assert_eq!(
            speaker.spoken(),
            vec![
                "正在为您查看当前窗口".to_string(),
                format!("{}...", "窗".repeat(10)),
            ]
        );
        assert_eq!(*capture.scopes.lock().unwrap(), vec![CaptureScope::ActiveWindow]);
        assert_eq!(vision.call_count(), 1);
        // 查看类命令不经过推理模型
        assert_eq!(llm.call_count(), 0);
        // 截图用完即删
        let left = std::fs::read_dir(dir.path().join("screenshots")).unwrap().count();
        assert_eq!(left, 0);
        assert!(!sup.is_busy());
    }
}
