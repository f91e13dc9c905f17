//! 助手装配与监听循环
//!
//! 按配置创建推理模型、视觉模型、播报器与工具服务，组装为 ExecutionSupervisor；
//! run_listener 持续消费唤醒事件，每条命令在独立任务中执行，监听本身不被阻塞。

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::{AppConfig, DASHSCOPE_BASE_URL};
use crate::core::{AgentError, CommandReport, ExecutionSupervisor, SupervisorSettings, TaskRouter};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::react::Planner;
use crate::tools::{McpProvider, ProviderSpec, ToolDescriptor, ToolExecutor, ToolRegistry};
use crate::vision::{CommandCapture, MockVisionClient, OpenAiVisionClient, VisionClient, VisualMode};
use crate::voice::{CommandSpeaker, LogSpeaker, Recognizer, Speaker};

fn api_key(cfg: &AppConfig) -> Option<String> {
    std::env::var(&cfg.llm.api_key_env)
        .ok()
        .filter(|k| !k.trim().is_empty())
}

/// 有 API Key 时使用 OpenAI 兼容端点，否则 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    match api_key(cfg) {
        Some(key) => {
            tracing::info!(model = %cfg.llm.model, "Using OpenAI-compatible LLM");
            Arc::new(OpenAiClient::from_section(&cfg.llm, &key))
        }
        None => {
            tracing::warn!(env = %cfg.llm.api_key_env, "No API key set, using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
    }
}

/// 视觉端点未单独配置时沿用 [llm] 的 base_url
pub fn create_vision_from_config(cfg: &AppConfig) -> Arc<dyn VisionClient> {
    let base_url = cfg
        .vision
        .base_url
        .as_deref()
        .or(cfg.llm.base_url.as_deref())
        .unwrap_or(DASHSCOPE_BASE_URL);
    let client = api_key(cfg)
        .ok_or_else(|| AgentError::ConfigError(format!("{} not set", cfg.llm.api_key_env)))
        .and_then(|key| OpenAiVisionClient::new(&cfg.vision, base_url, key));
    match client {
        Ok(client) => {
            tracing::info!(model = %cfg.vision.model, "Using OpenAI-compatible vision model");
            Arc::new(client)
        }
        Err(e) => {
            tracing::warn!(error = %e, "vision model unavailable, visual commands will apologise");
            Arc::new(MockVisionClient::failing())
        }
    }
}

pub fn create_speaker_from_config(cfg: &AppConfig) -> Arc<dyn Speaker> {
    match &cfg.voice.speech {
        Some(speech) => {
            tracing::info!(program = %speech.program, "Using external speech program");
            Arc::new(CommandSpeaker::new(speech))
        }
        None => Arc::new(LogSpeaker::new()),
    }
}

/// [[providers]] -> MCP provider 启动参数（保持配置顺序）
pub fn provider_specs(cfg: &AppConfig) -> Vec<ProviderSpec> {
    cfg.providers
        .iter()
        .map(|entry| {
            ProviderSpec::new(
                Arc::new(McpProvider::new(entry)),
                entry.required,
                Duration::from_secs(entry.startup_timeout_secs),
            )
        })
        .collect()
}

/// 工具目录摘要：序号、名称、描述前 50 个字符
pub fn catalog_listing(tools: &[ToolDescriptor]) -> String {
    let mut out = format!("{} tools available:", tools.len());
    for (i, tool) in tools.iter().enumerate() {
        let desc: String = tool.description.chars().take(50).collect();
        out.push_str(&format!("\n  {}. {}: {}", i + 1, tool.name, desc));
    }
    out
}

/// 用给定组件组装监管者；工具服务在此启动
pub async fn build_supervisor(
    cfg: &AppConfig,
    llm: Arc<dyn LlmClient>,
    vision: Arc<dyn VisionClient>,
    speaker: Arc<dyn Speaker>,
    specs: Vec<ProviderSpec>,
) -> Result<Arc<ExecutionSupervisor>, AgentError> {
    let registry = ToolRegistry::start(specs).await?;
    tracing::info!("{}", catalog_listing(registry.list_all_tools()));
    if !registry.unavailable_providers().is_empty() {
        tracing::warn!(providers = ?registry.unavailable_providers(), "running with a reduced tool catalog");
    }

    let visual = VisualMode::new(
        Arc::new(CommandCapture::new(&cfg.capture)),
        vision,
        cfg.app.data_dir.join("screenshots"),
    );

    Ok(Arc::new(ExecutionSupervisor::new(
        TaskRouter::new(&cfg.router),
        Planner::new(llm, cfg.agent.history_window),
        ToolExecutor::new(Arc::new(registry), cfg.agent.tool_timeout_secs),
        visual,
        speaker,
        SupervisorSettings::from_config(cfg),
    )))
}

/// 按配置创建完整助手
pub async fn create_assistant(cfg: &AppConfig) -> Result<Arc<ExecutionSupervisor>, AgentError> {
    build_supervisor(
        cfg,
        create_llm_from_config(cfg),
        create_vision_from_config(cfg),
        create_speaker_from_config(cfg),
        provider_specs(cfg),
    )
    .await
}

/// 监听循环：直到识别器输入结束；返回前等待最后一条命令完成
pub async fn run_listener<R: Recognizer>(
    recognizer: &mut R,
    supervisor: &Arc<ExecutionSupervisor>,
) -> Vec<CommandReport> {
    let mut in_flight: Vec<JoinHandle<CommandReport>> = Vec::new();
    let mut reports = Vec::new();

    while let Some(recognition) = recognizer.next_wake().await {
        if let Some(handle) = supervisor.handle_wake(recognition) {
            in_flight.push(handle);
        }
        // 回收已结束的命令
        let (finished, running): (Vec<_>, Vec<_>) =
            in_flight.into_iter().partition(|h| h.is_finished());
        in_flight = running;
        for handle in finished {
            collect(handle, &mut reports).await;
        }
    }

    for handle in in_flight {
        collect(handle, &mut reports).await;
    }
    reports
}

async fn collect(handle: JoinHandle<CommandReport>, reports: &mut Vec<CommandReport>) {
    match handle.await {
        Ok(report) => reports.push(report),
        Err(e) => tracing::error!(error = %e, "command task failed"),
    }
}
