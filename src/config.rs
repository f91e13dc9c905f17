//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `XIAOZHI__*` 覆盖（双下划线表示嵌套，如 `XIAOZHI__AGENT__MAX_STEPS=8`）。
//! API Key 不写入配置文件，只记录所用环境变量名。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub vision: VisionSection,
    pub agent: AgentSection,
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderEntry>,
    pub router: RouterSection,
    pub voice: VoiceSection,
    pub capture: CaptureSection,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            llm: LlmSection::default(),
            vision: VisionSection::default(),
            agent: AgentSection::default(),
            providers: default_providers(),
            router: RouterSection::default(),
            voice: VoiceSection::default(),
            capture: CaptureSection::default(),
        }
    }
}

/// [app] 段：数据目录（截图等临时文件）、是否语音播报
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    pub data_dir: PathBuf,
    pub enable_voice: bool,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "xiaozhi".to_string(),
            data_dir: PathBuf::from("data"),
            enable_voice: true,
        }
    }
}

/// [llm] 段：推理模型端点、采样参数与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub base_url: Option<String>,
    pub model: String,
    /// 存放 API Key 的环境变量名
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: Some(DASHSCOPE_BASE_URL.to_string()),
            model: "qwen-plus".to_string(),
            api_key_env: "DASHSCOPE_API_KEY".to_string(),
            temperature: 0.1,
            max_tokens: 1500,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

/// DashScope OpenAI 兼容端点
pub const DASHSCOPE_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 30 }
    }
}

/// [vision] 段：视觉模型；base_url 未设置时沿用 [llm]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VisionSection {
    pub base_url: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub default_question: String,
}

impl Default for VisionSection {
    fn default() -> Self {
        Self {
            base_url: None,
            model: "qwen-vl-max".to_string(),
            max_tokens: 2000,
            temperature: 0.7,
            timeout_secs: 60,
            default_question: "请详细描述屏幕上的内容。".to_string(),
        }
    }
}

/// [agent] 段：ReAct 步数上限、历史窗口、单次工具超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_steps: usize,
    pub history_window: usize,
    pub tool_timeout_secs: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_steps: 5,
            history_window: 3,
            tool_timeout_secs: 30,
        }
    }
}

/// [[providers]]：一个 MCP 工具服务（stdio 子进程）
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEntry {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// 值支持 ${VAR} 展开
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// 必需的 provider 启动失败则助手无法启动
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_providers() -> Vec<ProviderEntry> {
    vec![ProviderEntry {
        name: "windows".to_string(),
        command: "uvx".to_string(),
        args: vec!["windows-mcp".to_string()],
        env: HashMap::new(),
        required: true,
        startup_timeout_secs: default_startup_timeout_secs(),
    }]
}

/// [router] 段：操作类词汇优先于查看类词汇
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterSection {
    pub operation_terms: Vec<String>,
    pub informational_terms: Vec<String>,
}

fn to_vec(terms: &[&str]) -> Vec<String> {
    terms.iter().map(|t| t.to_string()).collect()
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            operation_terms: to_vec(&[
                "click", "type", "open", "close", "scroll", "search", "run", "press", "launch",
                "点击", "输入", "打开", "关闭", "滚动", "搜索", "运行", "按下", "启动",
            ]),
            informational_terms: to_vec(&[
                "look", "describe", "analyze", "analyse", "show", "what's on", "看", "描述",
                "分析", "显示", "截图",
            ]),
        }
    }
}

/// [voice] 段：唤醒词、播报话术、外部 TTS 程序
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoiceSection {
    pub wake_words: Vec<String>,
    /// 朗读视觉描述时的最大字符数
    pub speak_preview_chars: usize,
    pub phrases: PhrasesSection,
    pub speech: Option<SpeechCommandSection>,
}

impl Default for VoiceSection {
    fn default() -> Self {
        Self {
            wake_words: vec!["小智".to_string(), "你好助手".to_string(), "智能助手".to_string()],
            speak_preview_chars: 200,
            phrases: PhrasesSection::default(),
            speech: None,
        }
    }
}

/// 播报话术
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PhrasesSection {
    pub wake_reply: String,
    pub not_heard: String,
    pub acknowledge: String,
    /// {target} 替换为截图范围名称
    pub looking: String,
    pub apology: String,
    pub vision_apology: String,
}

impl Default for PhrasesSection {
    fn default() -> Self {
        Self {
            wake_reply: "我在".to_string(),
            not_heard: "抱歉，我没听清".to_string(),
            acknowledge: "好的，让我来处理".to_string(),
            looking: "正在为您查看{target}".to_string(),
            apology: "抱歉，任务未能完成".to_string(),
            vision_apology: "抱歉，我没能看清屏幕内容".to_string(),
        }
    }
}

/// [voice.speech]：外部 TTS 程序，参数模板中 {{text}} 替换为播报文本
#[derive(Debug, Clone, Deserialize)]
pub struct SpeechCommandSection {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// [capture] 段：截图程序，参数模板中 {{path}} / {{scope}} 替换为输出路径与范围
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CaptureSection {
    pub program: Option<String>,
    pub args: Vec<String>,
}

/// 展开 ${VAR}；未设置的变量替换为空串
pub fn expand_env(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&std::env::var(&after[..end]).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// 从 config 目录加载配置，环境变量 XIAOZHI__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 XIAOZHI__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("XIAOZHI")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_assistant_behaviour() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.max_steps, 5);
        assert_eq!(cfg.agent.history_window, 3);
        assert!(cfg.app.enable_voice);
        assert_eq!(cfg.llm.model, "qwen-plus");
        assert_eq!(cfg.vision.model, "qwen-vl-max");
    }

    #[test]
    fn test_empty_toml_uses_default_provider() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str("", config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.providers.len(), 1);
        assert_eq!(cfg.providers[0].name, "windows");
        assert!(cfg.providers[0].required);
    }

    #[test]
    fn test_providers_from_toml() {
        let toml = r#"
            [agent]
            max_steps = 8

            [[providers]]
            name = "desktop"
            command = "uvx"
            args = ["windows-mcp"]
            required = true

            [[providers]]
            name = "browser"
            command = "npx"
            args = ["@playwright/mcp@latest"]
            startup_timeout_secs = 10
        "#;
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.agent.max_steps, 8);
        assert_eq!(cfg.agent.history_window, 3);
        assert_eq!(cfg.providers.len(), 2);
        assert!(!cfg.providers[1].required);
        assert_eq!(cfg.providers[1].startup_timeout_secs, 10);
    }

    #[test]
    fn test_expand_env() {
        std::env::set_var("XIAOZHI_TEST_TOKEN", "abc");
        assert_eq!(expand_env("Bearer ${XIAOZHI_TEST_TOKEN}"), "Bearer abc");
        assert_eq!(expand_env("${XIAOZHI_TEST_UNSET_VAR}x"), "x");
        assert_eq!(expand_env("plain"), "plain");
        assert_eq!(expand_env("broken ${OPEN"), "broken ${OPEN");
    }
}
