//! 小智 - 语音驱动的桌面自动化助手
//!
//! 模块划分：
//! - **agent**: 按配置装配助手，唤醒事件监听循环
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、任务路由、执行监管（单飞门闩 / 中断 / 播报）
//! - **llm**: 推理模型客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 模型消息与单条命令内的执行历史
//! - **react**: 响应解析、Planner、ReAct 主循环
//! - **tools**: 工具服务（MCP / 进程内）、注册表与执行器
//! - **vision**: 截图与视觉模型
//! - **voice**: 唤醒识别与播报

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;
pub mod vision;
pub mod voice;
