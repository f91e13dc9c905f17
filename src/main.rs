//! 小智 - 语音驱动的桌面自动化助手
//!
//! 入口：初始化日志、加载配置、启动工具服务，然后从 stdin 逐行读取唤醒后的命令，
//! 直到输入结束或 Ctrl+C；退出前关闭所有工具服务。

use std::path::PathBuf;

use anyhow::Context;
use xiaozhi::agent::{create_assistant, run_listener};
use xiaozhi::config::load_config;
use xiaozhi::observability;
use xiaozhi::voice::StdinRecognizer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    std::fs::create_dir_all(&cfg.app.data_dir)
        .with_context(|| format!("Failed to create data dir {}", cfg.app.data_dir.display()))?;

    let supervisor = create_assistant(&cfg)
        .await
        .context("Failed to start assistant")?;

    tracing::info!(wake_words = ?cfg.voice.wake_words, "{} ready, waiting for commands", cfg.app.name);
    let mut recognizer = StdinRecognizer::stdin(cfg.voice.wake_words.clone());

    tokio::select! {
        reports = run_listener(&mut recognizer, &supervisor) => {
            let succeeded = reports.iter().filter(|r| r.is_success()).count();
            tracing::info!(commands = reports.len(), succeeded, "input closed");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
        }
    }

    supervisor.shutdown().await;
    Ok(())
}
