//! Mock LLM 客户端（用于测试与无 API Key 时的本地运行）
//!
//! 按顺序返回预置回复；预置用完后回显最后一条 User 消息为 Final Answer，保证循环能结束。
//! 记录调用次数与收到的消息，便于断言「中断后不再思考」等行为。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, TokenUsage, UsageSnapshot};
use crate::memory::{Message, Role};

/// 脚本化 Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<Message>>>,
    repeat_last: Option<String>,
    usage: TokenUsage,
    /// 每次成功调用计入的 (prompt, completion) token 数
    usage_per_call: (u64, u64),
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 依次返回给定回复
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
            ..Self::default()
        }
    }

    /// 每次都返回同一段回复（用于步数上限测试）
    pub fn repeating(response: impl Into<String>) -> Self {
        Self {
            repeat_last: Some(response.into()),
            ..Self::default()
        }
    }

    /// 每次成功回复计入固定的 token 用量
    pub fn with_usage_per_call(mut self, prompt: u64, completion: u64) -> Self {
        self.usage_per_call = (prompt, completion);
        self
    }

    /// 追加一次失败（模拟网络错误 / 超时）
    pub fn push_error(&self, err: LlmError) {
        if let Ok(mut q) = self.responses.lock() {
            q.push_back(Err(err));
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 第 index 次调用收到的消息
    pub fn request(&self, index: usize) -> Option<Vec<Message>> {
        self.requests.lock().ok().and_then(|r| r.get(index).cloned())
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn token_usage(&self) -> UsageSnapshot {
        self.usage.get()
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let reply = self.reply(messages);
        if reply.is_ok() {
            self.usage.add(self.usage_per_call.0, self.usage_per_call.1);
        }
        reply
    }
}

impl MockLlmClient {
    fn reply(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut r) = self.requests.lock() {
            r.push(messages.to_vec());
        }

        let scripted = self.responses.lock().ok().and_then(|mut q| q.pop_front());
        if let Some(next) = scripted {
            return next;
        }
        if let Some(repeat) = &self.repeat_last {
            return Ok(repeat.clone());
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        let first_line = last_user.lines().next().unwrap_or_default();
        Ok(format!("Thought: mock mode\nFinal Answer: Echo from Mock: {first_line}"))
    }
}
