//! 执行历史：单条命令内已执行的 Thought / Action / Observation
//!
//! 只在一次命令执行内有效（新命令开始时重置），按执行顺序追加；
//! 下一轮思考只取最近几条拼入 prompt，控制上下文长度。

use serde::Serialize;
use serde_json::{Map, Value};

/// 一步已执行的记录
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExecutionHistoryEntry {
    pub thought: String,
    pub chosen_tool: String,
    pub arguments: Map<String, Value>,
    pub observation: String,
    pub succeeded: bool,
}

/// 有序、只追加的执行历史
#[derive(Clone, Debug, Default)]
pub struct ExecutionHistory {
    entries: Vec<ExecutionHistoryEntry>,
}

impl ExecutionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ExecutionHistoryEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ExecutionHistoryEntry] {
        &self.entries
    }

    /// 最近 n 条（保持原顺序）
    pub fn recent(&self, n: usize) -> &[ExecutionHistoryEntry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    /// 构建供 Planner 使用的「已执行步骤」片段；历史为空时返回空串
    pub fn to_prompt_section(&self, window: usize) -> String {
        let recent = self.recent(window);
        if recent.is_empty() {
            return String::new();
        }
        let mut s = String::from("Steps already executed:\n");
        for (i, entry) in recent.iter().enumerate() {
            s.push_str(&format!("\nStep {}:\n", i + 1));
            s.push_str(&format!("Thought: {}\n", entry.thought));
            s.push_str(&format!("Action: {}\n", entry.chosen_tool));
            s.push_str(&format!("Action Input: {}\n", Value::Object(entry.arguments.clone())));
            s.push_str(&format!("Observation: {}\n", entry.observation));
        }
        s
    }
}
