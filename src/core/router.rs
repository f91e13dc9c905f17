//! 任务路由：查看类命令走视觉模式，其余走 ReAct
//!
//! 命中任一操作类词汇即为 Actuation（即使同时含有查看类词汇）；
//! 只有没有操作类词汇且命中查看类词汇时才是 Informational；都不命中默认 Actuation。
//! 英文词按整词匹配（"search" 不命中 "research"），中文词没有分隔符，按子串匹配。

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::RouterSection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskMode {
    /// 只看不动：截图 + 视觉模型
    Informational,
    /// 需要操作电脑：ReAct 循环
    Actuation,
}

/// 单个路由词的匹配方式
#[derive(Debug, Clone)]
enum TermMatcher {
    Word(Regex),
    Substring(String),
}

impl TermMatcher {
    fn new(term: &str) -> Self {
        let lower = term.to_lowercase();
        if !lower.is_ascii() {
            return TermMatcher::Substring(lower);
        }
        let is_word = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
        let head = if is_word(lower.chars().next()) { r"(?-u:\b)" } else { "" };
        let tail = if is_word(lower.chars().last()) { r"(?-u:\b)" } else { "" };
        match Regex::new(&format!("(?i){head}{}{tail}", regex::escape(&lower))) {
            Ok(re) => TermMatcher::Word(re),
            Err(_) => TermMatcher::Substring(lower),
        }
    }

    /// text 已小写
    fn matches(&self, text: &str) -> bool {
        match self {
            TermMatcher::Word(re) => re.is_match(text),
            TermMatcher::Substring(term) => text.contains(term.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskRouter {
    operation_terms: Vec<TermMatcher>,
    informational_terms: Vec<TermMatcher>,
}

impl TaskRouter {
    pub fn new(config: &RouterSection) -> Self {
        let compile = |terms: &[String]| -> Vec<TermMatcher> {
            terms
                .iter()
                .filter(|t| !t.trim().is_empty())
                .map(|t| TermMatcher::new(t.trim()))
                .collect()
        };
        Self {
            operation_terms: compile(&config.operation_terms),
            informational_terms: compile(&config.informational_terms),
        }
    }

    pub fn classify(&self, text: &str) -> TaskMode {
        let text = text.to_lowercase();
        if self.operation_terms.iter().any(|t| t.matches(&text)) {
            return TaskMode::Actuation;
        }
        if self.informational_terms.iter().any(|t| t.matches(&text)) {
            return TaskMode::Informational;
        }
        TaskMode::Actuation
    }
}

impl Default for TaskRouter {
    fn default() -> Self {
        Self::new(&RouterSection::default())
    }
}
