//! 响应解析：把模型的自由文本转成 PlanStep
//!
//! 约定格式为 `Thought / Action / Action Input` 或 `Thought / Final Answer`，但模型输出并不总是规整，
//! 所以解析是宽松的：
//!
//! 1. 先找 `Final Answer:`，找到即结束（无论前面是否还有 Action）。
//! 2. 否则提取 Thought、Action 行与 `Action Input:` 之后的第一个 `{ ... }` 片段。
//!    片段边界用「感知字符串的括号计数」确定，嵌套对象与字符串里的 `}` 都不会截断。
//! 3. 片段依次尝试：严格 JSON → 宽松字面量（单引号、True/False/None、尾逗号）→ 引号替换，全部失败则参数为空。
//!
//! 解析从不返回错误：无法识别时返回空的 PlanStep，由 ReAct 循环判定为思考失败。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Number, Value};

/// 没有给出总结时的完成语
pub const DEFAULT_FINAL_MESSAGE: &str = "任务已完成";

/// 一次思考的结构化结果
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlanStep {
    pub thought: String,
    pub chosen_tool: Option<String>,
    pub arguments: Map<String, Value>,
    pub done: bool,
    pub final_message: Option<String>,
}

impl PlanStep {
    pub fn finish(message: impl Into<String>) -> Self {
        Self {
            done: true,
            final_message: Some(message.into()),
            ..Self::default()
        }
    }

    /// 无法识别的回复
    pub fn empty() -> Self {
        Self::default()
    }

    /// 既没完成也没选工具
    pub fn is_actionable(&self) -> bool {
        self.done || self.chosen_tool.is_some()
    }
}

fn final_answer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)final\s*answer\s*[:：]\s*(.*)").expect("valid regex"))
}

fn thought_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)thought\s*[:：]\s*(.*?)\s*(?:(?-u:\b)(?:action(?:\s*input)?|final\s*answer)\s*[:：]|\z)")
            .expect("valid regex")
    })
}

fn action_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // 行内任意位置的 Action:（Action Input: 不匹配）；工具名到行尾或同行的 Action Input 为止
    RE.get_or_init(|| {
        Regex::new(r"(?im)(?-u:\b)action\s*[:：][ \t]*(.*?)[ \t]*(?:(?-u:\b)action\s*input\s*[:：]|$)")
            .expect("valid regex")
    })
}

fn action_input_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)action\s*input\s*[:：]").expect("valid regex"))
}

/// 解析模型回复
pub fn parse_response(response: &str) -> PlanStep {
    if let Some(caps) = final_answer_re().captures(response) {
        let answer = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        let mut step = PlanStep::finish(if answer.is_empty() {
            DEFAULT_FINAL_MESSAGE
        } else {
            answer
        });
        step.thought = extract_thought(response);
        return step;
    }

    let thought = extract_thought(response);
    let chosen_tool = action_re()
        .captures(response)
        .and_then(|caps| caps.get(1))
        .map(|m| clean_tool_name(m.as_str()))
        .filter(|name| !name.is_empty());

    let arguments = match action_input_re().find(response) {
        Some(marker) => match extract_braced(&response[marker.end()..]) {
            Some(span) => normalize_arguments(span).unwrap_or_else(|| {
                tracing::warn!(span = %span, "could not parse Action Input, using empty arguments");
                tracing::debug!(raw = %response, "raw model response");
                Map::new()
            }),
            None => {
                tracing::debug!("Action Input has no object payload");
                Map::new()
            }
        },
        None => Map::new(),
    };

    if chosen_tool.is_none() {
        tracing::warn!(raw = %response, "model response has neither Final Answer nor Action");
    }

    PlanStep {
        thought,
        chosen_tool,
        arguments,
        done: false,
        final_message: None,
    }
}

fn extract_thought(response: &str) -> String {
    thought_re()
        .captures(response)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

/// 去掉模型常加的反引号、引号、尾随标点
fn clean_tool_name(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| matches!(c, '`' | '"' | '\'' | '*' | '[' | ']'))
        .trim_end_matches(['.', '。', ',', '，'])
        .trim()
        .to_string()
}

/// 从文本中找第一个 `{` 并返回与之匹配的完整 `{...}` 片段
///
/// 字符串字面量（单双引号）内的括号与转义字符不参与计数。没有闭合时返回 None。
pub fn extract_braced(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// 严格 JSON → 宽松字面量 → 引号替换
pub fn normalize_arguments(span: &str) -> Option<Map<String, Value>> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(span) {
        return Some(map);
    }
    if let Some(Value::Object(map)) = LiteralParser::new(span).parse() {
        return Some(map);
    }
    let substituted = span
        .replace('\'', "\"")
        .replace("True", "true")
        .replace("False", "false")
        .replace("None", "null");
    match serde_json::from_str::<Value>(&substituted) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// 宽松字面量解析：接受单 / 双引号字符串、True/False/None 与 true/false/null、尾逗号
struct LiteralParser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> LiteralParser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
        }
    }

    fn parse(mut self) -> Option<Value> {
        let value = self.value()?;
        self.skip_ws();
        match self.chars.next() {
            None => Some(value),
            Some(_) => None,
        }
    }

    fn skip_ws(&mut self) {
        while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn value(&mut self) -> Option<Value> {
        self.skip_ws();
        match *self.chars.peek()? {
            '{' => self.object(),
            '[' => self.array(),
            '"' | '\'' => self.string().map(Value::String),
            c if c == '-' || c.is_ascii_digit() => self.number(),
            _ => self.word(),
        }
    }

    fn object(&mut self) -> Option<Value> {
        self.chars.next();
        let mut map = Map::new();
        loop {
            self.skip_ws();
            match self.chars.peek()? {
                '}' => {
                    self.chars.next();
                    return Some(Value::Object(map));
                }
                '"' | '\'' => {}
                _ => return None,
            }
            let key = self.string()?;
            self.skip_ws();
            if self.chars.next()? != ':' {
                return None;
            }
            let value = self.value()?;
            map.insert(key, value);
            self.skip_ws();
            match self.chars.next()? {
                ',' => continue,
                '}' => return Some(Value::Object(map)),
                _ => return None,
            }
        }
    }

    fn array(&mut self) -> Option<Value> {
        self.chars.next();
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.chars.peek() == Some(&']') {
                self.chars.next();
                return Some(Value::Array(items));
            }
            items.push(self.value()?);
            self.skip_ws();
            match self.chars.next()? {
                ',' => continue,
                ']' => return Some(Value::Array(items)),
                _ => return None,
            }
        }
    }

    fn string(&mut self) -> Option<String> {
        let quote = self.chars.next()?;
        let mut out = String::new();
        loop {
            match self.chars.next()? {
                '\\' => match self.chars.next()? {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    other => out.push(other),
                },
                c if c == quote => return Some(out),
                c => out.push(c),
            }
        }
    }

    fn number(&mut self) -> Option<Value> {
        let mut text = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E') {
                text.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        if let Ok(i) = text.parse::<i64>() {
            return Some(Value::Number(i.into()));
        }
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
    }

    fn word(&mut self) -> Option<Value> {
        let mut word = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                word.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        match word.as_str() {
            "True" | "true" => Some(Value::Bool(true)),
            "False" | "false" => Some(Value::Bool(false)),
            "None" | "null" => Some(Value::Null),
            _ => None,
        }
    }
}
