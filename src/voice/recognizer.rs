//! 唤醒 + 识别前端
//!
//! 每次唤醒产生一个 Recognition：识别到的命令文本，或「没听到」。
//! 音频采集与语音识别在进程外完成；本进程内置的 StdinRecognizer 每行输入视为一次唤醒。

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognition {
    /// 非空命令文本
    Utterance(String),
    /// 唤醒后在限定时间内没有识别到内容
    NoSpeech,
}

#[async_trait]
pub trait Recognizer: Send {
    /// 等待下一次唤醒；输入结束返回 None
    async fn next_wake(&mut self) -> Option<Recognition>;
}

/// 去掉开头的唤醒词与随后的标点；只剩唤醒词时视为没听到
pub fn strip_wake_word(line: &str, wake_words: &[String]) -> Recognition {
    let mut text = line.trim();
    if let Some(word) = wake_words.iter().find(|w| !w.is_empty() && text.starts_with(w.as_str())) {
        text = text[word.len()..]
            .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ',' | '，' | '、' | '!' | '！' | '.' | '。'));
    }
    let text = text.trim();
    if text.is_empty() {
        Recognition::NoSpeech
    } else {
        Recognition::Utterance(text.to_string())
    }
}

/// 按行读取的识别器（默认读 stdin）
pub struct LineRecognizer<R> {
    lines: Lines<R>,
    wake_words: Vec<String>,
}

pub type StdinRecognizer = LineRecognizer<BufReader<Stdin>>;

impl StdinRecognizer {
    pub fn stdin(wake_words: Vec<String>) -> Self {
        LineRecognizer::new(BufReader::new(tokio::io::stdin()), wake_words)
    }
}

impl<R: AsyncBufRead + Unpin + Send> LineRecognizer<R> {
    pub fn new(reader: R, wake_words: Vec<String>) -> Self {
        Self {
            lines: reader.lines(),
            wake_words,
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> Recognizer for LineRecognizer<R> {
    async fn next_wake(&mut self) -> Option<Recognition> {
        match self.lines.next_line().await {
            Ok(Some(line)) => Some(strip_wake_word(&line, &self.wake_words)),
            Ok(None) => None,
            Err(e) => {
                tracing::error!(error = %e, "recognizer input failed");
                None
            }
        }
    }
}

/// 预置识别结果（测试与演示）
#[derive(Debug, Default)]
pub struct ScriptedRecognizer {
    queue: VecDeque<Recognition>,
}

impl ScriptedRecognizer {
    pub fn new(items: impl IntoIterator<Item = Recognition>) -> Self {
        Self {
            queue: items.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn next_wake(&mut self) -> Option<Recognition> {
        self.queue.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words() -> Vec<String> {
        vec!["小智".into(), "你好助手".into()]
    }

    #[test]
    fn test_strip_wake_word() {
        assert_eq!(
            strip_wake_word("小智，打开计算器", &words()),
            Recognition::Utterance("打开计算器".into())
        );
        assert_eq!(strip_wake_word("  小智！ ", &words()), Recognition::NoSpeech);
        assert_eq!(
            strip_wake_word("describe this window", &words()),
            Recognition::Utterance("describe this window".into())
        );
        assert_eq!(strip_wake_word("", &words()), Recognition::NoSpeech);
    }

    #[tokio::test]
    async fn test_line_recognizer() {
        let input: &[u8] = "你好助手 看看屏幕\n\n".as_bytes();
        let mut rec = LineRecognizer::new(BufReader::new(input), words());
        assert_eq!(rec.next_wake().await, Some(Recognition::Utterance("看看屏幕".into())));
        assert_eq!(rec.next_wake().await, Some(Recognition::NoSpeech));
        assert_eq!(rec.next_wake().await, None);
    }
}
