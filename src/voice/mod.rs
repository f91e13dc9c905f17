//! 语音前后端：唤醒识别与播报

pub mod recognizer;
pub mod speaker;

pub use recognizer::{
    strip_wake_word, LineRecognizer, Recognition, Recognizer, ScriptedRecognizer, StdinRecognizer,
};
pub use speaker::{truncate_for_speech, CommandSpeaker, LogSpeaker, Speaker};
