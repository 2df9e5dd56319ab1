pub mod anthropic;
pub mod canonical;
pub mod gemini;
mod gemini_convert;
pub mod openai;
pub mod openai_chat;

pub use gemini::{GeminiGenerateContentRequest, GeminiModel, GeminiModelList, GeminiResponseBody};
pub use openai::{OpenaiModel, OpenaiModelList};
