//! Concrete LLM provider backends.

mod openai;

pub use openai::{OpenAiCompatFactory, OpenAiProvider};
