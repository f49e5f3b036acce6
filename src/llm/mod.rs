pub mod anthropic;
pub mod client;
pub mod json;
pub mod ollama;
pub mod openai;
pub mod prompts;
pub mod provider;
#[cfg(test)]
pub mod testing;

pub use anthropic::*;
pub use client::*;
pub use json::*;
pub use ollama::*;
pub use openai::*;
pub use prompts::*;
pub use provider::*;
