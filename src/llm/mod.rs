//! LLM provider plumbing for the Tier-3 agent.

pub mod client;
pub mod types;

pub use client::{ClientConfig, GenerateClient, GroqClient, OllamaClient, ProviderChain};
pub use types::{GenerateResponse, InjectionJudgment};
