// OpenAI Provider Implementation
//
// This crate provides the OpenAI backend for the orchestrator. It
// implements the ProviderClient trait from foreman-core against the Chat
// Completions API, and works with any OpenAI-compatible endpoint via the
// base URL override.

mod client;

#[cfg(test)]
mod tests;

pub use client::OpenAiClient;

// Re-export the core trait for convenience
pub use foreman_core::provider::ProviderClient;
