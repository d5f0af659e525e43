// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod client;
pub mod mock;
pub mod openai;
pub mod types;

pub use client::{ModelClient, ResponseStream};
pub use mock::ScriptedMockClient;
pub use openai::OpenAiClient;
pub use types::{
    CompletionRequest, ContentItem, FunctionCall, FunctionResult, Message, ResponseEvent, Role,
    ToolSchema,
};

use std::sync::Arc;

/// Build the model client described by the config.
pub fn from_config(cfg: &orca_config::ModelConfig) -> Arc<dyn ModelClient> {
    Arc::new(OpenAiClient::from_config(cfg))
}
