// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 skillgraph contributors

//! ToolAdapter: the call contract a `TaskAgent` drives a tool through
//! (§4.2). Namespacing, injected parameters, a bounded timeout with a
//! single retry on transient failures, and result normalization all live
//! here so neither the transport nor the agent has to reimplement them.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use crate::errors::SkillGraphError;
use crate::tools::schema::ParamSchema;

const CALL_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// One block of content a tool call returns. MCP tool results are a list of
/// these; text and structured JSON are the two shapes this crate normalizes.
#[derive(Debug, Clone)]
pub enum ContentBlock {
    Text(String),
    Json(Value),
}

/// The raw result a transport hands back, before normalization.
#[derive(Debug, Clone)]
pub struct RawToolResult {
    pub content: Vec<ContentBlock>,
    pub is_error: bool,
}

/// What a `TaskAgent` actually sees after a tool call: a flattened text
/// view, the structured payload if the tool returned one, and provenance.
#[derive(Debug, Clone)]
pub struct ToolCallResult {
    pub text: String,
    pub structured: Option<Value>,
    pub is_error: bool,
    pub source: String,
    pub called_at: DateTime<Utc>,
}

/// Transport abstraction a [`ToolAdapter`] drives — implemented by
/// [`crate::tools::client_manager::ToolClientManager`] for real calls and by
/// test doubles everywhere else.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        params: Value,
    ) -> Result<RawToolResult, SkillGraphError>;
}

/// Static shape of one tool as advertised by its server, namespaced as
/// `server/tool` (§4.2 "qualified name").
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub server: String,
    pub name: String,
    pub description: String,
    pub params: ParamSchema,
    /// Parameters the caller supplies out-of-band (e.g. an auth token or a
    /// session id) — merged into every call and never exposed to, or
    /// overridable by, the model.
    pub injected_params: HashMap<String, Value>,
    /// Transport scheme this tool was reached through (`stdio`, `http`),
    /// used for the result source annotation (§4.2 step 6).
    pub scheme: String,
}

impl ToolDescriptor {
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.server, self.name)
    }
}

pub struct ToolAdapter;

impl ToolAdapter {
    /// Validate, merge, call (with timeout + single retry), and normalize
    /// a tool invocation end to end.
    pub async fn call(
        descriptor: &ToolDescriptor,
        mut params: Value,
        transport: &dyn ToolTransport,
    ) -> Result<ToolCallResult, SkillGraphError> {
        Self::validate_params(descriptor, &params)?;
        Self::merge_injected(&mut params, &descriptor.injected_params);

        let result = match Self::call_with_timeout(descriptor, params.clone(), transport).await {
            Ok(raw) => raw,
            Err(e) if Self::is_transient(&e) => {
                warn!(tool = %descriptor.qualified_name(), error = %e, "retrying transient tool failure");
                tokio::time::sleep(RETRY_DELAY).await;
                Self::call_with_timeout(descriptor, params, transport).await?
            }
            Err(e) => return Err(e),
        };

        Ok(Self::normalize(descriptor, result))
    }

    async fn call_with_timeout(
        descriptor: &ToolDescriptor,
        params: Value,
        transport: &dyn ToolTransport,
    ) -> Result<RawToolResult, SkillGraphError> {
        tokio::time::timeout(
            CALL_TIMEOUT,
            transport.call_tool(&descriptor.server, &descriptor.name, params),
        )
        .await
        .map_err(|_| SkillGraphError::ToolCallFailed {
            tool: descriptor.qualified_name(),
            reason: format!("timed out after {CALL_TIMEOUT:?}"),
        })?
    }

    /// Required parameters declared on the top-level object schema must be
    /// present; unknown top-level keys are tolerated (the server, not this
    /// crate, is the authority on strictness).
    fn validate_params(descriptor: &ToolDescriptor, params: &Value) -> Result<(), SkillGraphError> {
        let ParamSchema::Object(fields) = &descriptor.params else {
            return Ok(());
        };
        for (name, field) in fields {
            if field.required && params.get(name).is_none() {
                return Err(SkillGraphError::ToolParamsInvalid {
                    tool: descriptor.qualified_name(),
                    reason: format!("missing required parameter '{name}'"),
                });
            }
        }
        Ok(())
    }

    fn merge_injected(params: &mut Value, injected: &HashMap<String, Value>) {
        if injected.is_empty() {
            return;
        }
        let obj = params
            .as_object_mut()
            .expect("tool params are always validated as an object before merging");
        for (key, value) in injected {
            obj.insert(key.clone(), value.clone());
        }
    }

    fn is_transient(error: &SkillGraphError) -> bool {
        let reason = match error {
            SkillGraphError::ToolCallFailed { reason, .. } => reason,
            SkillGraphError::ToolServerConnectFailed { reason, .. } => reason,
            _ => return false,
        };
        let reason = reason.to_lowercase();
        ["timeout", "timed out", "connection", "unavailable", "temporarily"]
            .iter()
            .any(|needle| reason.contains(needle))
    }

    fn normalize(descriptor: &ToolDescriptor, raw: RawToolResult) -> ToolCallResult {
        let mut text_parts = Vec::new();
        let mut structured = None;

        for block in &raw.content {
            match block {
                ContentBlock::Text(t) => text_parts.push(t.clone()),
                ContentBlock::Json(v) => {
                    text_parts.push(serde_json::to_string_pretty(v).unwrap_or_default());
                    if structured.is_none() {
                        structured = Some(v.clone());
                    }
                }
            }
        }

        let mut text = text_parts.join("\n");
        if text.trim().is_empty() {
            text = "(tool returned no content)".to_string();
        }

        ToolCallResult {
            text,
            structured,
            is_error: raw.is_error,
            source: format!("{}://{}/{}", descriptor.scheme, descriptor.server, descriptor.name),
            called_at: Utc::now(),
        }
    }
}
