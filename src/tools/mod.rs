// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 skillgraph contributors

//! Tool schema conversion, the call adapter, server transports, and the
//! permission gate that sits in front of every call (§4.2, §4.3, §4.4).

pub mod adapter;
pub mod client_manager;
pub mod permission;
pub mod schema;

pub use adapter::{ContentBlock, RawToolResult, ToolAdapter, ToolCallResult, ToolDescriptor, ToolTransport};
pub use client_manager::{
    ServerConfig, ServerInfo, ServerTransportConfig, SharedToolClientManager, ToolClientManager, ToolSummary,
};
pub use permission::{ApprovalCallback, Decision, DenyAllApprovals, PermissionGate, PermissionPolicy};
pub use schema::{from_json_schema, ParamField, ParamSchema};
