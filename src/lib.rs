//! mcp-context-server: transport layer for a Model Context Protocol server
//!
//! Carries JSON-RPC 2.0 envelopes between MCP clients and a single request
//! handler over stdio, plain HTTP, server-sent events, or the streamable
//! HTTP transport that combines the two.
//!
//! # Architecture
//!
//! The transports know nothing about MCP methods. Each one reads a raw
//! message, runs it through [`mcp::dispatch`], and delivers the outcome:
//!
//! - **Requests** get exactly one reply envelope carrying the same id
//! - **Notifications** never get a reply
//! - **Decode failures** become `ParseError` or `InvalidRequest` envelopes
//! - **Handler failures** become `InternalError` envelopes
//!
//! # Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`error`]: Error types
//! - [`mcp`]: Envelope codec, handler contract, sessions and transports
//! - [`security`]: CORS policy and request authentication

pub mod config;
pub mod error;
pub mod mcp;
pub mod security;
