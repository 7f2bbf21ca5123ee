//! MCP (Model Context Protocol) gateway for the knowledge graph.
//!
//! Provides a JSON-RPC 2.0 interface reachable over two transports: a
//! line-delimited stdio loop and an HTTP event stream with a companion
//! POST-message channel. Both share one dispatcher and one store.

/// Method dispatcher and stdio transport.
pub mod server;

/// Registry of open event-stream sessions.
pub mod session;

/// Event-stream transport and POST-message channel.
pub mod sse;

/// Tool catalog, typed tool arguments, and tool execution.
pub mod tools;

/// JSON-RPC 2.0 envelope types.
pub mod transport;

pub use server::McpServer;
pub use session::{DeliveryError, Session, SessionRegistry, SessionSettings};
pub use tools::{get_tool_definitions, handle_tool_call, ToolCall, ToolCallResult, ToolDefinition};
pub use transport::{ErrorCode, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
