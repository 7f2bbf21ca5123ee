use std::sync::Arc;

use knowledge_graph::db::Database;
use knowledge_graph::mcp::tools::*;
use knowledge_graph::mcp::transport::*;
use knowledge_graph::mcp::McpServer;
use serde_json::{json, Value};

fn setup_server() -> McpServer {
    let db = Database::open_in_memory().expect("failed to open in-memory database");
    McpServer::new(Arc::new(db))
}

fn request(id: Value, method: &str, params: Option<Value>) -> JsonRpcRequest {
    JsonRpcRequest::new(id, method, params)
}

fn call(server: &McpServer, id: i64, tool: &str, arguments: Value) -> JsonRpcResponse {
    server
        .handle_request(&request(
            json!(id),
            "tools/call",
            Some(json!({ "name": tool, "arguments": arguments })),
        ))
        .expect("request with an id must be answered")
}

/// Decodes the tool result carried by a successful `tools/call` response.
fn tool_result(response: &JsonRpcResponse) -> ToolCallResult {
    assert!(response.error.is_none(), "unexpected error: {:?}", response.error);
    serde_json::from_value(response.result.clone().expect("missing result")).unwrap()
}

#[test]
fn test_parse_jsonrpc_request() {
    let msg = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/list",
        "params": {}
    });

    let request: JsonRpcRequest = serde_json::from_value(msg).unwrap();
    assert_eq!(request.method, "tools/list");
    assert_eq!(request.id, json!(1));
    assert!(!request.is_notification());
}

#[test]
fn test_missing_id_is_notification() {
    let request: JsonRpcRequest =
        serde_json::from_value(json!({"jsonrpc": "2.0", "method": "tools/list"})).unwrap();
    assert!(request.is_notification());

    let request: JsonRpcRequest =
        serde_json::from_value(json!({"jsonrpc": "2.0", "id": null, "method": "tools/list"}))
            .unwrap();
    assert!(request.is_notification());
}

#[test]
fn test_tool_definitions() {
    let tools = get_tool_definitions();
    assert_eq!(tools.len(), 9);

    let tool_names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    for expected in [
        "read_graph",
        "create_entities",
        "create_relations",
        "add_observations",
        "delete_entities",
        "delete_observations",
        "delete_relations",
        "search_nodes",
        "open_nodes",
    ] {
        assert!(tool_names.contains(&expected), "missing tool {expected}");
    }
    assert!(!tool_names.contains(&"create_entity"));

    for tool in &tools {
        assert_eq!(tool.input_schema["type"], "object");
    }
}

#[test]
fn test_initialize() {
    let server = setup_server();
    let response = server
        .handle_request(&request(json!(1), "initialize", Some(json!({}))))
        .unwrap();

    let result = response.result.unwrap();
    assert_eq!(result["protocolVersion"], "2024-11-05");
    assert_eq!(result["serverInfo"]["name"], "knowledge-graph-mcp");
    assert!(result["capabilities"]["tools"].is_object());
}

#[test]
fn test_tools_list() {
    let server = setup_server();
    let response = server
        .handle_request(&request(json!("list"), "tools/list", None))
        .unwrap();

    assert_eq!(response.id, json!("list"));
    let tools = response.result.unwrap()["tools"].as_array().unwrap().len();
    assert_eq!(tools, 9);
}

#[test]
fn test_unknown_method() {
    let server = setup_server();
    let response = server
        .handle_request(&request(json!(3), "resources/list", None))
        .unwrap();

    let error = response.error.unwrap();
    assert_eq!(error.code, -32601);
    assert!(error.message.contains("resources/list"));
    assert_eq!(response.id, json!(3));
}

#[test]
fn test_tools_call_missing_arguments() {
    let server = setup_server();
    let response = server
        .handle_request(&request(
            json!(4),
            "tools/call",
            Some(json!({ "name": "read_graph" })),
        ))
        .unwrap();
    assert_eq!(response.error.unwrap().code, -32602);

    let response = server
        .handle_request(&request(json!(5), "tools/call", None))
        .unwrap();
    assert_eq!(response.error.unwrap().code, -32602);
}

#[test]
fn test_tools_call_unknown_tool() {
    let server = setup_server();
    let response = call(&server, 6, "drop_everything", json!({}));
    let error = response.error.unwrap();
    assert_eq!(error.code, -32601);
    assert!(error.message.contains("drop_everything"));
}

#[test]
fn test_create_entities_with_observations() {
    let server = setup_server();
    let response = call(
        &server,
        1,
        "create_entities",
        json!({
            "entities": [
                {"name": "Alice", "entityType": "person", "observations": ["likes programming"]},
                {"name": "Acme", "entityType": "company"},
                {"entityType": "missing name"}
            ]
        }),
    );
    let result = tool_result(&response);
    assert!(!result.is_error);
    assert!(result.content[0].text.contains("Successfully created 2 entities"));
    assert!(result.content[0].text.contains("skipped 1 malformed"));

    let stats = server.database().stats().unwrap();
    assert_eq!(stats.entity_count, 2);
    assert_eq!(stats.observation_count, 1);
}

#[test]
fn test_create_relation_with_missing_source_is_error_result() {
    let server = setup_server();
    call(
        &server,
        1,
        "create_entities",
        json!({"entities": [{"name": "Company", "entityType": "organization"}]}),
    );

    let response = call(
        &server,
        2,
        "create_relations",
        json!({"relations": [{"from": "Ghost", "to": "Company", "relationType": "works_at"}]}),
    );

    assert_eq!(response.id, json!(2));
    assert!(response.error.is_none());
    let result = tool_result(&response);
    assert!(result.is_error);
    assert!(result.content[0].text.starts_with("Error: "));
    assert!(result.content[0].text.contains("Ghost"));
    assert_eq!(server.database().stats().unwrap().relation_count, 0);
}

#[test]
fn test_create_relations_partial_failure() {
    let server = setup_server();
    call(
        &server,
        1,
        "create_entities",
        json!({"entities": [
            {"name": "Alice", "entityType": "person"},
            {"name": "Bob", "entityType": "person"}
        ]}),
    );

    let response = call(
        &server,
        2,
        "create_relations",
        json!({"relations": [
            {"from": "Alice", "to": "Bob", "relationType": "knows"},
            {"from": "Alice", "to": "Ghost", "relationType": "knows"}
        ]}),
    );
    let result = tool_result(&response);
    assert!(!result.is_error);
    assert!(result.content[0].text.contains("Successfully created 1 relations"));
    assert!(result.content[0].text.contains("1 failed"));
}

#[test]
fn test_add_observations_is_atomic() {
    let server = setup_server();
    call(
        &server,
        1,
        "create_entities",
        json!({"entities": [{"name": "Alice", "entityType": "person"}]}),
    );

    let response = call(
        &server,
        2,
        "add_observations",
        json!({"observations": [
            {"entityName": "Alice", "contents": ["one", "two"]},
            {"entityName": "Ghost", "contents": "three"}
        ]}),
    );
    assert!(tool_result(&response).is_error);
    assert_eq!(server.database().stats().unwrap().observation_count, 0);

    let response = call(
        &server,
        3,
        "add_observations",
        json!({"observations": [{"entityName": "Alice", "contents": "single"}]}),
    );
    let result = tool_result(&response);
    assert!(!result.is_error);
    let payload: Value = serde_json::from_str(&result.content[0].text).unwrap();
    assert_eq!(payload["added"].as_array().unwrap().len(), 1);
    assert_eq!(payload["added"][0]["content"], "single");
}

#[test]
fn test_missing_batch_parameter_is_error_result() {
    let server = setup_server();
    let response = call(&server, 1, "create_entities", json!({}));
    let result = tool_result(&response);
    assert!(result.is_error);
    assert!(result.content[0].text.contains("missing or invalid entities parameter"));
}

#[test]
fn test_search_and_open_nodes() {
    let server = setup_server();
    call(
        &server,
        1,
        "create_entities",
        json!({"entities": [
            {"name": "Alice", "entityType": "person", "observations": ["writes the programming language"]},
            {"name": "Company", "entityType": "organization"}
        ]}),
    );
    call(
        &server,
        2,
        "create_relations",
        json!({"relations": [{"from": "Alice", "to": "Company", "relationType": "works_at"}]}),
    );

    let result = tool_result(&call(&server, 3, "search_nodes", json!({"query": "programming"})));
    let found: Value = serde_json::from_str(&result.content[0].text).unwrap();
    assert_eq!(found["entities"][0]["name"], "Alice");
    assert_eq!(found["relations"][0]["relation_type"], "works_at");

    let result = tool_result(&call(&server, 4, "open_nodes", json!({"names": ["Nobody"]})));
    let opened: Value = serde_json::from_str(&result.content[0].text).unwrap();
    assert_eq!(opened["entities"], json!([]));
    assert_eq!(opened["relations"], json!([]));
}

#[test]
fn test_delete_entity_scenario() {
    let server = setup_server();
    call(
        &server,
        1,
        "create_entities",
        json!({"entities": [
            {"name": "Alice", "entityType": "person"},
            {"name": "Company", "entityType": "organization"}
        ]}),
    );
    call(
        &server,
        2,
        "create_relations",
        json!({"relations": [{"from": "Alice", "to": "Company", "relationType": "works_at"}]}),
    );
    let result = tool_result(&call(&server, 3, "delete_entities", json!({"entityNames": ["Alice"]})));
    assert!(!result.is_error);

    let result = tool_result(&call(&server, 4, "read_graph", json!({})));
    let graph: Value = serde_json::from_str(&result.content[0].text).unwrap();
    assert_eq!(graph["entities"], json!([{"name": "Company", "entity_type": "organization"}]));
    assert_eq!(graph["relations"], json!([]));
}

#[test]
fn test_delete_relations_and_observations() {
    let server = setup_server();
    call(
        &server,
        1,
        "create_entities",
        json!({"entities": [
            {"name": "A", "entityType": "node", "observations": ["keep", "drop"]},
            {"name": "B", "entityType": "node"}
        ]}),
    );
    call(
        &server,
        2,
        "create_relations",
        json!({"relations": [{"from": "A", "to": "B", "relationType": "links"}]}),
    );

    let result = tool_result(&call(
        &server,
        3,
        "delete_relations",
        json!({"relations": [{"from": "A", "to": "B", "relationType": "links"}]}),
    ));
    assert!(result.content[0].text.contains("deleted 1 relations"));

    let result = tool_result(&call(
        &server,
        4,
        "delete_observations",
        json!({"deletions": [{"entityName": "A", "observations": ["drop"]}]}),
    ));
    assert!(result.content[0].text.contains("deleted 1 observations"));

    let stats = server.database().stats().unwrap();
    assert_eq!(stats.relation_count, 0);
    assert_eq!(stats.observation_count, 1);
}

#[test]
fn test_delete_observations_skips_non_string_contents() {
    let server = setup_server();
    call(
        &server,
        1,
        "create_entities",
        json!({"entities": [{"name": "A", "entityType": "thing", "observations": ["keep", "drop"]}]}),
    );

    let result = tool_result(&call(
        &server,
        2,
        "delete_observations",
        json!({"deletions": [{"entityName": "A", "observations": ["drop", 5, null]}]}),
    ));
    assert!(!result.is_error);
    assert!(result.content[0].text.contains("deleted 1 observations"));

    let graph = server.database().read_graph().unwrap();
    let contents: Vec<&str> = graph.observations.iter().map(|o| o.content.as_str()).collect();
    assert_eq!(contents, vec!["keep"]);
}

#[test]
fn test_legacy_tools() {
    let server = setup_server();
    let result = tool_result(&call(
        &server,
        1,
        "create_entity",
        json!({"name": "Alice", "entity_type": "person"}),
    ));
    assert!(!result.is_error);

    let result = tool_result(&call(
        &server,
        2,
        "create_observation",
        json!({"entity_name": "Alice", "content": "hello"}),
    ));
    assert!(result.content[0].text.contains("for entity 'Alice'"));

    let result = tool_result(&call(
        &server,
        3,
        "create_relation",
        json!({"from_entity": "Alice", "to_entity": "Nobody", "relation_type": "knows"}),
    ));
    assert!(result.is_error);

    let result = tool_result(&call(&server, 4, "create_entity", json!({"name": "NoType"})));
    assert!(result.is_error);
    assert!(result.content[0].text.contains("missing required parameters"));
}

#[test]
fn test_notification_applies_side_effects_without_response() {
    let server = setup_server();
    let notification = request(
        Value::Null,
        "tools/call",
        Some(json!({
            "name": "create_entities",
            "arguments": {"entities": [{"name": "Silent", "entityType": "thing"}]}
        })),
    );

    assert!(server.handle_request(&notification).is_none());
    assert_eq!(server.database().stats().unwrap().entity_count, 1);

    let unknown = request(Value::Null, "no/such/method", None);
    assert!(server.handle_request(&unknown).is_none());
}

#[test]
fn test_error_response_serialization() {
    let response = JsonRpcResponse::error(
        json!(1),
        ErrorCode::MethodNotFound,
        "Method not found".to_string(),
    );

    let json = serde_json::to_string(&response).unwrap();
    assert!(json.contains("-32601"));
    assert!(!json.contains("\"result\""));
}
