//! stdio JSON-RPC surface: four tools, two resources, two prompts.
//!
//! Line-delimited JSON on stdin, one JSON object per line on stdout.
//! Notifications (no `id`) produce no response. Internal errors are caught
//! and rendered as error text rather than propagated to the transport.

use magsharp_core::indexer::Indexer;
use magsharp_core::retrieval::Retrieval;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const LATEST_VERSION: &str = "2025-06-18";
const SUPPORTED_VERSIONS: &[&str] = &["2025-06-18", "2024-11-05"];

fn negotiate_version(requested: Option<&str>) -> &'static str {
    match requested {
        Some(v) if SUPPORTED_VERSIONS.contains(&v) => {
            SUPPORTED_VERSIONS.iter().find(|&&sv| sv == v).copied().unwrap_or(LATEST_VERSION)
        }
        _ => LATEST_VERSION,
    }
}

fn tool_definitions() -> Value {
    json!([
        {
            "name": "search_code",
            "description": "Semantic search over the indexed C# codebase.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "max_results": {"type": "integer"},
                    "filter_type": {"type": "string", "description": "class|interface|struct|method|property|field|all"}
                },
                "required": ["query"]
            },
            "annotations": {"readOnlyHint": true, "destructiveHint": false, "idempotentHint": true, "openWorldHint": false}
        },
        {
            "name": "get_file",
            "description": "Read a file from the indexed codebase, optionally with its parsed symbol outline.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "include_ast": {"type": "boolean"}
                },
                "required": ["path"]
            },
            "annotations": {"readOnlyHint": true, "destructiveHint": false, "idempotentHint": true, "openWorldHint": false}
        },
        {
            "name": "list_files",
            "description": "List indexed files, optionally filtered by glob pattern or symbol type.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "pattern": {"type": "string"},
                    "type_filter": {"type": "string"}
                }
            },
            "annotations": {"readOnlyHint": true, "destructiveHint": false, "idempotentHint": true, "openWorldHint": false}
        },
        {
            "name": "explain_symbol",
            "description": "Explain a symbol (optionally Parent.Name) using its definition and usage examples.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "symbol": {"type": "string"},
                    "include_usage": {"type": "boolean"}
                },
                "required": ["symbol"]
            },
            "annotations": {"readOnlyHint": true, "destructiveHint": false, "idempotentHint": true, "openWorldHint": false}
        }
    ])
}

fn resource_definitions() -> Value {
    json!([
        {"uri": "codebase://indexed", "name": "Indexed codebase summary", "mimeType": "application/json"},
        {"uri": "codebase://stats", "name": "Index statistics", "mimeType": "application/json"}
    ])
}

fn prompt_definitions() -> Value {
    json!([
        {
            "name": "code_review",
            "description": "Review a change against the indexed codebase's conventions.",
            "arguments": [
                {"name": "file_path", "required": true},
                {"name": "change_description", "required": true}
            ]
        },
        {
            "name": "architecture_analysis",
            "description": "Analyze the architecture of a namespace.",
            "arguments": [
                {"name": "namespace", "required": true}
            ]
        }
    ])
}

fn get_prompt(name: &str, args: &Value) -> Result<String, String> {
    match name {
        "code_review" => {
            let file_path = args.get("file_path").and_then(|v| v.as_str()).ok_or("file_path is required")?;
            let change_description = args
                .get("change_description")
                .and_then(|v| v.as_str())
                .ok_or("change_description is required")?;
            Ok(format!(
                "Review the change described below to {file_path}.\n\n\
                Change description: {change_description}\n\n\
                Use the search_code and list_files tools to find related conventions elsewhere \
                in the codebase before judging consistency, naming, and error handling."
            ))
        }
        "architecture_analysis" => {
            let namespace = args.get("namespace").and_then(|v| v.as_str()).ok_or("namespace is required")?;
            Ok(format!(
                "Analyze the architecture of the {namespace} namespace.\n\n\
                Use list_files and search_code to enumerate its types and their relationships, \
                then summarize responsibilities, coupling, and any apparent layering violations."
            ))
        }
        other => Err(format!("unknown prompt: {other}")),
    }
}

async fn read_resource(retrieval: &Retrieval, indexer: &Indexer, uri: &str, config: &magsharp_core::Config) -> Result<Value, String> {
    match uri {
        "codebase://indexed" => {
            let stats = indexer.stats().await.map_err(|e| e.to_string())?;
            Ok(json!({
                "total_files": stats.unique_files_sampled,
                "total_chunks": stats.total,
                "languages": ["csharp"],
                "collection_name": config.chroma_collection_name,
            }))
        }
        "codebase://stats" => {
            let stats = indexer.stats().await.map_err(|e| e.to_string())?;
            let _ = retrieval;
            Ok(json!({
                "total_chunks": stats.total,
                "embedding_model": config.embedding_model,
                "llm_model": config.llm_model,
                "codebase_root": config.codebase_root.display().to_string(),
                "chunk_size_tokens": config.chunk_size_tokens,
            }))
        }
        other => Err(format!("unknown resource: {other}")),
    }
}

fn text_content(text: String) -> Value {
    json!({"content": [{"type": "text", "text": text}], "isError": false})
}

async fn call_tool(retrieval: &Retrieval, name: &str, args: &Value) -> Value {
    let result = match name {
        "search_code" => {
            let query = args.get("query").and_then(|v| v.as_str()).unwrap_or_default();
            let max_results = args.get("max_results").and_then(|v| v.as_u64()).map(|v| v as usize);
            let filter_type = args.get("filter_type").and_then(|v| v.as_str());
            retrieval
                .search_code(query, max_results, filter_type)
                .await
                .map(|r| serde_json::to_value(r).unwrap_or(Value::Null))
                .map_err(|e| e.to_string())
        }
        "get_file" => {
            let path = args.get("path").and_then(|v| v.as_str()).unwrap_or_default();
            let include_ast = args.get("include_ast").and_then(|v| v.as_bool()).unwrap_or(false);
            retrieval
                .get_file(path, include_ast)
                .await
                .map(|r| serde_json::to_value(r).unwrap_or(Value::Null))
                .map_err(|e| e.to_string())
        }
        "list_files" => {
            let pattern = args.get("pattern").and_then(|v| v.as_str());
            let type_filter = args.get("type_filter").and_then(|v| v.as_str());
            retrieval
                .list_files(pattern, type_filter)
                .await
                .map(|r| serde_json::to_value(r).unwrap_or(Value::Null))
                .map_err(|e| e.to_string())
        }
        "explain_symbol" => {
            let symbol = args.get("symbol").and_then(|v| v.as_str()).unwrap_or_default();
            let include_usage = args.get("include_usage").and_then(|v| v.as_bool()).unwrap_or(true);
            retrieval
                .explain_symbol(symbol, include_usage)
                .await
                .map(|r| serde_json::to_value(r).unwrap_or(Value::Null))
                .map_err(|e| e.to_string())
        }
        other => Err(format!("unknown tool: {other}")),
    };

    match result {
        Ok(value) => text_content(serde_json::to_string_pretty(&value).unwrap_or_default()),
        // Never set isError: true — some MCP clients kill sibling parallel
        // tool calls when a single call reports an error. Prefix instead so
        // the model can still detect and recover from the failure.
        Err(e) => text_content(format!("⚠ Error: {e}")),
    }
}

async fn dispatch(retrieval: &Retrieval, indexer: &Indexer, config: &magsharp_core::Config, msg: &Value, initialized: &mut bool) -> Option<Value> {
    let id = msg.get("id").cloned();
    let method = msg.get("method").and_then(|v| v.as_str()).unwrap_or_default();

    if id.is_none() {
        // Notification: no response regardless of outcome.
        return None;
    }

    if !*initialized && method != "initialize" && method != "ping" {
        return Some(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32002, "message": "server not initialized"}
        }));
    }

    let result = match method {
        "initialize" => {
            let requested = msg
                .get("params")
                .and_then(|p| p.get("protocolVersion"))
                .and_then(|v| v.as_str());
            *initialized = true;
            Ok(json!({
                "protocolVersion": negotiate_version(requested),
                "capabilities": {"tools": {}, "resources": {}, "prompts": {}},
                "serverInfo": {"name": "magsharp-server", "version": env!("CARGO_PKG_VERSION")}
            }))
        }
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({"tools": tool_definitions()})),
        "tools/call" => {
            let params = msg.get("params").cloned().unwrap_or(Value::Null);
            let name = params.get("name").and_then(|v| v.as_str()).unwrap_or_default();
            let args = params.get("arguments").cloned().unwrap_or(json!({}));
            Ok(call_tool(retrieval, name, &args).await)
        }
        "resources/list" => Ok(json!({"resources": resource_definitions()})),
        "resources/read" => {
            let uri = msg
                .get("params")
                .and_then(|p| p.get("uri"))
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            match read_resource(retrieval, indexer, uri, config).await {
                Ok(value) => Ok(json!({
                    "contents": [{"uri": uri, "mimeType": "application/json", "text": serde_json::to_string_pretty(&value).unwrap_or_default()}]
                })),
                Err(e) => Ok(json!({"contents": [{"uri": uri, "mimeType": "application/json", "text": json!({"error": e}).to_string()}]})),
            }
        }
        "prompts/list" => Ok(json!({"prompts": prompt_definitions()})),
        "prompts/get" => {
            let params = msg.get("params").cloned().unwrap_or(Value::Null);
            let name = params.get("name").and_then(|v| v.as_str()).unwrap_or_default();
            let args = params.get("arguments").cloned().unwrap_or(json!({}));
            match get_prompt(name, &args) {
                Ok(text) => Ok(json!({"messages": [{"role": "user", "content": {"type": "text", "text": text}}]})),
                Err(e) => Err(e),
            }
        }
        other => {
            return Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("method not found: {other}")}
            }))
        }
    };

    match result {
        Ok(value) => Some(json!({"jsonrpc": "2.0", "id": id, "result": value})),
        Err(e) => Some(json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32000, "message": e}})),
    }
}

/// Run the stdio JSON-RPC read/dispatch/write loop until stdin closes.
pub async fn run_mcp(retrieval: Retrieval, indexer: Indexer) {
    let config = magsharp_core::config::get_settings().unwrap_or_default();
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(stdin).lines();
    let mut initialized = false;

    tracing::info!("magsharp stdio server ready");

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "failed to read stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let msg: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                let response = json!({
                    "jsonrpc": "2.0",
                    "id": Value::Null,
                    "error": {"code": -32700, "message": format!("parse error: {e}")}
                });
                write_response(&mut stdout, &response).await;
                continue;
            }
        };

        let method = msg.get("method").and_then(|v| v.as_str()).unwrap_or_default();
        if method == "notifications/initialized" || method == "notifications/cancelled" {
            continue;
        }

        if let Some(response) = dispatch(&retrieval, &indexer, &config, &msg, &mut initialized).await {
            write_response(&mut stdout, &response).await;
        }
    }
}

async fn write_response(stdout: &mut tokio::io::Stdout, response: &Value) {
    let mut line = serde_json::to_string(response).unwrap_or_default();
    line.push('\n');
    let _ = stdout.write_all(line.as_bytes()).await;
    let _ = stdout.flush().await;
}
