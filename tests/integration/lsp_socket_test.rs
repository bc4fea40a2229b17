//! LSP Socket Integration Tests
//!
//! A minimal language server on a loopback socket: it answers the
//! handshake, tracks document text from didOpen/didChange and reports
//! unused `import json` lines through pull diagnostics.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use cascade_resolver::services::lsp::{ClientOptions, LspClient};
use cascade_resolver::{EngineConfig, ResolutionEngine};
use cascade_resolver_core::{ServerConfig, ServerStatus};
use cascade_resolver_protocol::{encode_message, parse_message, FrameDecoder, Message};

use crate::support::{project, read};

fn unused_json_items(text: &str) -> Vec<Value> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| line.trim() == "import json")
        .map(|(index, line)| {
            json!({
                "range": {
                    "start": { "line": index, "character": 0 },
                    "end": { "line": index, "character": line.len() }
                },
                "severity": 2,
                "code": "F401",
                "source": "fake",
                "message": "'json' imported but unused"
            })
        })
        .collect()
}

async fn serve_connection(mut socket: TcpStream) {
    let mut decoder = FrameDecoder::new();
    let mut documents: HashMap<String, String> = HashMap::new();
    let mut buf = vec![0u8; 8192];

    loop {
        let frame = match decoder.next_frame() {
            Some(frame) => frame.unwrap(),
            None => {
                let n = match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                decoder.push(&buf[..n]);
                continue;
            }
        };

        match parse_message(&frame).unwrap() {
            Message::Request(req) => {
                let params = req.params.clone().unwrap_or(Value::Null);
                let result = match req.method.as_str() {
                    "initialize" => json!({
                        "capabilities": {
                            "textDocumentSync": 1,
                            "diagnosticProvider": {
                                "interFileDependencies": false,
                                "workspaceDiagnostics": false
                            }
                        },
                        "serverInfo": { "name": "fake" }
                    }),
                    "textDocument/diagnostic" => {
                        let uri = params["textDocument"]["uri"].as_str().unwrap_or_default();
                        let text = documents.get(uri).cloned().unwrap_or_default();
                        json!({ "kind": "full", "items": unused_json_items(&text) })
                    }
                    _ => Value::Null,
                };
                let response = json!({ "jsonrpc": "2.0", "id": req.id, "result": result });
                if socket
                    .write_all(&encode_message(&response.to_string()))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Message::Notification(n) => {
                let params = n.params.unwrap_or(Value::Null);
                match n.method.as_str() {
                    "textDocument/didOpen" => {
                        let doc = &params["textDocument"];
                        documents.insert(
                            doc["uri"].as_str().unwrap_or_default().to_string(),
                            doc["text"].as_str().unwrap_or_default().to_string(),
                        );
                    }
                    "textDocument/didChange" => {
                        let uri = params["textDocument"]["uri"].as_str().unwrap_or_default();
                        if let Some(text) = params["contentChanges"][0]["text"].as_str() {
                            documents.insert(uri.to_string(), text.to_string());
                        }
                    }
                    "exit" => return,
                    _ => {}
                }
            }
            Message::Response(_) => {}
        }
    }
}

async fn fake_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve_connection(socket));
        }
    });
    address
}

#[tokio::test]
async fn test_client_handshake_over_socket() {
    let address = fake_server().await;
    let dir = project(&[]);
    let config = ServerConfig::socket("fake", address);
    let options = ClientOptions {
        request_timeout: Duration::from_secs(5),
        startup_timeout: Duration::from_secs(5),
    };

    let client = LspClient::start(&config, dir.path(), options).await.unwrap();
    assert!(client.supports_pull_diagnostics());
    assert!(client.is_alive().await);

    let diagnostics = client
        .document_diagnostics("a.py", "import os\nimport json\n")
        .await
        .unwrap();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].range.start.line, 1);

    let diagnostics = client.document_diagnostics("a.py", "import os\n").await.unwrap();
    assert!(diagnostics.is_empty());

    client.shutdown().await.unwrap();
    assert!(client.is_closed());
}

#[tokio::test]
async fn test_engine_resolves_error_reported_by_socket_server() {
    let address = fake_server().await;
    let dir = project(&[("a.py", "import os\nprint(os.name)\nimport json\n")]);
    let config = EngineConfig {
        request_timeout_ms: 5_000,
        startup_timeout_ms: 5_000,
        servers: vec![ServerConfig::socket("fake-lsp", address)
            .with_languages(&["python"])
            .with_auto_start(true)],
        ..EngineConfig::default()
    };
    let engine = ResolutionEngine::new(dir.path(), config).await.unwrap();

    assert_eq!(engine.start_servers().await, vec!["fake-lsp"]);
    assert_eq!(
        engine.servers().health_check("fake-lsp").await,
        Some(ServerStatus::Running)
    );

    let errors = engine.errors().await;
    assert_eq!(errors.len(), 1, "{:?}", errors);
    assert_eq!(errors[0].source, "fake-lsp");
    assert_eq!(errors[0].location.line, 3);
    assert!(errors[0].fixes.iter().any(|f| f.is_auto_applicable()));

    let result = engine.resolve_error(&errors[0].id).await;
    assert!(result.success, "{}", result.message);
    assert_eq!(read(dir.path(), "a.py"), "import os\nprint(os.name)\n");
    assert!(engine.errors().await.is_empty());

    engine.shutdown().await;
    assert_eq!(
        engine.servers().get_server_info("fake-lsp").await.map(|i| i.status),
        Some(ServerStatus::Stopped)
    );
}

#[tokio::test]
async fn test_unreachable_server_is_marked_crashed() {
    // Bind then drop to get a port nobody listens on
    let address = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let dir = project(&[("a.py", "import json\n")]);
    let config = EngineConfig {
        servers: vec![ServerConfig::socket("gone", address).with_auto_start(true)],
        ..EngineConfig::default()
    };
    let engine = ResolutionEngine::new(dir.path(), config).await.unwrap();

    assert!(engine.start_servers().await.is_empty());
    let info = engine.servers().get_server_info("gone").await.unwrap();
    assert_eq!(info.status, ServerStatus::Crashed);
    assert!(info.last_error.is_some());

    // No backends: the scan is empty rather than failing
    assert!(engine.errors().await.is_empty());
}
