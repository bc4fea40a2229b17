//! LSP Client: JSON-RPC 2.0 Transport over stdio or TCP
//!
//! Language Server Protocol client used to pull diagnostics from analysis
//! backends. Handles the initialize/shutdown lifecycle, Content-Length
//! framing, request/response correlation, requests the server sends back to
//! us, and `textDocument/publishDiagnostics` notifications.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use cascade_resolver_core::{ConnectionType, ServerConfig};
use cascade_resolver_protocol::{
    encode_message, parse_message, FrameDecoder, Message, Notification, ProtocolError, Request,
    RequestId, RequestTracker, Response, ResponseError, ResponseOutcome,
};

use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::language_for_path;

/// Bound on the shutdown request and process exit wait.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Buffered `publishDiagnostics` notifications per subscriber.
const PUBLISH_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    pub request_timeout: Duration,
    pub startup_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            startup_timeout: Duration::from_secs(30),
        }
    }
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// State shared between the client and its background reader task.
struct Shared {
    server_name: String,
    tracker: RequestTracker,
    waiters: DashMap<RequestId, oneshot::Sender<Response>>,
    /// Latest diagnostics per document URI
    published: DashMap<String, Vec<lsp_types::Diagnostic>>,
    publish_tx: broadcast::Sender<lsp_types::PublishDiagnosticsParams>,
    notifications_received: AtomicU64,
    closed: AtomicBool,
    writer: Mutex<Writer>,
}

impl Shared {
    /// Send a message with Content-Length framing.
    async fn send(&self, message: &Message) -> AppResult<()> {
        let body = message.to_json()?;
        let frame = encode_message(&body);

        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;

        debug!(server = %self.server_name, "LSP -> {}", body);
        Ok(())
    }

    fn forget(&self, id: &RequestId) {
        if let RequestId::Number(n) = id {
            self.tracker.cancel(*n);
        }
        self.waiters.remove(id);
    }

    /// Drop every waiter so in-flight callers observe a closed connection.
    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for pending in self.tracker.drain_pending() {
            self.waiters.remove(&RequestId::Number(pending.id));
        }
    }
}

/// LSP client for one language server connection.
pub struct LspClient {
    shared: Arc<Shared>,
    root: PathBuf,
    request_timeout: Duration,
    /// Document URI -> last version sent
    open_documents: DashMap<String, i32>,
    child: Mutex<Option<Child>>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
    capabilities: Option<lsp_types::ServerCapabilities>,
}

impl LspClient {
    /// Connect according to the server's connection type and complete the
    /// initialize handshake.
    pub async fn start(config: &ServerConfig, root: &Path, options: ClientOptions) -> AppResult<Self> {
        config.validate()?;
        match config.connection_type {
            ConnectionType::Stdio => Self::spawn(config, root, options).await,
            ConnectionType::Socket => Self::connect(config, root, options).await,
        }
    }

    /// Spawn a language server process and talk to it over stdin/stdout.
    pub async fn spawn(config: &ServerConfig, root: &Path, options: ClientOptions) -> AppResult<Self> {
        let command = config
            .command
            .as_deref()
            .ok_or_else(|| AppError::config(format!("server '{}' has no command", config.name)))?;

        let mut child = Command::new(command)
            .args(&config.args)
            .current_dir(root)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AppError::backend_unavailable(format!("Failed to spawn LSP server '{}': {}", command, e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::backend_unavailable("Failed to capture stdin of LSP server"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::backend_unavailable("Failed to capture stdout of LSP server"))?;

        let mut client = Self::from_transport(&config.name, root, stdout, stdin, Some(child), options);
        client.initialize(options.startup_timeout).await?;
        Ok(client)
    }

    /// Connect to an already running server at `host:port`.
    pub async fn connect(config: &ServerConfig, root: &Path, options: ClientOptions) -> AppResult<Self> {
        let address = config
            .address
            .as_deref()
            .ok_or_else(|| AppError::config(format!("server '{}' has no address", config.name)))?;

        let stream = timeout(options.startup_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| AppError::timeout(format!("Connecting to '{}' timed out", address)))?
            .map_err(|e| {
                AppError::backend_unavailable(format!("Failed to connect to '{}': {}", address, e))
            })?;
        let (read_half, write_half) = stream.into_split();

        let mut client = Self::from_transport(&config.name, root, read_half, write_half, None, options);
        client.initialize(options.startup_timeout).await?;
        Ok(client)
    }

    /// Wrap an established byte transport. Starts the reader task but does
    /// not perform the handshake.
    pub fn from_transport<R, W>(
        server_name: &str,
        root: &Path,
        reader: R,
        writer: W,
        child: Option<Child>,
        options: ClientOptions,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (publish_tx, _) = broadcast::channel(PUBLISH_CHANNEL_CAPACITY);
        let shared = Arc::new(Shared {
            server_name: server_name.to_string(),
            tracker: RequestTracker::new(),
            waiters: DashMap::new(),
            published: DashMap::new(),
            publish_tx,
            notifications_received: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            writer: Mutex::new(Box::new(writer)),
        });

        let reader_shared = Arc::clone(&shared);
        let reader_handle = tokio::spawn(async move {
            Self::reader_loop(reader, reader_shared).await;
        });

        Self {
            shared,
            root: root.to_path_buf(),
            request_timeout: options.request_timeout,
            open_documents: DashMap::new(),
            child: Mutex::new(child),
            reader: std::sync::Mutex::new(Some(reader_handle)),
            capabilities: None,
        }
    }

    /// `initialize` request followed by the `initialized` notification.
    pub async fn initialize(&mut self, startup_timeout: Duration) -> AppResult<()> {
        let root_uri = path_to_uri(&self.root);
        let uri = lsp_types::Uri::from_str(&root_uri)
            .map_err(|e| AppError::config(format!("Invalid root URI '{}': {}", root_uri, e)))?;
        let name = self
            .root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "workspace".to_string());

        let capabilities: lsp_types::ClientCapabilities = serde_json::from_value(json!({
            "textDocument": {
                "synchronization": { "dynamicRegistration": false },
                "publishDiagnostics": { "relatedInformation": true, "versionSupport": true },
                "diagnostic": { "dynamicRegistration": false, "relatedDocumentSupport": false }
            },
            "workspace": { "configuration": true }
        }))?;

        #[allow(deprecated)]
        let params = lsp_types::InitializeParams {
            process_id: Some(std::process::id()),
            root_uri: Some(uri.clone()),
            capabilities,
            workspace_folders: Some(vec![lsp_types::WorkspaceFolder { uri, name }]),
            ..Default::default()
        };

        let result = self
            .call(
                <lsp_types::request::Initialize as lsp_types::request::Request>::METHOD,
                Some(serde_json::to_value(params)?),
                startup_timeout,
            )
            .await?;
        let init: lsp_types::InitializeResult = serde_json::from_value(result)?;
        self.capabilities = Some(init.capabilities);

        self.notify::<lsp_types::notification::Initialized>(lsp_types::InitializedParams {})
            .await?;

        info!(server = %self.shared.server_name, "LSP server initialized");
        Ok(())
    }

    pub fn server_name(&self) -> &str {
        &self.shared.server_name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn capabilities(&self) -> Option<&lsp_types::ServerCapabilities> {
        self.capabilities.as_ref()
    }

    /// Whether the server answers `textDocument/diagnostic`.
    pub fn supports_pull_diagnostics(&self) -> bool {
        self.capabilities
            .as_ref()
            .map_or(false, |c| c.diagnostic_provider.is_some())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Connection open and, for spawned servers, the process still running.
    pub async fn is_alive(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        let mut child = self.child.lock().await;
        match child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => true,
        }
    }

    pub fn notifications_received(&self) -> u64 {
        self.shared.notifications_received.load(Ordering::Relaxed)
    }

    /// Subscribe to pushed `publishDiagnostics` notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<lsp_types::PublishDiagnosticsParams> {
        self.shared.publish_tx.subscribe()
    }

    /// Most recent diagnostics the server reported for a document URI.
    pub fn published_diagnostics(&self, uri: &str) -> Option<Vec<lsp_types::Diagnostic>> {
        self.shared.published.get(uri).map(|entry| entry.value().clone())
    }

    // ── Requests ────────────────────────────────────────────────────────

    /// Send a request and wait for the response (with timeout).
    pub async fn request<R: lsp_types::request::Request>(&self, params: R::Params) -> AppResult<R::Result>
    where
        R::Params: Serialize,
        R::Result: for<'de> Deserialize<'de>,
    {
        let params = serde_json::to_value(params)?;
        let result = self.call(R::METHOD, Some(params), self.request_timeout).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Send a notification (no response expected).
    pub async fn notify<N: lsp_types::notification::Notification>(&self, params: N::Params) -> AppResult<()>
    where
        N::Params: Serialize,
    {
        let params = serde_json::to_value(params)?;
        let notification = self
            .shared
            .tracker
            .create_notification(N::METHOD, non_null(params));
        self.shared.send(&notification.into()).await
    }

    async fn call(&self, method: &str, params: Option<Value>, limit: Duration) -> AppResult<Value> {
        if self.is_closed() {
            return Err(AppError::backend_unavailable(format!(
                "Connection to '{}' is closed",
                self.shared.server_name
            )));
        }

        let request: Request = self
            .shared
            .tracker
            .create_request(method, params.and_then(non_null));
        let id = request.id.clone();

        // Register the waiter before sending
        let (tx, rx) = oneshot::channel::<Response>();
        self.shared.waiters.insert(id.clone(), tx);

        if let Err(e) = self.shared.send(&request.into()).await {
            self.shared.forget(&id);
            return Err(e);
        }

        let response = match timeout(limit, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(AppError::backend_unavailable(format!(
                    "'{}' closed the connection during '{}' (id={})",
                    self.shared.server_name, method, id
                )))
            }
            Err(_) => {
                self.shared.forget(&id);
                let cancel = Notification::new("$/cancelRequest", Some(json!({ "id": id })));
                let _ = self.shared.send(&cancel.into()).await;
                return Err(AppError::timeout(format!(
                    "LSP request '{}' (id={}) timed out after {}ms",
                    method,
                    id,
                    limit.as_millis()
                )));
            }
        };

        response.into_result().map_err(|e| {
            AppError::backend_unavailable(format!(
                "'{}' failed on '{}': {}",
                method, self.shared.server_name, e
            ))
        })
    }

    // ── Diagnostics ─────────────────────────────────────────────────────

    /// Diagnostics for a repo-relative file with the given content.
    ///
    /// Opens (or updates) the document, then uses pull diagnostics when the
    /// server supports them, otherwise waits for the matching
    /// `publishDiagnostics` notification.
    pub async fn document_diagnostics(
        &self,
        relative_path: &str,
        content: &str,
    ) -> AppResult<Vec<lsp_types::Diagnostic>> {
        let uri_str = path_to_uri(&self.root.join(relative_path));
        let uri = lsp_types::Uri::from_str(&uri_str)
            .map_err(|e| AppError::validation(format!("Invalid document URI '{}': {}", uri_str, e)))?;

        // Subscribe before the document changes so no publication is missed
        let mut updates = self.subscribe();
        let language_id = language_for_path(relative_path).unwrap_or("plaintext");
        let version = self.sync_document(&uri, &uri_str, language_id, content).await?;

        if self.supports_pull_diagnostics() {
            match self.pull_diagnostics(&uri_str).await {
                Ok(Some(items)) => return Ok(items),
                Ok(None) => return Ok(self.published_diagnostics(&uri_str).unwrap_or_default()),
                Err(e) => {
                    debug!(server = %self.shared.server_name, error = %e, "Pull diagnostics failed, waiting for push");
                }
            }
        }

        let wait = async {
            loop {
                match updates.recv().await {
                    Ok(params)
                        if same_document(params.uri.as_str(), &uri_str)
                            && params.version.map_or(true, |v| v >= version) =>
                    {
                        return Ok(params.diagnostics);
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(AppError::backend_unavailable(format!(
                            "'{}' closed the connection",
                            self.shared.server_name
                        )))
                    }
                }
            }
        };

        match timeout(self.request_timeout, wait).await {
            Ok(result) => result,
            Err(_) => self.published_diagnostics(&uri_str).ok_or_else(|| {
                AppError::timeout(format!(
                    "No diagnostics published for '{}' by '{}'",
                    relative_path, self.shared.server_name
                ))
            }),
        }
    }

    /// `didOpen` on first sight, full-text `didChange` afterwards. Returns
    /// the document version sent.
    async fn sync_document(
        &self,
        uri: &lsp_types::Uri,
        uri_str: &str,
        language_id: &str,
        content: &str,
    ) -> AppResult<i32> {
        let previous = self.open_documents.get(uri_str).map(|v| *v);
        match previous {
            None => {
                self.open_documents.insert(uri_str.to_string(), 1);
                self.notify::<lsp_types::notification::DidOpenTextDocument>(
                    lsp_types::DidOpenTextDocumentParams {
                        text_document: lsp_types::TextDocumentItem {
                            uri: uri.clone(),
                            language_id: language_id.to_string(),
                            version: 1,
                            text: content.to_string(),
                        },
                    },
                )
                .await?;
                Ok(1)
            }
            Some(version) => {
                let version = version + 1;
                self.open_documents.insert(uri_str.to_string(), version);
                self.notify::<lsp_types::notification::DidChangeTextDocument>(
                    lsp_types::DidChangeTextDocumentParams {
                        text_document: lsp_types::VersionedTextDocumentIdentifier {
                            uri: uri.clone(),
                            version,
                        },
                        content_changes: vec![lsp_types::TextDocumentContentChangeEvent {
                            range: None,
                            range_length: None,
                            text: content.to_string(),
                        }],
                    },
                )
                .await?;
                Ok(version)
            }
        }
    }

    /// `Ok(None)` when the server reports the previous result unchanged.
    async fn pull_diagnostics(&self, uri_str: &str) -> AppResult<Option<Vec<lsp_types::Diagnostic>>> {
        let params = json!({ "textDocument": { "uri": uri_str } });
        let report = self
            .call(
                <lsp_types::request::DocumentDiagnosticRequest as lsp_types::request::Request>::METHOD,
                Some(params),
                self.request_timeout,
            )
            .await?;

        match report.get("kind").and_then(Value::as_str) {
            Some("full") => {
                let items: Vec<lsp_types::Diagnostic> =
                    serde_json::from_value(report.get("items").cloned().unwrap_or_else(|| json!([])))?;
                self.shared.published.insert(uri_str.to_string(), items.clone());
                Ok(Some(items))
            }
            Some("unchanged") => Ok(None),
            _ => Err(ProtocolError::invalid_shape("diagnostic report without a known kind").into()),
        }
    }

    // ── Shutdown ────────────────────────────────────────────────────────

    /// Graceful shutdown: shutdown request -> exit notification -> wait.
    /// Safe to call more than once.
    pub async fn shutdown(&self) -> AppResult<()> {
        if !self.is_closed() {
            if let Err(e) = self.call("shutdown", None, SHUTDOWN_TIMEOUT).await {
                debug!(server = %self.shared.server_name, error = %e, "Shutdown request failed");
            }
            let exit = self.shared.tracker.create_notification("exit", None);
            let _ = self.shared.send(&exit.into()).await;
        }
        self.shared.close();

        {
            let mut writer = self.shared.writer.lock().await;
            let _ = writer.shutdown().await;
        }

        if let Some(mut child) = self.child.lock().await.take() {
            if timeout(SHUTDOWN_TIMEOUT, child.wait()).await.is_err() {
                warn!(server = %self.shared.server_name, "LSP server did not exit, killing");
                let _ = child.kill().await;
            }
        }

        let reader = self
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = reader {
            handle.abort();
        }

        Ok(())
    }

    // ── Reader ──────────────────────────────────────────────────────────

    /// Background reader loop: decodes frames and dispatches responses,
    /// server requests and notifications.
    async fn reader_loop<R: AsyncRead + Unpin>(mut reader: R, shared: Arc<Shared>) {
        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; 8192];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    debug!(server = %shared.server_name, error = %e, "LSP read failed");
                    break;
                }
            };
            decoder.push(&buf[..n]);

            while let Some(frame) = decoder.next_frame() {
                match frame {
                    Ok(body) => Self::dispatch(&shared, &body).await,
                    Err(e) => warn!(server = %shared.server_name, error = %e, "Dropping malformed frame"),
                }
            }
        }

        debug!(server = %shared.server_name, "LSP connection closed");
        shared.close();
    }

    async fn dispatch(shared: &Shared, body: &str) {
        debug!(server = %shared.server_name, "LSP <- {}", body);

        let message = match parse_message(body) {
            Ok(message) => message,
            Err(e) => {
                warn!(server = %shared.server_name, error = %e, "Dropping invalid message");
                return;
            }
        };

        match message {
            Message::Response(response) => match shared.tracker.complete(&response) {
                Ok(pending) => {
                    if let Some((_, waiter)) = shared.waiters.remove(&RequestId::Number(pending.id)) {
                        let _ = waiter.send(response);
                    }
                }
                Err(e) => debug!(server = %shared.server_name, error = %e, "Dropping response"),
            },
            Message::Notification(notification) => Self::handle_notification(shared, notification),
            Message::Request(request) => {
                shared.tracker.track_inbound(&request);
                let outcome = server_request_outcome(&request);
                match shared.tracker.create_response(request.id.clone(), outcome, false) {
                    Ok(response) => {
                        if let Err(e) = shared.send(&response.into()).await {
                            debug!(server = %shared.server_name, error = %e, "Failed to answer server request");
                        }
                    }
                    Err(e) => debug!(server = %shared.server_name, error = %e, "Cannot answer server request"),
                }
            }
        }
    }

    fn handle_notification(shared: &Shared, notification: Notification) {
        match notification.method.as_str() {
            "textDocument/publishDiagnostics" => {
                let params = match notification
                        .params
                        .map(serde_json::from_value::<lsp_types::PublishDiagnosticsParams>)
                    {
                        Some(Ok(params)) => params,
                        _ => {
                            warn!(server = %shared.server_name, "Dropping malformed publishDiagnostics");
                            return;
                        }
                    };
                shared.notifications_received.fetch_add(1, Ordering::Relaxed);
                shared
                    .published
                    .insert(params.uri.as_str().to_string(), params.diagnostics.clone());
                // No subscribers is fine
                let _ = shared.publish_tx.send(params);
            }
            "window/logMessage" | "window/showMessage" => {
                debug!(server = %shared.server_name, params = ?notification.params, "Server message");
            }
            other => debug!(server = %shared.server_name, method = %other, "Ignoring notification"),
        }
    }
}

/// Answer for a request the server sent to us.
fn server_request_outcome(request: &Request) -> ResponseOutcome {
    match request.method.as_str() {
        "workspace/configuration" => {
            let items = request
                .params
                .as_ref()
                .and_then(|p| p.get("items"))
                .and_then(Value::as_array)
                .map_or(0, |items| items.len());
            ResponseOutcome::Result(Value::Array(vec![Value::Null; items]))
        }
        "client/registerCapability"
        | "client/unregisterCapability"
        | "window/workDoneProgress/create"
        | "window/showMessageRequest" => ResponseOutcome::Result(Value::Null),
        other => ResponseOutcome::Error(ResponseError::method_not_found(other)),
    }
}

fn non_null(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        other => Some(other),
    }
}

// =============================================================================
// URI helpers
// =============================================================================

/// `file://` URI for an absolute path, percent-encoding reserved bytes.
pub fn path_to_uri(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    let mut encoded = String::with_capacity(raw.len() + 8);
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'/' | b'-' | b'_' | b'.' | b'~' | b':' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    if encoded.starts_with('/') {
        format!("file://{}", encoded)
    } else {
        format!("file:///{}", encoded)
    }
}

/// Filesystem path of a `file://` URI.
pub fn uri_to_path(uri: &str) -> Option<PathBuf> {
    let rest = uri.strip_prefix("file://")?;
    let bytes = rest.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok()?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    let path = String::from_utf8(decoded).ok()?;
    // Windows drive paths arrive as /C:/...
    let path = match path.as_bytes() {
        [b'/', drive, b':', ..] if drive.is_ascii_alphabetic() => path[1..].to_string(),
        _ => path,
    };
    Some(PathBuf::from(path))
}

fn same_document(a: &str, b: &str) -> bool {
    a == b || uri_to_path(a).is_some_and(|pa| uri_to_path(b).is_some_and(|pb| pa == pb))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream, ReadHalf, WriteHalf};

    /// Minimal in-memory server: answers by method via `respond`.
    struct FakeServer {
        reader: ReadHalf<DuplexStream>,
        writer: WriteHalf<DuplexStream>,
        decoder: FrameDecoder,
    }

    impl FakeServer {
        async fn next(&mut self) -> Option<Message> {
            let mut buf = vec![0u8; 4096];
            loop {
                if let Some(frame) = self.decoder.next_frame() {
                    return Some(parse_message(&frame.unwrap()).unwrap());
                }
                let n = self.reader.read(&mut buf).await.ok()?;
                if n == 0 {
                    return None;
                }
                self.decoder.push(&buf[..n]);
            }
        }

        async fn send(&mut self, value: Value) {
            let frame = encode_message(&value.to_string());
            self.writer.write_all(&frame).await.unwrap();
        }
    }

    fn pair() -> (LspClient, FakeServer) {
        let (client_io, server_io) = duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (server_read, server_write) = tokio::io::split(server_io);
        let options = ClientOptions {
            request_timeout: Duration::from_millis(300),
            startup_timeout: Duration::from_millis(300),
        };
        let client = LspClient::from_transport(
            "fake",
            Path::new("/work"),
            client_read,
            client_write,
            None,
            options,
        );
        let server = FakeServer {
            reader: server_read,
            writer: server_write,
            decoder: FrameDecoder::new(),
        };
        (client, server)
    }

    #[test]
    fn test_uri_roundtrip() {
        let path = Path::new("/work/my project/a.py");
        let uri = path_to_uri(path);
        assert_eq!(uri, "file:///work/my%20project/a.py");
        assert_eq!(uri_to_path(&uri).unwrap(), path);
        assert!(same_document("file:///work/a%2Epy", "file:///work/a.py"));
    }

    #[test]
    fn test_server_request_outcomes() {
        let config = Request::new(
            "c1",
            "workspace/configuration",
            Some(json!({ "items": [{}, {}] })),
        );
        assert_eq!(
            server_request_outcome(&config),
            ResponseOutcome::Result(json!([null, null]))
        );
        let unknown = Request::new(7, "custom/thing", None);
        assert!(matches!(server_request_outcome(&unknown), ResponseOutcome::Error(_)));
    }

    #[tokio::test]
    async fn test_handshake_and_pull_diagnostics() {
        let (mut client, mut server) = pair();

        let server_task = tokio::spawn(async move {
            while let Some(message) = server.next().await {
                if let Message::Request(req) = message {
                    let result = match req.method.as_str() {
                        "initialize" => json!({ "capabilities": { "diagnosticProvider": {
                            "interFileDependencies": false, "workspaceDiagnostics": false } } }),
                        "textDocument/diagnostic" => json!({ "kind": "full", "items": [{
                            "range": { "start": { "line": 2, "character": 0 },
                                       "end": { "line": 2, "character": 11 } },
                            "severity": 2,
                            "message": "'json' imported but unused"
                        }] }),
                        _ => Value::Null,
                    };
                    server
                        .send(json!({ "jsonrpc": "2.0", "id": req.id, "result": result }))
                        .await;
                }
            }
        });

        client.initialize(Duration::from_millis(500)).await.unwrap();
        assert!(client.supports_pull_diagnostics());

        let diagnostics = client.document_diagnostics("a.py", "import json\n").await.unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].range.start.line, 2);

        client.shutdown().await.unwrap();
        client.shutdown().await.unwrap();
        assert!(client.is_closed());
        server_task.abort();
    }

    #[tokio::test]
    async fn test_push_diagnostics_fallback() {
        let (mut client, mut server) = pair();

        let server_task = tokio::spawn(async move {
            while let Some(message) = server.next().await {
                match message {
                    Message::Request(req) => {
                        server
                            .send(json!({ "jsonrpc": "2.0", "id": req.id, "result": { "capabilities": {} } }))
                            .await;
                    }
                    Message::Notification(n) if n.method == "textDocument/didOpen" => {
                        let uri = n.params.unwrap()["textDocument"]["uri"].clone();
                        server
                            .send(json!({
                                "jsonrpc": "2.0",
                                "method": "textDocument/publishDiagnostics",
                                "params": { "uri": uri, "diagnostics": [{
                                    "range": { "start": { "line": 0, "character": 4 },
                                               "end": { "line": 0, "character": 5 } },
                                    "message": "undefined name 'x'"
                                }] }
                            }))
                            .await;
                    }
                    _ => {}
                }
            }
        });

        client.initialize(Duration::from_millis(500)).await.unwrap();
        assert!(!client.supports_pull_diagnostics());

        let diagnostics = client.document_diagnostics("b.py", "y = x\n").await.unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(client.notifications_received(), 1);
        server_task.abort();
    }

    #[tokio::test]
    async fn test_request_timeout_clears_pending() {
        let (client, mut server) = pair();
        // Server reads but never answers
        let server_task = tokio::spawn(async move { while server.next().await.is_some() {} });

        let err = client.call("slow/method", None, Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)));
        assert_eq!(client.shared.tracker.pending_count(), 0);
        assert!(client.shared.waiters.is_empty());
        server_task.abort();
    }

    #[tokio::test]
    async fn test_out_of_order_responses() {
        let (client, mut server) = pair();

        let server_task = tokio::spawn(async move {
            let mut ids = Vec::new();
            while ids.len() < 2 {
                if let Some(Message::Request(req)) = server.next().await {
                    ids.push((req.id, req.method));
                }
            }
            for (id, method) in ids.into_iter().rev() {
                server
                    .send(json!({ "jsonrpc": "2.0", "id": id, "result": method }))
                    .await;
            }
        });

        let (a, b) = tokio::join!(
            client.call("first", None, Duration::from_millis(500)),
            client.call("second", None, Duration::from_millis(500))
        );
        assert_eq!(a.unwrap(), json!("first"));
        assert_eq!(b.unwrap(), json!("second"));
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_close_fails_pending_requests() {
        let (client, server) = pair();
        drop(server);

        let err = client.call("anything", None, Duration::from_millis(500)).await.unwrap_err();
        assert!(matches!(err, AppError::BackendUnavailable(_) | AppError::Io(_)));
    }
}
