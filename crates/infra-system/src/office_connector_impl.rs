// Office connector implementation: JSON-lines bridge over a socket or pipe
// reason: tokio::net for async IO, serde_json for frames
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use officepool_core::domain::{ConnectionEndpoint, Task, TaskOutput};
use officepool_core::port::office_connector::{
    ConnectionError, OfficeConnection, OfficeConnector,
};

/// Upper bound for a liveness ping round trip
pub const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Largest response line accepted from the bridge
pub const MAX_FRAME_BYTES: u64 = 16 * 1024 * 1024;

/// Filesystem path of a named office pipe
#[cfg(unix)]
pub fn pipe_path(name: &str) -> PathBuf {
    let uid = nix::unistd::getuid().as_raw();
    PathBuf::from(format!("/tmp/OSL_PIPE_{}_{}", uid, name))
}

/// Filesystem path of a named office pipe
#[cfg(windows)]
pub fn pipe_path(name: &str) -> PathBuf {
    PathBuf::from(format!(r"\\.\pipe\{}", name))
}

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum BridgeRequest<'a> {
    Execute { id: &'a str, payload: &'a Value },
    Ping,
    Terminate,
}

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    #[serde(default)]
    id: Option<String>,
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

type BoxedReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct BridgeIo {
    reader: BoxedReader,
    writer: BoxedWriter,
}

/// Connects to the bridge an office process exposes on its endpoint
#[derive(Debug)]
pub struct BridgeConnector {
    max_frame_bytes: u64,
}

impl Default for BridgeConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeConnector {
    pub fn new() -> Self {
        Self {
            max_frame_bytes: MAX_FRAME_BYTES,
        }
    }

    pub fn with_max_frame_bytes(max_frame_bytes: u64) -> Self {
        Self { max_frame_bytes }
    }

    async fn open(
        endpoint: &ConnectionEndpoint,
    ) -> std::io::Result<(BoxedReader, BoxedWriter)> {
        match endpoint {
            ConnectionEndpoint::Socket { host, port } => {
                let stream = tokio::net::TcpStream::connect((host.as_str(), *port)).await?;
                stream.set_nodelay(true)?;
                Ok(split(stream))
            }
            #[cfg(unix)]
            ConnectionEndpoint::Pipe { name } => {
                let stream = tokio::net::UnixStream::connect(pipe_path(name)).await?;
                Ok(split(stream))
            }
            #[cfg(windows)]
            ConnectionEndpoint::Pipe { name } => {
                let stream = tokio::net::windows::named_pipe::ClientOptions::new()
                    .open(pipe_path(name))?;
                Ok(split(stream))
            }
        }
    }
}

fn split<S>(stream: S) -> (BoxedReader, BoxedWriter)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
    (BufReader::new(reader), Box::new(writer))
}

#[async_trait]
impl OfficeConnector for BridgeConnector {
    async fn connect(
        &self,
        endpoint: &ConnectionEndpoint,
    ) -> Result<Arc<dyn OfficeConnection>, ConnectionError> {
        let (reader, writer) = Self::open(endpoint)
            .await
            .map_err(|e| ConnectionError::Refused(format!("{}: {}", endpoint, e)))?;
        debug!(endpoint = %endpoint, "Bridge connected");

        Ok(Arc::new(BridgeConnection {
            endpoint: endpoint.clone(),
            io: Mutex::new(BridgeIo { reader, writer }),
            closed: AtomicBool::new(false),
            max_frame_bytes: self.max_frame_bytes,
        }))
    }
}

/// One bridge connection; requests are serialized over a single stream
pub struct BridgeConnection {
    endpoint: ConnectionEndpoint,
    io: Mutex<BridgeIo>,
    closed: AtomicBool,
    max_frame_bytes: u64,
}

impl BridgeConnection {
    fn check_open(&self) -> Result<(), ConnectionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Disconnected(format!(
                "connection to {} is closed",
                self.endpoint
            )));
        }
        Ok(())
    }

    /// Mark the stream unusable; later requests fail with `Disconnected`
    fn desync(&self, reason: String) -> ConnectionError {
        self.closed.store(true, Ordering::SeqCst);
        warn!(endpoint = %self.endpoint, reason = %reason, "Bridge stream out of sync");
        ConnectionError::Disconnected(reason)
    }

    async fn send(io: &mut BridgeIo, request: &BridgeRequest<'_>) -> Result<(), ConnectionError> {
        let mut line = serde_json::to_vec(request)
            .map_err(|e| ConnectionError::Protocol(e.to_string()))?;
        line.push(b'\n');
        io.writer.write_all(&line).await.map_err(io_error)?;
        io.writer.flush().await.map_err(io_error)
    }

    async fn request(&self, request: &BridgeRequest<'_>) -> Result<BridgeResponse, ConnectionError> {
        self.check_open()?;
        let mut io = self.io.lock().await;
        Self::send(&mut io, request).await?;

        let mut line = String::new();
        let read = (&mut io.reader)
            .take(self.max_frame_bytes + 1)
            .read_line(&mut line)
            .await
            .map_err(io_error)?;
        if read == 0 {
            return Err(ConnectionError::Disconnected(format!(
                "{} closed the bridge",
                self.endpoint
            )));
        }
        if read as u64 > self.max_frame_bytes {
            return Err(self.desync(format!(
                "response frame exceeds {} bytes",
                self.max_frame_bytes
            )));
        }
        serde_json::from_str(line.trim_end())
            .map_err(|e| ConnectionError::Protocol(format!("bad response frame: {}", e)))
    }
}

fn io_error(e: std::io::Error) -> ConnectionError {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::BrokenPipe
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::UnexpectedEof => ConnectionError::Disconnected(e.to_string()),
        _ => ConnectionError::IoError(e.to_string()),
    }
}

#[async_trait]
impl OfficeConnection for BridgeConnection {
    async fn execute(&self, task: &Task) -> Result<TaskOutput, ConnectionError> {
        let response = self
            .request(&BridgeRequest::Execute {
                id: &task.id,
                payload: task.payload.as_value(),
            })
            .await?;

        if let Some(id) = &response.id {
            if id != &task.id {
                return Err(self.desync(format!(
                    "response for task {} while waiting for {}",
                    id, task.id
                )));
            }
        }

        if response.ok {
            Ok(TaskOutput::new(response.result.unwrap_or(Value::Null)))
        } else {
            Err(ConnectionError::TaskFailed(
                response
                    .error
                    .unwrap_or_else(|| "conversion failed".to_string()),
            ))
        }
    }

    async fn is_alive(&self) -> bool {
        match timeout(PING_TIMEOUT, self.request(&BridgeRequest::Ping)).await {
            Ok(Ok(response)) => response.ok,
            Ok(Err(e)) => {
                debug!(endpoint = %self.endpoint, error = %e, "Ping failed");
                false
            }
            Err(_) => {
                warn!(endpoint = %self.endpoint, "Ping timed out");
                false
            }
        }
    }

    async fn terminate(&self) -> Result<(), ConnectionError> {
        self.check_open()?;
        let mut io = self.io.lock().await;
        // Office exits without answering
        Self::send(&mut io, &BridgeRequest::Terminate).await
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut io = self.io.lock().await;
        if let Err(e) = io.writer.shutdown().await {
            debug!(endpoint = %self.endpoint, error = %e, "Bridge shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use officepool_core::domain::TaskPayload;
    use serde_json::json;
    use tokio::net::TcpListener;

    /// Minimal bridge: echoes payloads, fails on {"fail": ..}, drops on {"crash": ..},
    /// answers {"stale": ..} with another task's id
    async fn serve<S>(stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let request: Value = serde_json::from_str(&line).unwrap();
            let reply = match request["op"].as_str() {
                Some("execute") if request["payload"].get("crash").is_some() => return,
                Some("execute") if request["payload"].get("stale").is_some() => json!({
                    "id": "some-earlier-task",
                    "ok": true,
                    "result": null,
                }),
                Some("execute") if request["payload"].get("fail").is_some() => json!({
                    "id": request["id"],
                    "ok": false,
                    "error": request["payload"]["fail"],
                }),
                Some("execute") => json!({
                    "id": request["id"],
                    "ok": true,
                    "result": {"echo": request["payload"]},
                }),
                Some("ping") => json!({"ok": true}),
                _ => return,
            };
            let mut out = serde_json::to_vec(&reply).unwrap();
            out.push(b'\n');
            writer.write_all(&out).await.unwrap();
        }
    }

    async fn tcp_bridge() -> ConnectionEndpoint {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream));
            }
        });
        ConnectionEndpoint::socket("127.0.0.1", port)
    }

    fn task(payload: Value) -> Task {
        Task::new("t-1", 0, TaskPayload::new(payload))
    }

    #[tokio::test]
    async fn test_execute_round_trip() {
        let endpoint = tcp_bridge().await;
        let connection = BridgeConnector::new().connect(&endpoint).await.unwrap();

        let output = connection.execute(&task(json!({"doc": "a.odt"}))).await.unwrap();

        assert_eq!(output.as_value(), &json!({"echo": {"doc": "a.odt"}}));
        assert!(connection.is_alive().await);
    }

    #[tokio::test]
    async fn test_failed_conversion_is_task_error() {
        let endpoint = tcp_bridge().await;
        let connection = BridgeConnector::new().connect(&endpoint).await.unwrap();

        let err = connection
            .execute(&task(json!({"fail": "unsupported format"})))
            .await
            .unwrap_err();

        assert!(matches!(err, ConnectionError::TaskFailed(ref m) if m == "unsupported format"));
        assert!(!err.is_fatal());
        assert!(connection.is_alive().await);
    }

    #[tokio::test]
    async fn test_dropped_bridge_is_fatal() {
        let endpoint = tcp_bridge().await;
        let connection = BridgeConnector::new().connect(&endpoint).await.unwrap();

        let err = connection.execute(&task(json!({"crash": true}))).await.unwrap_err();

        assert!(err.is_fatal());
        assert!(!connection.is_alive().await);
    }

    #[tokio::test]
    async fn test_mismatched_response_id_is_fatal() {
        let endpoint = tcp_bridge().await;
        let connection = BridgeConnector::new().connect(&endpoint).await.unwrap();

        let err = connection.execute(&task(json!({"stale": true}))).await.unwrap_err();

        assert!(matches!(err, ConnectionError::Disconnected(_)));
        assert!(err.is_fatal());
        assert!(!connection.is_alive().await);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_fatal() {
        let endpoint = tcp_bridge().await;
        let connection = BridgeConnector::with_max_frame_bytes(64)
            .connect(&endpoint)
            .await
            .unwrap();

        let small = connection.execute(&task(json!("ok"))).await.unwrap();
        assert_eq!(small.as_value(), &json!({"echo": "ok"}));

        let err = connection
            .execute(&task(json!({"doc": "x".repeat(200)})))
            .await
            .unwrap_err();

        assert!(matches!(err, ConnectionError::Disconnected(_)));
        assert!(err.is_fatal());
        assert!(connection.execute(&task(json!("ok"))).await.is_err());
    }

    #[tokio::test]
    async fn test_refused_when_nothing_listens() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = BridgeConnector::new()
            .connect(&ConnectionEndpoint::socket("127.0.0.1", port))
            .await;

        assert!(matches!(result, Err(ConnectionError::Refused(_))));
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_requests() {
        let endpoint = tcp_bridge().await;
        let connection = BridgeConnector::new().connect(&endpoint).await.unwrap();

        connection.close().await;
        connection.close().await;

        assert!(!connection.is_alive().await);
        assert!(connection.execute(&task(json!(1))).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pipe_round_trip() {
        let name = format!("officepool_test_{}", std::process::id());
        let path = pipe_path(&name);
        let _ = std::fs::remove_file(&path);
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                serve(stream).await;
            }
        });

        let connection = BridgeConnector::new()
            .connect(&ConnectionEndpoint::pipe(name))
            .await
            .unwrap();
        let output = connection.execute(&task(json!("x"))).await.unwrap();

        assert_eq!(output.as_value(), &json!({"echo": "x"}));
        let _ = std::fs::remove_file(&path);
    }

    #[cfg(unix)]
    #[test]
    fn test_pipe_path_carries_uid() {
        let uid = nix::unistd::getuid().as_raw();
        assert_eq!(
            pipe_path("office_0"),
            PathBuf::from(format!("/tmp/OSL_PIPE_{}_office_0", uid))
        );
    }
}
