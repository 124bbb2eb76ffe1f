//! Tunneled transport: raw HTTP/1.1 over a proxy stream connection
//!
//! The connection itself (proxy CONNECT, TLS) belongs to a [`TunnelConnector`].
//! This module writes the request by hand, reads the whole response, and
//! splits it into status line, headers and body.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, warn};

use crate::llm::buffer::GrowableBuffer;
use crate::llm::streaming::StreamContext;
use crate::transport::{ApiRequest, Transport, TransportError, TransportKind};

/// Initial capacity of the raw response buffer
pub const DEFAULT_RAW_CAPACITY: usize = 32 * 1024;

/// Ceiling for the raw response buffer
pub const DEFAULT_MAX_RAW_CAPACITY: usize = 8 * 1024 * 1024;

/// Bytes requested per read
pub const DEFAULT_READ_CHUNK: usize = 4096;

/// Characters of a non-200 body written to the log
const LOGGED_BODY_CHARS: usize = 500;

/// Opens byte-stream connections to a target through the proxy
#[async_trait]
pub trait TunnelConnector: Send + Sync {
    async fn open(
        &self,
        host: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> Result<Box<dyn TunnelConnection>, TransportError>;
}

/// An open tunnel
#[async_trait]
pub trait TunnelConnection: Send {
    /// Write some of `data`, returning how many bytes were taken
    async fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read into `buf`; `Ok(0)` means end of stream
    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    async fn close(&mut self);
}

/// Where and how the tunneled request is sent
#[derive(Debug, Clone)]
pub struct TunnelSettings {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub read_chunk: usize,
    pub initial_raw_capacity: usize,
    pub max_raw_capacity: usize,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            host: "api.anthropic.com".to_string(),
            port: 443,
            path: "/v1/messages".to_string(),
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(120),
            read_chunk: DEFAULT_READ_CHUNK,
            initial_raw_capacity: DEFAULT_RAW_CAPACITY,
            max_raw_capacity: DEFAULT_MAX_RAW_CAPACITY,
        }
    }
}

impl TunnelSettings {
    /// Value of the Host header; the port is omitted when it is the scheme default
    fn host_header(&self) -> String {
        match self.port {
            443 | 80 => self.host.clone(),
            port => format!("{}:{}", self.host, port),
        }
    }
}

/// Transport that speaks HTTP/1.1 over a [`TunnelConnection`]
pub struct TunneledTransport {
    connector: Arc<dyn TunnelConnector>,
    settings: TunnelSettings,
}

impl TunneledTransport {
    pub fn new(connector: Arc<dyn TunnelConnector>, settings: TunnelSettings) -> Self {
        Self { connector, settings }
    }

    /// Format the request line and headers, ending with the blank line
    pub fn request_head(&self, request: &ApiRequest<'_>) -> String {
        format!(
            "POST {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Content-Type: application/json\r\n\
             x-api-key: {}\r\n\
             anthropic-version: {}\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\r\n",
            self.settings.path,
            self.settings.host_header(),
            request.api_key,
            request.api_version,
            request.body.len()
        )
    }

    async fn exchange(
        &self,
        conn: &mut dyn TunnelConnection,
        request: &ApiRequest<'_>,
    ) -> Result<Vec<u8>, TransportError> {
        let head = self.request_head(request);
        write_all(conn, head.as_bytes()).await?;
        write_all(conn, request.body).await?;

        let chunk_len = self.settings.read_chunk.max(1);
        let mut raw = GrowableBuffer::new(self.settings.initial_raw_capacity, self.settings.max_raw_capacity);
        let mut chunk = vec![0u8; chunk_len];
        let mut read_error = None;

        loop {
            if !raw.ensure_capacity(raw.len() + chunk_len + 1) {
                warn!("Tunnel response exceeds {} bytes, stopping read", raw.max_capacity());
                break;
            }

            match conn.read(&mut chunk, self.settings.read_timeout).await {
                Ok(0) => break,
                Ok(n) => {
                    raw.extend(&chunk[..n]);
                }
                Err(e) if raw.is_empty() => return Err(e),
                Err(e) => {
                    debug!("Tunnel read ended after {} bytes: {}", raw.len(), e);
                    read_error = Some(e);
                    break;
                }
            }
        }

        // a failure before the headers completed leaves nothing usable
        if let Some(e) = read_error
            && find(raw.as_slice(), b"\r\n\r\n").is_none()
        {
            return Err(e);
        }

        Ok(raw.into_vec())
    }
}

#[async_trait]
impl Transport for TunneledTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tunneled
    }

    async fn perform(&self, request: &ApiRequest<'_>, ctx: &mut StreamContext) -> Result<u16, TransportError> {
        let mut conn = self
            .connector
            .open(&self.settings.host, self.settings.port, self.settings.connect_timeout)
            .await?;

        let result = self.exchange(conn.as_mut(), request).await;
        conn.close().await;
        let raw = result?;

        let response = RawResponse::parse(&raw);
        debug!("Tunnel response: status {}, {} raw bytes", response.status, raw.len());

        if let Some(body) = response.body() {
            if response.status != 200 {
                error!(
                    "API error body: {}",
                    String::from_utf8_lossy(&body).chars().take(LOGGED_BODY_CHARS).collect::<String>()
                );
            }
            ctx.deliver(response.status, &body);
        }

        Ok(response.status)
    }
}

impl std::fmt::Debug for TunneledTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunneledTransport")
            .field("settings", &self.settings)
            .finish()
    }
}

async fn write_all(conn: &mut dyn TunnelConnection, mut data: &[u8]) -> Result<(), TransportError> {
    while !data.is_empty() {
        let n = conn.write(data).await?;
        if n == 0 {
            return Err(TransportError::Write("connection accepted no bytes".to_string()));
        }
        data = &data[n.min(data.len())..];
    }
    Ok(())
}

/// A raw HTTP/1.1 response split into its parts
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse<'a> {
    /// Status from the first line, 0 if it could not be read
    pub status: u16,
    /// Status line and headers, without the blank line
    pub head: &'a [u8],
    /// Bytes after the first blank line, if one was found
    pub raw_body: Option<&'a [u8]>,
}

impl<'a> RawResponse<'a> {
    pub fn parse(raw: &'a [u8]) -> Self {
        let status = parse_status(raw);
        match find(raw, b"\r\n\r\n") {
            Some(pos) => Self {
                status,
                head: &raw[..pos],
                raw_body: Some(&raw[pos + 4..]),
            },
            None => Self {
                status,
                head: raw,
                raw_body: None,
            },
        }
    }

    /// Whether the headers declare chunked transfer encoding
    pub fn is_chunked(&self) -> bool {
        self.head
            .split(|&b| b == b'\n')
            .skip(1)
            .filter_map(|line| {
                let line = std::str::from_utf8(line).ok()?;
                let (name, value) = line.split_once(':')?;
                Some((name.trim().to_ascii_lowercase(), value.trim().to_ascii_lowercase()))
            })
            .any(|(name, value)| name == "transfer-encoding" && value.contains("chunked"))
    }

    /// Entity body with chunked framing removed.
    ///
    /// Falls back to the raw body when the chunk framing is malformed.
    pub fn body(&self) -> Option<Vec<u8>> {
        let raw = self.raw_body?;
        if self.is_chunked() {
            match decode_chunked(raw) {
                Some(body) => return Some(body),
                None => warn!("Malformed chunked body, using raw bytes"),
            }
        }
        Some(raw.to_vec())
    }
}

/// Read the status code from a response starting with `HTTP/`.
///
/// Takes the leading digits after the first space of the first line;
/// anything unreadable yields 0.
pub fn parse_status(raw: &[u8]) -> u16 {
    if !raw.starts_with(b"HTTP/") {
        return 0;
    }
    let line_end = find(raw, b"\n").unwrap_or(raw.len());
    let line = &raw[..line_end];

    let Some(space) = line.iter().position(|&b| b == b' ') else {
        return 0;
    };
    let rest = &line[space + 1..];
    let start = rest.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(rest.len());
    let digits: &[u8] = {
        let rest = &rest[start..];
        let end = rest.iter().position(|b| !b.is_ascii_digit()).unwrap_or(rest.len());
        &rest[..end]
    };

    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(0)
}

/// Remove `Transfer-Encoding: chunked` framing.
///
/// A body cut short mid-chunk keeps what arrived; `None` means a size line
/// could not be parsed.
pub fn decode_chunked(mut raw: &[u8]) -> Option<Vec<u8>> {
    let mut body = Vec::with_capacity(raw.len());

    loop {
        let Some(line_end) = find(raw, b"\r\n") else {
            // trailing partial size line from a cut connection
            return Some(body);
        };
        let size_line = std::str::from_utf8(&raw[..line_end]).ok()?;
        let size_field = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_field, 16).ok()?;
        raw = &raw[line_end + 2..];

        if size == 0 {
            return Some(body);
        }

        let take = size.min(raw.len());
        body.extend_from_slice(&raw[..take]);
        if take < size {
            return Some(body);
        }
        raw = &raw[take..];
        raw = raw.strip_prefix(b"\r\n").unwrap_or(raw);
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// How a scripted connection answers writes
    #[derive(Clone, Copy)]
    enum Writes {
        /// accept at most 7 bytes per call
        Partial,
        /// accept nothing
        Stalled,
        Broken,
    }

    /// Scripted connection: records writes, replays reads
    struct ScriptedConnection {
        writes: Writes,
        written: Arc<Mutex<Vec<u8>>>,
        reads: VecDeque<Result<Vec<u8>, TransportError>>,
        closed: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl TunnelConnection for ScriptedConnection {
        async fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
            match self.writes {
                Writes::Partial => {
                    let n = data.len().min(7);
                    self.written.lock().unwrap().extend_from_slice(&data[..n]);
                    Ok(n)
                }
                Writes::Stalled => Ok(0),
                Writes::Broken => Err(TransportError::Write("broken pipe".to_string())),
            }
        }

        async fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, TransportError> {
            match self.reads.pop_front() {
                None => Ok(0),
                Some(Err(e)) => Err(e),
                Some(Ok(mut data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    if n < data.len() {
                        self.reads.push_front(Ok(data.split_off(n)));
                    }
                    Ok(n)
                }
            }
        }

        async fn close(&mut self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    struct ScriptedConnector {
        writes: Writes,
        response: Mutex<Option<Vec<Result<Vec<u8>, TransportError>>>>,
        written: Arc<Mutex<Vec<u8>>>,
        closed: Arc<Mutex<bool>>,
    }

    impl ScriptedConnector {
        fn new(reads: Vec<Result<Vec<u8>, TransportError>>) -> Self {
            Self::with_writes(Writes::Partial, reads)
        }

        fn with_writes(writes: Writes, reads: Vec<Result<Vec<u8>, TransportError>>) -> Self {
            Self {
                writes,
                response: Mutex::new(Some(reads)),
                written: Arc::new(Mutex::new(Vec::new())),
                closed: Arc::new(Mutex::new(false)),
            }
        }
    }

    #[async_trait]
    impl TunnelConnector for ScriptedConnector {
        async fn open(
            &self,
            _host: &str,
            _port: u16,
            _connect_timeout: Duration,
        ) -> Result<Box<dyn TunnelConnection>, TransportError> {
            let reads = self.response.lock().unwrap().take().unwrap_or_default();
            Ok(Box::new(ScriptedConnection {
                writes: self.writes,
                written: self.written.clone(),
                reads: reads.into_iter().collect(),
                closed: self.closed.clone(),
            }))
        }
    }

    fn request() -> ApiRequest<'static> {
        ApiRequest {
            api_key: "sk-test",
            api_version: "2023-06-01",
            body: br#"{"model":"m"}"#,
        }
    }

    const DELTA: &str = "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n";

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status(b"HTTP/1.1 200 OK\r\n"), 200);
        assert_eq!(parse_status(b"HTTP/1.1 404 Not Found\r\n\r\n"), 404);
        assert_eq!(parse_status(b"HTTP/1.0 503"), 503);
        assert_eq!(parse_status(b"HTTP/1.1 abc\r\n"), 0);
        assert_eq!(parse_status(b"HTTP/1.1\r\nX: 200\r\n"), 0);
        assert_eq!(parse_status(b"SSH-2.0 200\r\n"), 0);
        assert_eq!(parse_status(b""), 0);
        assert_eq!(parse_status(b"HTTP/1.1 99999 Big\r\n"), 0);
    }

    #[test]
    fn test_raw_response_split() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\n\r\ndata: x\n";
        let response = RawResponse::parse(raw);
        assert_eq!(response.status, 200);
        assert_eq!(response.raw_body, Some(&b"data: x\n"[..]));
        assert!(!response.is_chunked());
        assert_eq!(response.body(), Some(b"data: x\n".to_vec()));
    }

    #[test]
    fn test_raw_response_without_blank_line() {
        let response = RawResponse::parse(b"HTTP/1.1 502 Bad Gateway\r\n");
        assert_eq!(response.status, 502);
        assert_eq!(response.body(), None);
    }

    #[test]
    fn test_decode_chunked() {
        let raw = b"5\r\nhello\r\n7;ext=1\r\n, world\r\n0\r\n\r\n";
        assert_eq!(decode_chunked(raw), Some(b"hello, world".to_vec()));
    }

    #[test]
    fn test_decode_chunked_cut_short() {
        assert_eq!(decode_chunked(b"a\r\n01234"), Some(b"01234".to_vec()));
        assert_eq!(decode_chunked(b"5\r\nhello\r\n3"), Some(b"hello".to_vec()));
    }

    #[test]
    fn test_decode_chunked_malformed() {
        assert_eq!(decode_chunked(b"zz\r\nhello\r\n"), None);
    }

    #[test]
    fn test_chunked_body_is_unframed() {
        let raw = b"HTTP/1.1 200 OK\r\ntransfer-encoding: Chunked\r\n\r\n4\r\ndata\r\n0\r\n\r\n";
        let response = RawResponse::parse(raw);
        assert!(response.is_chunked());
        assert_eq!(response.body(), Some(b"data".to_vec()));
    }

    #[test]
    fn test_request_head() {
        let connector = Arc::new(ScriptedConnector::new(vec![]));
        let transport = TunneledTransport::new(connector, TunnelSettings::default());
        let head = transport.request_head(&request());
        assert_eq!(
            head,
            "POST /v1/messages HTTP/1.1\r\n\
             Host: api.anthropic.com\r\n\
             Content-Type: application/json\r\n\
             x-api-key: sk-test\r\n\
             anthropic-version: 2023-06-01\r\n\
             Content-Length: 13\r\n\
             Connection: close\r\n\r\n"
        );
    }

    #[test]
    fn test_host_header_with_custom_port() {
        let settings = TunnelSettings {
            host: "relay.local".to_string(),
            port: 8443,
            ..Default::default()
        };
        assert_eq!(settings.host_header(), "relay.local:8443");
    }

    #[tokio::test]
    async fn test_perform_streams_200_body() {
        let response = format!("HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\n\r\n{}data: [DONE]\n", DELTA);
        let connector = Arc::new(ScriptedConnector::new(vec![Ok(response.into_bytes())]));
        let transport = TunneledTransport::new(connector.clone(), TunnelSettings::default());
        let mut ctx = StreamContext::default();

        let status = transport.perform(&request(), &mut ctx).await.unwrap();

        assert_eq!(status, 200);
        assert_eq!(ctx.response().as_bytes(), b"Hi");
        assert!(*connector.closed.lock().unwrap());

        let written = connector.written.lock().unwrap().clone();
        let written = String::from_utf8(written).unwrap();
        assert!(written.starts_with("POST /v1/messages HTTP/1.1\r\n"));
        assert!(written.ends_with("\r\n\r\n{\"model\":\"m\"}"));
    }

    #[tokio::test]
    async fn test_perform_reads_across_many_small_reads() {
        let response = format!("HTTP/1.1 200 OK\r\n\r\n{}{}", DELTA, DELTA);
        let reads = response
            .as_bytes()
            .chunks(3)
            .map(|c| Ok(c.to_vec()))
            .collect();
        let connector = Arc::new(ScriptedConnector::new(reads));
        let settings = TunnelSettings {
            read_chunk: 5,
            initial_raw_capacity: 8,
            ..Default::default()
        };
        let transport = TunneledTransport::new(connector, settings);
        let mut ctx = StreamContext::default();

        let status = transport.perform(&request(), &mut ctx).await.unwrap();
        assert_eq!(status, 200);
        assert_eq!(ctx.response().as_bytes(), b"HiHi");
    }

    #[tokio::test]
    async fn test_perform_error_status_keeps_raw_body() {
        let body = r#"{"type":"error","error":{"type":"not_found_error","message":"model not found"}}"#;
        let response = format!("HTTP/1.1 404 Not Found\r\ncontent-type: application/json\r\n\r\n{}", body);
        let connector = Arc::new(ScriptedConnector::new(vec![Ok(response.into_bytes())]));
        let transport = TunneledTransport::new(connector, TunnelSettings::default());
        let mut ctx = StreamContext::default();

        let status = transport.perform(&request(), &mut ctx).await.unwrap();

        assert_eq!(status, 404);
        assert_eq!(ctx.response().as_bytes(), body.as_bytes());
        assert_eq!(ctx.events(), 0);
    }

    #[tokio::test]
    async fn test_perform_timeout_after_data_uses_response() {
        let response = format!("HTTP/1.1 200 OK\r\n\r\n{}", DELTA);
        let connector = Arc::new(ScriptedConnector::new(vec![
            Ok(response.into_bytes()),
            Err(TransportError::Timeout(Duration::from_secs(120))),
        ]));
        let transport = TunneledTransport::new(connector, TunnelSettings::default());
        let mut ctx = StreamContext::default();

        let status = transport.perform(&request(), &mut ctx).await.unwrap();
        assert_eq!(status, 200);
        assert_eq!(ctx.response().as_bytes(), b"Hi");
    }

    #[tokio::test]
    async fn test_perform_read_failure_before_data_is_error() {
        let connector = Arc::new(ScriptedConnector::new(vec![Err(TransportError::Read(
            "connection reset".to_string(),
        ))]));
        let transport = TunneledTransport::new(connector.clone(), TunnelSettings::default());
        let mut ctx = StreamContext::default();

        let result = transport.perform(&request(), &mut ctx).await;
        assert!(matches!(result, Err(TransportError::Read(_))));
        assert!(*connector.closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_perform_read_failure_inside_headers_is_error() {
        let connector = Arc::new(ScriptedConnector::new(vec![
            Ok(b"HTTP/1.1 200 OK\r\nContent-".to_vec()),
            Err(TransportError::Read("connection reset".to_string())),
        ]));
        let transport = TunneledTransport::new(connector.clone(), TunnelSettings::default());
        let mut ctx = StreamContext::default();

        let result = transport.perform(&request(), &mut ctx).await;
        assert!(matches!(result, Err(TransportError::Read(_))));
        assert!(ctx.response().is_empty());
        assert!(*connector.closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_perform_write_failure_is_error() {
        let connector = Arc::new(ScriptedConnector::with_writes(
            Writes::Broken,
            vec![Ok(b"HTTP/1.1 200 OK\r\n\r\n".to_vec())],
        ));
        let transport = TunneledTransport::new(connector.clone(), TunnelSettings::default());
        let mut ctx = StreamContext::default();

        let result = transport.perform(&request(), &mut ctx).await;
        assert!(matches!(result, Err(TransportError::Write(msg)) if msg == "broken pipe"));
        assert!(*connector.closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_perform_stalled_write_is_error() {
        let connector = Arc::new(ScriptedConnector::with_writes(Writes::Stalled, vec![]));
        let transport = TunneledTransport::new(connector.clone(), TunnelSettings::default());
        let mut ctx = StreamContext::default();

        let result = transport.perform(&request(), &mut ctx).await;
        assert!(matches!(result, Err(TransportError::Write(_))));
        assert!(connector.written.lock().unwrap().is_empty());
        assert!(*connector.closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_perform_garbage_response_is_status_zero() {
        let connector = Arc::new(ScriptedConnector::new(vec![Ok(b"garbage".to_vec())]));
        let transport = TunneledTransport::new(connector, TunnelSettings::default());
        let mut ctx = StreamContext::default();

        let status = transport.perform(&request(), &mut ctx).await.unwrap();
        assert_eq!(status, 0);
        assert!(ctx.response().is_empty());
    }

    #[tokio::test]
    async fn test_perform_stops_at_raw_ceiling() {
        let response = format!("HTTP/1.1 200 OK\r\n\r\n{}", DELTA.repeat(10));
        let connector = Arc::new(ScriptedConnector::new(vec![Ok(response.into_bytes())]));
        let settings = TunnelSettings {
            read_chunk: 16,
            initial_raw_capacity: 32,
            max_raw_capacity: 64,
            ..Default::default()
        };
        let transport = TunneledTransport::new(connector, settings);
        let mut ctx = StreamContext::default();

        // the read stops early; the partial line never completes
        let status = transport.perform(&request(), &mut ctx).await.unwrap();
        assert_eq!(status, 200);
        assert!(ctx.response().is_empty());
    }
}
