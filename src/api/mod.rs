//! Minimal HTTP/1.1 front for the assessor.
//!
//! Routes:
//! - `POST /api/analyze`, `POST /analyze`: body `{"image": "<payload>"}`
//! - `GET /api/health`, `GET /health`: backend readiness
//! - `OPTIONS *`: CORS preflight
//!
//! Every analyze request is answered 200 with an assessment, including
//! malformed bodies; only transport problems (size, method, path) get other
//! status codes.

use crate::assess::{AssessmentResult, Assessor};
use crate::error::AssessError;
use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_HEADER_BYTES: usize = 8192;
const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_body_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    assessor: Arc<Assessor>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, assessor: Arc<Assessor>) -> Self {
        Self { cfg, assessor }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg;
        let assessor = self.assessor;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, cfg, assessor, shutdown_thread) {
                log::error!("assessment api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: ApiConfig,
    assessor: Arc<Assessor>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let cfg = cfg.clone();
                let assessor = assessor.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &cfg, &assessor) {
                        log::warn!("request from {} failed: {}", peer, err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, cfg: &ApiConfig, assessor: &Assessor) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(10)))?;

    let (request, leftover) = read_head(&mut stream)?;
    if request.method == "OPTIONS" {
        return write_response(&mut stream, 204, &[]);
    }

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/api/health") | ("GET", "/health") => {
            let model = if assessor.is_ready() {
                "loaded"
            } else {
                "not_loaded"
            };
            let body = json!({ "status": "ok", "model": model });
            write_json_response(&mut stream, 200, &body)
        }
        ("POST", "/api/analyze") | ("POST", "/analyze") => {
            if request.is_chunked() {
                let body = json!({ "error": "length_required" });
                return write_json_response(&mut stream, 411, &body);
            }
            let length = request.content_length()?;
            if length > cfg.max_body_bytes {
                let body = json!({ "error": "payload_too_large" });
                return write_json_response(&mut stream, 413, &body);
            }
            let body = read_body(&mut stream, leftover, length)?;
            let result = analyze(&body, assessor);
            write_json_response(&mut stream, 200, &serde_json::to_value(result)?)
        }
        (_, "/api/health") | (_, "/health") | (_, "/api/analyze") | (_, "/analyze") => {
            write_json_response(&mut stream, 405, &json!({ "error": "method_not_allowed" }))
        }
        _ => write_json_response(&mut stream, 404, &json!({ "error": "not_found" })),
    }
}

/// Parse an analyze body and run the assessor. Never fails.
fn analyze(body: &[u8], assessor: &Assessor) -> AssessmentResult {
    if body.iter().all(u8::is_ascii_whitespace) {
        return assessor.assess(None);
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(value) => assessor.assess(value.get("image").and_then(Value::as_str)),
        Err(err) => {
            let err = AssessError::DecodeError(format!("request body is not JSON: {}", err));
            log::warn!("analyze request rejected: {}", err);
            AssessmentResult::from_error(&err)
        }
    }
}

fn read_head(stream: &mut TcpStream) -> Result<(HttpRequest, Vec<u8>)> {
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let head_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large"));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of headers"));
        }
        data.extend_from_slice(&buf[..n]);
    };
    let leftover = data[head_end + 4..].to_vec();
    let text = String::from_utf8_lossy(&data[..head_end]);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok((
        HttpRequest {
            method: method.to_string(),
            path,
            headers,
        },
        leftover,
    ))
}

fn read_body(stream: &mut TcpStream, mut body: Vec<u8>, length: usize) -> Result<Vec<u8>> {
    body.truncate(length);
    let mut remaining = length - body.len();
    let mut buf = [0u8; 16 * 1024];
    while remaining > 0 {
        let want = remaining.min(buf.len());
        let n = stream.read(&mut buf[..want])?;
        if n == 0 {
            return Err(anyhow!("connection closed with {} body bytes missing", remaining));
        }
        body.extend_from_slice(&buf[..n]);
        remaining -= n;
    }
    Ok(body)
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &Value) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, &payload)
}

fn write_response(stream: &mut TcpStream, status: u16, body: &[u8]) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        204 => "HTTP/1.1 204 No Content",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        411 => "HTTP/1.1 411 Length Required",
        413 => "HTTP/1.1 413 Payload Too Large",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {len}\r\n\
         Cache-Control: no-store\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: *\r\n\
         Connection: close\r\n\r\n",
        status_line = status_line,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
}

impl HttpRequest {
    /// Chunked bodies are not decoded; only `Content-Length` framing is read.
    fn is_chunked(&self) -> bool {
        self.headers
            .get("transfer-encoding")
            .map(|value| value.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false)
    }

    fn content_length(&self) -> Result<usize> {
        match self.headers.get("content-length") {
            Some(value) => value
                .parse()
                .map_err(|_| anyhow!("invalid content-length '{}'", value)),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Detection, DetectorHandle, StubBackend};
    use crate::policy::{ThreatLevel, ThreatPolicyTable};

    fn assessor() -> Assessor {
        Assessor::new(
            Arc::new(DetectorHandle::ready(StubBackend::new(vec![Detection::new(
                "knife", 0.9,
            )]))),
            Arc::new(ThreatPolicyTable::default()),
        )
    }

    #[test]
    fn analyze_without_image_field_is_no_data() {
        let result = analyze(br#"{"frame": "abc"}"#, &assessor());
        assert_eq!(result.threat, ThreatLevel::Safe);
        assert_eq!(result.error.as_deref(), Some("NO DATA"));

        let result = analyze(br#"{"image": 42}"#, &assessor());
        assert_eq!(result.error.as_deref(), Some("NO DATA"));

        let result = analyze(b"", &assessor());
        assert_eq!(result.error.as_deref(), Some("NO DATA"));
    }

    #[test]
    fn chunked_transfer_encoding_is_detected() {
        let mut headers = HashMap::new();
        headers.insert("transfer-encoding".to_string(), "gzip, Chunked".to_string());
        let request = HttpRequest {
            method: "POST".to_string(),
            path: "/api/analyze".to_string(),
            headers,
        };
        assert!(request.is_chunked());
        assert_eq!(request.content_length().unwrap(), 0);

        let plain = HttpRequest {
            method: "POST".to_string(),
            path: "/api/analyze".to_string(),
            headers: HashMap::new(),
        };
        assert!(!plain.is_chunked());
    }

    #[test]
    fn analyze_with_broken_json_is_safe() {
        let result = analyze(b"{image:", &assessor());
        assert_eq!(result.threat, ThreatLevel::Safe);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .starts_with("decode error: request body is not JSON"));
    }
}
