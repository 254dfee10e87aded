// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Minimal HTTP/1.1 listener for the submission API.
//
// Point-of-sale clients on the LAN POST jobs here. Only as much HTTP as the
// API needs is parsed: request line, Content-Length, and the body. Every
// response closes the connection and carries permissive CORS headers so
// browser-based clients can submit directly.
//
// # mDNS advertisement
//
// On start the listener registers `_http._tcp.local.` via mDNS-SD so clients
// can find the bridge without a configured address.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use puente_bridge::PrinterDriver;
use puente_core::error::{PuenteError, Result};

use crate::api::{Api, ApiResponse};

const HTTP_SERVICE_TYPE: &str = "_http._tcp.local.";

const SERVICE_NAME: &str = "Puente Print Bridge";

/// Largest request accepted, headers included.
const MAX_REQUEST_BYTES: usize = 1024 * 1024;

const CORS_HEADERS: &str = "Access-Control-Allow-Origin: *\r\n\
                            Access-Control-Allow-Methods: GET, POST, DELETE, OPTIONS\r\n\
                            Access-Control-Allow-Headers: Content-Type\r\n";

/// A client that stops sending mid-request is dropped after this long.
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Parsed request head.
#[derive(Debug, PartialEq, Eq)]
struct RequestHead {
    method: String,
    target: String,
    content_length: usize,
    /// Offset of the first body byte.
    body_offset: usize,
}

/// Parse the request line and headers, if the header block is complete.
fn parse_request_head(data: &[u8]) -> Option<std::result::Result<RequestHead, String>> {
    let header_end = find_subsequence(data, b"\r\n\r\n")?;
    let head = String::from_utf8_lossy(&data[..header_end]);
    let mut lines = head.lines();

    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Some(Err(format!("malformed request line {request_line:?}")));
    };

    let mut content_length = 0;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                match value.trim().parse::<usize>() {
                    Ok(len) => content_length = len,
                    Err(_) => return Some(Err(format!("bad Content-Length {:?}", value.trim()))),
                }
            }
        }
    }

    Some(Ok(RequestHead {
        method: method.to_string(),
        target: target.to_string(),
        content_length,
        body_offset: header_end + 4,
    }))
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Embedded HTTP server in front of the dispatcher.
pub struct HttpServer {
    port: u16,
    advertise: bool,
    local_addr: Option<SocketAddr>,
    shutdown_signal: Arc<Notify>,
    task_handle: Option<JoinHandle<()>>,
    active_connections: Arc<AtomicU32>,
    mdns_daemon: Option<mdns_sd::ServiceDaemon>,
    mdns_fullname: Option<String>,
}

impl HttpServer {
    /// Port 0 picks a free port; see [`HttpServer::local_addr`].
    pub fn new(port: u16) -> Self {
        Self {
            port,
            advertise: false,
            local_addr: None,
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: None,
            active_connections: Arc::new(AtomicU32::new(0)),
            mdns_daemon: None,
            mdns_fullname: None,
        }
    }

    /// Advertise the listener over mDNS once it is bound.
    pub fn with_advertise(mut self, advertise: bool) -> Self {
        self.advertise = advertise;
        self
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }

    pub fn active_connections(&self) -> u32 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Bind `0.0.0.0:{port}` and serve `api` until [`HttpServer::stop`].
    pub async fn start<D: PrinterDriver>(&mut self, api: Api<D>) -> Result<()> {
        if self.is_running() {
            debug!(port = self.port, "HTTP server already running");
            return Ok(());
        }

        let bind_addr: SocketAddr = ([0, 0, 0, 0], self.port).into();
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| PuenteError::Server(format!("bind {bind_addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| PuenteError::Server(format!("local address: {e}")))?;
        self.local_addr = Some(local_addr);
        info!(addr = %local_addr, "HTTP submission server listening");

        if self.advertise {
            self.register_mdns(local_addr.port());
        }

        let shutdown = Arc::clone(&self.shutdown_signal);
        let connections = Arc::clone(&self.active_connections);
        self.task_handle = Some(tokio::spawn(async move {
            accept_loop(listener, shutdown, connections, api).await;
        }));
        Ok(())
    }

    /// Stop accepting connections. Requests already being served finish.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.task_handle.take() else {
            return Ok(());
        };

        info!(port = self.port, "stopping HTTP submission server");
        self.unregister_mdns();
        self.shutdown_signal.notify_one();
        handle
            .await
            .map_err(|e| PuenteError::Server(format!("task join: {e}")))?;
        Ok(())
    }

    /// mDNS failures are logged only; the bridge still works by address.
    fn register_mdns(&mut self, port: u16) {
        let daemon = match mdns_sd::ServiceDaemon::new() {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "failed to create mDNS daemon for advertisement");
                return;
            }
        };

        let properties = [
            ("txtvers", "1"),
            ("path", "/jobs"),
            ("ty", SERVICE_NAME),
            ("api", "puente/1"),
        ];

        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "puente".into());

        match mdns_sd::ServiceInfo::new(
            HTTP_SERVICE_TYPE,
            SERVICE_NAME,
            &format!("{hostname}.local."),
            "",
            port,
            &properties[..],
        ) {
            Ok(service_info) => {
                let service_info = service_info.enable_addr_auto();
                let fullname = service_info.get_fullname().to_owned();
                match daemon.register(service_info) {
                    Ok(_) => {
                        info!(service_type = HTTP_SERVICE_TYPE, port, "mDNS service registered");
                        self.mdns_fullname = Some(fullname);
                    }
                    Err(e) => warn!(error = %e, "failed to register mDNS service"),
                }
            }
            Err(e) => warn!(error = %e, "failed to create mDNS ServiceInfo"),
        }

        self.mdns_daemon = Some(daemon);
    }

    fn unregister_mdns(&mut self) {
        if let Some(daemon) = self.mdns_daemon.take() {
            if let Some(fullname) = self.mdns_fullname.take() {
                match daemon.unregister(&fullname) {
                    Ok(_) => info!(name = %fullname, "mDNS service unregistered"),
                    Err(e) => warn!(error = %e, "failed to unregister mDNS service"),
                }
            }
            if let Err(e) = daemon.shutdown() {
                warn!(error = %e, "failed to shut down mDNS daemon");
            }
        }
    }
}

async fn accept_loop<D: PrinterDriver>(
    listener: TcpListener,
    shutdown: Arc<Notify>,
    connections: Arc<AtomicU32>,
    api: Api<D>,
) {
    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                debug!("accept loop received shutdown signal");
                break;
            }

            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        debug!(peer = %peer_addr, "incoming connection");
                        let api = api.clone();
                        let connections = Arc::clone(&connections);
                        tokio::spawn(async move {
                            connections.fetch_add(1, Ordering::Relaxed);
                            if let Err(e) = handle_connection(stream, peer_addr, &api).await {
                                warn!(peer = %peer_addr, error = %e, "connection handler error");
                            }
                            connections.fetch_sub(1, Ordering::Relaxed);
                        });
                    }
                    Err(e) => error!(error = %e, "failed to accept connection"),
                }
            }
        }
    }
}

async fn handle_connection<D: PrinterDriver>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    api: &Api<D>,
) -> Result<()> {
    let request = match tokio::time::timeout(READ_TIMEOUT, read_request(&mut stream)).await {
        Ok(request) => request?,
        Err(_) => {
            debug!(peer = %peer_addr, "request read timed out");
            return Ok(());
        }
    };

    let response = match request {
        Some(Ok((head, body))) => {
            let response = api.handle(&head.method, &head.target, &body).await;
            info!(
                peer = %peer_addr,
                method = %head.method,
                target = %head.target,
                status = response.status,
                "request served"
            );
            response
        }
        Some(Err(reason)) => {
            warn!(peer = %peer_addr, %reason, "rejected HTTP request");
            ApiResponse {
                status: 400,
                body: serde_json::json!({ "error": reason }),
            }
        }
        None => {
            debug!(peer = %peer_addr, "empty request, closing connection");
            return Ok(());
        }
    };

    send_response(&mut stream, &response).await
}

/// Read one request. `None` means the client closed without sending one.
async fn read_request(
    stream: &mut TcpStream,
) -> Result<Option<std::result::Result<(RequestHead, Vec<u8>), String>>> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    let head = loop {
        if let Some(parsed) = parse_request_head(&buf) {
            match parsed {
                Ok(head) => break head,
                Err(reason) => return Ok(Some(Err(reason))),
            }
        }
        if buf.len() >= MAX_REQUEST_BYTES {
            return Ok(Some(Err("request headers too large".into())));
        }
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| PuenteError::Server(format!("read request: {e}")))?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Ok(Some(Err("connection closed mid-request".into())));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    // Content-Length is client-controlled; never let it overflow.
    let wanted = match head.body_offset.checked_add(head.content_length) {
        Some(wanted) if wanted <= MAX_REQUEST_BYTES => wanted,
        _ => {
            return Ok(Some(Err(format!(
                "request body of {} bytes is too large",
                head.content_length
            ))));
        }
    };
    while buf.len() < wanted {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| PuenteError::Server(format!("read body: {e}")))?;
        if n == 0 {
            return Ok(Some(Err("connection closed mid-body".into())));
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let body = buf[head.body_offset..wanted].to_vec();
    Ok(Some(Ok((head, body))))
}

async fn send_response(stream: &mut TcpStream, response: &ApiResponse) -> Result<()> {
    let body = if response.has_body() {
        serde_json::to_vec(&response.body)?
    } else {
        Vec::new()
    };
    let head = format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         {CORS_HEADERS}\
         Connection: close\r\n\
         \r\n",
        response.status,
        response.reason(),
        body.len()
    );

    stream
        .write_all(head.as_bytes())
        .await
        .map_err(|e| PuenteError::Server(format!("write HTTP headers: {e}")))?;
    stream
        .write_all(&body)
        .await
        .map_err(|e| PuenteError::Server(format!("write HTTP body: {e}")))?;
    stream
        .flush()
        .await
        .map_err(|e| PuenteError::Server(format!("flush: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use puente_bridge::MemoryDriver;
    use puente_core::config::BridgeConfig;

    use super::*;
    use crate::connection::ConnectionManager;
    use crate::dispatcher::Dispatcher;
    use crate::encoder::Encoder;

    #[test]
    fn parses_head_with_content_length() {
        let raw = b"POST /jobs HTTP/1.1\r\nHost: x\r\ncontent-length: 12\r\n\r\n{\"segments\"";
        let head = parse_request_head(raw).expect("complete").expect("valid");
        assert_eq!(head.method, "POST");
        assert_eq!(head.target, "/jobs");
        assert_eq!(head.content_length, 12);
        assert_eq!(&raw[head.body_offset..], b"{\"segments\"");
    }

    #[test]
    fn incomplete_head_needs_more_bytes() {
        assert!(parse_request_head(b"GET /health HTTP/1.1\r\nHost: x\r\n").is_none());
    }

    #[test]
    fn bad_content_length_is_rejected() {
        let raw = b"POST /jobs HTTP/1.1\r\nContent-Length: lots\r\n\r\n";
        assert!(parse_request_head(raw).expect("complete").is_err());
    }

    async fn roundtrip(addr: SocketAddr, request: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        stream.write_all(request).await.expect("send");
        let mut response = String::new();
        stream.read_to_string(&mut response).await.expect("read");
        response
    }

    async fn serve() -> (HttpServer, Arc<Dispatcher<MemoryDriver>>, SocketAddr) {
        let config = BridgeConfig::default();
        let link = Arc::new(ConnectionManager::new(MemoryDriver::new(), config.link.clone()));
        let encoder = Encoder::with_native_qr(config.encoder.clone());
        let dispatcher = Arc::new(Dispatcher::new(&config, link, encoder));

        let mut server = HttpServer::new(0);
        server.start(Api::new(dispatcher.clone())).await.expect("start");
        let port = server.local_addr().expect("bound").port();
        (server, dispatcher, SocketAddr::from(([127, 0, 0, 1], port)))
    }

    #[tokio::test]
    async fn huge_content_length_is_rejected_cleanly() {
        let (mut server, dispatcher, addr) = serve().await;

        let response = roundtrip(
            addr,
            b"POST /jobs HTTP/1.1\r\nContent-Length: 18446744073709551615\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{response}");
        assert!(response.contains("too large"), "{response}");

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while server.active_connections() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.active_connections(), 0);
        assert_eq!(dispatcher.queue_len(), 0);

        server.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn browsers_get_cors_headers_and_preflight() {
        let (mut server, _dispatcher, addr) = serve().await;

        let response = roundtrip(
            addr,
            b"OPTIONS /jobs HTTP/1.1\r\nOrigin: http://pos.local\r\n\
              Access-Control-Request-Method: POST\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 204 No Content\r\n"), "{response}");
        assert!(response.contains("Access-Control-Allow-Origin: *\r\n"), "{response}");
        assert!(response.contains("Access-Control-Allow-Methods: GET, POST, DELETE, OPTIONS\r\n"));
        assert!(response.contains("Access-Control-Allow-Headers: Content-Type\r\n"));
        assert!(response.contains("Content-Length: 0\r\n"));
        assert!(response.ends_with("\r\n\r\n"), "{response}");

        let response = roundtrip(addr, b"GET /health HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        assert!(response.contains("Access-Control-Allow-Origin: *\r\n"), "{response}");

        server.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn serves_api_over_http() {
        let config = BridgeConfig::default();
        let driver = MemoryDriver::new();
        let link = Arc::new(ConnectionManager::new(driver.clone(), config.link.clone()));
        let encoder = Encoder::with_native_qr(config.encoder.clone());
        let dispatcher = Arc::new(Dispatcher::new(&config, link, encoder));
        dispatcher.start();

        let mut server = HttpServer::new(0);
        server.start(Api::new(dispatcher.clone())).await.expect("start");
        let port = server.local_addr().expect("bound").port();
        let addr = SocketAddr::from(([127, 0, 0, 1], port));

        let body = br#"{"segments":[{"type":"text","content":"Hola"}]}"#;
        let mut request = format!(
            "POST /jobs HTTP/1.1\r\nHost: bridge\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        request.extend_from_slice(body);

        let response = roundtrip(addr, &request).await;
        assert!(response.starts_with("HTTP/1.1 202 Accepted\r\n"), "{response}");
        assert!(response.ends_with(r#"{"id":1}"#), "{response}");

        let response = roundtrip(addr, b"GET /jobs/1?wait=5000 HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        assert!(response.contains(r#""status":"Completed""#), "{response}");

        let response = roundtrip(addr, b"garbage\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{response}");

        server.stop().await.expect("stop");
        assert!(!server.is_running());
        dispatcher.shutdown().await;
    }
}
