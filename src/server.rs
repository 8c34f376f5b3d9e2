use crate::error::{json_error_response, ErrorCode, PosterError};
use crate::poster::PosterService;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::HeaderValue;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Version information for the service
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Header name for request ID
const X_REQUEST_ID: &str = "x-request-id";

/// Maximum hostname length allowed by DNS
const MAX_HOSTNAME_LEN: usize = 253;

type PosterResponse = Response<BoxBody<Bytes, hyper::Error>>;

/// HTTP front end serving posters on `/`
pub struct PosterServer {
    bind_addr: SocketAddr,
    service: Arc<PosterService>,
    shutdown_rx: watch::Receiver<bool>,
}

impl PosterServer {
    pub fn new(
        bind_addr: SocketAddr,
        service: Arc<PosterService>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            service,
            shutdown_rx,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener until shutdown.
    ///
    /// Once shutdown is signalled the listener is dropped and open connections
    /// finish their in-flight request before this returns.
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        let addr = listener.local_addr().unwrap_or(self.bind_addr);
        info!(addr = %addr, "Poster server listening (HTTP/1.1 and HTTP/2)");

        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let service = Arc::clone(&self.service);
                            let shutdown_rx = self.shutdown_rx.clone();
                            connections.spawn(async move {
                                if let Err(e) = handle_connection(stream, addr, service, shutdown_rx).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                changed = shutdown_rx.changed() => {
                    // A dropped sender counts as shutdown
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Poster server shutting down");
                        break;
                    }
                }
            }
        }

        drop(listener);

        let open = connections.len();
        if open > 0 {
            info!(connections = open, "Draining open connections");
        }
        while connections.join_next().await.is_some() {}

        Ok(())
    }
}

async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    service: Arc<PosterService>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let service = Arc::clone(&service);
        async move { handle_request(req, service, addr).await }
    });

    let builder = AutoBuilder::new(TokioExecutor::new());
    let conn = builder.serve_connection(io, service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = wait_for_shutdown(&mut shutdown_rx) => {
            // Idle keep-alive connections close now, busy ones after their response
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };

    result.map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;
    Ok(())
}

async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

async fn handle_request(
    req: Request<Incoming>,
    service: Arc<PosterService>,
    client_addr: SocketAddr,
) -> Result<PosterResponse, hyper::Error> {
    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    debug!(method = %req.method(), uri = %req.uri(), client = %client_addr, request_id, "Incoming request");

    let mut response = match admit(&req, &request_id) {
        Ok(host) => render_poster(&service, &host, &request_id).await,
        Err(response) => response,
    };

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }

    Ok(response)
}

/// Only `GET /` and `HEAD /` with a usable host get a poster
fn admit<B>(req: &Request<B>, request_id: &str) -> Result<String, PosterResponse> {
    if req.uri().path() != "/" {
        return Err(json_error_response(
            ErrorCode::NotFound,
            format!("Not found: {}", req.uri().path()),
        ));
    }

    if req.method() != Method::GET && req.method() != Method::HEAD {
        return Err(json_error_response(
            ErrorCode::MethodNotAllowed,
            format!("Method {} not allowed", req.method()),
        ));
    }

    extract_host(req).map_err(|e| {
        warn!(request_id, error = %e, "Request without usable Host header");
        e.to_response()
    })
}

async fn render_poster(service: &PosterService, host: &str, request_id: &str) -> PosterResponse {
    let started = Instant::now();
    match service.generate(host).await {
        Ok(image) => {
            debug!(
                request_id,
                host,
                bytes = image.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Poster served"
            );
            image_response(image)
        }
        Err(e) => {
            // Full detail stays in the log; the client only sees the public message
            error!(request_id, host, error = %e, "Poster generation failed");
            e.to_response()
        }
    }
}

fn image_response(image: Bytes) -> PosterResponse {
    Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_TYPE, "image/jpeg")
        .body(Full::new(image).map_err(|never| match never {}).boxed())
        .expect("valid response builder")
}

/// Host the poster is for: the Host header, else the URI authority (HTTP/2).
///
/// The port is stripped and the name lowercased. Any valid UTF-8 is accepted.
pub fn extract_host<B>(req: &Request<B>) -> Result<String, PosterError> {
    let raw = match req.headers().get(hyper::header::HOST) {
        Some(value) => {
            std::str::from_utf8(value.as_bytes()).map_err(|_| PosterError::MissingHostHeader)?
        }
        None => req.uri().host().ok_or(PosterError::MissingHostHeader)?,
    };

    let hostname = strip_port(raw.trim());
    if hostname.is_empty() {
        return Err(PosterError::MissingHostHeader);
    }
    if hostname.len() > MAX_HOSTNAME_LEN {
        return Err(PosterError::HostTooLong {
            len: hostname.len(),
        });
    }

    Ok(hostname.to_lowercase())
}

fn strip_port(host: &str) -> &str {
    // Bracketed IPv6 literals carry colons of their own
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    host.split(':').next().unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_host(host: &str) -> Request<()> {
        Request::builder()
            .uri("/")
            .header(hyper::header::HOST, host)
            .body(())
            .unwrap()
    }

    #[test]
    fn test_extract_host_strips_port_and_lowercases() {
        let req = request_with_host("Hello-World.Example.COM:8080");
        assert_eq!(extract_host(&req).unwrap(), "hello-world.example.com");
    }

    #[test]
    fn test_extract_host_keeps_idna_labels() {
        let req = request_with_host("xn--caf-dma.example.com");
        assert_eq!(extract_host(&req).unwrap(), "xn--caf-dma.example.com");
    }

    #[test]
    fn test_extract_host_accepts_utf8() {
        let req = Request::builder()
            .uri("/")
            .header(
                hyper::header::HOST,
                HeaderValue::from_bytes("Café.Example.com:8080".as_bytes()).unwrap(),
            )
            .body(())
            .unwrap();
        assert_eq!(extract_host(&req).unwrap(), "café.example.com");
    }

    #[test]
    fn test_extract_host_rejects_invalid_utf8() {
        let req = Request::builder()
            .uri("/")
            .header(
                hyper::header::HOST,
                HeaderValue::from_bytes(b"caf\xe9.example.com").unwrap(),
            )
            .body(())
            .unwrap();
        assert!(matches!(
            extract_host(&req),
            Err(PosterError::MissingHostHeader)
        ));
    }

    #[test]
    fn test_extract_host_missing() {
        let req = Request::builder().uri("/").body(()).unwrap();
        assert!(matches!(
            extract_host(&req),
            Err(PosterError::MissingHostHeader)
        ));
    }

    #[test]
    fn test_extract_host_from_authority() {
        let req = Request::builder()
            .uri("http://dream.big.example.com:8443/")
            .body(())
            .unwrap();
        assert_eq!(extract_host(&req).unwrap(), "dream.big.example.com");
    }

    #[test]
    fn test_extract_host_rejects_empty() {
        assert!(matches!(
            extract_host(&request_with_host("")),
            Err(PosterError::MissingHostHeader)
        ));
        assert!(matches!(
            extract_host(&request_with_host(":8080")),
            Err(PosterError::MissingHostHeader)
        ));
    }

    #[test]
    fn test_extract_host_rejects_oversized() {
        let long = format!("{}.example.com", "a".repeat(MAX_HOSTNAME_LEN));
        let err = extract_host(&request_with_host(&long)).unwrap_err();
        assert!(matches!(err, PosterError::HostTooLong { len } if len == long.len()));

        let response = err.to_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers().get("X-Poster-Error").unwrap(), "INVALID_HOST");
    }

    #[test]
    fn test_strip_port_ipv6() {
        assert_eq!(strip_port("[::1]:8080"), "::1");
        assert_eq!(strip_port("localhost:80"), "localhost");
        assert_eq!(strip_port("example.com"), "example.com");
    }

    #[test]
    fn test_admit_routes() {
        let req = request_with_host("dream.example.com");
        assert_eq!(admit(&req, "id").unwrap(), "dream.example.com");

        let req = Request::builder()
            .method(Method::HEAD)
            .uri("/")
            .header(hyper::header::HOST, "dream.example.com")
            .body(())
            .unwrap();
        assert!(admit(&req, "id").is_ok());

        let req = Request::builder()
            .uri("/favicon.ico")
            .header(hyper::header::HOST, "dream.example.com")
            .body(())
            .unwrap();
        assert_eq!(admit(&req, "id").unwrap_err().status(), StatusCode::NOT_FOUND);

        let req = Request::builder()
            .method(Method::POST)
            .uri("/")
            .header(hyper::header::HOST, "dream.example.com")
            .body(())
            .unwrap();
        assert_eq!(
            admit(&req, "id").unwrap_err().status(),
            StatusCode::METHOD_NOT_ALLOWED
        );

        let req = Request::builder().uri("/").body(()).unwrap();
        assert_eq!(admit(&req, "id").unwrap_err().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_image_response_headers() {
        let response = image_response(Bytes::from_static(b"\xff\xd8\xff"));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(hyper::header::CONTENT_TYPE).unwrap(),
            "image/jpeg"
        );
    }
}
