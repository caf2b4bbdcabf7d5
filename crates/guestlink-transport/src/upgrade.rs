//! HTTP/1.1 upgrade bootstrap on top of hyper's connection API.
//!
//! A client dials an endpoint, sends a bare `GET` with `Connection: Upgrade`
//! and waits for `101 Switching Protocols`. After the response the socket
//! carries raw link traffic; bytes hyper buffered past the head are replayed
//! by the [`Upgraded`] stream.

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Empty;
use hyper::body::Incoming;
use hyper::header::{self, HeaderValue};
use hyper::service::service_fn;
use hyper::upgrade::{OnUpgrade, Upgraded};
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{Connection, LinkStream, SocketStream};

/// Default `Upgrade:` protocol token.
pub const DEFAULT_PROTOCOL: &str = "guestlink";

/// Fixed WebSocket-compatible handshake key; some proxies insist on one.
pub const HANDSHAKE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

/// Fixed WebSocket-compatible handshake version.
pub const HANDSHAKE_VERSION: &str = "13";

/// Read buffer bound for an inbound request head.
const MAX_HEAD_LEN: usize = 8 * 1024;

/// A dialable upgrade endpoint parsed from a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `http://host[:port]/path` or `ws://host[:port]/path`.
    Tcp {
        /// `host:port` to connect to.
        authority: String,
        /// Request target.
        path: String,
    },
    /// `unix:///path/to/socket`.
    Unix {
        /// Socket path.
        socket: PathBuf,
    },
}

impl Endpoint {
    /// Parse an endpoint URL.
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = || TransportError::InvalidUrl(url.to_string());

        if let Some(rest) = url.strip_prefix("unix://") {
            if rest.is_empty() {
                return Err(invalid());
            }
            return Ok(Self::Unix {
                socket: PathBuf::from(rest),
            });
        }

        let rest = url
            .strip_prefix("http://")
            .or_else(|| url.strip_prefix("ws://"))
            .ok_or_else(invalid)?;

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };
        if authority.is_empty() {
            return Err(invalid());
        }

        let authority = match authority.rsplit_once(':') {
            Some((host, port)) => {
                if host.is_empty() || port.parse::<u16>().is_err() {
                    return Err(invalid());
                }
                authority.to_string()
            }
            None => format!("{authority}:80"),
        };

        Ok(Self::Tcp {
            authority,
            path: path.to_string(),
        })
    }

    /// Value sent in the `Host:` header.
    pub fn host(&self) -> &str {
        match self {
            Self::Tcp { authority, .. } => authority,
            Self::Unix { .. } => "localhost",
        }
    }

    /// Request target sent on the request line.
    pub fn path(&self) -> &str {
        match self {
            Self::Tcp { path, .. } => path,
            Self::Unix { .. } => "/",
        }
    }

    /// Human-readable dial target.
    pub fn target(&self) -> String {
        match self {
            Self::Tcp { authority, .. } => authority.clone(),
            Self::Unix { socket } => socket.display().to_string(),
        }
    }

    async fn connect(&self) -> Result<SocketStream> {
        let connect_err = |source| TransportError::Connect {
            target: self.target(),
            source,
        };

        match self {
            Self::Tcp { authority, .. } => tokio::net::TcpStream::connect(authority.as_str())
                .await
                .map(SocketStream::from_tcp)
                .map_err(connect_err),
            #[cfg(unix)]
            Self::Unix { socket } => tokio::net::UnixStream::connect(socket)
                .await
                .map(SocketStream::Unix)
                .map_err(connect_err),
            #[cfg(not(unix))]
            Self::Unix { .. } => Err(connect_err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "unix endpoints require a unix platform",
            ))),
        }
    }
}

/// Client-side upgrade parameters.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    /// `Upgrade:` protocol token.
    pub protocol: String,
    /// Extra headers appended to the request.
    pub headers: Vec<(String, String)>,
}

impl Default for UpgradeRequest {
    fn default() -> Self {
        Self {
            protocol: DEFAULT_PROTOCOL.to_string(),
            headers: Vec::new(),
        }
    }
}

impl UpgradeRequest {
    fn build(&self, endpoint: &Endpoint) -> Result<Request<Empty<Bytes>>> {
        let mut builder = Request::builder()
            .method(Method::GET)
            .uri(endpoint.path())
            .header(header::HOST, endpoint.host())
            .header(header::CONNECTION, "Upgrade")
            .header(header::UPGRADE, self.protocol.as_str())
            .header(header::SEC_WEBSOCKET_KEY, HANDSHAKE_KEY)
            .header(header::SEC_WEBSOCKET_VERSION, HANDSHAKE_VERSION);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
            .body(Empty::new())
            .map_err(|err| TransportError::Upgrade(format!("invalid upgrade request: {err}")))
    }
}

/// Dial `endpoint` and complete the upgrade within `timeout`.
pub async fn dial(
    endpoint: &Endpoint,
    request: &UpgradeRequest,
    timeout: Duration,
) -> Result<LinkStream> {
    let attempt = async {
        let socket = endpoint.connect().await?;
        let transport = socket.transport_name();
        let upgraded = upgrade_client(socket, endpoint, request).await?;
        Ok(LinkStream::new(upgraded, transport))
    };

    match tokio::time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Connect {
            target: endpoint.target(),
            source: std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("no upgrade within {timeout:?}"),
            ),
        }),
    }
}

/// Run the client half of the upgrade on an already-connected stream.
pub async fn upgrade_client<S: Connection>(
    stream: S,
    endpoint: &Endpoint,
    request: &UpgradeRequest,
) -> Result<Upgraded> {
    let req = request.build(endpoint)?;
    let (mut sender, conn) =
        hyper::client::conn::http1::handshake::<_, Empty<Bytes>>(TokioIo::new(stream)).await?;
    let mut conn = std::pin::pin!(conn.with_upgrades());

    let response = tokio::select! {
        response = sender.send_request(req) => response?,
        finished = &mut conn => {
            finished?;
            return Err(TransportError::Upgrade(
                "connection closed before the upgrade response".to_string(),
            ));
        }
    };
    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        return Err(TransportError::Upgrade(format!(
            "unexpected status {}",
            response.status()
        )));
    }

    let (upgraded, finished) = tokio::join!(hyper::upgrade::on(response), conn);
    finished?;
    let upgraded = upgraded?;
    debug!(target = %endpoint.target(), "upgrade accepted");
    Ok(upgraded)
}

/// Head of an inbound upgrade request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHead {
    /// Request method.
    pub method: String,
    /// Request target path.
    pub path: String,
    /// Header name/value pairs in arrival order; names are lowercase.
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    fn from_request<B>(req: &Request<B>) -> Self {
        Self {
            method: req.method().as_str().to_string(),
            path: req.uri().path().to_string(),
            headers: req
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    )
                })
                .collect(),
        }
    }

    /// First header matching `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn wants_upgrade_to(&self, protocol: &str) -> bool {
        let connection_upgrade = self.header("connection").is_some_and(|value| {
            value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        });
        let protocol_matches = self
            .header("upgrade")
            .is_some_and(|value| value.eq_ignore_ascii_case(protocol));

        self.method == "GET" && connection_upgrade && protocol_matches
    }
}

/// What the request handler decided for the one request it serves.
type Verdict = std::result::Result<(RequestHead, OnUpgrade), RequestHead>;

fn upgrade_response(
    status: StatusCode,
    protocol: Option<&HeaderValue>,
) -> Response<Empty<Bytes>> {
    let mut response = Response::new(Empty::new());
    *response.status_mut() = status;
    if let Some(protocol) = protocol {
        let headers = response.headers_mut();
        headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
        headers.insert(header::UPGRADE, protocol.clone());
    }
    response
}

/// Run the server half of the upgrade: answer `101` when the request asks
/// for `protocol`, otherwise answer `400` and fail.
pub async fn accept_upgrade<S: Connection>(
    stream: S,
    protocol: &str,
) -> Result<(Upgraded, RequestHead)> {
    let protocol_value = HeaderValue::from_str(protocol)
        .map_err(|_| TransportError::Upgrade(format!("invalid protocol token '{protocol}'")))?;
    let expected = protocol.to_string();

    let (verdict_tx, verdict_rx) = oneshot::channel::<Verdict>();
    let verdict_tx = Arc::new(Mutex::new(Some(verdict_tx)));
    let service = service_fn(move |mut req: Request<Incoming>| {
        let head = RequestHead::from_request(&req);
        let granted = head.wants_upgrade_to(&expected);
        let (verdict, response) = if granted {
            let on_upgrade = hyper::upgrade::on(&mut req);
            (
                Ok((head, on_upgrade)),
                upgrade_response(StatusCode::SWITCHING_PROTOCOLS, Some(&protocol_value)),
            )
        } else {
            (Err(head), upgrade_response(StatusCode::BAD_REQUEST, None))
        };
        if let Some(tx) = verdict_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = tx.send(verdict);
        }
        async move { Ok::<_, Infallible>(response) }
    });

    hyper::server::conn::http1::Builder::new()
        .keep_alive(false)
        .max_buf_size(MAX_HEAD_LEN)
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades()
        .await?;

    let verdict = verdict_rx.await.map_err(|_| {
        TransportError::Upgrade("connection closed before an upgrade request".to_string())
    })?;
    match verdict {
        Ok((head, on_upgrade)) => {
            let upgraded = on_upgrade.await?;
            debug!(path = %head.path, "upgrade granted");
            Ok((upgraded, head))
        }
        Err(head) => Err(TransportError::Upgrade(format!(
            "request for '{}' does not upgrade to '{protocol}'",
            head.path
        ))),
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[test]
    fn parses_tcp_endpoints() {
        assert_eq!(
            Endpoint::parse("http://10.0.0.2:8080/v1/link").unwrap(),
            Endpoint::Tcp {
                authority: "10.0.0.2:8080".to_string(),
                path: "/v1/link".to_string(),
            }
        );
        assert_eq!(
            Endpoint::parse("ws://agent").unwrap(),
            Endpoint::Tcp {
                authority: "agent:80".to_string(),
                path: "/".to_string(),
            }
        );
    }

    #[test]
    fn parses_unix_endpoint() {
        let endpoint = Endpoint::parse("unix:///run/guestlink.sock").unwrap();
        assert_eq!(
            endpoint,
            Endpoint::Unix {
                socket: PathBuf::from("/run/guestlink.sock"),
            }
        );
        assert_eq!(endpoint.host(), "localhost");
        assert_eq!(endpoint.path(), "/");
    }

    #[test]
    fn rejects_bad_urls() {
        for url in ["", "ftp://x/", "http://", "http://host:notaport/", "unix://"] {
            assert!(
                matches!(Endpoint::parse(url), Err(TransportError::InvalidUrl(_))),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn request_carries_fixed_and_custom_headers() {
        let endpoint = Endpoint::parse("http://127.0.0.1:9/link").unwrap();
        let request = UpgradeRequest {
            protocol: "vmctl".to_string(),
            headers: vec![("X-Vm-Id".to_string(), "vm-7".to_string())],
        };
        let req = request.build(&endpoint).unwrap();
        let headers = req.headers();

        assert_eq!(req.method(), Method::GET);
        assert_eq!(req.uri().path(), "/link");
        assert_eq!(headers[header::HOST], "127.0.0.1:9");
        assert_eq!(headers[header::CONNECTION], "Upgrade");
        assert_eq!(headers[header::UPGRADE], "vmctl");
        assert_eq!(headers[header::SEC_WEBSOCKET_KEY], HANDSHAKE_KEY);
        assert_eq!(headers[header::SEC_WEBSOCKET_VERSION], "13");
        assert_eq!(headers["x-vm-id"], "vm-7");
    }

    #[test]
    fn invalid_custom_header_is_an_upgrade_error() {
        let endpoint = Endpoint::parse("http://127.0.0.1:9/").unwrap();
        let request = UpgradeRequest {
            headers: vec![("bad header".to_string(), "x".to_string())],
            ..UpgradeRequest::default()
        };
        assert!(matches!(
            request.build(&endpoint),
            Err(TransportError::Upgrade(_))
        ));
    }

    #[tokio::test]
    async fn upgrade_roundtrip_leaves_link_bytes_untouched() {
        let (client, server) = tokio::io::duplex(4096);
        let endpoint = Endpoint::parse("http://agent:80/link").unwrap();

        let server_task = tokio::spawn(async move {
            let (upgraded, head) = accept_upgrade(server, DEFAULT_PROTOCOL).await.unwrap();
            let mut link = LinkStream::new(upgraded, "duplex");
            link.write_all(b"link-bytes").await.unwrap();
            let mut reply = [0u8; 5];
            link.read_exact(&mut reply).await.unwrap();
            (head, reply)
        });

        let upgraded = upgrade_client(client, &endpoint, &UpgradeRequest::default())
            .await
            .unwrap();
        let mut link = LinkStream::new(upgraded, "duplex");
        let mut buf = [0u8; 10];
        link.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"link-bytes");
        link.write_all(b"reply").await.unwrap();

        let (head, reply) = server_task.await.unwrap();
        assert_eq!(&reply, b"reply");
        assert_eq!(head.path, "/link");
        assert_eq!(head.header("UPGRADE"), Some(DEFAULT_PROTOCOL));
    }

    #[tokio::test]
    async fn link_bytes_sent_with_the_response_are_not_lost() {
        let (client, mut server) = tokio::io::duplex(4096);
        let endpoint = Endpoint::parse("http://agent/").unwrap();

        let server_task = tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            let mut head = Vec::new();
            while !head.ends_with(b"\r\n\r\n") {
                let n = server.read(&mut buf).await.unwrap();
                head.extend_from_slice(&buf[..n]);
            }
            // Response head and first link bytes in a single write.
            server
                .write_all(b"HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: guestlink\r\n\r\nearly")
                .await
                .unwrap();
            server
        });

        let upgraded = upgrade_client(client, &endpoint, &UpgradeRequest::default())
            .await
            .unwrap();
        let mut link = LinkStream::new(upgraded, "duplex");
        let mut buf = [0u8; 5];
        link.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"early");
        drop(server_task.await.unwrap());
    }

    #[tokio::test]
    async fn wrong_protocol_is_refused() {
        let (client, server) = tokio::io::duplex(4096);
        let endpoint = Endpoint::parse("http://agent/").unwrap();

        let server_task =
            tokio::spawn(async move { accept_upgrade(server, "other-protocol").await });

        let err = upgrade_client(client, &endpoint, &UpgradeRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Upgrade(msg) if msg.contains("400")));
        assert!(matches!(
            server_task.await.unwrap(),
            Err(TransportError::Upgrade(_))
        ));
    }

    #[tokio::test]
    async fn dial_unreachable_endpoint_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let endpoint = Endpoint::parse(&format!("http://{addr}/")).unwrap();
        let err = dial(&endpoint, &UpgradeRequest::default(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}
