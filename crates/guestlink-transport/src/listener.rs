use std::net::SocketAddr;
#[cfg(unix)]
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{LinkStream, SocketStream};
use crate::upgrade::{accept_upgrade, RequestHead, DEFAULT_PROTOCOL};

/// Default time a freshly accepted client has to finish its upgrade request.
pub const DEFAULT_UPGRADE_TIMEOUT: Duration = Duration::from_secs(5);

/// Accepts HTTP-upgrade connections over TCP or a Unix domain socket.
pub struct UpgradeListener {
    inner: ListenerInner,
    protocol: String,
    upgrade_timeout: Duration,
}

enum ListenerInner {
    Tcp(tokio::net::TcpListener),
    #[cfg(unix)]
    Unix {
        listener: tokio::net::UnixListener,
        path: PathBuf,
        created_inode: Option<(u64, u64)>,
    },
}

impl UpgradeListener {
    /// Bind a TCP listener.
    pub async fn bind_tcp(addr: &str) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                path: PathBuf::from(addr),
                source,
            })?;
        info!(addr = %addr, "listening for upgrade connections");
        Ok(Self::from_inner(ListenerInner::Tcp(listener)))
    }

    /// Bind a filesystem-path Unix domain socket.
    ///
    /// A stale socket at `path` is removed first; any other kind of file is
    /// left alone and binding fails.
    #[cfg(unix)]
    pub fn bind_unix(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let bind_err = |source| TransportError::Bind {
            path: path.clone(),
            source,
        };

        if path.exists() {
            let metadata = std::fs::symlink_metadata(&path).map_err(bind_err)?;
            if !metadata.file_type().is_socket() {
                return Err(bind_err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(bind_err)?;
        }

        let listener = tokio::net::UnixListener::bind(&path).map_err(bind_err)?;
        let created_inode = std::fs::symlink_metadata(&path)
            .ok()
            .map(|metadata| (metadata.dev(), metadata.ino()));

        info!(?path, "listening for upgrade connections");
        Ok(Self::from_inner(ListenerInner::Unix {
            listener,
            path,
            created_inode,
        }))
    }

    fn from_inner(inner: ListenerInner) -> Self {
        Self {
            inner,
            protocol: DEFAULT_PROTOCOL.to_string(),
            upgrade_timeout: DEFAULT_UPGRADE_TIMEOUT,
        }
    }

    /// Override the accepted `Upgrade:` protocol token.
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Override how long a client may take to send its upgrade request.
    pub fn with_upgrade_timeout(mut self, timeout: Duration) -> Self {
        self.upgrade_timeout = timeout;
        self
    }

    /// TCP address this listener is bound to, if it is a TCP listener.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.inner {
            ListenerInner::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            ListenerInner::Unix { .. } => None,
        }
    }

    /// Accept the next connection and complete its upgrade.
    ///
    /// A client that fails the upgrade yields an error for that connection
    /// only; the listener stays usable.
    pub async fn accept(&self) -> Result<(LinkStream, RequestHead)> {
        let socket = match &self.inner {
            ListenerInner::Tcp(listener) => {
                let (stream, peer) = listener.accept().await.map_err(TransportError::Accept)?;
                debug!(%peer, "accepted tcp connection");
                SocketStream::from_tcp(stream)
            }
            #[cfg(unix)]
            ListenerInner::Unix { listener, .. } => {
                let (stream, _addr) = listener.accept().await.map_err(TransportError::Accept)?;
                debug!("accepted unix connection");
                SocketStream::Unix(stream)
            }
        };

        let transport = socket.transport_name();
        let (upgraded, head) =
            tokio::time::timeout(self.upgrade_timeout, accept_upgrade(socket, &self.protocol))
                .await
                .map_err(|_| {
                    TransportError::Upgrade("client sent no upgrade request in time".into())
                })??;

        Ok((LinkStream::new(upgraded, transport), head))
    }
}

impl Drop for UpgradeListener {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let ListenerInner::Unix {
            path,
            created_inode: Some((expected_dev, expected_ino)),
            ..
        } = &self.inner
        {
            if let Ok(metadata) = std::fs::symlink_metadata(path) {
                if metadata.file_type().is_socket()
                    && metadata.dev() == *expected_dev
                    && metadata.ino() == *expected_ino
                {
                    debug!(?path, "cleaning up socket file");
                    let _ = std::fs::remove_file(path);
                } else {
                    debug!(?path, "socket path identity changed; skipping cleanup");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::upgrade::{dial, Endpoint, UpgradeRequest};

    #[tokio::test]
    async fn tcp_accept_and_dial() {
        let listener = UpgradeListener::bind_tcp("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, head) = listener.accept().await.unwrap();
            stream.write_all(b"hello").await.unwrap();
            head
        });

        let endpoint = Endpoint::parse(&format!("http://{addr}/attach")).unwrap();
        let mut client = dial(&endpoint, &UpgradeRequest::default(), Duration::from_secs(2))
            .await
            .unwrap();

        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(server.await.unwrap().path, "/attach");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_accept_dial_and_cleanup() {
        let dir = std::env::temp_dir().join(format!(
            "guestlink-listener-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let sock_path = dir.join("link.sock");

        let listener = UpgradeListener::bind_unix(&sock_path).unwrap();
        let url = format!("unix://{}", sock_path.display());

        let server = tokio::spawn(async move {
            let (_stream, head) = listener.accept().await.unwrap();
            drop(listener);
            head
        });

        let endpoint = Endpoint::parse(&url).unwrap();
        let _client = dial(&endpoint, &UpgradeRequest::default(), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(server.await.unwrap().path, "/");
        assert!(!sock_path.exists(), "socket file should be cleaned up on drop");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[test]
    fn bind_rejects_existing_non_socket_file() {
        let dir = std::env::temp_dir().join(format!("guestlink-bind-file-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let sock_path = dir.join("not-a-socket.sock");
        std::fs::write(&sock_path, b"regular-file").unwrap();

        let result = UpgradeListener::bind_unix(&sock_path);
        assert!(matches!(result, Err(TransportError::Bind { .. })));

        let _ = std::fs::remove_file(&sock_path);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn non_upgrade_client_is_rejected() {
        let listener = UpgradeListener::bind_tcp("127.0.0.1:0")
            .await
            .unwrap()
            .with_upgrade_timeout(Duration::from_secs(2));
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
                .await
                .unwrap();
            let mut response = String::new();
            stream.read_to_string(&mut response).await.unwrap();
            response
        });

        let err = listener.accept().await.unwrap_err();
        assert!(matches!(err, TransportError::Upgrade(_)));
        drop(listener);
        assert!(client.await.unwrap().starts_with("HTTP/1.1 400"));
    }
}
