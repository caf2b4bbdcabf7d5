//! Minimal session echo server: accepts one upgrade connection and echoes
//! every message back on the key it arrived on.
//!
//! Run with:
//!   cargo run --example echo-server
//!
//! Any guestlink session client dialing `unix:///<printed path>` gets its
//! messages back.

use std::fs;

use guestlink::session::{Session, SessionConfig};
use guestlink::transport::UpgradeListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sock_dir = std::env::temp_dir().join(format!("guestlink-echo-{}", std::process::id()));
    fs::create_dir_all(&sock_dir)?;
    let sock_path = sock_dir.join("echo.sock");

    let listener = UpgradeListener::bind_unix(&sock_path)?;
    eprintln!("Listening on unix://{}", sock_path.display());

    let (stream, head) = listener.accept().await?;
    let session = Session::connect(stream, SessionConfig::new("echo-server")).await?;
    eprintln!("Peer connected: {} ({})", session.peer_identity(), head.path);

    loop {
        match session.read().await {
            Ok(message) => {
                eprintln!(
                    "Received {} bytes on key {:#x}",
                    message.value.len(),
                    message.key
                );
                session.write(&message).await?;
            }
            Err(e) => {
                eprintln!("Peer disconnected: {e}");
                break;
            }
        }
    }

    let _ = fs::remove_dir_all(&sock_dir);
    Ok(())
}
