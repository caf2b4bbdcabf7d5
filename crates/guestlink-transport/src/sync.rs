//! Beacon alignment on a raw, possibly polluted byte stream.
//!
//! Both peers transmit an 8-byte beacon every `timeout / 20` while scanning
//! the inbound bytes for the peer's beacon:
//!
//! ```text
//! ┌──────┬──────┬──────┬──────┬───────┬──────┬──────┬──────┐
//! │ 0x16 │ 0x00 │ 0x00 │ 0x00 │ state │ 0x00 │ 0x00 │ 0x00 │
//! └──────┴──────┴──────┴──────┴───────┴──────┴──────┴──────┘
//! state = 0x15 (still looking) | 0x1A (seen yours, done)
//! ```
//!
//! The scanner drops one byte at a time until the pattern matches, so boot
//! console output or any other garbage ahead of the beacon is skipped. Once
//! matched, inbound bytes are consumed in 8-byte chunks until the peer reports
//! `0x1A`, which leaves the stream positioned on an 8-byte boundary for the
//! framed protocol that follows. The scanner never reads past the beacon or
//! chunk that completes alignment.

use std::io::ErrorKind;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::error::{Result, TransportError};

/// Default overall alignment deadline.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(1);

/// Beacon length on the wire.
pub const BEACON_LEN: usize = 8;

/// First byte of every beacon.
pub const BEACON_MARK: u8 = 0x16;

/// Beacon state: the sender has not yet seen the peer's beacon.
pub const BEACON_WAITING: u8 = 0x15;

/// Beacon state: the sender has seen the peer's beacon and is done.
pub const BEACON_DONE: u8 = 0x1A;

/// Offset of the state byte within a beacon.
const STATE_OFFSET: usize = 4;

/// Build the beacon carrying `state`.
pub fn beacon(state: u8) -> [u8; BEACON_LEN] {
    [BEACON_MARK, 0, 0, 0, state, 0, 0, 0]
}

/// Returns the beacon state if `window` is exactly one valid beacon.
fn beacon_state(window: &[u8]) -> Option<u8> {
    match window {
        [BEACON_MARK, 0, 0, 0, state @ (BEACON_WAITING | BEACON_DONE), 0, 0, 0] => Some(*state),
        _ => None,
    }
}

/// Align `stream` with the peer, giving up after `timeout`.
///
/// On success a final `0x1A` beacon has been sent so a peer still waiting for
/// confirmation can finish, and the stream is 8-byte aligned with the peer's
/// output.
pub async fn sync<S>(stream: &mut S, timeout: Duration) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let period = beacon_period(timeout);
    let (mut reader, mut writer) = tokio::io::split(stream);

    match tokio::time::timeout(timeout, align(&mut reader, &mut writer, period)).await {
        Err(_) => {
            debug!(?timeout, "sync handshake timed out");
            Err(TransportError::SyncTimeout(timeout))
        }
        Ok(Err(err)) => Err(err),
        Ok(Ok(())) => {
            // Courtesy beacon; the peer may already be gone, which is fine.
            let farewell = async {
                writer.write_all(&beacon(BEACON_DONE)).await?;
                writer.flush().await
            };
            if let Ok(Err(err)) = tokio::time::timeout(period, farewell).await {
                trace!(error = %err, "final sync beacon not delivered");
            }
            debug!("sync handshake complete");
            Ok(())
        }
    }
}

fn beacon_period(timeout: Duration) -> Duration {
    (timeout / 20).max(Duration::from_millis(1))
}

async fn align<R, W>(reader: &mut R, writer: &mut W, period: Duration) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut aligner = Aligner::default();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                writer.write_all(&beacon(aligner.state())).await?;
                writer.flush().await?;
            }
            read = reader.read(aligner.unfilled()) => {
                let n = read?;
                if n == 0 {
                    return Err(TransportError::Io(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "stream closed during sync handshake",
                    )));
                }
                if aligner.advance(n) {
                    return Ok(());
                }
            }
        }
    }
}

/// Incremental beacon matcher.
///
/// Bytes are read directly into `window`, never more than are needed to
/// complete it, so nothing after the final beacon is consumed.
#[derive(Debug, Default)]
struct Aligner {
    window: [u8; BEACON_LEN],
    filled: usize,
    locally_synced: bool,
}

impl Aligner {
    /// The state byte this side should advertise.
    fn state(&self) -> u8 {
        if self.locally_synced {
            BEACON_DONE
        } else {
            BEACON_WAITING
        }
    }

    fn unfilled(&mut self) -> &mut [u8] {
        &mut self.window[self.filled..]
    }

    /// Account for `n` freshly read bytes. Returns true once the peer has
    /// confirmed alignment.
    fn advance(&mut self, n: usize) -> bool {
        self.filled += n;
        if self.filled < BEACON_LEN {
            return false;
        }

        if self.locally_synced {
            // Chunk mode: the window is one aligned 8-byte unit.
            self.filled = 0;
            return self.window[STATE_OFFSET] == BEACON_DONE;
        }

        match beacon_state(&self.window) {
            Some(state) => {
                trace!(state, "matched peer beacon");
                self.locally_synced = true;
                self.filled = 0;
                state == BEACON_DONE
            }
            None => {
                self.window.copy_within(1.., 0);
                self.filled = BEACON_LEN - 1;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn feed(aligner: &mut Aligner, bytes: &[u8]) -> Option<usize> {
        for (i, byte) in bytes.iter().enumerate() {
            aligner.unfilled()[0] = *byte;
            if aligner.advance(1) {
                return Some(i + 1);
            }
        }
        None
    }

    #[test]
    fn beacon_layout() {
        assert_eq!(beacon(BEACON_WAITING), [0x16, 0, 0, 0, 0x15, 0, 0, 0]);
        assert_eq!(beacon(BEACON_DONE), [0x16, 0, 0, 0, 0x1A, 0, 0, 0]);
        assert_eq!(beacon_state(&beacon(BEACON_DONE)), Some(BEACON_DONE));
        assert_eq!(beacon_state(&[0x16, 0, 0, 0, 0x17, 0, 0, 0]), None);
    }

    #[test]
    fn scanner_skips_garbage_before_done_beacon() {
        let mut aligner = Aligner::default();
        let mut wire = b"[    0.000000] Linux version".to_vec();
        wire.extend_from_slice(&beacon(BEACON_DONE));
        wire.extend_from_slice(b"trailing");

        let consumed = feed(&mut aligner, &wire).expect("should align");
        assert_eq!(consumed, wire.len() - b"trailing".len());
    }

    #[test]
    fn scanner_tolerates_partial_beacon_prefix() {
        let mut aligner = Aligner::default();
        let mut wire = vec![0x16, 0, 0, 0, 0x15, 0, 0];
        wire.extend_from_slice(&[0x16, 0x16, 0]);
        wire.extend_from_slice(&beacon(BEACON_DONE));

        assert!(feed(&mut aligner, &wire).is_some());
    }

    #[test]
    fn waiting_beacon_switches_to_chunk_mode() {
        let mut aligner = Aligner::default();
        assert_eq!(feed(&mut aligner, &beacon(BEACON_WAITING)), None);
        assert_eq!(aligner.state(), BEACON_DONE);

        // A chunk without the done marker is skipped whole.
        assert_eq!(feed(&mut aligner, b"ABCDEFGH"), None);
        assert_eq!(feed(&mut aligner, &beacon(BEACON_DONE)), Some(BEACON_LEN));
    }

    #[tokio::test]
    async fn aligns_under_noise() {
        let (mut left, mut right) = tokio::io::duplex(4096);
        left.write_all(b"junk").await.unwrap();

        let start = Instant::now();
        let (a, b) = tokio::join!(
            sync(&mut left, DEFAULT_SYNC_TIMEOUT),
            sync(&mut right, DEFAULT_SYNC_TIMEOUT)
        );

        a.expect("left side should align");
        b.expect("right side should align");
        assert!(start.elapsed() < DEFAULT_SYNC_TIMEOUT);
    }

    #[tokio::test]
    async fn aligns_under_beacon_like_noise() {
        let (mut left, mut right) = tokio::io::duplex(4096);
        right
            .write_all(&[0x16, 0, 0, 0, 0x15, 0, 0, 0x16, 0x16, 0, 0, 0, 0x1A])
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            sync(&mut left, DEFAULT_SYNC_TIMEOUT),
            sync(&mut right, DEFAULT_SYNC_TIMEOUT)
        );
        assert!(a.is_ok());
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn one_sided_sync_times_out() {
        let (mut left, _right) = tokio::io::duplex(4096);
        let timeout = Duration::from_millis(10);

        let start = Instant::now();
        let err = sync(&mut left, timeout).await.unwrap_err();

        assert!(matches!(err, TransportError::SyncTimeout(t) if t == timeout));
        assert!(start.elapsed() < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn closed_peer_fails_sync() {
        let (mut left, right) = tokio::io::duplex(4096);
        drop(right);

        let err = sync(&mut left, DEFAULT_SYNC_TIMEOUT).await.unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
    }

    #[tokio::test]
    async fn stream_is_chunk_aligned_after_sync() {
        let (mut left, mut right) = tokio::io::duplex(4096);
        left.write_all(b"noise!").await.unwrap();

        let (a, b) = tokio::join!(
            sync(&mut left, DEFAULT_SYNC_TIMEOUT),
            sync(&mut right, DEFAULT_SYNC_TIMEOUT)
        );
        a.unwrap();
        b.unwrap();

        left.write_all(b"PAYLOAD!").await.unwrap();

        // Anything the peer sent before the payload is whole beacons.
        let mut chunk = [0u8; BEACON_LEN];
        loop {
            right.read_exact(&mut chunk).await.unwrap();
            if beacon_state(&chunk).is_none() {
                break;
            }
        }
        assert_eq!(&chunk, b"PAYLOAD!");
    }
}
