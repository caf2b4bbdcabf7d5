use std::time::Duration;

use guestlink_session::{ChannelConfig, ReconnectingChannel};
use guestlink_transport::{LinkStream, UpgradeListener};
use tracing::{debug, info, warn};

use crate::cmd::{parse_duration, ServeArgs};
use crate::exit::{io_error, transport_error, CliResult, SUCCESS};

pub async fn run(args: ServeArgs) -> CliResult<i32> {
    let delay = args.delay.as_deref().map(parse_duration).transpose()?;
    let listener = bind(&args.addr)
        .await
        .map_err(|err| transport_error("bind failed", err))?
        .with_protocol(args.protocol.clone());

    let config = ChannelConfig {
        protocol: args.protocol,
        ..ChannelConfig::default()
    };

    loop {
        let accepted = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(|err| io_error("signal handler setup failed", err))?;
                info!("interrupted, shutting down");
                return Ok(SUCCESS);
            }
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, head)) => {
                info!(path = %head.path, "connection accepted");
                tokio::spawn(echo(stream, config.clone(), delay));
            }
            Err(err) => warn!(error = %err, "accept failed"),
        }
    }
}

async fn bind(addr: &str) -> guestlink_transport::Result<UpgradeListener> {
    #[cfg(unix)]
    if let Some(path) = addr.strip_prefix("unix://") {
        return UpgradeListener::bind_unix(path);
    }
    UpgradeListener::bind_tcp(addr).await
}

async fn echo(stream: LinkStream, config: ChannelConfig, delay: Option<Duration>) {
    let channel = match ReconnectingChannel::from_stream(stream, config) {
        Ok(channel) => channel,
        Err(err) => {
            warn!(error = %err, "channel setup failed");
            return;
        }
    };

    loop {
        let chunk = match channel.read_chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(err) => {
                debug!(error = %err, "read failed");
                break;
            }
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        debug!(size = chunk.len(), "echoing chunk");
        if let Err(err) = channel.write(&chunk).await {
            debug!(error = %err, "echo failed");
            break;
        }
    }
    channel.close().await;
    debug!("connection finished");
}
