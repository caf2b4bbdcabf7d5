use std::fs;
use tokio::time::Instant;

use guestlink_session::{ChannelConfig, ReconnectingChannel};

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{session_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_reply, OutputFormat};

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let connect_timeout = parse_duration(&args.connect_timeout)?;
    let payload = resolve_payload(&args)?;

    let config = ChannelConfig {
        protocol: args.protocol.clone(),
        bootstrap_deadline: connect_timeout,
        ..ChannelConfig::with_urls(args.urls.iter().cloned())
    };
    let channel = ReconnectingChannel::dial(config)
        .await
        .map_err(|err| session_error("connect failed", err))?;

    if !payload.is_empty() {
        channel
            .write(&payload)
            .await
            .map_err(|err| session_error("send failed", err))?;
    }

    let mut code = SUCCESS;
    if args.wait {
        channel.set_read_deadline(Some(Instant::now() + wait_timeout));
        match channel.read_chunk().await {
            Ok(Some(reply)) => print_reply(&reply, &args.urls.join(","), format),
            Ok(None) => code = FAILURE,
            Err(err) => {
                channel.close().await;
                return Err(session_error("receive failed", err));
            }
        }
    }

    channel.close().await;
    Ok(code)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    Err(CliError::new(
        crate::exit::USAGE,
        "one of --data or --file is required",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::SendArgs;

    fn args() -> SendArgs {
        SendArgs {
            urls: vec!["http://127.0.0.1:1/".to_string()],
            protocol: "guestlink".to_string(),
            data: None,
            file: None,
            wait: false,
            wait_timeout: "5s".to_string(),
            connect_timeout: "30s".to_string(),
        }
    }

    #[test]
    fn payload_from_data() {
        let mut args = args();
        args.data = Some("hello".to_string());
        assert_eq!(resolve_payload(&args).unwrap(), b"hello");
    }

    #[test]
    fn payload_from_missing_file_is_an_error() {
        let mut args = args();
        args.file = Some("/nonexistent/guestlink/payload".into());
        assert!(resolve_payload(&args).is_err());
    }

    #[test]
    fn payload_is_required() {
        let err = resolve_payload(&args()).unwrap_err();
        assert_eq!(err.code, crate::exit::USAGE);
    }
}
