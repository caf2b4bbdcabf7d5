mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "guestlink", version, about = "Host/guest link CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        env = "GUESTLINK_LOG",
        default_value = "info",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::KindArg;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "guestlink",
            "send",
            "http://127.0.0.1:7000/link,unix:///tmp/guestlink.sock",
            "--data",
            "hello",
            "--wait",
        ])
        .expect("send args should parse");

        match cli.command {
            Command::Send(args) => {
                assert_eq!(args.urls.len(), 2);
                assert!(args.wait);
                assert_eq!(args.protocol, "guestlink");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "guestlink",
            "send",
            "http://127.0.0.1:7000/",
            "--file",
            "/tmp/payload",
            "--data",
            "hello",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_keys_subcommand() {
        let cli = Cli::try_parse_from(["guestlink", "keys", "--kind", "exec", "--index", "4"])
            .expect("keys args should parse");
        match cli.command {
            Command::Keys(args) => {
                assert_eq!(args.kind, Some(KindArg::Exec));
                assert_eq!(args.index, 4);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_serve_with_delay() {
        let cli = Cli::try_parse_from(["guestlink", "serve", "127.0.0.1:0", "--delay", "150ms"])
            .expect("serve args should parse");
        assert!(matches!(cli.command, Command::Serve(ref args) if args.delay.as_deref() == Some("150ms")));
    }
}
