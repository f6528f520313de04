//! net-link demo binary.
//!
//! Runs either side of the two demo conversations: a byte exchange answered
//! on a hijacked stream, or a JSON record echoed back through the session's
//! write queue.

use anyhow::Context;
use clap::{Parser, Subcommand};
use link_session::{handler_fn, Link};
use link_wire::{ByteProtocol, JsonProtocol};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod demo;
mod logging;

use config::{CodecKind, LinkConfig};
use demo::Student;
use logging::LinkLogFormatter;

/// Demo client and server for net-link sessions
#[derive(Parser, Debug)]
#[command(name = "net-link", version, about = "Demo client and server for net-link sessions")]
struct Args {
    /// Configuration file path
    #[arg(long, global = true, default_value = "net-link.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Message encoding
    #[arg(long, global = true, value_enum)]
    codec: Option<CodecKind>,

    /// Outbound queue capacity per session
    #[arg(long, global = true)]
    send_queue_size: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept connections and answer every one of them
    Server {
        /// Listen address, e.g. 0.0.0.0:10086
        #[arg(long)]
        listen: Option<String>,
    },
    /// Dial the server once and verify its answer
    Client {
        /// Server address, e.g. 127.0.0.1:10086
        #[arg(long)]
        remote: Option<String>,

        /// Local address to bind before dialing
        #[arg(long)]
        local: Option<String>,
    },
}

impl Args {
    /// Layer command-line flags over the loaded configuration
    fn apply_to(&self, config: &mut LinkConfig) {
        if let Some(codec) = self.codec {
            config.codec = codec;
        }
        if let Some(size) = self.send_queue_size {
            config.send_queue_size = size;
        }
        match &self.command {
            Command::Server { listen } => {
                if let Some(listen) = listen {
                    config.listen = listen.clone();
                }
            }
            Command::Client { remote, local } => {
                if let Some(remote) = remote {
                    config.remote = remote.clone();
                }
                if let Some(local) = local {
                    config.local = local.clone();
                }
            }
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("net_link={}", args.log_level).parse()?)
        .add_directive(format!("link_session={}", args.log_level).parse()?)
        .add_directive(format!("link_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .event_format(LinkLogFormatter::new("net-link"))
        .init();

    info!("Starting net-link v{}", env!("CARGO_PKG_VERSION"));

    let mut config = LinkConfig::load_from_file(&args.config)?;
    args.apply_to(&mut config);
    let session_config = config.session_config();

    match args.command {
        Command::Server { .. } => {
            info!("Serving {} demo on {}", config.codec, config.listen);
            let served = match config.codec {
                CodecKind::Byte => {
                    Link::new(ByteProtocol::new(), handler_fn(demo::byte_server))
                        .with_config(session_config)
                        .listen_and_accept(&config.listen)
                        .await
                }
                CodecKind::Json => {
                    Link::new(JsonProtocol::<Student>::new(), handler_fn(demo::json_server))
                        .with_config(session_config)
                        .listen_and_accept(&config.listen)
                        .await
                }
            };
            served.with_context(|| format!("server on {} stopped", config.listen))?;
        }
        Command::Client { .. } => {
            info!("Running {} demo against {}", config.codec, config.remote);
            let finished = match config.codec {
                CodecKind::Byte => {
                    Link::new(ByteProtocol::new(), handler_fn(demo::byte_client))
                        .with_config(session_config)
                        .dial_and_wait(&config.local, &config.remote)
                        .await
                }
                CodecKind::Json => {
                    Link::new(JsonProtocol::<Student>::new(), handler_fn(demo::json_client))
                        .with_config(session_config)
                        .dial_and_wait(&config.local, &config.remote)
                        .await
                }
            };
            finished.with_context(|| format!("client session with {} failed", config.remote))?;
            info!("Demo finished");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "net-link",
            "client",
            "--remote",
            "10.1.1.1:9000",
            "--codec",
            "json",
            "--send-queue-size",
            "16",
        ]);

        let mut config = LinkConfig::default();
        args.apply_to(&mut config);

        assert_eq!(config.remote, "10.1.1.1:9000");
        assert_eq!(config.codec, CodecKind::Json);
        assert_eq!(config.send_queue_size, 16);
        assert_eq!(config.listen, LinkConfig::default().listen);
    }

    #[test]
    fn test_server_defaults() {
        let args = Args::parse_from(["net-link", "server"]);
        let mut config = LinkConfig::default();
        args.apply_to(&mut config);

        assert!(matches!(args.command, Command::Server { listen: None }));
        assert_eq!(config.codec, CodecKind::Byte);
        assert_eq!(args.config, PathBuf::from("net-link.yaml"));
    }
}
