//! Command-line and environment configuration.

use clap::Parser;

/// Raw command-line arguments, also loadable from the environment (and a
/// `.env` file via `dotenvy`).
#[derive(Parser, Debug)]
#[command(version, about = "Streaming greeter and chat room gRPC server")]
pub struct CliArgs {
    /// Address to bind: `host:port` for TCP, or a filesystem path with
    /// `--uds`.
    #[arg(long, env = "SERVER_ADDR", default_value = "0.0.0.0:50051")]
    pub addr: String,

    /// Bind a Unix domain socket instead of TCP.
    #[arg(long, env = "SERVER_UDS", default_value_t = false)]
    pub uds: bool,

    /// Buffer size of each server-to-client response stream.
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 16)]
    pub stream_buffer_size: usize,

    /// Incoming calls of one RPC shape that may queue before the engine
    /// accepts them.
    #[arg(long, env = "ACCEPT_BACKLOG", default_value_t = 64)]
    pub accept_backlog: usize,

    /// Broadcast messages that may queue behind an in-flight write on one
    /// chat session before the newest is dropped.
    #[arg(long, env = "SESSION_QUEUE_LIMIT", default_value_t = 128)]
    pub session_queue_limit: usize,

    /// Largest `num_greetings` a SayHello request may ask for.
    #[arg(long, env = "MAX_GREETINGS", default_value_t = 10_000)]
    pub max_greetings: u32,
}

/// Validated server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub stream_buffer_size: usize,
    pub accept_backlog: usize,
    pub session_queue_limit: usize,
    pub max_greetings: u32,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.stream_buffer_size == 0 {
            anyhow::bail!("--stream-buffer-size must be greater than 0");
        }
        if args.accept_backlog == 0 {
            anyhow::bail!("--accept-backlog must be greater than 0");
        }
        Ok(Self {
            server_addr: args.addr,
            uds: args.uds,
            stream_buffer_size: args.stream_buffer_size,
            accept_backlog: args.accept_backlog,
            session_queue_limit: args.session_queue_limit,
            max_greetings: args.max_greetings,
        })
    }
}

impl ServerConfig {
    #[cfg(test)]
    pub(crate) fn test_default() -> Self {
        Self {
            server_addr: "127.0.0.1:0".into(),
            uds: false,
            stream_buffer_size: 16,
            accept_backlog: 16,
            session_queue_limit: 128,
            max_greetings: 10_000,
        }
    }
}
