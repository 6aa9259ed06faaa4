use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "stomp")]
#[command(version)]
#[command(about = "Interactive STOMP client CLI")]
pub struct Cli {
    /// Broker address: host:port for raw STOMP, or a ws:// URL with --ws
    #[arg(short, long, default_value = "127.0.0.1:61613")]
    pub address: String,

    /// Speak STOMP over WebSocket instead of plain TCP
    #[arg(long)]
    pub ws: bool,

    /// Login username
    #[arg(short, long, default_value = "guest")]
    pub login: String,

    /// Passcode
    #[arg(short, long, default_value = "guest")]
    pub passcode: String,

    /// Heartbeat settings (client-send,server-watch in ms)
    #[arg(long, default_value = "10000,10000")]
    pub heartbeat: String,

    /// Destinations to subscribe to (can be specified multiple times)
    #[arg(short, long)]
    pub subscribe: Vec<String>,

    /// Treat destinations as `*`/`#` topic patterns
    #[arg(long)]
    pub wildcard: bool,

    /// Show session summary on exit
    #[arg(long)]
    pub summary: bool,

    /// Log library activity at debug level
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// `(client_send_ms, server_watch_ms)` from `--heartbeat`.
    pub fn heartbeat_pair(&self) -> (u64, u64) {
        stompflow::parse_heartbeat_header(&self.heartbeat)
    }
}
