use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::time::Duration;

use stompflow::{
    BusStream, ClientOptions, Command, ConnError, Frame, LifecycleKind, MatchStrategy,
    StompClient, TcpTransport, WsTransport,
};
use tokio::sync::mpsc;

use super::args::Cli;
use super::commands::{CommandResult, execute_command, print_help, subscribe_destination};
use super::exit_codes;
use super::state::{SharedState, new_shared_state};

/// How long to wait for the broker's CONNECTED frame.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the interactive CLI
pub async fn run(cli: &Cli) -> Result<(), (String, u8)> {
    let (send_ms, watch_ms) = cli.heartbeat_pair();
    let strategy = if cli.wildcard {
        MatchStrategy::Wildcard
    } else {
        MatchStrategy::Exact
    };
    let options = ClientOptions::new()
        .heartbeat(send_ms, watch_ms)
        .match_strategy(strategy);
    let client = if cli.ws {
        StompClient::new(WsTransport::new(cli.address.clone(), HashMap::new()), options)
    } else {
        StompClient::new(TcpTransport::new(cli.address.clone()), options)
    };

    let state = new_shared_state(cli.address.clone(), cli.login.clone());
    spawn_lifecycle_printer(&client, state.clone());

    println!("Connecting to {}...", cli.address);
    let mut inbound = client.messages();
    let headers = vec![
        ("login".to_string(), cli.login.clone()),
        ("passcode".to_string(), cli.passcode.clone()),
    ];
    client
        .connect(headers)
        .await
        .map_err(|e| format_connection_error(&e, &cli.address))?;
    wait_for_connected(&mut inbound).await?;
    println!("Connected.");
    spawn_error_printer(inbound);

    for dest in &cli.subscribe {
        subscribe_destination(&client, dest, state.clone())
            .await
            .map_err(|e| {
                (
                    format!("Failed to subscribe to '{}': {}", dest, e),
                    exit_codes::PROTOCOL_ERROR,
                )
            })?;
        println!("Subscribed to: {}", dest);
    }

    // stdin is read on a plain thread so the runtime never blocks on it
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<String>(16);
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if cmd_tx.blocking_send(l).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    println!();
    print_help();
    println!();

    loop {
        print!("> ");
        let _ = io::stdout().flush();

        let Some(line) = cmd_rx.recv().await else {
            break;
        };

        match execute_command(&line, &client, state.clone()).await {
            CommandResult::Ok => {}
            CommandResult::Quit => break,
            CommandResult::Info(msg) => println!("{}", msg),
            CommandResult::Error(msg) => eprintln!("{}", msg),
        }
    }

    println!("Disconnecting...");
    if let Err(e) = client.disconnect().await {
        eprintln!("Disconnect error: {}", e);
    }
    if cli.summary {
        println!("{}", state.lock().await.generate_summary());
    }
    Ok(())
}

/// Wait for CONNECTED; an ERROR frame means the broker rejected the login.
async fn wait_for_connected(inbound: &mut BusStream<Frame>) -> Result<(), (String, u8)> {
    let outcome = tokio::time::timeout(CONNECT_TIMEOUT, async {
        while let Some(frame) = inbound.recv().await {
            match frame.command {
                Command::Connected => return Ok(()),
                Command::Error => {
                    let mut message = format!(
                        "Authentication failed: {}",
                        frame.get_header("message").unwrap_or("broker error")
                    );
                    if let Some(body) = &frame.body {
                        message.push_str(&format!(" ({})", body.trim()));
                    }
                    return Err((message, exit_codes::AUTH_ERROR));
                }
                _ => {}
            }
        }
        Err(("Connection closed".to_string(), exit_codes::NETWORK_ERROR))
    })
    .await;

    match outcome {
        Ok(result) => result,
        Err(_) => Err((
            format!("No CONNECTED frame within {}s", CONNECT_TIMEOUT.as_secs()),
            exit_codes::PROTOCOL_ERROR,
        )),
    }
}

fn spawn_lifecycle_printer(client: &StompClient, state: SharedState) {
    let mut events = client.lifecycle();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            state.lock().await.record_lifecycle(event.kind);
            match (event.kind, event.cause) {
                (LifecycleKind::Opened, _) => println!("[lifecycle] transport opened"),
                (LifecycleKind::Closed, _) => println!("\n[lifecycle] connection closed"),
                (LifecycleKind::Error, Some(cause)) => eprintln!("\n[lifecycle] error: {}", cause),
                (LifecycleKind::Error, None) => eprintln!("\n[lifecycle] error"),
                (LifecycleKind::FailedServerHeartbeat, _) => {
                    eprintln!("\n[lifecycle] broker missed its heart-beats")
                }
            }
        }
    });
}

/// Print ERROR frames the broker sends after the handshake.
fn spawn_error_printer(mut inbound: BusStream<Frame>) {
    tokio::spawn(async move {
        while let Some(frame) = inbound.recv().await {
            if frame.command != Command::Error {
                continue;
            }
            eprintln!(
                "\n[BROKER ERROR] {}",
                frame.get_header("message").unwrap_or("(no message)")
            );
            if let Some(body) = &frame.body {
                eprintln!("  {}", body.trim());
            }
            print!("> ");
            let _ = io::stdout().flush();
        }
    });
}

fn format_connection_error(err: &ConnError, address: &str) -> (String, u8) {
    match err {
        ConnError::Io(io_err) => {
            let message = match io_err.kind() {
                io::ErrorKind::ConnectionRefused => format!("Connection refused: {}", address),
                io::ErrorKind::TimedOut => format!("Connection timed out: {}", address),
                _ => format!("Connection failed: {}", io_err),
            };
            (message, exit_codes::NETWORK_ERROR)
        }
        ConnError::Transport(msg) => (
            format!("Connection failed: {}", msg),
            exit_codes::NETWORK_ERROR,
        ),
        other => (format!("Protocol error: {}", other), exit_codes::PROTOCOL_ERROR),
    }
}
