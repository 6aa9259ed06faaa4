use std::io::{self, Write};

use stompflow::{ConnError, Frame, StompClient};

use super::state::SharedState;

/// Result of executing a command
pub enum CommandResult {
    Ok,
    Quit,
    Info(String),
    Error(String),
}

/// Parse and execute one input line
pub async fn execute_command(line: &str, client: &StompClient, state: SharedState) -> CommandResult {
    let parts: Vec<&str> = line.trim().splitn(3, ' ').collect();
    if parts.is_empty() || parts[0].is_empty() {
        return CommandResult::Ok;
    }

    match parts[0] {
        "quit" | "exit" | "q" => CommandResult::Quit,

        "send" => {
            if parts.len() < 3 {
                return CommandResult::Error("Usage: send <destination> <message>".to_string());
            }
            let frame = Frame::send(parts[1], Some(parts[2])).header("content-type", "text/plain");
            match client.send_frame(frame).await {
                Ok(()) => CommandResult::Ok,
                Err(e) => CommandResult::Error(format!("Send error: {}", e)),
            }
        }

        "sub" | "subscribe" => {
            if parts.len() < 2 {
                return CommandResult::Error("Usage: sub <destination>".to_string());
            }
            match subscribe_destination(client, parts[1], state).await {
                Ok(()) => CommandResult::Info(format!("Subscribed to: {}", parts[1])),
                Err(e) => CommandResult::Error(format!("Failed to subscribe to '{}': {}", parts[1], e)),
            }
        }

        "unsub" | "unsubscribe" => {
            if parts.len() < 2 {
                return CommandResult::Error("Usage: unsub <destination>".to_string());
            }
            match client.unsubscribe(parts[1]).await {
                Ok(true) => CommandResult::Info(format!("Unsubscribed from: {}", parts[1])),
                Ok(false) => CommandResult::Error(format!("Not subscribed to: {}", parts[1])),
                Err(e) => CommandResult::Error(format!("Unsubscribe error: {}", e)),
            }
        }

        "subs" => {
            let subs = client.subscriptions();
            if subs.is_empty() {
                return CommandResult::Info("No subscriptions".to_string());
            }
            let lines: Vec<String> = subs
                .iter()
                .map(|d| format!("  {} (id {})", d, client.subscription_id(d).unwrap_or_default()))
                .collect();
            CommandResult::Info(lines.join("\n"))
        }

        "reconnect" => {
            if client.is_connected() {
                if let Err(e) = client.disconnect().await {
                    return CommandResult::Error(format!("Disconnect error: {}", e));
                }
            }
            match client.reconnect().await {
                Ok(()) => CommandResult::Info("Reconnecting...".to_string()),
                Err(e) => CommandResult::Error(format!("Reconnect error: {}", e)),
            }
        }

        "summary" => CommandResult::Info(state.lock().await.generate_summary()),

        "help" | "?" => {
            print_help();
            CommandResult::Ok
        }

        _ => CommandResult::Error(format!("Unknown command: {}. Type 'help' for commands.", parts[0])),
    }
}

/// Subscribe and spawn a task printing the frames delivered for `dest`.
pub async fn subscribe_destination(
    client: &StompClient,
    dest: &str,
    state: SharedState,
) -> Result<(), ConnError> {
    let mut sub = client.subscribe(dest, Vec::new()).await?;
    state.lock().await.register_subscription(dest);

    let dest = dest.to_string();
    tokio::spawn(async move {
        while let Some(frame) = sub.recv().await {
            state.lock().await.record_message(&dest);
            print_message(&dest, &frame);
        }
    });
    Ok(())
}

fn print_message(dest: &str, frame: &Frame) {
    println!("\n[{}] {} received:", dest, frame.command);
    for (k, v) in &frame.headers {
        println!("  {}: {}", k, v);
    }
    if let Some(body) = &frame.body {
        println!("  Body: {}", body);
    }
    print!("> ");
    let _ = io::stdout().flush();
}

pub fn print_help() {
    println!("Commands:");
    println!("  send <destination> <message>  - Send a message");
    println!("  sub <destination>             - Subscribe to a destination");
    println!("  unsub <destination>           - Unsubscribe from a destination");
    println!("  subs                          - List subscriptions");
    println!("  reconnect                     - Reconnect with the same credentials");
    println!("  summary                       - Print session summary");
    println!("  quit                          - Exit");
}
