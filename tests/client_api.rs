//! StompClient construction through a transport factory.

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use common::{CONNECTED, ScriptedTransport, settle};
use stompflow::{ClientOptions, ConnectionState, StompClient};

#[tokio::test]
async fn create_hands_uri_and_headers_to_factory() {
    let seen: Arc<Mutex<Option<(String, HashMap<String, String>)>>> = Arc::new(Mutex::new(None));
    let record = seen.clone();
    let transport = ScriptedTransport::new().answering(CONNECTED);
    let scripted = transport.clone();

    let mut headers = HashMap::new();
    headers.insert("login".to_string(), "guest".to_string());
    headers.insert("passcode".to_string(), "guest".to_string());

    let client = StompClient::create(
        move |uri: &str, headers: HashMap<String, String>| {
            *record.lock().unwrap() = Some((uri.to_string(), headers));
            scripted
        },
        "ws://localhost:15674/ws",
        headers,
    );

    let (uri, factory_headers) = seen.lock().unwrap().clone().expect("factory called");
    assert_eq!(uri, "ws://localhost:15674/ws");
    assert_eq!(factory_headers.get("login").map(String::as_str), Some("guest"));

    // nothing touches the wire before connect
    assert_eq!(transport.opens(), 0);
    assert_eq!(client.state(), ConnectionState::Disconnected);

    client.connect_default().await.expect("connect");
    settle().await;
    assert!(client.is_connected());

    let connect = &transport.sent_frames()[0];
    assert_eq!(connect.get_header("login"), Some("guest"));
    assert_eq!(connect.get_header("passcode"), Some("guest"));
}

#[tokio::test]
async fn small_bus_capacity_drops_oldest_frames() {
    let transport = ScriptedTransport::new().answering(CONNECTED);
    let client = StompClient::new(transport.clone(), ClientOptions::new().bus_capacity(2));
    client.connect(Vec::new()).await.expect("connect");
    settle().await;

    let mut slow = client.messages();
    for i in 0..5 {
        transport
            .broker_says(&common::message("/queue/a", &i.to_string()))
            .await;
    }
    let bodies: Vec<String> = common::drain(&mut slow)
        .into_iter()
        .filter_map(|f| f.body)
        .collect();
    assert_eq!(bodies, vec!["3", "4"]);
    assert!(client.is_connected());
}
