use crate::broker::Broker;
use crate::config::Settings;
use crate::transport::websocket::serve_listener;
use futures_util::future::join_all;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(500);

async fn setup_server(settings: Settings) -> (String, Broker) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().unwrap();

    let broker = Broker::with_options(settings.broker_options());
    broker.start().await;
    tokio::spawn(serve_listener(listener, broker.clone(), settings));

    (format!("ws://{addr}"), broker)
}

async fn connect(url: &str) -> WsClient {
    let (ws_stream, _) = connect_async(url).await.expect("WebSocket handshake failed");
    ws_stream
}

async fn wait_for_clients(broker: &Broker, expected: usize) {
    timeout(WAIT, async {
        while broker.len().await != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("client count did not settle");
}

async fn next_payload(ws: &mut WsClient) -> Vec<u8> {
    let msg = timeout(WAIT, ws.next())
        .await
        .expect("Did not receive message in time")
        .expect("stream ended")
        .expect("read error");
    assert!(msg.is_binary(), "expected a binary frame, got {msg:?}");
    msg.into_data().to_vec()
}

#[tokio::test]
async fn test_connection_registers_and_disconnect_unregisters() {
    let (url, broker) = setup_server(Settings::default()).await;

    let mut ws = connect(&url).await;
    wait_for_clients(&broker, 1).await;

    ws.close(None).await.expect("close failed");
    wait_for_clients(&broker, 0).await;
}

#[tokio::test]
async fn test_frame_from_one_client_reaches_every_client() {
    let (url, broker) = setup_server(Settings::default()).await;

    let mut ws_a = connect(&url).await;
    let mut ws_b = connect(&url).await;
    wait_for_clients(&broker, 2).await;

    ws_a.send(WsMessage::binary(vec![0u8, 159, 146, 150]))
        .await
        .expect("Failed to send");

    assert_eq!(next_payload(&mut ws_a).await, vec![0u8, 159, 146, 150]);
    assert_eq!(next_payload(&mut ws_b).await, vec![0u8, 159, 146, 150]);
}

#[tokio::test]
async fn test_text_frames_are_published_as_bytes() {
    let (url, broker) = setup_server(Settings::default()).await;

    let mut ws_a = connect(&url).await;
    let mut ws_b = connect(&url).await;
    wait_for_clients(&broker, 2).await;

    ws_b.send(WsMessage::text("hello world"))
        .await
        .expect("Failed to send");

    assert_eq!(next_payload(&mut ws_a).await, b"hello world");
    assert_eq!(next_payload(&mut ws_b).await, b"hello world");
}

#[tokio::test]
async fn test_broker_publish_reaches_socket_in_order() {
    let (url, broker) = setup_server(Settings::default()).await;

    let mut ws = connect(&url).await;
    wait_for_clients(&broker, 1).await;

    let publisher = broker.clone();
    tokio::spawn(async move {
        for i in 0..20 {
            publisher.publish(format!("msg-{i}")).await;
        }
    });

    for i in 0..20 {
        assert_eq!(next_payload(&mut ws).await, format!("msg-{i}").into_bytes());
    }
}

#[tokio::test]
async fn test_connections_beyond_limit_are_refused() {
    let mut settings = Settings::default();
    settings.server.max_connections = 1;
    let (url, broker) = setup_server(settings).await;

    let _ws_a = connect(&url).await;
    wait_for_clients(&broker, 1).await;

    let mut ws_b = connect(&url).await;
    let msg = timeout(WAIT, ws_b.next())
        .await
        .expect("Did not receive close in time")
        .expect("stream ended")
        .expect("read error");
    assert!(msg.is_close(), "expected a close frame, got {msg:?}");
    assert_eq!(broker.len().await, 1);
}

#[tokio::test]
async fn test_concurrent_connections_respect_limit() {
    let mut settings = Settings::default();
    settings.server.max_connections = 2;
    let (url, broker) = setup_server(settings).await;

    let mut clients = join_all((0..8).map(|_| connect(&url))).await;

    // Refused clients get a close frame right after the handshake; admitted
    // ones hear nothing.
    let mut admitted = 0;
    for ws in &mut clients {
        match timeout(QUIET, ws.next()).await {
            Err(_) => admitted += 1,
            Ok(next) => match next {
                None | Some(Err(_)) => {}
                Some(Ok(msg)) => assert!(msg.is_close(), "expected a close frame, got {msg:?}"),
            },
        }
    }

    assert_eq!(admitted, 2);
    assert_eq!(broker.len().await, 2);
}

#[tokio::test]
async fn test_disconnect_frees_a_connection_slot() {
    let mut settings = Settings::default();
    settings.server.max_connections = 1;
    let (url, broker) = setup_server(settings).await;

    let mut ws_a = connect(&url).await;
    wait_for_clients(&broker, 1).await;
    ws_a.close(None).await.expect("close failed");
    wait_for_clients(&broker, 0).await;

    // The slot is handed back just after the broker forgets the client, so a
    // reconnect racing that may still be refused once.
    let _ws_b = timeout(WAIT, async {
        loop {
            let mut ws = connect(&url).await;
            if timeout(QUIET, ws.next()).await.is_err() {
                return ws;
            }
        }
    })
    .await
    .expect("freed slot was never reused");
    wait_for_clients(&broker, 1).await;
}

#[tokio::test]
async fn test_shutdown_closes_client_sockets() {
    let (url, broker) = setup_server(Settings::default()).await;

    let mut ws = connect(&url).await;
    wait_for_clients(&broker, 1).await;

    broker.shutdown().await;

    let next = timeout(WAIT, ws.next())
        .await
        .expect("socket was not closed after shutdown");
    match next {
        None | Some(Err(_)) => {}
        Some(Ok(msg)) => assert!(msg.is_close(), "expected a close frame, got {msg:?}"),
    }
    assert!(broker.is_empty().await);
}
