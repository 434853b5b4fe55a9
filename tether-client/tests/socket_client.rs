use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tether_client::prelude::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

type Ws = WebSocketStream<TcpStream>;

#[derive(Clone, Default)]
struct Recorded {
    headers: Arc<Mutex<Vec<(String, String)>>>,
    texts: Arc<Mutex<Vec<String>>>,
    accepted: Arc<AtomicUsize>,
}

impl Recorded {
    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .lock()
            .unwrap()
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    }

    fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }

    fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

/// Local WebSocket server running `behaviour` for every accepted connection
async fn serve<F, Fut>(behaviour: F) -> (String, Recorded)
where
    F: Fn(usize, Ws, Recorded) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let recorded = Recorded::default();
    let shared = recorded.clone();
    let behaviour = Arc::new(behaviour);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let index = shared.accepted.fetch_add(1, Ordering::SeqCst);
            let headers = shared.headers.clone();
            let callback = move |req: &Request, resp: Response| {
                let mut seen = headers.lock().unwrap();
                for (name, value) in req.headers() {
                    seen.push((
                        name.to_string(),
                        value.to_str().unwrap_or_default().to_string(),
                    ));
                }
                Ok::<_, ErrorResponse>(resp)
            };
            let Ok(ws) = accept_hdr_async(stream, callback).await else {
                continue;
            };
            tokio::spawn(behaviour(index, ws, shared.clone()));
        }
    });

    (url, recorded)
}

async fn record(_index: usize, mut ws: Ws, recorded: Recorded) {
    while let Some(Ok(msg)) = ws.next().await {
        if let Message::Text(text) = msg {
            recorded.texts.lock().unwrap().push(text);
        }
    }
}

async fn echo(_index: usize, mut ws: Ws, _recorded: Recorded) {
    while let Some(Ok(msg)) = ws.next().await {
        if msg.is_text() && ws.send(msg).await.is_err() {
            break;
        }
    }
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn collector(client: &Client) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    client.set_message_callback(move |msg| sink.lock().unwrap().push(msg.to_string()));
    seen
}

#[tokio::test]
async fn test_connect_sends_credentials_as_headers() {
    let (url, server) = serve(record).await;
    let client = Client::new(ClientConfig::default().add_header("X-Trace", "abc")).unwrap();

    client.connect(&url, "tok-123", "im_app_ios").await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);
    assert!(client.is_connected());

    assert_eq!(server.header("token").as_deref(), Some("tok-123"));
    assert_eq!(server.header("devicetype").as_deref(), Some("im_app_ios"));
    assert_eq!(server.header("x-trace").as_deref(), Some("abc"));
    assert!(server.header("user-agent").unwrap().starts_with("tether/"));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_empty_client_type_uses_default() {
    let (url, server) = serve(record).await;
    let client = Client::new(ClientConfig::default()).unwrap();

    client.connect(&url, "tok", "").await.unwrap();
    assert_eq!(server.header("devicetype").as_deref(), Some("im_app_android"));
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_send_before_connect_fails() {
    let client = Client::new(ClientConfig::default()).unwrap();
    assert!(matches!(client.send("hi").await, Err(Error::NotConnected)));
    assert_eq!(client.close().await.unwrap(), CloseOutcome::AlreadyClosed);
}

#[tokio::test]
async fn test_echo_roundtrip() {
    let (url, _server) = serve(echo).await;
    let client = Client::new(ClientConfig::default()).unwrap();
    let seen = collector(&client);

    client.connect(&url, "tok", "a").await.unwrap();
    client.send("hello").await.unwrap();
    wait_until("echo", || !seen.lock().unwrap().is_empty()).await;
    assert_eq!(*seen.lock().unwrap(), vec!["hello"]);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_inbound_order_preserved() {
    let (url, _server) = serve(|_, mut ws: Ws, recorded: Recorded| async move {
        for i in 0..50 {
            if ws.send(Message::Text(format!("m{i}"))).await.is_err() {
                return;
            }
        }
        record(0, ws, recorded).await;
    })
    .await;
    let client = Client::new(ClientConfig::default()).unwrap();
    let seen = collector(&client);

    client.connect(&url, "tok", "a").await.unwrap();
    wait_until("50 messages", || seen.lock().unwrap().len() == 50).await;
    let expected: Vec<String> = (0..50).map(|i| format!("m{i}")).collect();
    assert_eq!(*seen.lock().unwrap(), expected);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (url, _server) = serve(record).await;
    let client = Client::new(ClientConfig::default()).unwrap();

    client.connect(&url, "tok", "a").await.unwrap();
    assert_eq!(client.close().await.unwrap(), CloseOutcome::Closed);
    assert_eq!(client.close().await.unwrap(), CloseOutcome::AlreadyClosed);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(matches!(client.send("late").await, Err(Error::NotConnected)));
}

#[tokio::test]
async fn test_heartbeat_stops_on_close() {
    let (url, server) = serve(record).await;
    let client = Client::builder()
        .heartbeat(Duration::from_millis(100))
        .build()
        .unwrap();

    client.connect(&url, "tok", "a").await.unwrap();
    wait_until("two keepalives", || server.texts().len() >= 2).await;
    assert!(server.texts().iter().all(|text| text == "ping"));

    client.close().await.unwrap();
    // frames written before the close frame may still be in flight
    tokio::time::sleep(Duration::from_millis(100)).await;
    let after_close = server.texts().len();
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(server.texts().len(), after_close);
}

/// Accepts TCP connections and never answers the upgrade; returns the count
async fn silent_server() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            held.push(stream);
        }
    });
    (url, accepted)
}

#[tokio::test]
async fn test_dropped_client_stops_keepalives() {
    let (url, server) = serve(record).await;
    let client = Client::builder()
        .heartbeat(Duration::from_millis(50))
        .build()
        .unwrap();

    client.connect(&url, "tok", "a").await.unwrap();
    wait_until("first keepalive", || !server.texts().is_empty()).await;

    drop(client);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let after_drop = server.texts().len();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.texts().len(), after_drop);
}

#[tokio::test]
async fn test_close_aborts_pending_connect() {
    let (url, accepted) = silent_server().await;
    let client = Client::builder()
        .handshake_timeout(Duration::from_secs(10))
        .build()
        .unwrap();

    let connecting = {
        let client = client.clone();
        tokio::spawn(async move { client.connect(&url, "tok", "a").await })
    };
    wait_until("tcp accept", || accepted.load(Ordering::SeqCst) == 1).await;
    assert_eq!(client.state(), ConnectionState::Connecting);

    let started = Instant::now();
    assert_eq!(client.close().await.unwrap(), CloseOutcome::Closed);
    let result = connecting.await.unwrap();

    assert!(matches!(result, Err(Error::Aborted)), "{result:?}");
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.close().await.unwrap(), CloseOutcome::AlreadyClosed);
}

#[tokio::test]
async fn test_close_aborts_reconnect_attempt() {
    // the first connection upgrades and is dropped; later ones hang
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                    let _ = ws.close(None).await;
                }
            } else {
                held.push(stream);
            }
        }
    });

    let client = Client::builder()
        .handshake_timeout(Duration::from_secs(10))
        .auto_reconnect(Duration::from_millis(50))
        .build()
        .unwrap();
    client.connect(&url, "tok", "a").await.unwrap();

    wait_until("reconnect attempt", || accepted.load(Ordering::SeqCst) >= 2).await;
    assert_eq!(client.state(), ConnectionState::Connecting);

    let started = Instant::now();
    assert_eq!(client.close().await.unwrap(), CloseOutcome::Closed);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(client.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_tls_config_ignored_for_plain_targets() {
    let (url, _server) = serve(echo).await;
    let client = Client::builder().tls(TlsConfig::default()).build().unwrap();
    let seen = collector(&client);

    client.connect(&url, "tok", "a").await.unwrap();
    client.send("plain").await.unwrap();
    wait_until("echo", || !seen.lock().unwrap().is_empty()).await;
    assert_eq!(*seen.lock().unwrap(), vec!["plain"]);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_handshake_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    tokio::spawn(async move {
        // accept and never answer the upgrade
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(stream);
    });

    let client = Client::builder()
        .handshake_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let started = Instant::now();
    let err = client.connect(&url, "tok", "a").await.unwrap_err();

    assert!(matches!(err, Error::ConnectTimeout { .. }), "{err:?}");
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_rejected_handshake_reports_status() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = stream.read(&mut buf).await;
        let _ = stream
            .write_all(b"HTTP/1.1 401 Unauthorized\r\nX-Reason: expired\r\nContent-Length: 0\r\n\r\n")
            .await;
        tokio::time::sleep(Duration::from_secs(1)).await;
    });

    let client = Client::new(ClientConfig::default()).unwrap();
    let err = client.connect(&url, "expired", "a").await.unwrap_err();

    assert_eq!(err.status(), Some(http::StatusCode::UNAUTHORIZED));
    assert!(!err.is_recoverable());
    if let Error::ConnectRejected { headers, .. } = &err {
        assert_eq!(headers.get("x-reason").unwrap(), "expired");
    }
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_reconnects_after_server_close() {
    let (url, server) = serve(|index, mut ws: Ws, recorded: Recorded| async move {
        if index == 0 {
            let _ = ws.close(None).await;
            return;
        }
        record(index, ws, recorded).await;
    })
    .await;
    let client = Client::builder()
        .auto_reconnect(Duration::from_millis(50))
        .build()
        .unwrap();

    client.connect(&url, "tok", "a").await.unwrap();
    wait_until("second connection", || server.accepted() >= 2).await;
    wait_until("connected again", || client.is_connected()).await;

    client.send("after reconnect").await.unwrap();
    wait_until("delivery", || !server.texts().is_empty()).await;
    assert_eq!(server.texts(), vec!["after reconnect"]);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_server_close_without_reconnect() {
    let (url, server) = serve(|_, mut ws: Ws, _recorded: Recorded| async move {
        let _ = ws.close(None).await;
    })
    .await;
    let client = Client::new(ClientConfig::default()).unwrap();

    client.connect(&url, "tok", "a").await.unwrap();
    wait_until("disconnect", || client.state() == ConnectionState::Disconnected).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.accepted(), 1);
    assert_eq!(client.close().await.unwrap(), CloseOutcome::AlreadyClosed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sends_are_serialized() {
    let (url, server) = serve(record).await;
    let client = Client::new(ClientConfig::default()).unwrap();
    client.connect(&url, "tok", "a").await.unwrap();

    let mut tasks = Vec::new();
    for worker in 0..10 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..10 {
                client.send(format!("w{worker}-{i}")).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    wait_until("100 frames", || server.texts().len() == 100).await;
    let texts = server.texts();
    for worker in 0..10 {
        let mine: Vec<_> = texts
            .iter()
            .filter(|text| text.starts_with(&format!("w{worker}-")))
            .cloned()
            .collect();
        let expected: Vec<_> = (0..10).map(|i| format!("w{worker}-{i}")).collect();
        assert_eq!(mine, expected);
    }

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_panicking_callback_keeps_dispatching() {
    let (url, _server) = serve(|_, mut ws: Ws, recorded: Recorded| async move {
        let _ = ws.send(Message::Text("boom".into())).await;
        let _ = ws.send(Message::Text("ok".into())).await;
        record(0, ws, recorded).await;
    })
    .await;
    let client = Client::new(ClientConfig::default()).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    client.set_message_callback(move |msg| {
        if msg == "boom" {
            panic!("callback exploded");
        }
        sink.lock().unwrap().push(msg.to_string());
    });

    client.connect(&url, "tok", "a").await.unwrap();
    wait_until("second message", || !seen.lock().unwrap().is_empty()).await;
    assert_eq!(*seen.lock().unwrap(), vec!["ok"]);
    assert!(client.is_connected());

    client.close().await.unwrap();
}
