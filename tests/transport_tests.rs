//! WebSocket transport tests against a local AI stub

#[cfg(test)]
mod tests {
    use aicraft_bridge::config::{BridgeConfig, ReconnectPolicy};
    use aicraft_bridge::transport::{TransportClient, TransportError, TransportHandler};
    use aicraft_bridge::types::{BlockPos, BridgeStats, ConnectionState};
    use aicraft_bridge::{AiBridge, SimServer};
    use futures_util::{SinkExt, StreamExt};
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio::net::TcpListener;
    use tokio_test::assert_ok;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{accept_async, WebSocketStream};

    type StubSocket = WebSocketStream<tokio::net::TcpStream>;

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Open,
        Message(String),
        Close { code: u16, reason: String, remote: bool },
        Error,
    }

    #[derive(Default)]
    struct RecordingHandler {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingHandler {
        fn events(&self) -> Vec<Event> {
            self.events.lock().clone()
        }

        fn closes(&self) -> Vec<Event> {
            self.events()
                .into_iter()
                .filter(|e| matches!(e, Event::Close { .. }))
                .collect()
        }
    }

    impl TransportHandler for RecordingHandler {
        fn on_open(&self) {
            self.events.lock().push(Event::Open);
        }

        fn on_message(&self, text: String) {
            self.events.lock().push(Event::Message(text));
        }

        fn on_close(&self, code: u16, reason: &str, remote: bool) {
            self.events.lock().push(Event::Close {
                code,
                reason: reason.to_string(),
                remote,
            });
        }

        fn on_error(&self, _error: &TransportError) {
            self.events.lock().push(Event::Error);
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..500 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cond()
    }

    async fn stub_listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("ws://{}/ws", listener.local_addr().unwrap());
        (listener, endpoint)
    }

    async fn accept(listener: &TcpListener) -> StubSocket {
        let (stream, _) = listener.accept().await.unwrap();
        accept_async(stream).await.unwrap()
    }

    /// Next text frame, skipping pings and the like. `None` once closed.
    async fn next_text(ws: &mut StubSocket) -> Option<String> {
        while let Some(Ok(msg)) = ws.next().await {
            match msg {
                Message::Text(text) => return Some(text),
                Message::Close(_) => return None,
                _ => {}
            }
        }
        None
    }

    /// Read until the client's close frame arrives. Returns its code and reason.
    async fn expect_close(ws: &mut StubSocket) -> Option<(u16, String)> {
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Close(frame) = msg {
                let frame = frame.map(|f| (u16::from(f.code), f.reason.to_string()));
                // Flush the echo.
                while let Some(Ok(_)) = ws.next().await {}
                return frame;
            }
        }
        None
    }

    // -----------------------------------------------------------------------
    // Client
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn send_before_open_is_dropped() {
        let handler = Arc::new(RecordingHandler::default());
        let client = TransportClient::new("ws://127.0.0.1:9/ws", handler.clone());

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.send(r#"{"dayTime":0,"players":0}"#));
        assert!(!client.handle().is_open());

        client.close();
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(handler.events().is_empty());
    }

    #[tokio::test]
    async fn connect_twice_is_refused() {
        let (_listener, endpoint) = stub_listener().await;
        let mut client = TransportClient::new(endpoint, Arc::new(RecordingHandler::default()))
            .with_close_grace(Duration::from_millis(100));

        assert_ok!(client.connect());
        assert!(matches!(client.connect(), Err(TransportError::AlreadyStarted)));
        client.shutdown();
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn frames_flow_both_ways_and_local_close_is_clean() {
        let (listener, endpoint) = stub_listener().await;
        let ai = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            let first = next_text(&mut ws).await;
            ws.send(Message::Text(r#"{"build":[]}"#.to_string()))
                .await
                .unwrap();
            let close = expect_close(&mut ws).await;
            (first, close)
        });

        let handler = Arc::new(RecordingHandler::default());
        let mut client = TransportClient::new(endpoint, handler.clone())
            .with_close_grace(Duration::from_millis(500));
        assert_ok!(client.connect());
        assert!(wait_until(|| client.state() == ConnectionState::Open).await);

        assert!(client.send("hello"));
        assert!(wait_until(|| handler.events().len() >= 2).await);

        client.close();
        assert!(wait_until(|| client.state() == ConnectionState::Closed).await);
        client.shutdown();

        let (first, close) = ai.await.unwrap();
        assert_eq!(first.as_deref(), Some("hello"));
        assert_eq!(close, Some((1000, "server stopping".to_string())));
        assert_eq!(
            handler.events(),
            vec![
                Event::Open,
                Event::Message(r#"{"build":[]}"#.to_string()),
                Event::Close {
                    code: 1000,
                    reason: "server stopping".to_string(),
                    remote: false,
                },
            ]
        );
        assert!(!client.send("late"));
    }

    #[tokio::test]
    async fn remote_close_is_reported_once() {
        let (listener, endpoint) = stub_listener().await;
        let ai = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            ws.close(Some(CloseFrame {
                code: CloseCode::Away,
                reason: "ai restarting".into(),
            }))
            .await
            .unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let handler = Arc::new(RecordingHandler::default());
        let mut client = TransportClient::new(endpoint, handler.clone());
        assert_ok!(client.connect());

        assert!(wait_until(|| !handler.closes().is_empty()).await);
        assert_eq!(client.state(), ConnectionState::Closed);
        assert_eq!(
            handler.closes(),
            vec![Event::Close {
                code: 1001,
                reason: "ai restarting".to_string(),
                remote: true,
            }]
        );
        assert!(!client.send("after close"));

        client.shutdown();
        ai.await.unwrap();
        assert_eq!(handler.closes().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_error_and_closes() {
        let (listener, endpoint) = stub_listener().await;
        drop(listener);

        let handler = Arc::new(RecordingHandler::default());
        let stats = Arc::new(BridgeStats::new());
        let mut client =
            TransportClient::new(endpoint, handler.clone()).with_stats(stats.clone());
        assert_ok!(client.connect());

        assert!(wait_until(|| handler.events().contains(&Event::Error)).await);
        assert!(wait_until(|| client.state() == ConnectionState::Closed).await);
        assert!(!handler.events().contains(&Event::Open));
        assert_eq!(stats.snapshot().connection_attempts, 1);
        client.shutdown();
    }

    #[tokio::test]
    async fn reconnects_after_the_peer_drops() {
        let (listener, endpoint) = stub_listener().await;
        let ai = tokio::spawn(async move {
            let first = accept(&listener).await;
            drop(first);

            let mut second = accept(&listener).await;
            second
                .send(Message::Text("welcome back".to_string()))
                .await
                .unwrap();
            expect_close(&mut second).await
        });

        let handler = Arc::new(RecordingHandler::default());
        let stats = Arc::new(BridgeStats::new());
        let policy = ReconnectPolicy {
            max_retries: 3,
            initial_backoff_ms: 20,
            max_backoff_ms: 50,
        };
        let mut client = TransportClient::new(endpoint, handler.clone())
            .with_reconnect(policy)
            .with_stats(stats.clone())
            .with_close_grace(Duration::from_millis(500));
        assert_ok!(client.connect());

        assert!(
            wait_until(|| handler
                .events()
                .contains(&Event::Message("welcome back".to_string())))
            .await
        );
        assert_eq!(client.state(), ConnectionState::Open);
        assert_eq!(stats.snapshot().connection_attempts, 2);
        let opens = handler.events().iter().filter(|e| **e == Event::Open).count();
        assert_eq!(opens, 2);

        client.close();
        assert!(wait_until(|| client.state() == ConnectionState::Closed).await);
        client.shutdown();
        assert_eq!(ai.await.unwrap().map(|(code, _)| code), Some(1000));
    }

    #[tokio::test]
    async fn peer_that_stops_reading_cannot_block_shutdown() {
        let (listener, endpoint) = stub_listener().await;
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let ai = tokio::spawn(async move {
            let ws = accept(&listener).await;
            // Hold the socket open without ever reading from it.
            let _ = release_rx.await;
            drop(ws);
        });

        let handler = Arc::new(RecordingHandler::default());
        let mut client = TransportClient::new(endpoint, handler.clone())
            .with_close_grace(Duration::from_millis(200));
        assert_ok!(client.connect());
        assert!(wait_until(|| client.state() == ConnectionState::Open).await);

        let frame = "x".repeat(1 << 20);
        for _ in 0..64 {
            client.send(frame.clone());
        }

        let started = Instant::now();
        client.shutdown();
        let elapsed = started.elapsed();
        assert!(elapsed < Duration::from_secs(3), "shutdown took {:?}", elapsed);
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(!client.send("after shutdown"));

        let _ = release_tx.send(());
        ai.await.unwrap();
    }

    // -----------------------------------------------------------------------
    // End to end
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn snapshot_out_plan_in_block_placed() {
        let (listener, endpoint) = stub_listener().await;
        let ai = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            let snapshot = next_text(&mut ws).await;
            ws.send(Message::Text(
                r#"{"build":[{"block":"minecraft:stone","x":1,"y":64,"z":-3}]}"#.to_string(),
            ))
            .await
            .unwrap();
            let mut extra = 0;
            while next_text(&mut ws).await.is_some() {
                extra += 1;
            }
            (snapshot, extra)
        });

        let config = BridgeConfig {
            endpoint,
            tick_period: 2,
            close_grace_ms: 500,
            ..Default::default()
        };
        let bridge = AiBridge::new(config).unwrap();
        let mut server = SimServer::new();
        server.set_daylight_cycle(false);
        server.world_mut().set_time_of_day(18_000);
        server.players_mut().join("alex");

        bridge.install(&mut server);
        server.start();
        assert!(wait_until(|| bridge.connection_state() == ConnectionState::Open).await);

        let pos = BlockPos::new(1, 64, -3);
        let stone = server
            .registry()
            .state_of(&"minecraft:stone".parse().unwrap())
            .unwrap();
        let mut placed = false;
        for _ in 0..500 {
            server.tick();
            if server.world().block_state(pos) == stone {
                placed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(placed, "plan was never applied");

        server.stop();
        assert_eq!(bridge.connection_state(), ConnectionState::Disconnected);

        let (snapshot, _) = ai.await.unwrap();
        let value: Value = serde_json::from_str(&snapshot.unwrap()).unwrap();
        assert_eq!(value, serde_json::json!({"dayTime": 18000, "players": 1}));

        let stats = bridge.stats();
        assert!(stats.snapshots_sent >= 1);
        assert_eq!(stats.plans_received, 1);
        assert_eq!(stats.entries_submitted, 1);
        assert_eq!(server.world().non_air_blocks(), 1);
    }

    #[tokio::test]
    async fn stopping_detaches_the_tick_driver() {
        let (listener, endpoint) = stub_listener().await;
        let ai = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            let mut frames = 0;
            while next_text(&mut ws).await.is_some() {
                frames += 1;
            }
            frames
        });

        let config = BridgeConfig {
            endpoint,
            tick_period: 1,
            close_grace_ms: 200,
            ..Default::default()
        };
        let bridge = AiBridge::new(config).unwrap();
        let mut server = SimServer::new();
        bridge.install(&mut server);
        server.start();
        assert!(wait_until(|| bridge.connection_state() == ConnectionState::Open).await);

        for _ in 0..5 {
            server.tick();
        }
        server.stop();
        for _ in 0..5 {
            server.tick();
        }

        let stats = bridge.stats();
        assert_eq!(stats.ticks_while_open, 5);
        assert_eq!(stats.snapshots_sent, 5);
        assert_eq!(server.tick_callbacks(), 1);
        assert_eq!(ai.await.unwrap(), 5);
    }
}
