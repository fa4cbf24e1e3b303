//! Lifecycle tests: worker pool, event bridge, service router, shutdown.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    use orange_server::bridge::MAX_RECV_FAILURES;
    use orange_server::router::CallResult;
    use orange_server::{
        Authenticator, CallError, ChannelEventSource, ContextError, EventBridge, EventQueue,
        EventSource, EventSourceError, OrangeRpc, RpcConfig, Service, ServiceRouter,
        UnixEventSource, post_event,
    };
    use orange_transport::{PeerHandle, PeerHub};
    use serde_json::{Map, Value, json};
    use tempfile::TempDir;
    use tokio::sync::watch;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    struct NetworkService;

    impl Service for NetworkService {
        fn object(&self) -> &str {
            "network"
        }

        fn methods(&self) -> Vec<String> {
            vec!["status".into(), "sleep".into()]
        }

        async fn call(&self, method: &str, args: &Map<String, Value>) -> CallResult {
            match method {
                "status" => Ok(json!({"up": true, "iface": args.get("iface")})),
                "sleep" => {
                    let Some(ms) = args.get("ms").and_then(Value::as_u64) else {
                        return Err(CallError::invalid_args("ms must be an integer"));
                    };
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(json!({"slept": ms}))
                }
                _ => Err(CallError::not_found(self.object(), method)),
            }
        }
    }

    struct StaticAuth;

    impl Authenticator for StaticAuth {
        fn login(&self, username: &str, _token: &str, proof: &str) -> Result<String, ContextError> {
            if username == "root" && proof == "secret" {
                Ok("sid-root".into())
            } else {
                Err(ContextError::Rejected(username.into()))
            }
        }

        fn logout(&self, _sid: &str) -> Result<(), ContextError> {
            Ok(())
        }
    }

    /// Source whose queue fails every receive with an I/O error.
    struct BrokenSource {
        attempts: Arc<AtomicU32>,
    }

    struct BrokenQueue {
        attempts: Arc<AtomicU32>,
    }

    impl EventSource for BrokenSource {
        type Queue = BrokenQueue;

        async fn open(self) -> Result<BrokenQueue, EventSourceError> {
            Ok(BrokenQueue {
                attempts: self.attempts,
            })
        }
    }

    impl EventQueue for BrokenQueue {
        async fn recv(&mut self) -> Result<Option<Value>, EventSourceError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(EventSourceError::Io(std::io::Error::other("device gone")))
        }
    }

    fn router() -> ServiceRouter {
        let mut router = ServiceRouter::new();
        router.register_service(NetworkService);
        router
    }

    fn config() -> RpcConfig {
        RpcConfig::new(Duration::from_millis(50), 2)
    }

    async fn roundtrip(peer: &mut PeerHandle, request: Value) -> Value {
        peer.send(request.to_string()).await.unwrap();
        let reply = peer.recv_timeout(WAIT).await.expect("no reply");
        serde_json::from_str(&reply).unwrap()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Worker pool and router
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn pool_answers_calls_through_router() {
        let hub = PeerHub::new();
        let rpc = OrangeRpc::start(config(), Arc::new(hub.clone()), Arc::new(router()));
        assert_eq!(rpc.worker_count(), 2);

        let mut peer = hub.connect();
        let reply = roundtrip(
            &mut peer,
            json!({"id": 1, "method": "call", "params": ["s", "network", "status", {"iface": "eth0"}]}),
        )
        .await;
        assert_eq!(reply["result"], json!({"up": true, "iface": "eth0"}));

        let reply = roundtrip(
            &mut peer,
            json!({"id": 2, "method": "call", "params": ["s", "wifi", "scan", {}]}),
        )
        .await;
        assert_eq!(
            reply["error"],
            json!({"code": -2, "str": "No such method: wifi.scan"})
        );

        let reply = roundtrip(
            &mut peer,
            json!({"id": 3, "method": "call", "params": ["s", "network", "sleep", {"ms": "soon"}]}),
        )
        .await;
        assert_eq!(
            reply["error"],
            json!({"code": -22, "str": "ms must be an integer"})
        );

        rpc.shutdown().await;
    }

    #[tokio::test]
    async fn router_list_filters_by_path() {
        let hub = PeerHub::new();
        let rpc = OrangeRpc::start(config(), Arc::new(hub.clone()), Arc::new(router()));
        let mut peer = hub.connect();

        let all = roundtrip(&mut peer, json!({"id": 1, "method": "list", "params": ["s"]})).await;
        assert_eq!(all["result"], json!({"network": ["status", "sleep"]}));

        let none = roundtrip(
            &mut peer,
            json!({"id": 2, "method": "list", "params": ["s", "sys*"]}),
        )
        .await;
        assert_eq!(none["result"], json!({}));

        rpc.shutdown().await;
    }

    #[tokio::test]
    async fn router_login_needs_authenticator() {
        let hub = PeerHub::new();
        let rpc = OrangeRpc::start(config(), Arc::new(hub.clone()), Arc::new(router()));
        let mut peer = hub.connect();

        let reply = roundtrip(
            &mut peer,
            json!({"id": 1, "method": "login", "params": ["root", "secret"]}),
        )
        .await;
        assert_eq!(reply["error"], json!({"code": "EACCESS"}));
        rpc.shutdown().await;

        let mut with_auth = router();
        with_auth.set_authenticator(Arc::new(StaticAuth));
        let rpc = OrangeRpc::start(config(), Arc::new(hub.clone()), Arc::new(with_auth));

        let reply = roundtrip(
            &mut peer,
            json!({"id": 2, "method": "login", "params": ["root", "secret"]}),
        )
        .await;
        assert_eq!(reply["result"], json!({"success": "sid-root"}));

        let reply = roundtrip(
            &mut peer,
            json!({"id": 3, "method": "logout", "params": ["sid-root"]}),
        )
        .await;
        assert_eq!(reply["result"], json!({"success": "VALID"}));
        rpc.shutdown().await;
    }

    #[tokio::test]
    async fn in_flight_visible_while_call_runs() {
        let hub = PeerHub::new();
        let rpc = OrangeRpc::start(config(), Arc::new(hub.clone()), Arc::new(router()));
        let mut peer = hub.connect();

        peer.send(
            json!({"id": 1, "method": "call", "params": ["s", "network", "sleep", {"ms": 300}]})
                .to_string(),
        )
        .await
        .unwrap();

        let mut seen = false;
        for _ in 0..40 {
            if rpc.in_flight().iter().any(|r| r.name == "network.sleep") {
                seen = true;
                assert_eq!(rpc.busy_workers(), 1);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(seen, "call never showed up in the registry");

        let reply = peer.recv_timeout(WAIT).await.unwrap();
        let reply: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["result"], json!({"slept": 300}));
        assert!(rpc.in_flight().is_empty());

        rpc.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_peers_get_their_own_replies() {
        let hub = PeerHub::new();
        let rpc = OrangeRpc::start(config(), Arc::new(hub.clone()), Arc::new(router()));
        let mut alice = hub.connect();
        let mut bob = hub.connect();

        alice
            .send(r#"{"id":"a","method":"call","params":["s","network","sleep",{"ms":100}]}"#)
            .await
            .unwrap();
        bob.send(r#"{"id":"b","method":"challenge"}"#).await.unwrap();

        // bob is not stuck behind alice's slow call
        let bob_reply: Value =
            serde_json::from_str(&bob.recv_timeout(WAIT).await.unwrap()).unwrap();
        assert_eq!(bob_reply["id"], json!("b"));
        assert!(alice.try_recv().is_none());

        let alice_reply: Value =
            serde_json::from_str(&alice.recv_timeout(WAIT).await.unwrap()).unwrap();
        assert_eq!(alice_reply["id"], json!("a"));

        rpc.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_bounded() {
        let hub = PeerHub::new();
        let rpc = OrangeRpc::start(config(), Arc::new(hub.clone()), Arc::new(router()));
        let (source, _poster) = ChannelEventSource::new();
        let rpc_with_events = OrangeRpc::start_with_events(
            config(),
            Arc::new(PeerHub::new()),
            Arc::new(router()),
            source,
        );

        timeout(WAIT, rpc.shutdown()).await.expect("shutdown hung");
        timeout(WAIT, rpc_with_events.shutdown())
            .await
            .expect("shutdown with bridge hung");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Event bridge
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn bridge_broadcasts_to_every_peer() {
        let hub = PeerHub::new();
        let mut alice = hub.connect();
        let mut bob = hub.connect();

        let (source, poster) = ChannelEventSource::new();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let bridge = EventBridge::new(Arc::new(hub.clone()));
        let task = tokio::spawn(bridge.run(source, shutdown_rx));

        poster.post_record(json!(["", {"skip": true}])).unwrap();
        poster.post_record(json!({"not": "a record"})).unwrap();
        poster.post("link.up", json!({"iface": "eth0"})).unwrap();

        let expected = r#"{"jsonrpc":"2.0","method":"link.up","params":{"iface":"eth0"}}"#;
        assert_eq!(alice.recv_timeout(WAIT).await.unwrap(), expected);
        assert_eq!(bob.recv_timeout(WAIT).await.unwrap(), expected);
        assert!(alice.try_recv().is_none());

        // all posters gone: the bridge ends
        drop(poster);
        timeout(WAIT, task).await.expect("bridge did not exit").unwrap();
    }

    #[tokio::test]
    async fn bridge_stops_on_shutdown() {
        let hub = PeerHub::new();
        let (source, _poster) = ChannelEventSource::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(EventBridge::new(Arc::new(hub)).run(source, shutdown_rx));

        shutdown_tx.send_replace(true);
        timeout(WAIT, task).await.expect("bridge ignored shutdown").unwrap();
    }

    #[tokio::test]
    async fn bridge_backs_off_then_gives_up_on_failing_source() {
        let attempts = Arc::new(AtomicU32::new(0));
        let source = BrokenSource {
            attempts: attempts.clone(),
        };
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let bridge = EventBridge::new(Arc::new(PeerHub::new()))
            .with_retry_delay(Duration::from_millis(20));

        let started = Instant::now();
        timeout(WAIT, bridge.run(source, shutdown_rx))
            .await
            .expect("bridge kept retrying");

        assert_eq!(attempts.load(Ordering::SeqCst), MAX_RECV_FAILURES);
        assert!(started.elapsed() >= Duration::from_millis(20) * (MAX_RECV_FAILURES - 1));
    }

    #[tokio::test]
    async fn bridge_backoff_wakes_on_shutdown() {
        let attempts = Arc::new(AtomicU32::new(0));
        let source = BrokenSource {
            attempts: attempts.clone(),
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let bridge =
            EventBridge::new(Arc::new(PeerHub::new())).with_retry_delay(Duration::from_secs(60));
        let task = tokio::spawn(bridge.run(source, shutdown_rx));

        while attempts.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown_tx.send_replace(true);
        timeout(WAIT, task).await.expect("backoff ignored shutdown").unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn direct_broadcast_event() {
        let hub = PeerHub::new();
        let rpc = OrangeRpc::start(config(), Arc::new(hub.clone()), Arc::new(router()));
        let mut peer = hub.connect();

        rpc.broadcast_event("tick", &json!(1)).await.unwrap();
        let note: Value = serde_json::from_str(&peer.recv_timeout(WAIT).await.unwrap()).unwrap();
        assert_eq!(note["method"], json!("tick"));
        assert!(note.get("id").is_none());

        rpc.shutdown().await;
    }

    #[tokio::test]
    async fn unix_socket_events_reach_peers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.sock");

        let hub = PeerHub::new();
        let mut peer = hub.connect();
        let rpc = OrangeRpc::start_with_events(
            config(),
            Arc::new(hub.clone()),
            Arc::new(router()),
            UnixEventSource::new(&path),
        );

        for _ in 0..100 {
            if path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(path.exists(), "event socket never bound");

        post_event(&path, "wan.down", json!({"reason": "carrier"}))
            .await
            .unwrap();
        let note: Value = serde_json::from_str(&peer.recv_timeout(WAIT).await.unwrap()).unwrap();
        assert_eq!(note["method"], json!("wan.down"));
        assert_eq!(note["params"], json!({"reason": "carrier"}));

        rpc.shutdown().await;
        assert!(!path.exists(), "event socket left behind");
    }

    #[tokio::test]
    async fn event_source_failure_keeps_rpc_running() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("events.sock");

        let hub = PeerHub::new();
        let rpc = OrangeRpc::start_with_events(
            config(),
            Arc::new(hub.clone()),
            Arc::new(router()),
            UnixEventSource::new(&path),
        );

        let mut peer = hub.connect();
        let reply = roundtrip(&mut peer, json!({"id": 1, "method": "challenge"})).await;
        assert!(reply["result"]["token"].is_string());

        timeout(WAIT, rpc.shutdown()).await.expect("shutdown hung");
    }

    #[tokio::test]
    async fn unix_source_refuses_to_replace_regular_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.sock");
        std::fs::write(&path, "keep me").unwrap();

        let err = UnixEventSource::new(&path).open().await.err().unwrap();
        assert!(matches!(err, EventSourceError::Open(_)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep me");
    }

    #[tokio::test]
    async fn unix_source_replaces_stale_socket() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.sock");
        drop(std::os::unix::net::UnixDatagram::bind(&path).unwrap());
        assert!(path.exists());

        let queue = UnixEventSource::new(&path).open().await.unwrap();
        post_event(&path, "tick", json!(1)).await.unwrap();
        queue.close().await;
        assert!(!path.exists());
    }
}
