//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use session_tracker::config::{CacheBackend, TrackerConfig};
use session_tracker::lifecycle::{build_store, Shutdown};
use session_tracker::reconcile::encode_payload;
use session_tracker::HttpServer;

#[derive(Default)]
struct MockState {
    values: Mutex<HashMap<String, Vec<u8>>>,
    cluster: Mutex<Option<String>>,
    writes: AtomicUsize,
    write_limit: AtomicUsize,
    commands: AtomicUsize,
    delay_ms: AtomicU64,
}

impl MockState {
    /// Whether the next write is served; past the limit the connection is dropped instead.
    fn admit_write(&self) -> bool {
        self.writes.fetch_add(1, Ordering::SeqCst) < self.write_limit.load(Ordering::SeqCst)
    }
}

/// In-process memcached speaking the text protocol subset the tracker uses:
/// get, incr, decr, add, version and `config get cluster`.
pub struct MockMemcached {
    pub addr: SocketAddr,
    state: Arc<MockState>,
    shutdown: CancellationToken,
}

impl MockMemcached {
    pub async fn start() -> Self {
        Self::start_on("127.0.0.1:0".parse().unwrap()).await
    }

    pub async fn start_on(addr: SocketAddr) -> Self {
        let state = Arc::new(MockState {
            write_limit: AtomicUsize::new(usize::MAX),
            ..MockState::default()
        });
        Self::serve(addr, state).await
    }

    /// Restart on the same address, keeping the stored values.
    pub async fn restart(&self) -> Self {
        self.stop();
        // let the old accept loop release the port
        tokio::time::sleep(Duration::from_millis(50)).await;
        Self::serve(self.addr, self.state.clone()).await
    }

    async fn serve(addr: SocketAddr, state: Arc<MockState>) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();

        let accept_state = state.clone();
        let accept_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((socket, _)) => {
                            tokio::spawn(handle_connection(
                                socket,
                                accept_state.clone(),
                                accept_shutdown.clone(),
                            ));
                        }
                        Err(_) => break,
                    },
                    _ = accept_shutdown.cancelled() => break,
                }
            }
        });

        Self {
            addr,
            state,
            shutdown,
        }
    }

    /// Close the listener and every open connection.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn value(&self, key: &str) -> Option<i64> {
        let values = self.state.values.lock().unwrap();
        let raw = values.get(key)?;
        std::str::from_utf8(raw).ok()?.parse().ok()
    }

    pub fn set_raw(&self, key: &str, raw: &str) {
        self.state
            .values
            .lock()
            .unwrap()
            .insert(key.to_string(), raw.as_bytes().to_vec());
    }

    pub fn keys(&self) -> usize {
        self.state.values.lock().unwrap().len()
    }

    /// Serve `n` more write commands, then drop the connection on every write.
    pub fn fail_writes_after(&self, n: usize) {
        let served = self.state.writes.load(Ordering::SeqCst);
        self.state
            .write_limit
            .store(served.saturating_add(n), Ordering::SeqCst);
    }

    /// Delay every reply.
    pub fn set_delay(&self, delay: Duration) {
        self.state
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn commands(&self) -> usize {
        self.state.commands.load(Ordering::SeqCst)
    }

    /// Advertise `nodes` through `config get cluster`.
    pub fn set_cluster(&self, nodes: &[SocketAddr]) {
        let entries = nodes
            .iter()
            .map(|a| format!("localhost|{}|{}", a.ip(), a.port()))
            .collect::<Vec<_>>()
            .join(" ");
        *self.state.cluster.lock().unwrap() = Some(format!("1\n{entries}\n"));
    }
}

impl Drop for MockMemcached {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn handle_connection(socket: TcpStream, state: Arc<MockState>, shutdown: CancellationToken) {
    let (read, mut write) = socket.into_split();
    let mut reader = BufReader::new(read);

    loop {
        let mut line = String::new();
        let read = tokio::select! {
            read = reader.read_line(&mut line) => read,
            _ = shutdown.cancelled() => return,
        };
        match read {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        state.commands.fetch_add(1, Ordering::SeqCst);

        let parts: Vec<&str> = line.split_whitespace().collect();
        let reply = match parts.as_slice() {
            ["get", key] => {
                let values = state.values.lock().unwrap();
                match values.get(*key) {
                    Some(raw) => {
                        let mut reply = format!("VALUE {key} 0 {}\r\n", raw.len()).into_bytes();
                        reply.extend_from_slice(raw);
                        reply.extend_from_slice(b"\r\nEND\r\n");
                        reply
                    }
                    None => b"END\r\n".to_vec(),
                }
            }
            [op @ ("incr" | "decr"), key, by] => {
                if !state.admit_write() {
                    return;
                }
                let Ok(by) = by.parse::<u64>() else {
                    return;
                };
                let mut values = state.values.lock().unwrap();
                match values.get_mut(*key) {
                    None => b"NOT_FOUND\r\n".to_vec(),
                    Some(raw) => {
                        let current = std::str::from_utf8(raw)
                            .ok()
                            .and_then(|s| s.trim().parse::<u64>().ok());
                        match current {
                            None => b"CLIENT_ERROR cannot increment or decrement non-numeric value\r\n"
                                .to_vec(),
                            Some(current) => {
                                let next = if *op == "incr" {
                                    current.wrapping_add(by)
                                } else {
                                    current.saturating_sub(by)
                                };
                                *raw = next.to_string().into_bytes();
                                format!("{next}\r\n").into_bytes()
                            }
                        }
                    }
                }
            }
            ["add", key, _flags, _exptime, len] => {
                let Ok(len) = len.parse::<usize>() else {
                    return;
                };
                let mut data = vec![0u8; len + 2];
                if reader.read_exact(&mut data).await.is_err() {
                    return;
                }
                if !state.admit_write() {
                    return;
                }
                data.truncate(len);
                let mut values = state.values.lock().unwrap();
                if values.contains_key(*key) {
                    b"NOT_STORED\r\n".to_vec()
                } else {
                    values.insert(key.to_string(), data);
                    b"STORED\r\n".to_vec()
                }
            }
            ["version"] => b"VERSION 1.6.21\r\n".to_vec(),
            ["config", "get", "cluster"] => {
                let cluster = state.cluster.lock().unwrap().clone();
                match cluster {
                    Some(body) => format!("CONFIG cluster 0 {}\r\n{body}\r\nEND\r\n", body.len())
                        .into_bytes(),
                    None => b"ERROR\r\n".to_vec(),
                }
            }
            _ => b"ERROR\r\n".to_vec(),
        };

        let delay = state.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if write.write_all(&reply).await.is_err() {
            return;
        }
    }
}

/// Tracker config pointing at static memcached nodes.
pub fn tracker_config(nodes: &[SocketAddr]) -> TrackerConfig {
    let mut config = TrackerConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.cache.backend = CacheBackend::Memcached;
    config.cache.discovery = false;
    config.cache.nodes = nodes.iter().map(|a| a.to_string()).collect();
    config.cache.connect_timeout_ms = 300;
    config.cache.io_timeout_ms = 500;
    config.retries.base_delay_ms = 5;
    config.retries.max_delay_ms = 20;
    config.health_check.enabled = false;
    config.observability.metrics_enabled = false;
    config
}

/// A running tracker; shuts down when dropped.
pub struct Tracker {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
}

impl Tracker {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Build the store and serve the tracker on an ephemeral port.
pub async fn start_tracker(config: TrackerConfig) -> Tracker {
    let store = build_store(&config).await.unwrap();
    let shutdown = Shutdown::new();

    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(config, store.counters, shutdown.subscribe());
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    Tracker { addr, shutdown }
}

/// Invocation envelope for `lines`.
pub fn envelope(lines: &[&str]) -> serde_json::Value {
    let data = encode_payload(lines.iter().copied()).unwrap();
    json!({ "awslogs": { "data": data } })
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// POST an invocation; returns the HTTP status and parsed body.
pub async fn invoke(tracker: &Tracker, lines: &[&str]) -> (u16, serde_json::Value) {
    let res = http_client()
        .post(tracker.url("/invoke"))
        .json(&envelope(lines))
        .send()
        .await
        .expect("tracker unreachable");
    let status = res.status().as_u16();
    (status, res.json().await.unwrap())
}
