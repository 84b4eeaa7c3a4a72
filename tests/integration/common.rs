//! Common utilities for integration tests.
//!
//! Fake devices and a fake control service built on axum, plus helpers to run
//! the watchdog in-process and wait for it.

use alloc::sync::Arc;
use core::{
    net::SocketAddr,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use std::{
    env, fs,
    net::TcpListener as StdTcpListener,
    path::{Path, PathBuf},
    sync::Mutex,
    time::Instant,
};

use axum::{
    Router,
    extract::{Path as UrlPath, State},
    http::StatusCode,
    routing::{get, post},
};
use clap::Parser as _;
use serde_json::Value;
use tokio::{net::TcpListener, task, time};

use pixelwatch_watchdog::cli::Cli;

pub(crate) fn get_free_port() -> u16 {
    StdTcpListener::bind("127.0.0.1:0")
        .expect("failed to bind to address")
        .local_addr()
        .unwrap()
        .port()
}

/// Guard that aborts the in-process watchdog when dropped.
pub(crate) struct KillOnDrop(pub task::JoinHandle<()>);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        drop(axum::serve(listener, router).await);
    });
    addr
}

/// A pixel display whose status endpoint can be switched off.
pub(crate) struct FakeDevice {
    pub addr: SocketAddr,
    up: Arc<AtomicBool>,
}

impl FakeDevice {
    pub(crate) async fn start() -> Self {
        let up = Arc::new(AtomicBool::new(true));
        let router = Router::new()
            .route(
                "/status",
                get(|State(up): State<Arc<AtomicBool>>| async move {
                    if up.load(Ordering::SeqCst) {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                }),
            )
            .with_state(up.clone());
        Self {
            addr: serve(router).await,
            up,
        }
    }

    pub(crate) fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }
}

/// A device control service that records every call as `{device_id}/{operation}`.
pub(crate) struct FakeControl {
    pub addr: SocketAddr,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeControl {
    pub(crate) async fn start() -> Self {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let router = Router::new()
            .route(
                "/api/devices/{device_id}/{operation}",
                post(
                    |State(calls): State<Arc<Mutex<Vec<String>>>>,
                     UrlPath((device_id, operation)): UrlPath<(String, String)>| async move {
                        calls.lock().unwrap().push(format!("{device_id}/{operation}"));
                        StatusCode::NO_CONTENT
                    },
                ),
            )
            .with_state(calls.clone());
        Self {
            addr: serve(router).await,
            calls,
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

pub(crate) fn write_config(name: &str, config_toml: &str) -> PathBuf {
    let path = env::temp_dir().join(format!("pixelwatch_it_{name}.toml"));
    fs::write(&path, config_toml).expect("failed to write config");
    path
}

/// Run `pixelwatch run --config <path>` in-process.
pub(crate) fn spawn_watchdog_with_config_file(config_path: &Path) -> KillOnDrop {
    let cli = Cli::parse_from([
        "pixelwatch",
        "run",
        "--config",
        config_path.to_str().unwrap(),
    ]);
    let handle = tokio::spawn(async move {
        // SAFETY: This is only used in integration tests. It just tells the watchdog to log less verbose output.
        unsafe {
            env::set_var("PIXELWATCH_INTEGRATION_TEST", "1");
        }
        pixelwatch_watchdog::inner_main(cli)
            .await
            .expect("inner_main failed");
    });
    KillOnDrop(handle)
}

/// Block until a TCP listener is accepting on `127.0.0.1:port` or timeout.
pub(crate) async fn wait_for_listening(port: u16, timeout_secs: u64) {
    let start = Instant::now();
    while tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .is_err()
    {
        assert!(
            start.elapsed() <= Duration::from_secs(timeout_secs),
            "server did not start within timeout"
        );
        time::sleep(Duration::from_millis(50)).await;
    }
}

/// Poll `GET url` until `accept` holds for the JSON body, returning that body.
pub(crate) async fn wait_for_json(
    url: &str,
    timeout_secs: u64,
    accept: impl Fn(&Value) -> bool,
) -> Value {
    let client = reqwest::Client::new();
    let start = Instant::now();
    let mut last = Value::Null;
    while start.elapsed() < Duration::from_secs(timeout_secs) {
        if let Ok(resp) = client.get(url).send().await
            && let Ok(json) = resp.json::<Value>().await
        {
            if accept(&json) {
                return json;
            }
            last = json;
        }
        time::sleep(Duration::from_millis(100)).await;
    }
    panic!("condition not met for {url} within {timeout_secs}s, last body: {last}");
}
