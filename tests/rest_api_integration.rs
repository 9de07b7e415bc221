//! Drives the read-only status API end to end over a real socket (spec
//! §6): start the server, issue a raw HTTP GET, confirm both the
//! transport and the JSON shape are right. No `reqwest` dependency is
//! pulled in for this — a bare `TcpStream` is enough for a GET.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use porthouse::pass_prediction::target::GroundStation;
use porthouse::rest_api::{start_server, AppState};
use porthouse::router::PacketRouter;
use porthouse::scheduler::model::ScheduleModel;
use porthouse::tracker::OrbitTracker;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio::time::Duration;

static PORT_COUNTER: AtomicU16 = AtomicU16::new(18080);

fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

fn empty_state() -> AppState {
    AppState {
        schedule: Arc::new(RwLock::new(ScheduleModel::new())),
        tracker: Arc::new(RwLock::new(OrbitTracker::new(
            "test",
            GroundStation { latitude_deg: 0.0, longitude_deg: 0.0, elevation_m: 0.0 },
        ))),
        router: Arc::new(PacketRouter::new()),
    }
}

async fn http_get(port: u16, path: &str) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.expect("connect");
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.expect("write request");

    let mut response = String::new();
    stream.read_to_string(&mut response).await.expect("read response");
    response
}

async fn wait_for_port(port: u16) {
    for _ in 0..50 {
        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("server on port {port} never came up");
}

#[tokio::test]
async fn health_endpoint_reports_healthy_over_the_wire() {
    let port = next_port();
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    tokio::spawn(start_server(addr, empty_state()));
    wait_for_port(port).await;

    let response = http_get(port, "/api/v1/health").await;
    assert!(response.starts_with("HTTP/1.1 200"), "unexpected status line: {response}");
    assert!(response.contains("\"status\":\"healthy\""));
}

#[tokio::test]
async fn tracker_endpoint_reports_disabled_with_no_target() {
    let port = next_port();
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    tokio::spawn(start_server(addr, empty_state()));
    wait_for_port(port).await;

    let response = http_get(port, "/api/v1/tracker").await;
    assert!(response.contains("\"state\":\"Disabled\""));
    assert!(response.contains("\"target\":null"));
}

#[tokio::test]
async fn scheduler_tasks_endpoint_starts_as_an_empty_array() {
    let port = next_port();
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    tokio::spawn(start_server(addr, empty_state()));
    wait_for_port(port).await;

    let response = http_get(port, "/api/v1/scheduler/tasks").await;
    assert!(response.trim_end().ends_with("[]"));
}
