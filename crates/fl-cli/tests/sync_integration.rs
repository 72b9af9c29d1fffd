//! Integration tests for `fl sync` against a loopback backend.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::process::{Command, Output};
use std::thread::{self, JoinHandle};

use tempfile::TempDir;

fn fl_binary() -> String {
    env!("CARGO_BIN_EXE_fl").to_string()
}

/// A captured request: request line and body.
struct Request {
    line: String,
    authorization: Option<String>,
    body: String,
}

/// Serves one canned response per expected request, then returns what it saw.
fn serve(responses: Vec<(u16, &'static str)>) -> (String, JoinHandle<Vec<Request>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let mut requests = Vec::new();
        for (status, body) in responses {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());

            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let mut content_length = 0;
            let mut authorization = None;
            loop {
                let mut header = String::new();
                reader.read_line(&mut header).unwrap();
                let header = header.trim_end();
                if header.is_empty() {
                    break;
                }
                if let Some((name, value)) = header.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap();
                    } else if name.eq_ignore_ascii_case("authorization") {
                        authorization = Some(value.trim().to_string());
                    }
                }
            }
            let mut request_body = vec![0; content_length];
            reader.read_exact(&mut request_body).unwrap();

            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .unwrap();

            requests.push(Request {
                line: line.trim_end().to_string(),
                authorization,
                body: String::from_utf8(request_body).unwrap(),
            });
        }
        requests
    });
    (format!("http://{addr}"), handle)
}

fn fl(temp: &TempDir, api_url: &str, args: &[&str]) -> Output {
    Command::new(fl_binary())
        .env("HOME", temp.path())
        .env("XDG_CONFIG_HOME", temp.path().join("config"))
        .env("XDG_DATA_HOME", temp.path().join("share"))
        .env("FL_USER_ID", "driver-7")
        .env("FL_DATABASE_PATH", temp.path().join("fleetlog.db"))
        .env("FL_API_URL", api_url)
        .env("FL_API_TOKEN", "secret-token")
        .env("FL_SYNC__BASE_DELAY_MS", "1")
        .args(args)
        .output()
        .expect("failed to run fl")
}

#[test]
fn test_sync_uploads_and_marks_events() {
    let temp = TempDir::new().unwrap();
    let (api_url, server) = serve(vec![
        (201, r#"{"id":"w-1"}"#),
        (201, r#"{"id":"r-1"}"#),
    ]);

    let recorded = [
        fl(&temp, &api_url, &["event", "work_start", "--at", "2025-01-06T07:00:00Z"]),
        fl(
            &temp,
            &api_url,
            &[
                "event",
                "refuel",
                "--at",
                "2025-01-06T09:00:00Z",
                "--fuel-type",
                "diesel",
                "--fuel-litres",
                "55.5",
                "--payment",
                "card",
            ],
        ),
    ];
    assert!(recorded.iter().all(|output| output.status.success()));

    let output = fl(&temp, &api_url, &["sync"]);
    assert!(
        output.status.success(),
        "sync failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("Uploaded 2 event(s), 0 failed"));

    let requests = server.join().unwrap();
    assert_eq!(requests[0].line, "POST /api/workday-events HTTP/1.1");
    assert_eq!(requests[1].line, "POST /api/refuel-events HTTP/1.1");
    assert_eq!(
        requests[0].authorization.as_deref(),
        Some("Bearer secret-token")
    );
    let refuel: serde_json::Value = serde_json::from_str(&requests[1].body).unwrap();
    assert_eq!(refuel["type"], "REFUEL");
    assert_eq!(refuel["paymentMethod"], "CARD");

    let listed = fl(&temp, &api_url, &["events", "--json"]);
    let events: Vec<serde_json::Value> = String::from_utf8(listed.stdout)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert!(events.iter().all(|e| e["synced"] == true));
    assert_eq!(events[0]["remote_id"], "w-1");
}

#[test]
fn test_sync_stops_on_rejected_token() {
    let temp = TempDir::new().unwrap();
    let (api_url, server) = serve(vec![(401, "")]);

    assert!(
        fl(&temp, &api_url, &["event", "work_start", "--at", "2025-01-06T07:00:00Z"])
            .status
            .success()
    );

    let output = fl(&temp, &api_url, &["sync"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("rejected the api_token"));
    assert_eq!(server.join().unwrap().len(), 1);
}
