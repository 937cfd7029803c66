use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use people_counter::{
    CountUpdate, CrossingDirection, HttpReportingClient, ReportingClient, ReportingConfig,
};

#[derive(Debug)]
struct CapturedRequest {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl CapturedRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// One-shot HTTP backend: answers a single request with `status` and `body`.
fn fake_backend(status: u16, body: &'static str) -> (String, JoinHandle<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake backend");
    let base = format!("http://{}", listener.local_addr().unwrap());
    let join = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let request = read_request(&mut stream);
        let reason = if status < 400 { "OK" } else { "Error" };
        let response = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            reason,
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).expect("write response");
        request
    });
    (base, join)
}

fn read_request(stream: &mut TcpStream) -> CapturedRequest {
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut data = Vec::new();
    let mut buf = [0u8; 1024];
    let header_end = loop {
        let n = stream.read(&mut buf).expect("read request");
        assert!(n > 0, "client closed before sending headers");
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap().split_whitespace();
    let method = request_line.next().unwrap().to_string();
    let path = request_line.next().unwrap().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .map(|(_, v)| v.parse::<usize>().unwrap())
        .unwrap_or(0);
    while data.len() < header_end + content_length {
        let n = stream.read(&mut buf).expect("read body");
        assert!(n > 0, "client closed before sending body");
        data.extend_from_slice(&buf[..n]);
    }
    let body = String::from_utf8_lossy(&data[header_end..header_end + content_length]).to_string();

    CapturedRequest {
        method,
        path,
        headers,
        body,
    }
}

fn client(base_url: &str, token: Option<&str>) -> HttpReportingClient {
    HttpReportingClient::new(&ReportingConfig {
        base_url: base_url.to_string(),
        auth_token: token.map(str::to_string),
        ..ReportingConfig::default()
    })
    .expect("client")
}

#[test]
fn fetches_control_document() {
    let (base, server) = fake_backend(
        200,
        r#"{"buildings":{"library":{"is_running":true,"video_path":"lib.mp4"},"gym":{"is_running":false}}}"#,
    );
    let snapshot = client(&base, None).fetch_control().expect("fetch control");
    let request = server.join().unwrap();

    assert_eq!(request.method, "GET");
    assert_eq!(request.path, "/api/ai/control");
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.wants_running("library"));
    assert!(!snapshot.wants_running("gym"));
}

#[test]
fn malformed_control_document_means_no_buildings() {
    let (base, server) = fake_backend(200, "<html>maintenance</html>");
    let snapshot = client(&base, None).fetch_control().expect("fetch control");
    server.join().unwrap();
    assert!(snapshot.is_empty());
}

#[test]
fn control_errors_are_reported() {
    let (base, server) = fake_backend(503, r#"{"error":"down"}"#);
    assert!(client(&base, None).fetch_control().is_err());
    server.join().unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let closed = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    assert!(client(&closed, None).fetch_control().is_err());
}

#[test]
fn pushes_update_with_bearer_token() {
    let (base, server) = fake_backend(200, r#"{"ok":true}"#);
    let update = CountUpdate::new("library", CrossingDirection::Enter, 4);
    client(&base, Some("s3cret"))
        .push_update(&update)
        .expect("push update");
    let request = server.join().unwrap();

    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/api/ai/update");
    assert_eq!(request.header("authorization"), Some("Bearer s3cret"));
    assert!(request
        .header("content-type")
        .is_some_and(|v| v.starts_with("application/json")));
    let body: serde_json::Value = serde_json::from_str(&request.body).unwrap();
    assert_eq!(
        body,
        serde_json::json!({
            "building_id": "library",
            "direction": "IN",
            "enter_count": 4,
            "leave_count": 0
        })
    );
}

#[test]
fn push_without_token_sends_no_authorization() {
    let (base, server) = fake_backend(201, "{}");
    let update = CountUpdate::new("gym", CrossingDirection::Exit, 1);
    client(&base, None).push_update(&update).expect("push update");
    let request = server.join().unwrap();
    assert_eq!(request.header("authorization"), None);
}

#[test]
fn rejected_push_is_an_error() {
    let (base, server) = fake_backend(401, r#"{"error":"unauthorized"}"#);
    let update = CountUpdate::new("gym", CrossingDirection::Exit, 1);
    let err = client(&base, Some("wrong"))
        .push_update(&update)
        .expect_err("401 must fail");
    server.join().unwrap();
    assert!(format!("{:#}", err).contains("401"));
}
