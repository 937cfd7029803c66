use anyhow::{anyhow, Result};
use serde_json::Value;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use people_counter::api::{ApiConfig, ApiHandle, ApiServer};
use people_counter::{
    BackendRegistry, BuildingConfig, ControlSnapshot, CountUpdate, LocalPipelineFactory,
    ReportingClient, Supervisor, SupervisorConfig,
};

struct SilentBackend;

impl ReportingClient for SilentBackend {
    fn fetch_control(&self) -> Result<ControlSnapshot> {
        Ok(ControlSnapshot::default())
    }

    fn push_update(&self, _update: &CountUpdate) -> Result<()> {
        Ok(())
    }
}

struct TestApi {
    supervisor: Supervisor,
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new() -> Result<Self> {
        let factory = LocalPipelineFactory::new("videos", Arc::new(BackendRegistry::default()), "cpu");
        let supervisor = Supervisor::new(
            Arc::new(SilentBackend),
            Arc::new(factory),
            SupervisorConfig::default(),
        );
        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            ..ApiConfig::default()
        };
        let api_handle = ApiServer::new(api_config, supervisor.registry()).spawn()?;
        Ok(Self {
            supervisor,
            api_handle: Some(api_handle),
        })
    }

    fn addr(&self) -> std::net::SocketAddr {
        self.api_handle.as_ref().expect("api handle").addr
    }

    fn start_hall(&mut self) -> Result<()> {
        let mut building = BuildingConfig::new("hall", "stub://walk-down?frames=30&fps=60");
        building.direction = Some("north".to_string());
        self.supervisor.sync(&ControlSnapshot::new([building]))?;
        let registry = self.supervisor.registry();
        wait_until(|| registry.frame("hall").map(|f| f.is_some()).unwrap_or(false))
    }

    fn request(&self, method: &str, path: &str) -> Result<(String, String)> {
        let mut stream = TcpStream::connect(self.addr())?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        let request = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        stream.write_all(request.as_bytes())?;
        let mut response = String::new();
        stream.read_to_string(&mut response)?;
        let mut parts = response.splitn(2, "\r\n\r\n");
        let headers = parts.next().unwrap_or("").to_string();
        let body = parts.next().unwrap_or("").to_string();
        Ok((headers, body))
    }

    fn open_stream(&self, building_id: &str) -> Result<(String, TcpStream)> {
        let mut stream = TcpStream::connect(self.addr())?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        let request = format!("GET /video_feed/{building_id} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        stream.write_all(request.as_bytes())?;
        let head = read_until_blank_line(&mut stream)?;
        Ok((head, stream))
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        let _ = self.supervisor.sync(&ControlSnapshot::default());
        if let Some(handle) = self.api_handle.take() {
            let _ = handle.stop();
        }
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    Err(anyhow!("condition not reached in time"))
}

fn read_until_blank_line(stream: &mut TcpStream) -> Result<String> {
    let mut data = Vec::new();
    let mut byte = [0u8; 1];
    while !data.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte)? == 0 {
            return Err(anyhow!("stream closed"));
        }
        data.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&data).to_string())
}

/// Read one multipart part and return its body.
fn read_part(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let head = read_until_blank_line(stream)?;
    assert!(head.contains("--frame"), "missing boundary in {head:?}");
    assert!(head.contains("Content-Type: image/jpeg"));
    let length: usize = head
        .lines()
        .find_map(|line| line.strip_prefix("Content-Length: "))
        .ok_or_else(|| anyhow!("part without length"))?
        .trim()
        .parse()?;
    let mut body = vec![0u8; length + 2];
    stream.read_exact(&mut body)?;
    assert_eq!(&body[length..], b"\r\n");
    body.truncate(length);
    Ok(body)
}

#[test]
fn health_reports_active_buildings() -> Result<()> {
    let mut api = TestApi::new()?;
    let (headers, body) = api.request("GET", "/health")?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    let json: Value = serde_json::from_str(&body)?;
    assert_eq!(json, serde_json::json!({"status": "ok", "active_buildings": 0}));

    api.start_hall()?;
    let (_, body) = api.request("GET", "/health")?;
    let json: Value = serde_json::from_str(&body)?;
    assert_eq!(json["active_buildings"], 1);
    Ok(())
}

#[test]
fn buildings_lists_worker_state() -> Result<()> {
    let mut api = TestApi::new()?;
    api.start_hall()?;
    let (headers, body) = api.request("GET", "/buildings")?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    let json: Value = serde_json::from_str(&body)?;
    assert_eq!(
        json,
        serde_json::json!([{"building_id": "hall", "state": "running", "direction": "north"}])
    );
    Ok(())
}

#[test]
fn video_feed_streams_annotated_frames() -> Result<()> {
    let mut api = TestApi::new()?;
    api.start_hall()?;
    let (head, mut stream) = api.open_stream("hall")?;
    assert!(head.starts_with("HTTP/1.1 200"));
    assert!(head.contains("multipart/x-mixed-replace; boundary=frame"));

    for _ in 0..3 {
        let jpeg = read_part(&mut stream)?;
        let image = image::load_from_memory(&jpeg)?;
        assert_eq!((image.width(), image.height()), (640, 480));
    }
    Ok(())
}

#[test]
fn unknown_building_streams_placeholder() -> Result<()> {
    let api = TestApi::new()?;
    let (head, mut stream) = api.open_stream("closed-wing")?;
    assert!(head.starts_with("HTTP/1.1 200"));
    let jpeg = read_part(&mut stream)?;
    let image = image::load_from_memory(&jpeg)?.to_rgb8();
    assert_eq!(image.dimensions(), (640, 480));
    assert!(image.pixels().all(|p| p.0.iter().all(|c| *c < 16)));
    Ok(())
}

#[test]
fn rejects_unknown_paths_and_methods() -> Result<()> {
    let api = TestApi::new()?;
    let (headers, _) = api.request("GET", "/events")?;
    assert!(headers.starts_with("HTTP/1.1 404"));
    let (headers, _) = api.request("GET", "/video_feed/")?;
    assert!(headers.starts_with("HTTP/1.1 404"));
    let (headers, _) = api.request("GET", "/video_feed/..%2Fetc")?;
    assert!(headers.starts_with("HTTP/1.1 404"));
    let (headers, _) = api.request("POST", "/health")?;
    assert!(headers.starts_with("HTTP/1.1 405"));
    Ok(())
}

#[test]
fn stopping_the_server_ends_open_streams() -> Result<()> {
    let mut api = TestApi::new()?;
    let (_, mut stream) = api.open_stream("hall")?;
    read_part(&mut stream)?;

    api.api_handle.take().expect("api handle").stop()?;
    let mut buf = [0u8; 4096];
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if stream.read(&mut buf)? == 0 {
            break;
        }
        assert!(Instant::now() < deadline, "stream still open after stop");
    }
    Ok(())
}
