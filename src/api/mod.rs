//! Live stream and health API.
//!
//! - `GET /video_feed/<building_id>`: `multipart/x-mixed-replace` JPEG stream
//! - `GET /health`: process health and number of active buildings
//! - `GET /buildings`: registered workers with their state

use anyhow::{anyhow, Result};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::building::validate_building_id;
use crate::frame::{encode_jpeg, Frame, PLACEHOLDER_HEIGHT, PLACEHOLDER_WIDTH};
use crate::supervisor::Registry;

const MAX_REQUEST_BYTES: usize = 8192;
const FRAME_PAUSE: Duration = Duration::from_millis(16);
const PLACEHOLDER_PAUSE: Duration = Duration::from_millis(100);
const BOUNDARY: &str = "frame";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub jpeg_quality: u8,
    /// Frames wider than this are downscaled before encoding.
    pub max_width: u32,
    /// A stream client that stops reading for this long is dropped.
    pub write_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:5001".to_string(),
            jpeg_quality: 50,
            max_width: 1280,
            write_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting connections. Open streams end at their next frame.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    registry: Registry,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, registry: Registry) -> Self {
        Self { cfg, registry }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let placeholder = Arc::new(encode_jpeg(
            &Frame::blank(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT),
            self.cfg.jpeg_quality,
            self.cfg.max_width,
        )?);
        let ctx = Arc::new(ApiContext {
            cfg: self.cfg,
            registry: self.registry,
            placeholder,
            shutdown: Arc::new(AtomicBool::new(false)),
        });
        let shutdown = ctx.shutdown.clone();
        let join = std::thread::Builder::new()
            .name("stream-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, ctx) {
                    log::error!("stream api stopped: {}", err);
                }
            })?;
        log::info!("stream api listening on {}", addr);

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

struct ApiContext {
    cfg: ApiConfig,
    registry: Registry,
    placeholder: Arc<Vec<u8>>,
    shutdown: Arc<AtomicBool>,
}

fn run_api(listener: TcpListener, ctx: Arc<ApiContext>) -> Result<()> {
    loop {
        if ctx.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let ctx = ctx.clone();
                let spawned = std::thread::Builder::new()
                    .name("stream-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &ctx) {
                            log::warn!("stream api request from {} rejected: {}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("stream api could not spawn connection thread: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, ctx: &ApiContext) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }

    match request.path.as_str() {
        "/health" => {
            let body = serde_json::json!({
                "status": "ok",
                "active_buildings": ctx.registry.active_count()?,
            });
            write_response(&mut stream, 200, "application/json", &serde_json::to_vec(&body)?)
        }
        "/buildings" => {
            let body = serde_json::to_vec(&ctx.registry.statuses()?)?;
            write_response(&mut stream, 200, "application/json", &body)
        }
        path => match path.strip_prefix("/video_feed/") {
            Some(building_id) if validate_building_id(building_id).is_ok() => {
                stream_building(stream, building_id, ctx)
            }
            _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
        },
    }
}

/// Serve a building's frames until the client goes away or the server stops.
fn stream_building(mut stream: TcpStream, building_id: &str, ctx: &ApiContext) -> Result<()> {
    prepare_stream(&stream, &ctx.cfg)?;
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        BOUNDARY
    );
    stream.write_all(header.as_bytes())?;
    log::debug!(
        "stream for building {} opened (worker registered: {})",
        building_id,
        ctx.registry.contains(building_id)?
    );

    while !ctx.shutdown.load(Ordering::SeqCst) {
        let (jpeg, pause) = match ctx.registry.frame(building_id)? {
            Some(frame) => (
                Arc::new(encode_jpeg(&frame, ctx.cfg.jpeg_quality, ctx.cfg.max_width)?),
                FRAME_PAUSE,
            ),
            None => (ctx.placeholder.clone(), PLACEHOLDER_PAUSE),
        };
        if let Err(err) = write_part(&mut stream, &jpeg) {
            log::debug!("stream for building {} closed: {}", building_id, err);
            return Ok(());
        }
        std::thread::sleep(pause);
    }
    Ok(())
}

fn prepare_stream(stream: &TcpStream, cfg: &ApiConfig) -> Result<()> {
    stream.set_write_timeout(Some(cfg.write_timeout))?;
    stream.set_nodelay(true)?;
    Ok(())
}

fn write_part(stream: &mut TcpStream, jpeg: &[u8]) -> std::io::Result<()> {
    let header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        jpeg.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(jpeg)?;
    stream.write_all(b"\r\n")?;
    stream.flush()
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next()
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}
