//! HTTP streaming front end.
//!
//! Serves the latest frames out of the [`SharedFrameStore`] as
//! `multipart/x-mixed-replace` JPEG streams a browser renders natively
//! from a plain `<img>` tag. Each client connection is an independent
//! task that pulls from the store at its own pace; a client going away
//! ends only its own stream. Channels with no frame yet get a labeled
//! offline placeholder instead of an error.

mod placeholder;

pub use placeholder::{PlaceholderGenerator, PLACEHOLDER_HEIGHT, PLACEHOLDER_WIDTH};

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use image::imageops::FilterType;
use image::{codecs::jpeg::JpegEncoder, RgbImage};
use tracing::{debug, info};

use crate::frame::Frame;
use crate::store::SharedFrameStore;

/// Boundary separating multipart frames. Must never occur in JPEG data.
const FRAME_BOUNDARY: &str = "FRAME";

/// Pacing sleep per served frame, single-channel streams (~25 fps).
const STREAM_INTERVAL: Duration = Duration::from_millis(40);
/// Pacing sleep per served frame, combined stream (~20 fps).
const COMBINED_INTERVAL: Duration = Duration::from_millis(50);
/// Extra backoff when serving a placeholder instead of a live frame.
const OFFLINE_EXTRA: Duration = Duration::from_millis(100);

const SINGLE_JPEG_QUALITY: u8 = 85;
const COMBINED_JPEG_QUALITY: u8 = 80;

const INDEX_HTML: &str = r#"<html>
<body style="background:#111; color:#ddd; font-family:sans-serif; text-align:center;">
    <h1>Fish Activity Monitoring System</h1>
    <div style="display:flex; justify-content:center; flex-wrap:wrap; gap:10px;">
        <div><h3>Top View</h3><img src="/stream1" style="width:640px; border:2px solid #0ff;"></div>
        <div><h3>Side View</h3><img src="/stream2" style="width:640px; border:2px solid #f00;"></div>
    </div>
    <br>
    <a href="/both" style="color:#0ff; font-size:20px;">View Combined Stream</a>
</body>
</html>
"#;

struct ServerState {
    store: Arc<SharedFrameStore>,
    /// Channel names served as stream1 and stream2, in that order.
    channels: [String; 2],
    placeholders: [PlaceholderGenerator; 2],
}

/// Multipart-JPEG streaming server over a [`SharedFrameStore`].
pub struct StreamBroadcastServer {
    state: Arc<ServerState>,
}

impl StreamBroadcastServer {
    /// `stream1` serves `top_channel`, `stream2` serves `side_channel`.
    pub fn new(store: Arc<SharedFrameStore>, top_channel: &str, side_channel: &str) -> Self {
        let state = ServerState {
            store,
            channels: [top_channel.to_string(), side_channel.to_string()],
            placeholders: [
                PlaceholderGenerator::offline(top_channel),
                PlaceholderGenerator::offline(side_channel),
            ],
        };
        Self {
            state: Arc::new(state),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(index))
            .route("/stream1", get(stream_first))
            .route("/stream2", get(stream_second))
            .route("/both", get(stream_both))
            .route("/status", get(status))
            .fallback(not_found)
            .with_state(self.state.clone())
    }

    /// Bind and serve until the process exits.
    pub async fn serve(&self, port: u16) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        info!(%addr, "stream server listening");
        axum::serve(listener, self.router())
            .await
            .context("serving HTTP")
    }
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn status(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.store.snapshot_info())
}

async fn not_found() -> impl IntoResponse {
    StatusCode::NOT_FOUND
}

async fn stream_first(State(state): State<Arc<ServerState>>) -> Response {
    single_channel_stream(state, 0)
}

async fn stream_second(State(state): State<Arc<ServerState>>) -> Response {
    single_channel_stream(state, 1)
}

/// One client's single-channel stream: latest store frame or placeholder,
/// JPEG-encoded, one multipart part per iteration.
fn single_channel_stream(state: Arc<ServerState>, index: usize) -> Response {
    let stream = async_stream::stream! {
        loop {
            let channel = &state.channels[index];
            let (img, offline) = match state.store.read(channel) {
                Some(stored) => (frame_to_rgb(&stored.frame), false),
                None => (state.placeholders[index].render(), true),
            };
            if let Some(jpeg) = encode_jpeg(&img, SINGLE_JPEG_QUALITY) {
                yield Ok::<_, Infallible>(multipart_chunk(&jpeg));
            }
            if offline {
                tokio::time::sleep(OFFLINE_EXTRA).await;
            }
            tokio::time::sleep(STREAM_INTERVAL).await;
        }
    };
    multipart_response(Body::from_stream(stream))
}

/// Combined stream: both channels side by side, second frame resized to
/// the first's height when they differ.
async fn stream_both(State(state): State<Arc<ServerState>>) -> Response {
    let stream = async_stream::stream! {
        loop {
            let first = match state.store.read(&state.channels[0]) {
                Some(stored) => frame_to_rgb(&stored.frame),
                None => state.placeholders[0].render(),
            };
            let second = match state.store.read(&state.channels[1]) {
                Some(stored) => frame_to_rgb(&stored.frame),
                None => state.placeholders[1].render(),
            };
            let combined = stack_horizontal(first, second);
            if let Some(jpeg) = encode_jpeg(&combined, COMBINED_JPEG_QUALITY) {
                yield Ok::<_, Infallible>(multipart_chunk(&jpeg));
            }
            tokio::time::sleep(COMBINED_INTERVAL).await;
        }
    };
    multipart_response(Body::from_stream(stream))
}

fn multipart_response(body: Body) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={FRAME_BOUNDARY}"),
        )
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::PRAGMA, "no-cache")
        .header(header::EXPIRES, "0")
        .body(body)
        .expect("static response header set is valid")
}

/// One multipart part: boundary line, part headers, JPEG payload.
fn multipart_chunk(jpeg: &[u8]) -> Bytes {
    let head = format!(
        "--{FRAME_BOUNDARY}\r\n\
         Content-Type: image/jpeg\r\n\
         Content-Length: {}\r\n\
         \r\n",
        jpeg.len()
    );
    let mut bytes = Vec::with_capacity(head.len() + jpeg.len() + 2);
    bytes.extend_from_slice(head.as_bytes());
    bytes.extend_from_slice(jpeg);
    bytes.extend_from_slice(b"\r\n");
    Bytes::from(bytes)
}

/// BGR store frame to an `RgbImage` for encoding.
fn frame_to_rgb(frame: &Frame) -> RgbImage {
    let mut rgb = Vec::with_capacity(frame.data.len());
    for px in frame.data.chunks_exact(3) {
        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    RgbImage::from_raw(frame.width, frame.height, rgb)
        .unwrap_or_else(|| RgbImage::new(frame.width.max(1), frame.height.max(1)))
}

fn encode_jpeg(img: &RgbImage, quality: u8) -> Option<Bytes> {
    let mut jpeg = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut jpeg, quality);
    match img.write_with_encoder(encoder) {
        Ok(()) => Some(Bytes::from(jpeg)),
        Err(e) => {
            debug!("jpeg encode failed: {e}");
            None
        }
    }
}

/// Stack two images side by side, scaling the second to the first's
/// height when they differ.
fn stack_horizontal(first: RgbImage, second: RgbImage) -> RgbImage {
    let second = if second.height() != first.height() {
        let scale = first.height() as f64 / second.height() as f64;
        let width = ((second.width() as f64 * scale) as u32).max(1);
        image::imageops::resize(&second, width, first.height(), FilterType::Triangle)
    } else {
        second
    };

    let mut canvas = RgbImage::new(first.width() + second.width(), first.height());
    image::imageops::replace(&mut canvas, &first, 0, 0);
    image::imageops::replace(&mut canvas, &second, first.width() as i64, 0);
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::time::SystemTime;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn bgr_frame(b: u8, g: u8, r: u8, width: u32, height: u32) -> Frame {
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for _ in 0..width * height {
            data.extend_from_slice(&[b, g, r]);
        }
        Frame::from_bgr(data, width, height, SystemTime::now())
    }

    #[test]
    fn test_frame_to_rgb_swaps_channels() {
        let img = frame_to_rgb(&bgr_frame(10, 20, 30, 2, 2));
        assert_eq!(*img.get_pixel(0, 0), Rgb([30, 20, 10]));
    }

    #[test]
    fn test_encode_jpeg_magic_bytes() {
        let img = frame_to_rgb(&bgr_frame(0, 128, 255, 4, 4));
        let jpeg = encode_jpeg(&img, 85).unwrap();
        assert_eq!(&jpeg[0..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_multipart_chunk_layout() {
        let chunk = multipart_chunk(b"abcd");
        let text = String::from_utf8_lossy(&chunk);
        assert!(text.starts_with("--FRAME\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\n"));
        assert!(text.ends_with("abcd\r\n"));
    }

    #[test]
    fn test_stack_resizes_mismatched_heights() {
        let first = RgbImage::new(4, 8);
        let second = RgbImage::new(4, 4);
        let combined = stack_horizontal(first, second);
        assert_eq!(combined.height(), 8);
        assert_eq!(combined.width(), 4 + 8);
    }

    #[test]
    fn test_stack_keeps_matched_heights() {
        let combined = stack_horizontal(RgbImage::new(4, 4), RgbImage::new(6, 4));
        assert_eq!((combined.width(), combined.height()), (10, 4));
    }

    async fn spawn_server(store: Arc<SharedFrameStore>) -> SocketAddr {
        let server = StreamBroadcastServer::new(store, "top", "side");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = server.router();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    async fn http_get_prefix(addr: SocketAddr, path: &str, want: usize) -> Vec<u8> {
        let mut conn = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n");
        conn.write_all(request.as_bytes()).await.unwrap();

        let mut buf = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        let mut chunk = [0u8; 4096];
        while buf.len() < want && tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_secs(1), conn.read(&mut chunk)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
                _ => break,
            }
        }
        buf
    }

    #[tokio::test]
    async fn test_index_and_status_and_404() {
        let store = Arc::new(SharedFrameStore::new(&["top", "side"]));
        store.update("top", Some(bgr_frame(1, 2, 3, 4, 4)));
        let addr = spawn_server(store).await;

        let index = http_get_prefix(addr, "/", 2048).await;
        let index = String::from_utf8_lossy(&index);
        assert!(index.starts_with("HTTP/1.1 200"));
        assert!(index.contains("/stream1"));
        assert!(index.contains("/both"));

        let status = http_get_prefix(addr, "/status", 2048).await;
        let status = String::from_utf8_lossy(&status);
        assert!(status.starts_with("HTTP/1.1 200"));
        assert!(status.contains("\"top\""));
        assert!(status.contains("\"updates\":1"));

        let missing = http_get_prefix(addr, "/nope", 512).await;
        assert!(String::from_utf8_lossy(&missing).starts_with("HTTP/1.1 404"));
    }

    #[tokio::test]
    async fn test_stream_serves_live_frames() {
        let store = Arc::new(SharedFrameStore::new(&["top", "side"]));
        store.update("top", Some(bgr_frame(1, 2, 3, 8, 8)));
        let addr = spawn_server(store).await;

        let body = http_get_prefix(addr, "/stream1", 4096).await;
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with("HTTP/1.1 200"));
        assert!(text.contains("multipart/x-mixed-replace; boundary=FRAME"));
        assert!(text.contains("--FRAME"));
        assert!(body.windows(2).any(|w| w == [0xFF, 0xD8]));
    }

    #[tokio::test]
    async fn test_empty_channels_serve_placeholders_concurrently() {
        let store = Arc::new(SharedFrameStore::new(&["top", "side"]));
        let addr = spawn_server(store).await;

        // both clients connect while the store is empty; each gets
        // placeholder parts without blocking the other
        let (a, b) = tokio::join!(
            http_get_prefix(addr, "/stream1", 8192),
            http_get_prefix(addr, "/stream2", 8192),
        );
        for body in [a, b] {
            let text = String::from_utf8_lossy(&body);
            assert!(text.starts_with("HTTP/1.1 200"));
            assert!(text.contains("--FRAME"));
            assert!(body.windows(2).any(|w| w == [0xFF, 0xD8]));
        }
    }

    #[tokio::test]
    async fn test_combined_stream_streams_jpeg() {
        let store = Arc::new(SharedFrameStore::new(&["top", "side"]));
        store.update("top", Some(bgr_frame(9, 9, 9, 8, 8)));
        // side stays empty so the combined view mixes live and placeholder
        let addr = spawn_server(store).await;

        let body = http_get_prefix(addr, "/both", 8192).await;
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with("HTTP/1.1 200"));
        assert!(text.contains("--FRAME"));
        assert!(body.windows(2).any(|w| w == [0xFF, 0xD8]));
    }
}
