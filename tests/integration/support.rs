// Shared helpers for integration tests
// A hand-rolled HTTP source on a local TcpListener plus image fixtures

use std::collections::HashMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use resize_server::options::TransformOptions;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// How the mock source answers a path
#[derive(Clone)]
pub enum Behavior {
    Respond {
        status: u16,
        content_type: &'static str,
        body: Vec<u8>,
    },
    /// Accept the connection and never answer
    Hang,
    /// Answer HEAD with 200, then fail GET with 503 after `get_delay`
    ProbeOnly {
        content_type: &'static str,
        get_delay: Duration,
    },
}

impl Behavior {
    pub fn ok(content_type: &'static str, body: Vec<u8>) -> Self {
        Behavior::Respond {
            status: 200,
            content_type,
            body,
        }
    }
}

/// Local HTTP server standing in for a remote image host
pub struct MockSource {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<(String, String)>>>,
    handle: JoinHandle<()>,
}

impl MockSource {
    /// Paths not in `routes` answer 404
    pub async fn start(routes: HashMap<String, Behavior>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes = Arc::new(routes);
        let requests = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&requests);
        let handle = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    continue;
                };
                let routes = Arc::clone(&routes);
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    serve(socket, &routes, &log).await;
                });
            }
        });

        Self {
            addr,
            requests,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Number of requests seen for `method` on `path`
    pub fn request_count(&self, method: &str, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, p)| m == method && p == path)
            .count()
    }
}

impl Drop for MockSource {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(
    mut socket: TcpStream,
    routes: &HashMap<String, Behavior>,
    log: &Mutex<Vec<(String, String)>>,
) {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buffer.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
        }
    }

    let head = String::from_utf8_lossy(&buffer);
    let mut request_line = head.lines().next().unwrap_or("").split_whitespace();
    let method = request_line.next().unwrap_or("").to_string();
    let path = request_line.next().unwrap_or("").to_string();
    log.lock().unwrap().push((method.clone(), path.clone()));

    let behavior = routes.get(&path).cloned().unwrap_or(Behavior::Respond {
        status: 404,
        content_type: "text/plain",
        body: b"not found".to_vec(),
    });

    match behavior {
        Behavior::Hang => {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Behavior::Respond {
            status,
            content_type,
            body,
        } => respond(&mut socket, &method, status, content_type, &body).await,
        Behavior::ProbeOnly {
            content_type,
            get_delay,
        } => {
            if method == "HEAD" {
                respond(&mut socket, &method, 200, content_type, b"").await;
            } else {
                tokio::time::sleep(get_delay).await;
                respond(&mut socket, &method, 503, "text/plain", b"unavailable").await;
            }
        }
    }
}

async fn respond(socket: &mut TcpStream, method: &str, status: u16, content_type: &str, body: &[u8]) {
    let head = format!(
        "HTTP/1.1 {} X\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        content_type,
        body.len()
    );
    let _ = socket.write_all(head.as_bytes()).await;
    if method != "HEAD" {
        let _ = socket.write_all(body).await;
    }
    let _ = socket.shutdown().await;
}

/// A `width`x`height` PNG with a horizontal gradient
pub fn png_fixture(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_fn(width, height, |x, _| {
        let shade = (x * 255 / width.max(1)) as u8;
        image::Rgba([shade, 64, 255 - shade, 255])
    });
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Resize options for `url` with the given output format
pub fn resize_options(url: &str, width: u32, height: u32, format: &str) -> TransformOptions {
    TransformOptions::builder()
        .width(Some(width))
        .height(Some(height))
        .format(format)
        .quality(80)
        .imagefile(url)
        .url(url)
        .suffix("png")
        .build()
        .unwrap()
}
