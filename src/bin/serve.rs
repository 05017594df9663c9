//! Development server for wasmterm
//!
//! Static file server for `www/` and the wasm-bindgen output. Every
//! response carries the cross-origin isolation headers; without them the
//! browser refuses `SharedArrayBuffer` and background execution falls back
//! to the foreground.

use std::fs;
use std::path::{Component, Path, PathBuf};
use tiny_http::{Header, Response, Server};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_ROOT: &str = "www";

type FileResponse = Response<std::io::Cursor<Vec<u8>>>;

fn main() {
    let mut args = std::env::args().skip(1);
    let port = args
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let root = PathBuf::from(args.next().unwrap_or_else(|| DEFAULT_ROOT.to_string()));

    let addr = format!("0.0.0.0:{}", port);
    let server = match Server::http(&addr) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("failed to start server on {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    println!("wasmterm dev server");
    println!("  root: {}", root.display());
    println!("  http://localhost:{}", port);

    for request in server.incoming_requests() {
        let url_path = request.url().split('?').next().unwrap_or("/").to_string();
        let response = match resolve(&root, &url_path) {
            Some(path) => serve_file(&path),
            None => not_found(),
        };
        let _ = request.respond(response);
    }
}

/// Map a URL path below `root`, refusing `..` escapes
fn resolve(root: &Path, url_path: &str) -> Option<PathBuf> {
    let relative = url_path.trim_start_matches('/');
    let relative = if relative.is_empty() { "index.html" } else { relative };

    let mut path = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(path)
}

fn header(name: &str, value: &str) -> Option<Header> {
    Header::from_bytes(name, value).ok()
}

fn with_headers(mut response: FileResponse, mime: &str) -> FileResponse {
    let headers = [
        header("Content-Type", mime),
        header("Cross-Origin-Opener-Policy", "same-origin"),
        header("Cross-Origin-Embedder-Policy", "require-corp"),
        header("Cache-Control", "no-cache"),
    ];
    for header in headers.into_iter().flatten() {
        response = response.with_header(header);
    }
    response
}

fn serve_file(path: &Path) -> FileResponse {
    match fs::read(path) {
        Ok(contents) => with_headers(Response::from_data(contents), mime_type(path)),
        Err(_) => not_found(),
    }
}

fn not_found() -> FileResponse {
    with_headers(
        Response::from_string("404 Not Found").with_status_code(404),
        "text/plain",
    )
}

fn mime_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") | Some("mjs") => "application/javascript",
        Some("wasm") => "application/wasm",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        // Program modules (.bin) and their glue (.rt) land here too
        _ => "application/octet-stream",
    }
}
