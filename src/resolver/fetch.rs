//! Fetching module files and registry packages
//!
//! - Browser: Fetch API (subject to CORS, relative URLs resolve against the page)
//! - Native: `ureq` for http(s) URLs, plain file reads for everything else
//!
//! The resolver only sees the [`Fetcher`] trait so tests can serve bytes
//! from memory.

use super::error::{FetchError, FetchResult};
use futures::future::LocalBoxFuture;
use std::cell::RefCell;
use std::collections::HashMap;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// HTTP request builder
pub struct HttpRequest {
    url: String,
    method: HttpMethod,
    headers: Vec<(String, String)>,
    body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Create a new GET request
    pub fn get(url: &str) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    /// Create a new POST request
    pub fn post(url: &str) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn new(method: HttpMethod, url: &str) -> Self {
        Self {
            url: url.to_string(),
            method,
            headers: Vec::new(),
            body: None,
        }
    }

    /// Add a header
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Set a JSON body
    pub fn json(self, json: &str) -> Self {
        let mut req = self
            .header("Accept", "application/json")
            .header("Content-Type", "application/json");
        req.body = Some(json.as_bytes().to_vec());
        req
    }

    fn status_error(&self, status: u16) -> FetchError {
        if status == 404 {
            FetchError::NotFound {
                url: self.url.clone(),
            }
        } else {
            FetchError::Status {
                url: self.url.clone(),
                status,
            }
        }
    }

    fn network_error(&self, reason: impl ToString) -> FetchError {
        FetchError::Network {
            url: self.url.clone(),
            reason: reason.to_string(),
        }
    }

    /// Execute the request, returning the body of a successful response
    #[cfg(target_arch = "wasm32")]
    pub async fn send(self) -> FetchResult<Vec<u8>> {
        use wasm_bindgen::JsCast;
        use wasm_bindgen_futures::JsFuture;

        let window = web_sys::window().ok_or_else(|| self.network_error("no window object"))?;

        let opts = web_sys::RequestInit::new();
        opts.set_method(self.method.as_str());
        opts.set_mode(web_sys::RequestMode::Cors);
        if let Some(body) = &self.body {
            let array = js_sys::Uint8Array::from(body.as_slice());
            opts.set_body(&array);
        }

        let request = web_sys::Request::new_with_str_and_init(&self.url, &opts)
            .map_err(|e| self.network_error(format!("{:?}", e)))?;
        for (name, value) in &self.headers {
            request
                .headers()
                .set(name, value)
                .map_err(|e| self.network_error(format!("{:?}", e)))?;
        }

        let resp_value = JsFuture::from(window.fetch_with_request(&request))
            .await
            .map_err(|e| self.network_error(format!("{:?}", e)))?;
        let resp: web_sys::Response = resp_value
            .dyn_into()
            .map_err(|_| self.network_error("not a response"))?;

        if !resp.ok() {
            return Err(self.status_error(resp.status()));
        }

        let buffer = JsFuture::from(
            resp.array_buffer()
                .map_err(|e| self.network_error(format!("{:?}", e)))?,
        )
        .await
        .map_err(|e| self.network_error(format!("{:?}", e)))?;

        Ok(js_sys::Uint8Array::new(&buffer).to_vec())
    }

    /// Execute the request, returning the body of a successful response
    #[cfg(not(target_arch = "wasm32"))]
    pub async fn send(self) -> FetchResult<Vec<u8>> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return std::fs::read(&self.url).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => FetchError::NotFound {
                    url: self.url.clone(),
                },
                _ => self.network_error(e),
            });
        }

        let result = match self.method {
            HttpMethod::Get => {
                let mut req = ureq::get(&self.url);
                for (name, value) in &self.headers {
                    req = req.header(name, value);
                }
                req.call()
            }
            HttpMethod::Post => {
                let mut req = ureq::post(&self.url);
                for (name, value) in &self.headers {
                    req = req.header(name, value);
                }
                req.send(self.body.as_deref().unwrap_or_default())
            }
        };

        let mut response = result.map_err(|e| match e {
            ureq::Error::StatusCode(status) => self.status_error(status),
            other => self.network_error(other),
        })?;

        response
            .body_mut()
            .with_config()
            .limit(MAX_BODY_BYTES)
            .read_to_vec()
            .map_err(|e| self.network_error(e))
    }
}

/// Largest response body accepted natively (registry packages included)
#[cfg(not(target_arch = "wasm32"))]
const MAX_BODY_BYTES: u64 = 256 * 1024 * 1024;

/// Where module files and registry answers come from
pub trait Fetcher {
    /// Body of a GET request
    fn get<'a>(&'a self, url: &'a str) -> LocalBoxFuture<'a, FetchResult<Vec<u8>>>;

    /// Body of a JSON POST request
    fn post_json<'a>(&'a self, url: &'a str, body: &'a str) -> LocalBoxFuture<'a, FetchResult<Vec<u8>>>;
}

/// Fetcher backed by the host's network stack
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpFetcher;

impl Fetcher for HttpFetcher {
    fn get<'a>(&'a self, url: &'a str) -> LocalBoxFuture<'a, FetchResult<Vec<u8>>> {
        Box::pin(HttpRequest::get(url).send())
    }

    fn post_json<'a>(&'a self, url: &'a str, body: &'a str) -> LocalBoxFuture<'a, FetchResult<Vec<u8>>> {
        Box::pin(HttpRequest::post(url).json(body).send())
    }
}

/// Fetcher serving fixed bytes per URL
#[derive(Default)]
pub struct StaticFetcher {
    entries: RefCell<HashMap<String, Vec<u8>>>,
    requests: RefCell<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.entries.borrow_mut().insert(url.into(), bytes.into());
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(self, url: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(url, bytes);
        self
    }

    /// Every URL asked for, in order
    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }

    fn lookup(&self, url: &str) -> FetchResult<Vec<u8>> {
        self.requests.borrow_mut().push(url.to_string());
        self.entries
            .borrow()
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::NotFound {
                url: url.to_string(),
            })
    }
}

impl Fetcher for StaticFetcher {
    fn get<'a>(&'a self, url: &'a str) -> LocalBoxFuture<'a, FetchResult<Vec<u8>>> {
        Box::pin(futures::future::ready(self.lookup(url)))
    }

    fn post_json<'a>(&'a self, url: &'a str, _body: &'a str) -> LocalBoxFuture<'a, FetchResult<Vec<u8>>> {
        Box::pin(futures::future::ready(self.lookup(url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn test_http_method_str() {
        assert_eq!(HttpMethod::Get.as_str(), "GET");
        assert_eq!(HttpMethod::Post.as_str(), "POST");
    }

    #[test]
    fn test_json_request_builder() {
        let req = HttpRequest::post("https://example.com/graphql").json("{}");
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.body.as_deref(), Some(&b"{}"[..]));
        assert!(req
            .headers
            .iter()
            .any(|(k, v)| k == "Content-Type" && v == "application/json"));
    }

    #[test]
    fn test_status_mapping() {
        let req = HttpRequest::get("http://x/a");
        assert_eq!(
            req.status_error(404),
            FetchError::NotFound {
                url: "http://x/a".to_string()
            }
        );
        assert!(matches!(req.status_error(500), FetchError::Status { status: 500, .. }));
    }

    #[test]
    fn test_static_fetcher() {
        let fetcher = StaticFetcher::new().with("bin/a.bin", b"abc".to_vec());
        assert_eq!(block_on(fetcher.get("bin/a.bin")).unwrap(), b"abc");
        assert!(matches!(
            block_on(fetcher.get("bin/b.bin")),
            Err(FetchError::NotFound { .. })
        ));
        assert_eq!(fetcher.requests(), vec!["bin/a.bin", "bin/b.bin"]);
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn test_native_missing_file_is_not_found() {
        let result = block_on(HttpFetcher.get("/definitely/not/here.bin"));
        assert!(matches!(result, Err(FetchError::NotFound { .. })));
    }
}
