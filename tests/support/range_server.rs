//! Mock origins that serve a fixed body with or without byte-range support.

use std::sync::{Arc, Mutex};

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Answers `Range: bytes=a-b` / `bytes=a-` with 206 and a matching
/// `Content-Range`, a past-the-end range with 416, and no range with 200.
pub struct RangeResponder {
    body: Arc<Vec<u8>>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl RangeResponder {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body: Arc::new(body),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Range header values received so far, in arrival order.
    pub fn seen_ranges(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.seen)
    }
}

fn parse_range(value: &str, len: u64) -> Option<(u64, u64)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    let end = if end.is_empty() {
        len.checked_sub(1)?
    } else {
        end.parse::<u64>().ok()?.min(len.checked_sub(1)?)
    };
    (start <= end).then_some((start, end))
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let len = self.body.len() as u64;
        let Some(value) = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
        else {
            return ResponseTemplate::new(200).set_body_bytes(self.body.as_slice().to_vec());
        };
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(value.clone());
        }

        match parse_range(&value, len) {
            Some((start, end)) => {
                let (from, to) = (
                    usize::try_from(start).unwrap_or(usize::MAX),
                    usize::try_from(end).unwrap_or(usize::MAX),
                );
                ResponseTemplate::new(206)
                    .insert_header("content-range", format!("bytes {start}-{end}/{len}"))
                    .set_body_bytes(self.body[from..=to].to_vec())
            }
            None => ResponseTemplate::new(416)
                .insert_header("content-range", format!("bytes */{len}")),
        }
    }
}

/// HEAD advertising `Accept-Ranges: bytes` and `advertised` bytes, GET served
/// by a [`RangeResponder`] over `body`. Returns the seen-ranges log.
pub async fn mount_ranged_with_length(
    server: &MockServer,
    route: &str,
    body: &[u8],
    advertised: usize,
) -> Arc<Mutex<Vec<String>>> {
    Mock::given(method("HEAD"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("accept-ranges", "bytes")
                .insert_header("content-length", advertised.to_string().as_str())
                .set_body_bytes(vec![0_u8; advertised]),
        )
        .mount(server)
        .await;
    let responder = RangeResponder::new(body.to_vec());
    let seen = responder.seen_ranges();
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(responder)
        .mount(server)
        .await;
    seen
}

/// Range-capable origin whose HEAD reports the true length.
pub async fn mount_ranged(server: &MockServer, route: &str, body: &[u8]) -> Arc<Mutex<Vec<String>>> {
    mount_ranged_with_length(server, route, body, body.len()).await
}

/// Origin without range support: HEAD has no `Accept-Ranges`, GET always
/// returns the whole body with 200.
pub async fn mount_unranged(server: &MockServer, route: &str, body: &[u8]) {
    Mock::given(method("HEAD"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-length", body.len().to_string().as_str())
                .set_body_bytes(body.to_vec()),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
}

/// Deterministic test body.
pub fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
