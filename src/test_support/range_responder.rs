//! A wiremock responder that serves byte ranges of a fixed body.

use std::sync::{Arc, Mutex};

use wiremock::{Request, Respond, ResponseTemplate};

/// Answers `Range: bytes=a-b` / `bytes=a-` with 206 and a matching
/// `Content-Range`, a past-the-end range with 416, and no range with 200.
pub(crate) struct RangeResponder {
    body: Arc<Vec<u8>>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl RangeResponder {
    pub(crate) fn new(body: Vec<u8>) -> Self {
        Self {
            body: Arc::new(body),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Range header values received so far, in arrival order.
    pub(crate) fn seen_ranges(&self) -> Arc<Mutex<Vec<String>>> {
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
