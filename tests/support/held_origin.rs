//! A single-connection origin that sends the first part of a body and then
//! holds the connection open until released.

use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

pub struct HeldOrigin {
    url: String,
    release: Option<oneshot::Sender<()>>,
}

impl HeldOrigin {
    /// Serves `body` with a `200` and its full `Content-Length`, writing only
    /// `body[..first]` before waiting for [`release`](Self::release).
    pub async fn start(body: Vec<u8>, first: usize) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (release, released) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut request = Vec::new();
            let mut buf = [0_u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            let head = format!(
                "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                body.len()
            );
            if socket.write_all(head.as_bytes()).await.is_err()
                || socket.write_all(&body[..first]).await.is_err()
                || socket.flush().await.is_err()
            {
                return;
            }
            let _ = released.await;
            // The client may hang up part way through.
            let _ = socket.write_all(&body[first..]).await;
            let _ = socket.shutdown().await;
        });
        Ok(Self {
            url: format!("http://{addr}/stream.m4s"),
            release: Some(release),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Lets the origin send the rest of the body.
    pub fn release(&mut self) {
        if let Some(release) = self.release.take() {
            let _ = release.send(());
        }
    }
}
