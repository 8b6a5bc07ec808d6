use crate::error::FetchError;
use crate::store::Node;
use async_trait::async_trait;
use bytes::Bytes;
use common::TrafficSnapshot;
use http_body_util::{BodyExt, Empty};
use hyper::header::{AUTHORIZATION, HOST};
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, instrument};

/// Source of per-node traffic snapshots.
#[async_trait]
pub trait TrafficSource: Send + Sync {
    /// Scrape `node` once. Never touches persistent state.
    async fn fetch(&self, node: &Node) -> Result<TrafficSnapshot, FetchError>;
}

/// Scrapes `GET http://{address}/traffic` with the node secret in the
/// `Authorization` header.
pub struct HttpTrafficSource {
    timeout: Duration,
}

impl HttpTrafficSource {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn scrape(&self, node: &Node) -> Result<TrafficSnapshot, FetchError> {
        let stream = TcpStream::connect(&node.address)
            .await
            .map_err(|e| FetchError::Unreachable(format!("{}: {}", node.address, e)))?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| FetchError::Unreachable(format!("HTTP handshake failed: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Node connection error: {}", e);
            }
        });

        let req = Request::builder()
            .method(Method::GET)
            .uri("/traffic")
            .header(HOST, node.address.as_str())
            .header(AUTHORIZATION, node.secret.as_str())
            .body(Empty::<Bytes>::new())
            .map_err(|e| FetchError::Unreachable(format!("cannot build request: {}", e)))?;

        let res = sender
            .send_request(req)
            .await
            .map_err(|e| FetchError::Unreachable(format!("request failed: {}", e)))?;

        let status = res.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::Unauthorized(status.as_u16()));
        }
        if status != StatusCode::OK {
            return Err(FetchError::BadResponse(format!("unexpected status {}", status)));
        }

        let body = res
            .into_body()
            .collect()
            .await
            .map_err(|e| FetchError::Unreachable(format!("reading body failed: {}", e)))?
            .to_bytes();

        common::traffic::decode_snapshot(&body).map_err(|e| FetchError::BadResponse(e.to_string()))
    }
}

#[async_trait]
impl TrafficSource for HttpTrafficSource {
    #[instrument(skip(self, node), fields(node = %node.name, address = %node.address))]
    async fn fetch(&self, node: &Node) -> Result<TrafficSnapshot, FetchError> {
        match tokio::time::timeout(self.timeout, self.scrape(node)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.timeout)),
        }
    }
}
