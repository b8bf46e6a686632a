use apilane_shared::TransportError;
use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client, Response};

use crate::transport::{Method, ResponseBody, Transport, WireRequest};

/// Transport backed by a `reqwest` client.
#[derive(Clone, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait(?Send)]
impl Transport for HttpTransport {
    async fn exchange(
        &self,
        request: &WireRequest,
    ) -> Result<Box<dyn ResponseBody>, TransportError> {
        let builder = match (request.method, &request.body) {
            (Method::Post, Some(body)) => self
                .client
                .post(request.url.clone())
                .header(CONTENT_TYPE, "text/plain;charset=UTF-8")
                .body(body.clone()),
            (Method::Post, None) => self.client.post(request.url.clone()),
            (Method::Get, _) => self.client.get(request.url.clone()),
        };

        let response = builder.send().await.map_err(|err| TransportError::Network {
            reason: err.to_string(),
        })?;
        Ok(Box::new(HttpBody { response }))
    }
}

struct HttpBody {
    response: Response,
}

#[async_trait(?Send)]
impl ResponseBody for HttpBody {
    fn status(&self) -> u16 {
        self.response.status().as_u16()
    }

    fn content_length(&self) -> Option<u64> {
        self.response.content_length()
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        self.response
            .chunk()
            .await
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .map_err(|err| TransportError::Network {
                reason: err.to_string(),
            })
    }
}
