cfg_if! {
    if #[cfg(feature = "transport_http")] {
        pub mod http;
    } else {}
}

pub use inner::{Method, ResponseBody, Transport, WireRequest};

mod inner {

    use apilane_shared::TransportError;
    use async_trait::async_trait;
    use url::Url;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Method {
        Get,
        Post,
    }

    /// One HTTP exchange as built by a channel flush.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct WireRequest {
        pub method: Method,
        pub url: Url,
        pub body: Option<Vec<u8>>,
    }

    impl WireRequest {
        pub fn body_str(&self) -> Option<&str> {
            self.body
                .as_deref()
                .and_then(|body| std::str::from_utf8(body).ok())
        }
    }

    /// Cancellable byte-fetch primitive. Dropping the returned future or body
    /// aborts the exchange.
    #[async_trait(?Send)]
    pub trait Transport {
        async fn exchange(
            &self,
            request: &WireRequest,
        ) -> Result<Box<dyn ResponseBody>, TransportError>;
    }

    /// Body of a response, consumed chunk by chunk.
    #[async_trait(?Send)]
    pub trait ResponseBody {
        fn status(&self) -> u16;
        fn content_length(&self) -> Option<u64>;
        /// Next chunk of the body, `None` once the body is complete
        async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
    }
}
