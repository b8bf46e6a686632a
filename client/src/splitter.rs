use serde_json::Value;

/// `feed` result signalling a syntax error. The body can never be trusted
/// again and the client must reload.
pub const SPLIT_SYNTAX_ERROR: i32 = 0;
/// `feed` result for a chunk accepted without completing the body.
pub const SPLIT_PARTIAL: i32 = 1;
/// `feed` result once the final chunk completed the body.
pub const SPLIT_DONE: i32 = 2;

/// Incremental parser fed with raw body chunks.
///
/// `feed` returns `SPLIT_SYNTAX_ERROR` on malformed input, a positive status
/// while parsing succeeds, or a negative status carrying an error code the
/// parser recognised in the stream.
pub trait Splitter {
    fn feed(&mut self, chunk: &[u8], is_final: bool) -> i32;
    /// The parsed response, available after the final chunk was accepted
    fn take_response(&mut self) -> Option<Value>;
}

/// Creates a fresh splitter for every exchange of a channel.
pub trait SplitterFactory {
    fn create(&self, service: &str, streaming: bool) -> Box<dyn Splitter>;
}

/// Buffers the body and parses it as one JSON document on the final chunk.
#[derive(Default)]
pub struct JsonSplitter {
    buffer: Vec<u8>,
    response: Option<Value>,
}

impl JsonSplitter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Splitter for JsonSplitter {
    fn feed(&mut self, chunk: &[u8], is_final: bool) -> i32 {
        self.buffer.extend_from_slice(chunk);
        if !is_final {
            return SPLIT_PARTIAL;
        }
        match serde_json::from_slice::<Value>(&self.buffer) {
            Ok(value) => {
                self.buffer.clear();
                if let Some(code) = value.as_i64().filter(|code| *code < 0) {
                    self.response = Some(value);
                    return i32::try_from(code).unwrap_or(i32::MIN);
                }
                self.response = Some(value);
                SPLIT_DONE
            }
            Err(_) => SPLIT_SYNTAX_ERROR,
        }
    }

    fn take_response(&mut self) -> Option<Value> {
        self.response.take()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSplitterFactory;

impl SplitterFactory for JsonSplitterFactory {
    fn create(&self, _service: &str, _streaming: bool) -> Box<dyn Splitter> {
        Box::new(JsonSplitter::new())
    }
}
