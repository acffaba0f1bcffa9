//! The execution stream: typed chunks over a bounded channel.
//!
//! The runner emits into an abstract [`ChunkSink`]; transports adapt the
//! receiving half. The channel is bounded, so a consumer that stops reading
//! blocks the producer at the next emission; the execution deadline then
//! terminates the run, which is the intended slow-consumer behaviour.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Default capacity of an execution stream channel.
pub const DEFAULT_STREAM_CAPACITY: usize = 32;

/// One tagged record on the execution stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Chunk {
    /// A reasoning step was produced.
    Thinking {
        /// 0-based iteration index.
        iteration: u32,
        /// The thought text.
        content: String,
    },
    /// A tool is about to be invoked.
    ToolCall {
        /// Tool name.
        tool: String,
        /// The raw input handed to the registry.
        input: String,
    },
    /// A tool invocation finished.
    ToolResult {
        /// Tool name.
        tool: String,
        /// Output text (or failure description).
        output: String,
        /// Whether the invocation succeeded.
        success: bool,
    },
    /// Incremental assistant text, used when the model streams.
    Response {
        /// The text delta.
        content: String,
    },
    /// The terminal chunk; emitted exactly once, last.
    Final {
        /// The final response text.
        content: String,
    },
}

impl Chunk {
    /// Whether this is the terminal chunk.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        matches!(self, Self::Final { .. })
    }
}

/// A chunk plus its position and timestamp on the stream.
///
/// Timestamps are monotonically non-decreasing within one stream even if the
/// wall clock steps backwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkEnvelope {
    /// 0-based sequence number within the stream.
    pub seq: u64,
    /// Milliseconds since the Unix epoch, monotonised per stream.
    pub timestamp_ms: i64,
    /// The payload.
    pub chunk: Chunk,
}

/// Error returned when the consumer has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamClosed;

impl std::fmt::Display for StreamClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "execution stream closed by consumer")
    }
}

impl std::error::Error for StreamClosed {}

/// The producing half of an execution stream. Single-producer by
/// construction: emission takes `&mut self`.
#[derive(Debug)]
pub struct ChunkSink {
    tx: mpsc::Sender<ChunkEnvelope>,
    seq: u64,
    last_timestamp_ms: i64,
}

impl ChunkSink {
    fn now_ms() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
    }

    /// Emit one chunk, waiting if the channel is full.
    ///
    /// # Errors
    ///
    /// Returns [`StreamClosed`] once the receiving half has been dropped;
    /// the producer must stop emitting.
    pub async fn emit(&mut self, chunk: Chunk) -> Result<(), StreamClosed> {
        let timestamp_ms = Self::now_ms().max(self.last_timestamp_ms);
        let envelope = ChunkEnvelope {
            seq: self.seq,
            timestamp_ms,
            chunk,
        };
        self.tx.send(envelope).await.map_err(|_| StreamClosed)?;
        self.seq += 1;
        self.last_timestamp_ms = timestamp_ms;
        Ok(())
    }

    /// How many chunks have been emitted so far.
    #[must_use]
    pub const fn emitted(&self) -> u64 {
        self.seq
    }
}

/// The consuming half of an execution stream.
pub type ChunkStream = ReceiverStream<ChunkEnvelope>;

/// Create a bounded execution stream.
#[must_use]
pub fn channel(capacity: usize) -> (ChunkSink, ChunkStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ChunkSink {
            tx,
            seq: 0,
            last_timestamp_ms: 0,
        },
        ReceiverStream::new(rx),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn chunks_arrive_ordered_and_stamped() {
        let (mut sink, mut stream) = channel(8);
        sink.emit(Chunk::Thinking {
            iteration: 0,
            content: "first".into(),
        })
        .await
        .unwrap();
        sink.emit(Chunk::Final {
            content: "done".into(),
        })
        .await
        .unwrap();
        drop(sink);

        let a = stream.next().await.unwrap();
        let b = stream.next().await.unwrap();
        assert!(stream.next().await.is_none());
        assert_eq!(a.seq, 0);
        assert_eq!(b.seq, 1);
        assert!(b.timestamp_ms >= a.timestamp_ms);
        assert!(b.chunk.is_final());
    }

    #[tokio::test]
    async fn dropped_receiver_closes_the_sink() {
        let (mut sink, stream) = channel(1);
        drop(stream);
        let result = sink
            .emit(Chunk::Response {
                content: "x".into(),
            })
            .await;
        assert_eq!(result, Err(StreamClosed));
    }

    #[tokio::test]
    async fn bounded_channel_applies_backpressure() {
        let (mut sink, mut stream) = channel(1);
        sink.emit(Chunk::Response { content: "a".into() })
            .await
            .unwrap();

        // Second emit must block until the consumer reads.
        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            sink.emit(Chunk::Response { content: "b".into() }),
        )
        .await;
        assert!(pending.is_err(), "emit should block on a full channel");

        let _ = stream.next().await;
        sink.emit(Chunk::Response { content: "c".into() })
            .await
            .unwrap();
    }

    #[test]
    fn chunk_serializes_tagged() {
        let chunk = Chunk::ToolCall {
            tool: "calculator".into(),
            input: "1+1".into(),
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["kind"], "tool_call");
        assert_eq!(json["tool"], "calculator");
    }
}
