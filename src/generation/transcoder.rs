use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::response::sse::Event;
use futures::Stream;
use log::{info, warn};
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant, Sleep};

use super::registry::GenerationRegistry;
use super::{ChunkPayload, StreamChunk};

/// A comment frame goes out whenever the channel stays quiet this long.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Terminal data frame every stream ends with, exactly once.
pub const DONE_MARKER: &str = "[DONE]";

/// What the transcoder emits before SSE framing: either a `data:` payload
/// or a `: keepalive` comment. Split out so tests can assert on frames
/// without reassembling wire text.
#[derive(Debug, PartialEq)]
enum Frame {
    Data(String),
    Comment,
}

/// Adapts a generation's chunk channel into an SSE event stream. Emits
/// each payload as a JSON data frame, comment keepalives on idle, and the
/// `[DONE]` marker as the final frame. Dropping the transcoder before the
/// sentinel arrived cancels the generation.
pub struct SseTranscoder {
    receiver: mpsc::Receiver<StreamChunk>,
    keepalive: Pin<Box<Sleep>>,
    finished: bool,
    guard: DisconnectGuard,
}

struct DisconnectGuard {
    registry: GenerationRegistry,
    generation_id: String,
    armed: bool,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if self.armed && self.registry.cancel(&self.generation_id) {
            info!(
                "client disconnected, cancelled generation {}",
                self.generation_id
            );
        }
    }
}

impl SseTranscoder {
    pub fn new(
        receiver: mpsc::Receiver<StreamChunk>,
        registry: GenerationRegistry,
        generation_id: String,
    ) -> Self {
        SseTranscoder {
            receiver,
            keepalive: Box::pin(sleep(KEEPALIVE_INTERVAL)),
            finished: false,
            guard: DisconnectGuard {
                registry,
                generation_id,
                armed: true,
            },
        }
    }

    fn reset_keepalive(&mut self) {
        self.keepalive
            .as_mut()
            .reset(Instant::now() + KEEPALIVE_INTERVAL);
    }

    fn poll_frame(&mut self, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match self.receiver.poll_recv(cx) {
            Poll::Ready(Some(StreamChunk::Fragment(payload))) => {
                self.reset_keepalive();
                Poll::Ready(Some(Frame::Data(encode_payload(&payload))))
            }
            Poll::Ready(Some(StreamChunk::Done)) => {
                self.finished = true;
                self.guard.armed = false;
                Poll::Ready(Some(Frame::Data(DONE_MARKER.to_string())))
            }
            Poll::Ready(None) => {
                // The producer is gone without sending the sentinel; the
                // client still gets a properly terminated stream.
                warn!(
                    "generation {} channel closed without the terminal marker",
                    self.guard.generation_id
                );
                self.finished = true;
                self.guard.armed = false;
                Poll::Ready(Some(Frame::Data(DONE_MARKER.to_string())))
            }
            Poll::Pending => match self.keepalive.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    self.reset_keepalive();
                    Poll::Ready(Some(Frame::Comment))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

fn encode_payload(payload: &ChunkPayload) -> String {
    serde_json::to_string(payload).unwrap_or_else(|e| {
        warn!("failed to encode stream payload: {e}");
        format!(r#"{{"error":"failed to encode stream payload: {e}"}}"#)
    })
}

impl Stream for SseTranscoder {
    type Item = Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.poll_frame(cx).map(|frame| {
            frame.map(|frame| {
                Ok(match frame {
                    Frame::Data(data) => Event::default().data(data),
                    Frame::Comment => Event::default().comment("keepalive"),
                })
            })
        })
    }
}
