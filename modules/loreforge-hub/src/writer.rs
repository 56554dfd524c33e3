use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use loreforge_common::Notification;

/// How long a single subscriber write may take before the connection is
/// considered broken. SSE consumers that cannot drain this fast are dead.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// One frame on an SSE connection: a data event or a comment keep-alive.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Event(Notification),
    /// Rendered as `: <text>\n\n` on the wire.
    Comment(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteError {
    /// The underlying stream is closed or broken; stop writing to it.
    Closed,
}

impl std::fmt::Display for WriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteError::Closed => write!(f, "stream closed"),
        }
    }
}

/// The hub's view of one subscriber connection.
#[async_trait]
pub trait StreamWriter: Send + Sync {
    async fn write(&self, event: StreamEvent) -> Result<(), WriteError>;

    /// Cheap liveness check consulted before attempting a write.
    fn is_writable(&self) -> bool;

    /// Idempotent close. Later writes must fail with `Closed`.
    fn close(&self);
}

/// Production writer: a bounded channel feeding the SSE response stream.
/// The receiver side lives in the HTTP layer; when the client goes away the
/// receiver is dropped and every subsequent write fails.
pub struct ChannelWriter {
    sender: mpsc::Sender<StreamEvent>,
    closed: AtomicBool,
}

impl ChannelWriter {
    pub fn new(sender: mpsc::Sender<StreamEvent>) -> Self {
        Self {
            sender,
            closed: AtomicBool::new(false),
        }
    }

    /// Writer plus the receiver to drive an SSE response from.
    pub fn pair(buffer: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl StreamWriter for ChannelWriter {
    async fn write(&self, event: StreamEvent) -> Result<(), WriteError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WriteError::Closed);
        }
        match tokio::time::timeout(WRITE_TIMEOUT, self.sender.send(event)).await {
            Ok(Ok(())) => Ok(()),
            // Receiver dropped, or the consumer stopped draining entirely.
            Ok(Err(_)) | Err(_) => {
                self.close();
                Err(WriteError::Closed)
            }
        }
    }

    fn is_writable(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.sender.is_closed()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loreforge_common::NotificationType;

    #[tokio::test]
    async fn write_after_close_fails() {
        let (writer, _rx) = ChannelWriter::pair(4);
        writer.close();
        assert!(!writer.is_writable());
        let err = writer
            .write(StreamEvent::Comment("ping".into()))
            .await
            .unwrap_err();
        assert_eq!(err, WriteError::Closed);
    }

    #[tokio::test]
    async fn dropped_receiver_breaks_the_writer() {
        let (writer, rx) = ChannelWriter::pair(4);
        drop(rx);
        let n = Notification::new(NotificationType::Success, "t", "m");
        assert!(writer.write(StreamEvent::Event(n)).await.is_err());
        assert!(!writer.is_writable());
    }
}
