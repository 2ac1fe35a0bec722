//! Streaming response body backing one subscription.
//!
//! Wraps the registry receiver for use with `HttpResponse::streaming` and
//! removes the entry from the registry when the response is dropped. The
//! drop of the guard is the single close path for a connection: it fires
//! on client disconnect, navigation, or network loss alike.

use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::sse::registry::{Connection, ConnectionRegistry};

pub struct SseStream {
    rx: UnboundedReceiverStream<Bytes>,
    _guard: CloseGuard,
}

impl SseStream {
    pub fn new(registry: ConnectionRegistry, user_id: String, connection: Connection) -> Self {
        SseStream {
            rx: UnboundedReceiverStream::new(connection.rx),
            _guard: CloseGuard {
                registry,
                user_id,
                entry_id: connection.entry_id,
            },
        }
    }
}

impl Stream for SseStream {
    type Item = Result<Bytes, actix_web::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx).map(|frame| frame.map(Ok))
    }
}

struct CloseGuard {
    registry: ConnectionRegistry,
    user_id: String,
    entry_id: Uuid,
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        let registry = self.registry.clone();
        let user_id = std::mem::take(&mut self.user_id);
        let entry_id = self.entry_id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                registry.close(&user_id, entry_id).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserRole;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_stream_yields_registry_frames() {
        let registry = ConnectionRegistry::new();
        let connection = registry.open("u1", UserRole::Student).await;
        let mut stream = SseStream::new(registry.clone(), "u1".to_string(), connection);

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b":ok\n\n");

        registry
            .send_to_user("u1", "notification", &serde_json::json!({"id": "1"}))
            .await;
        let second = stream.next().await.unwrap().unwrap();
        assert!(second.starts_with(b"event: notification\n"));
    }

    #[tokio::test]
    async fn test_dropping_stream_closes_entry() {
        let registry = ConnectionRegistry::new();
        let connection = registry.open("u1", UserRole::Student).await;
        let stream = SseStream::new(registry.clone(), "u1".to_string(), connection);
        assert!(registry.is_user_connected("u1").await);

        drop(stream);
        // removal runs on a spawned task
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!registry.is_user_connected("u1").await);
        assert_eq!(registry.connection_count().await, 0);
    }
}
