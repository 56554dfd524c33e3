use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use futures::stream::Stream;
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;

use loreforge_hub::{ChannelWriter, HubHandle, StreamEvent};

use crate::auth::verify_token;
use crate::error::ApiError;
use crate::AppState;

/// Outbound buffer per SSE connection; the hub treats a connection that
/// cannot drain this as dead.
const STREAM_BUFFER: usize = 256;

#[derive(Deserialize)]
pub struct StreamParams {
    token: String,
}

/// Removes the subscriber when the client goes away and the response stream
/// is dropped.
struct UnsubscribeGuard {
    hub: HubHandle,
    subscriber_id: String,
}

impl Drop for UnsubscribeGuard {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.subscriber_id.clone());
    }
}

/// `GET /stream?token=…` — the per-user notification stream. Replayed
/// queue, then `connected`, then live events; `: ping` comments keep the
/// connection alive.
pub async fn stream(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StreamParams>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = verify_token(&state.config.jwt_secret, &params.token, "stream")?;

    let hub = state.hubs.get_or_spawn(&user_id).await;
    let (writer, rx) = ChannelWriter::pair(STREAM_BUFFER);
    let subscriber_id = hub
        .subscribe(Arc::new(writer))
        .await
        .map_err(loreforge_common::LoreforgeError::Anyhow)?;

    let guard = UnsubscribeGuard {
        hub,
        subscriber_id,
    };
    let stream: std::pin::Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>> =
        Box::pin(ReceiverStream::new(rx).map(move |event| {
            let _guard = &guard;
            Ok(match event {
                StreamEvent::Event(notification) => Event::default().data(
                    serde_json::to_string(&notification).unwrap_or_else(|_| "{}".to_string()),
                ),
                StreamEvent::Comment(comment) => Event::default().comment(comment),
            })
        }));

    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));

    Ok((headers, Sse::new(stream)))
}
