use std::{convert::Infallible, time::Duration};

use axum::{
    extract::State,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::{Stream, StreamExt};
use serde::Deserialize;

use crate::{
    error::AppError,
    extract::{AppPath, AppQuery},
    realtime::{ChangeEvent, EventKind, RealtimeHub, Resource},
    utils::jwt::Viewer,
};

#[derive(Debug, Deserialize)]
pub struct RealtimeParams {
    #[serde(default)]
    pub event: EventKind,
}

/// GET /api/realtime/{resource}?event=insert|update|delete
///
/// Server-sent events for one topic. Notification events only ever reach
/// their recipient, so that resource requires a session.
pub async fn subscribe(
    State(hub): State<RealtimeHub>,
    viewer: Viewer,
    AppPath(resource): AppPath<String>,
    AppQuery(params): AppQuery<RealtimeParams>,
) -> Result<impl IntoResponse, AppError> {
    let resource: Resource = resource.parse().map_err(AppError::NotFound)?;

    if resource == Resource::Notifications && viewer.identity_id().is_none() {
        return Err(AppError::AuthError(
            "Notifications stream requires authentication".to_string(),
        ));
    }

    // Subscribe before the response goes out so nothing published after the
    // handshake is missed.
    let subscription = hub.subscribe(resource, params.event, viewer.identity_id());
    tracing::debug!(
        "[Realtime] SSE subscriber on {}/{} (viewer {:?})",
        resource,
        params.event,
        viewer.identity_id()
    );

    let stream = events(subscription.into_stream());

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

fn events(
    changes: impl Stream<Item = ChangeEvent> + Send + 'static,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    changes.filter_map(|change| async move {
        match Event::default()
            .event(change.kind.to_string())
            .json_data(&change)
        {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                tracing::warn!("[Realtime] could not encode {} event: {}", change.resource, e);
                None
            }
        }
    })
}
