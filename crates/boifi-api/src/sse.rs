use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use boifi_distributor::{Distributor, DistributorMessage, SubscriberId};
use futures::stream::{self, Stream};
use serde_json::json;

/// Drops the distributor's subscriber handle when the connection's stream is
/// torn down, regardless of whether the stream was polled to completion —
/// axum simply drops the response body future on client disconnect, so
/// cleanup has to live in `Drop`, not in a stream-exhaustion branch.
struct SubscriberGuard {
    distributor: Arc<Distributor>,
    id: SubscriberId,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        let distributor = self.distributor.clone();
        let id = self.id;
        tokio::spawn(async move {
            distributor.unsubscribe(id).await;
        });
    }
}

fn to_sse_event(msg: DistributorMessage) -> Event {
    match msg {
        DistributorMessage::FullConfig { policies, revision } => {
            Event::default().event("full_config").json_data(json!({ "policies": policies, "revision": revision })).unwrap()
        }
        DistributorMessage::Update { policies, revision } => {
            Event::default().event("update").json_data(json!({ "policies": policies, "revision": revision })).unwrap()
        }
        DistributorMessage::KeepAlive => Event::default().comment("keep-alive"),
    }
}

async fn subscription_stream(distributor: Arc<Distributor>) -> impl Stream<Item = Result<Event, Infallible>> {
    let (id, rx) = distributor.subscribe().await;
    let guard = SubscriberGuard { distributor, id };
    stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let msg = rx.recv().await?;
        Some((Ok(to_sse_event(msg)), (rx, guard)))
    })
}

/// `/v1/config/stream`: `full_config` on connect, `update` on every
/// subsequent change, comment-line keep-alives interleaved at a fixed
/// cadence so idle connections stay detectable.
pub async fn config_stream(distributor: Arc<Distributor>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = subscription_stream(distributor).await;
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(30)).text("keep-alive"))
}
