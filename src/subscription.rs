use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::task::{Context, Poll};

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::connection::{ConnError, Connection};
use crate::frame::Frame;
use crate::matcher::{
    ExactMatcher, MatchStrategy, PathMatcher, SubscriptionIdMatcher, WildcardMatcher,
};

struct Entry {
    id: String,
    headers: Vec<(String, String)>,
    token: CancellationToken,
}

type Table = HashMap<String, Entry>;

/// Shared view of the `destination → subscription id` table.
#[derive(Clone, Default)]
pub struct SubscriptionIds {
    table: Arc<RwLock<Table>>,
}

impl SubscriptionIds {
    fn read(&self) -> RwLockReadGuard<'_, Table> {
        match self.table.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Table> {
        match self.table.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Id allocated for `destination`, if it is subscribed.
    pub fn get(&self, destination: &str) -> Option<String> {
        self.read().get(destination).map(|e| e.id.clone())
    }

    /// Extra headers sent with the `SUBSCRIBE` for `destination`.
    pub fn headers(&self, destination: &str) -> Option<Vec<(String, String)>> {
        self.read().get(destination).map(|e| e.headers.clone())
    }

    pub fn destinations(&self) -> Vec<String> {
        let mut out: Vec<String> = self.read().keys().cloned().collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// End every live subscription stream and forget all entries.
    pub fn invalidate_all(&self) {
        let drained: Vec<(String, Entry)> = self.write().drain().collect();
        for (destination, entry) in drained {
            tracing::trace!(%destination, id = %entry.id, "subscription invalidated");
            entry.token.cancel();
        }
    }
}

/// Matcher shared by every subscription stream of one client.
type MatcherCell = Arc<RwLock<Arc<dyn PathMatcher>>>;

fn current_matcher(cell: &MatcherCell) -> Arc<dyn PathMatcher> {
    match cell.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Tracks which destinations are subscribed and hands out filtered frame
/// streams for them.
///
/// At most one broker subscription exists per destination. Every teardown of
/// the underlying [`Connection`] invalidates all entries.
pub struct SubscriptionRegistry {
    connection: Connection,
    ids: SubscriptionIds,
    matcher: MatcherCell,
    /// Held across a table change and the frame that announces it, so
    /// `SUBSCRIBE` and `UNSUBSCRIBE` reach the wire in table order.
    wire: tokio::sync::Mutex<()>,
}

impl SubscriptionRegistry {
    pub fn new(connection: Connection, strategy: MatchStrategy) -> Self {
        let ids = SubscriptionIds::default();
        let on_teardown = ids.clone();
        connection.on_teardown(move || on_teardown.invalidate_all());
        let matcher: Arc<dyn PathMatcher> = build_matcher(strategy, &ids);
        Self {
            connection,
            ids,
            matcher: Arc::new(RwLock::new(matcher)),
            wire: tokio::sync::Mutex::new(()),
        }
    }

    pub fn ids(&self) -> &SubscriptionIds {
        &self.ids
    }

    pub fn set_match_strategy(&self, strategy: MatchStrategy) {
        self.set_path_matcher(build_matcher(strategy, &self.ids));
    }

    /// Replace the matcher used by every subscription of this client.
    pub fn set_path_matcher(&self, matcher: Arc<dyn PathMatcher>) {
        if !self.ids.is_empty() {
            tracing::debug!("path matcher replaced while subscriptions are live");
        }
        match self.matcher.write() {
            Ok(mut guard) => *guard = matcher,
            Err(poisoned) => *poisoned.into_inner() = matcher,
        }
    }

    /// Subscribe to `destination`.
    ///
    /// Parameters
    /// - `destination`: broker destination, or a topic pattern when the
    ///   wildcard matcher is active.
    /// - `headers`: extra `SUBSCRIBE` headers.
    ///
    /// A second call for a destination that is already subscribed sends
    /// nothing and returns another handle on the existing subscription.
    pub async fn subscribe(
        &self,
        destination: &str,
        headers: Vec<(String, String)>,
    ) -> Result<Subscription, ConnError> {
        let _wire = self.wire.lock().await;
        let (id, token, fresh) = {
            let mut table = self.ids.write();
            // checked under the table lock: teardown flips the state before
            // it invalidates the table
            if !self.connection.is_connected() {
                return Err(ConnError::NotConnected);
            }
            match table.get(destination) {
                Some(entry) => (entry.id.clone(), entry.token.clone(), false),
                None => {
                    let id = Uuid::new_v4().to_string();
                    let token = CancellationToken::new();
                    table.insert(
                        destination.to_string(),
                        Entry {
                            id: id.clone(),
                            headers: headers.clone(),
                            token: token.clone(),
                        },
                    );
                    (id, token, true)
                }
            }
        };

        // attach before SUBSCRIBE goes out so no early MESSAGE is missed
        let handle = self.handle(destination, &id, &token);
        if !fresh {
            tracing::debug!(%destination, %id, "already subscribed");
            return Ok(handle);
        }

        let frame = Frame::subscribe(&id, destination).headers(headers);
        if let Err(e) = self.connection.send_frame(frame).await {
            let mut table = self.ids.write();
            if table.get(destination).is_some_and(|entry| entry.id == id) {
                table.remove(destination);
            }
            token.cancel();
            return Err(e);
        }
        tracing::debug!(%destination, %id, "subscribed");
        Ok(handle)
    }

    /// Drop the subscription for `destination`.
    ///
    /// Returns `Ok(true)` after sending `UNSUBSCRIBE` with the allocated id,
    /// `Ok(false)` when the destination was not subscribed.
    ///
    /// If the `UNSUBSCRIBE` cannot be written the subscription stays
    /// registered and its streams keep running, so the call can be retried.
    pub async fn unsubscribe(&self, destination: &str) -> Result<bool, ConnError> {
        let _wire = self.wire.lock().await;
        let Some(id) = self.ids.get(destination) else {
            return Ok(false);
        };
        tracing::debug!(%destination, %id, "unsubscribing");
        self.connection.send_frame(Frame::unsubscribe(&id)).await?;

        let removed = {
            let mut table = self.ids.write();
            match table.get(destination) {
                Some(entry) if entry.id == id => table.remove(destination),
                _ => None,
            }
        };
        if let Some(entry) = removed {
            entry.token.cancel();
        }
        Ok(true)
    }

    pub fn subscription_id(&self, destination: &str) -> Option<String> {
        self.ids.get(destination)
    }

    fn handle(&self, destination: &str, id: &str, token: &CancellationToken) -> Subscription {
        let matcher = self.matcher.clone();
        let dest = destination.to_string();
        let frames = self
            .connection
            .messages()
            .filter(move |frame| {
                let keep = current_matcher(&matcher).matches(&dest, frame);
                futures::future::ready(keep)
            })
            .take_until(token.clone().cancelled_owned());
        Subscription {
            id: id.to_string(),
            destination: destination.to_string(),
            frames: frames.boxed(),
        }
    }
}

fn build_matcher(strategy: MatchStrategy, ids: &SubscriptionIds) -> Arc<dyn PathMatcher> {
    match strategy {
        MatchStrategy::Exact => Arc::new(ExactMatcher),
        MatchStrategy::Wildcard => Arc::new(WildcardMatcher::new()),
        MatchStrategy::SubscriptionId => Arc::new(SubscriptionIdMatcher::new(ids.clone())),
    }
}

/// Frames delivered for one subscribed destination.
///
/// The stream ends when the destination is unsubscribed or the connection is
/// torn down.
pub struct Subscription {
    id: String,
    destination: String,
    frames: BoxStream<'static, Frame>,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub async fn recv(&mut self) -> Option<Frame> {
        self.frames.next().await
    }
}

impl Stream for Subscription {
    type Item = Frame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        self.frames.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalidate_all_cancels_and_clears() {
        let ids = SubscriptionIds::default();
        let token = CancellationToken::new();
        ids.write().insert(
            "/topic/a".into(),
            Entry {
                id: "sub-1".into(),
                headers: Vec::new(),
                token: token.clone(),
            },
        );
        assert_eq!(ids.get("/topic/a").as_deref(), Some("sub-1"));
        ids.invalidate_all();
        assert!(token.is_cancelled());
        assert!(ids.is_empty());
        assert_eq!(ids.get("/topic/a"), None);
    }

    #[test]
    fn destinations_are_sorted() {
        let ids = SubscriptionIds::default();
        for (dest, id) in [("/b", "2"), ("/a", "1")] {
            ids.write().insert(
                dest.into(),
                Entry {
                    id: id.into(),
                    headers: vec![("selector".into(), "x".into())],
                    token: CancellationToken::new(),
                },
            );
        }
        assert_eq!(ids.destinations(), vec!["/a".to_string(), "/b".to_string()]);
        assert_eq!(ids.headers("/a").map(|h| h.len()), Some(1));
    }
}
