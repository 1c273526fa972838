//! Live event pump of an open conversation.

use backon::Retryable;
use std::{sync::Arc, time::Duration};

use super::{ConversationInner, Notice};
use crate::{
    error::Error,
    feed::{RecvError, Subscription},
};

/// Feed events into the transcript until torn down or the feed is lost for
/// good. Runs as a spawned task; aborting it drops the subscription.
pub(super) async fn run(inner: Arc<ConversationInner>, mut subscription: Option<Subscription>) {
    loop {
        if inner.is_torn_down() {
            break;
        }

        if subscription.is_none() {
            match resubscribe(&inner).await {
                Some(restored) => {
                    subscription = Some(restored);
                    catch_up(&inner).await;
                }
                None => break,
            }
            continue;
        }
        let Some(feed) = subscription.as_mut() else {
            continue;
        };

        match feed.recv().await {
            Ok(message) => inner.admit(message),
            Err(RecvError::Lagged(missed)) => {
                log::warn!("live feed dropped {} events, reconciling", missed);
                catch_up(&inner).await;
            }
            Err(RecvError::Closed) => {
                if inner.is_torn_down() {
                    break;
                }
                log::warn!("live feed closed for {} <-> {}", inner.me, inner.other);
                subscription = None;
                inner.feed_lost(RecvError::Closed.to_string());
            }
        }
    }
    log::debug!("event pump for {} <-> {} stopped", inner.me, inner.other);
}

async fn resubscribe(inner: &ConversationInner) -> Option<Subscription> {
    let policy = &inner.config.reconnect;
    if !policy.enabled {
        return None;
    }

    let result = (|| inner.store.subscribe_insertions())
        .retry(policy.backoff())
        .when(|e: &Error| e.is_retryable() && !inner.is_torn_down())
        .notify(|e: &Error, delay: Duration| {
            log::debug!("resubscribe failed: {}, retrying in {:?}", e, delay);
        })
        .await;

    match result {
        Ok(restored) => {
            if inner.is_torn_down() {
                return None;
            }
            log::info!("live feed restored as {}", restored.id());
            inner.feed_restored(restored.id());
            Some(restored)
        }
        Err(e) => {
            log::warn!("giving up on live feed: {}", e);
            inner.notice(Notice::SubscriptionFailure(e.to_string()));
            None
        }
    }
}

async fn catch_up(inner: &ConversationInner) {
    match inner.reconcile().await {
        Ok(added) => log::debug!("reconciliation merged {} messages", added),
        Err(e) => {
            log::warn!("reconciliation fetch failed: {}", e);
            inner.notice(Notice::FetchFailure(e.to_string()));
        }
    }
}
