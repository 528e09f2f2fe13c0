//! Routes Lightstream messages to the board store
//!
//! Handlers are keyed by identifier (a subscription id or a channel name) and
//! only decode: each returns a [`Directive`] that the dispatcher executes.
//! The dispatcher is the single consumer of both the feed queue and the
//! snapshot-fetch completions, so every store mutation runs to completion
//! before the next event is looked at.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::bitflyer_api::BoardFetcher;
use super::board::{Board, BoardUpdate};
use super::board_store::SharedBoardStore;
use super::lightstream_ws::{board_channel, subscription_id, FeedMessage};

/// What the dispatcher should do with a decoded message
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    ApplyUpdate(BoardUpdate),
    FetchSnapshot,
    Ignore,
}

pub trait MessageHandler: Send + Sync {
    /// Subscription id or channel name this handler answers to
    fn identifier(&self) -> &str;

    fn handle(&self, message: &Value) -> Result<Directive>;
}

/// Board subscription acknowledged: time to fetch the snapshot
pub struct BoardOpenHandler {
    identifier: String,
}

impl BoardOpenHandler {
    pub fn new(product_code: &str) -> Self {
        Self {
            identifier: subscription_id(&board_channel(product_code)),
        }
    }
}

impl MessageHandler for BoardOpenHandler {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn handle(&self, _message: &Value) -> Result<Directive> {
        Ok(Directive::FetchSnapshot)
    }
}

/// Board diff pushed on `lightning_board_<code>`
pub struct BoardDiffHandler {
    identifier: String,
}

impl BoardDiffHandler {
    pub fn new(product_code: &str) -> Self {
        Self {
            identifier: board_channel(product_code),
        }
    }
}

impl MessageHandler for BoardDiffHandler {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn handle(&self, message: &Value) -> Result<Directive> {
        if message.is_null() {
            return Ok(Directive::Ignore);
        }
        let update =
            BoardUpdate::deserialize(message).context("Malformed board update payload")?;
        Ok(Directive::ApplyUpdate(update))
    }
}

/// Counters for the dispatch loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub messages_routed: u64,
    pub messages_unrouted: u64,
    pub messages_malformed: u64,
    pub fetches_started: u64,
    pub fetches_failed: u64,
}

/// Counters readable while the loop owns the dispatcher
pub type SharedDispatchStats = Arc<Mutex<DispatchStats>>;

pub struct Dispatcher {
    store: SharedBoardStore,
    fetcher: Arc<dyn BoardFetcher>,
    handlers: HashMap<String, Box<dyn MessageHandler>>,
    feed_rx: mpsc::UnboundedReceiver<FeedMessage>,
    fetch_tx: mpsc::UnboundedSender<Result<Board>>,
    fetch_rx: mpsc::UnboundedReceiver<Result<Board>>,
    fetch_in_flight: bool,
    stats: SharedDispatchStats,
}

impl Dispatcher {
    pub fn new(
        store: SharedBoardStore,
        fetcher: Arc<dyn BoardFetcher>,
        feed_rx: mpsc::UnboundedReceiver<FeedMessage>,
    ) -> Self {
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();
        Self {
            store,
            fetcher,
            handlers: HashMap::new(),
            feed_rx,
            fetch_tx,
            fetch_rx,
            fetch_in_flight: false,
            stats: Arc::new(Mutex::new(DispatchStats::default())),
        }
    }

    /// Open + diff handlers for one product
    pub fn for_product(
        product_code: &str,
        store: SharedBoardStore,
        fetcher: Arc<dyn BoardFetcher>,
        feed_rx: mpsc::UnboundedReceiver<FeedMessage>,
    ) -> Self {
        let mut dispatcher = Self::new(store, fetcher, feed_rx);
        dispatcher.register(BoardOpenHandler::new(product_code));
        dispatcher.register(BoardDiffHandler::new(product_code));
        dispatcher
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: MessageHandler + 'static,
    {
        let identifier = handler.identifier().to_string();
        if self
            .handlers
            .insert(identifier.clone(), Box::new(handler))
            .is_some()
        {
            warn!(identifier = %identifier, "Replaced existing message handler");
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats.lock().clone()
    }

    pub fn stats_handle(&self) -> SharedDispatchStats {
        Arc::clone(&self.stats)
    }

    /// Process events until the feed side closes, then return the final counters.
    ///
    /// A snapshot fetch still in flight when the feed closes is awaited and
    /// applied before returning.
    pub async fn run(mut self) -> Result<DispatchStats> {
        info!(handlers = self.handlers.len(), "Dispatcher started");

        loop {
            tokio::select! {
                msg = self.feed_rx.recv() => {
                    let Some(msg) = msg else {
                        info!("Feed closed");
                        break;
                    };
                    self.on_feed_message(msg);
                }
                Some(result) = self.fetch_rx.recv() => {
                    self.on_snapshot(result);
                }
            }
        }

        if self.fetch_in_flight {
            // only the spawned fetch keeps a sender alive past this point, so
            // recv yields None if that task dies without reporting
            let (detached, _) = mpsc::unbounded_channel();
            drop(std::mem::replace(&mut self.fetch_tx, detached));

            info!("Waiting for in-flight snapshot fetch");
            match self.fetch_rx.recv().await {
                Some(result) => self.on_snapshot(result),
                None => warn!("Snapshot fetch task ended without a result"),
            }
        }

        let stats = self.stats();
        info!(stats = ?stats, "Dispatcher stopped");
        Ok(stats)
    }

    fn on_feed_message(&mut self, msg: FeedMessage) {
        let Some(handler) = self.handlers.get(msg.identifier()) else {
            self.stats.lock().messages_unrouted += 1;
            debug!(identifier = %msg.identifier(), "No handler for message, dropping");
            return;
        };

        let payload = match &msg {
            FeedMessage::SubscriptionAck { .. } => Value::Bool(true),
            FeedMessage::Channel { message, .. } => message.clone(),
        };

        let directive = match handler.handle(&payload) {
            Ok(directive) => directive,
            Err(e) => {
                self.stats.lock().messages_malformed += 1;
                warn!(identifier = %msg.identifier(), error = %e, "Dropping malformed message");
                return;
            }
        };
        self.stats.lock().messages_routed += 1;

        match directive {
            Directive::ApplyUpdate(update) => self.store.lock().apply_update(update),
            Directive::FetchSnapshot => self.start_fetch(),
            Directive::Ignore => {}
        }
    }

    fn start_fetch(&mut self) {
        if self.store.lock().is_initialized() {
            debug!("Board already initialized, ignoring open acknowledgment");
            return;
        }
        if self.fetch_in_flight {
            debug!("Snapshot fetch already in flight");
            return;
        }

        self.fetch_in_flight = true;
        self.stats.lock().fetches_started += 1;
        info!("Requesting board snapshot");

        let fetcher = Arc::clone(&self.fetcher);
        let done = self.fetch_tx.clone();
        tokio::spawn(async move {
            let result = fetcher.fetch_board().await;
            let _ = done.send(result);
        });
    }

    fn on_snapshot(&mut self, result: Result<Board>) {
        self.fetch_in_flight = false;

        let board = match result {
            Ok(board) => board,
            Err(e) => {
                self.stats.lock().fetches_failed += 1;
                let pending = self.store.lock().pending_len();
                error!(error = %e, pending, "Board snapshot fetch failed; updates keep buffering");
                return;
            }
        };

        if let Err(e) = self.store.lock().initialize(board) {
            error!(error = %e, "Board snapshot rejected");
        }
    }
}
