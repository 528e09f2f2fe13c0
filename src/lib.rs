//! Realtime limit order book for bitFlyer Lightning
//!
//! Mirrors one product's board in memory from a `getboard` snapshot plus the
//! Lightstream `lightning_board_*` diff channel, and exposes best bid, best
//! ask and spread to in-process consumers.

pub mod models;
pub mod render;
pub mod scrapers;

pub use models::Config;
pub use scrapers::bitflyer_api::{BitflyerApi, BoardFetcher};
pub use scrapers::board::{Board, BoardUpdate, BoardView, PriceLevel, Side};
pub use scrapers::board_store::{BoardStore, SharedBoardStore, StoreConfig, StoreMetrics};
pub use scrapers::dispatch::{
    BoardDiffHandler, BoardOpenHandler, Directive, DispatchStats, Dispatcher, MessageHandler,
    SharedDispatchStats,
};
pub use scrapers::lightstream_ws::{
    board_channel, subscription_id, FeedMessage, LightstreamClient, LightstreamConfig,
};
