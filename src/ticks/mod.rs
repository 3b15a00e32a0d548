//! Decoded tick representation (C1's output) and supporting types.
//!
//! Kite packs multiple tick "packets" into a single binary websocket frame.
//! See [`decode`] for the wire layout and classification rules.

mod decode;

pub use decode::decode_frame;

use crate::price::Price;

/// Which fields a decoded packet carries, inferred from its length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickMode {
    Ltp,
    IndexQuote,
    Quote,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ohlc {
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DepthLevel {
    pub quantity: u32,
    pub price: Price,
    pub order_count: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketDepth {
    pub buy: [DepthLevel; 5],
    pub sell: [DepthLevel; 5],
}

/// One decoded market-data record for one instrument at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    pub token: u32,
    pub mode: TickMode,
    pub last_price: Price,

    pub last_traded_qty: Option<u32>,
    pub avg_traded_price: Option<Price>,
    pub volume_traded: Option<u32>,
    pub total_buy_qty: Option<u32>,
    pub total_sell_qty: Option<u32>,
    pub ohlc: Option<Ohlc>,
    pub change: Option<Price>,

    pub last_trade_time: Option<u32>,
    pub oi: Option<u32>,
    pub oi_day_high: Option<u32>,
    pub oi_day_low: Option<u32>,
    pub exchange_timestamp: Option<u32>,
    pub depth: Option<MarketDepth>,
}

impl Tick {
    fn ltp(token: u32, last_price: Price) -> Self {
        Self {
            token,
            mode: TickMode::Ltp,
            last_price,
            last_traded_qty: None,
            avg_traded_price: None,
            volume_traded: None,
            total_buy_qty: None,
            total_sell_qty: None,
            ohlc: None,
            change: None,
            last_trade_time: None,
            oi: None,
            oi_day_high: None,
            oi_day_low: None,
            exchange_timestamp: None,
            depth: None,
        }
    }
}

/// What a decoded websocket message turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameKind {
    /// One or more decoded ticks (possibly zero, if every packet was short or invalid).
    Data(Vec<Tick>),
    Heartbeat,
    TextControl(serde_json::Value),
    Unknown,
}
