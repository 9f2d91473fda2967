//! Unified market-data service.
//!
//! Maintains the last [`MarketSnapshot`] per `(venue, instrument)`, records
//! venue heartbeats, fans updates out to subscribers, and republishes to the
//! external pub/sub transport — best-effort, never blocking the writer.
//!
//! # Ordering
//!
//! Snapshots are last-writer-wins per key, keyed by `event_time`: an update
//! carrying an older `event_time` than the stored snapshot is dropped. There
//! is no ordering guarantee across venues.
//!
//! # Staleness
//!
//! A venue is stale when `now - last_heartbeat > stale_threshold` (default
//! 30 s). Consumers must check [`MarketDataService::check_data_quality`]
//! before relying on a snapshot.

pub mod cache;

pub use cache::TtlCache;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use cxd_domain::{DataQuality, L2Snapshot, MarketSnapshot};

// ---------------------------------------------------------------------------
// Publisher boundary
// ---------------------------------------------------------------------------

/// External pub/sub transport for snapshot fan-out.
///
/// Implementations must be non-blocking: publish failures are the
/// implementation's problem to log and drop. The engine never retries.
pub trait QuotePublisher: Send + Sync {
    /// Topic is `prices:{venue}:{instrument}`.
    fn publish(&self, topic: &str, snapshot: &MarketSnapshot);
}

/// Discards everything. Default for tests and backtests.
pub struct NoopPublisher;

impl QuotePublisher for NoopPublisher {
    fn publish(&self, _topic: &str, _snapshot: &MarketSnapshot) {}
}

/// In-process broadcast publisher. Lagging receivers lose messages rather
/// than backpressuring the market-data writer.
pub struct BroadcastPublisher {
    tx: tokio::sync::broadcast::Sender<(String, MarketSnapshot)>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> (Self, tokio::sync::broadcast::Receiver<(String, MarketSnapshot)>) {
        let (tx, rx) = tokio::sync::broadcast::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<(String, MarketSnapshot)> {
        self.tx.subscribe()
    }

    /// Stream view over the topic feed for `Stream`-combinator consumers.
    pub fn stream(
        &self,
    ) -> tokio_stream::wrappers::BroadcastStream<(String, MarketSnapshot)> {
        tokio_stream::wrappers::BroadcastStream::new(self.tx.subscribe())
    }
}

impl QuotePublisher for BroadcastPublisher {
    fn publish(&self, topic: &str, snapshot: &MarketSnapshot) {
        // send() only fails when there are no receivers; that is fine.
        let _ = self.tx.send((topic.to_string(), snapshot.clone()));
    }
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

/// Subscriber callback. Errors are swallowed and logged; a failing
/// subscriber never affects the writer or other subscribers.
pub type QuoteCallback = Arc<dyn Fn(MarketSnapshot) -> anyhow::Result<()> + Send + Sync>;

struct Subscription {
    venue: String,
    /// Empty = all instruments on the venue.
    instruments: Vec<String>,
    callback: QuoteCallback,
}

impl Subscription {
    fn matches(&self, snapshot: &MarketSnapshot) -> bool {
        self.venue.eq_ignore_ascii_case(&snapshot.venue)
            && (self.instruments.is_empty()
                || self
                    .instruments
                    .iter()
                    .any(|i| i.eq_ignore_ascii_case(&snapshot.instrument)))
    }
}

// ---------------------------------------------------------------------------
// Quote updates
// ---------------------------------------------------------------------------

/// Raw quote fields supplied by an adapter. The service normalises these
/// into a [`MarketSnapshot`] (mid, spread, spread_bps).
#[derive(Clone, Debug)]
pub struct QuoteUpdate {
    pub venue: String,
    pub instrument: String,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub volume_24h: Option<f64>,
    pub bid_size: Option<f64>,
    pub ask_size: Option<f64>,
    pub volatility_bps: Option<f64>,
    pub event_time: Option<DateTime<Utc>>,
    pub data_quality: DataQuality,
}

impl QuoteUpdate {
    pub fn new(
        venue: impl Into<String>,
        instrument: impl Into<String>,
        bid: f64,
        ask: f64,
        last: f64,
    ) -> Self {
        Self {
            venue: venue.into(),
            instrument: instrument.into(),
            bid,
            ask,
            last,
            volume_24h: None,
            bid_size: None,
            ask_size: None,
            volatility_bps: None,
            event_time: None,
            data_quality: DataQuality::Realtime,
        }
    }

    pub fn with_volume(mut self, volume_24h: f64) -> Self {
        self.volume_24h = Some(volume_24h);
        self
    }

    pub fn with_event_time(mut self, t: DateTime<Utc>) -> Self {
        self.event_time = Some(t);
        self
    }

    pub fn with_quality(mut self, q: DataQuality) -> Self {
        self.data_quality = q;
        self
    }
}

/// Result of a per-venue staleness check.
#[derive(Clone, Debug, PartialEq)]
pub struct VenueDataQuality {
    pub venue: String,
    pub stale: bool,
    pub stale_seconds: Option<f64>,
    pub last_update: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

struct State {
    snapshots: BTreeMap<(String, String), MarketSnapshot>,
    heartbeats: BTreeMap<String, DateTime<Utc>>,
    subscriptions: Vec<Subscription>,
}

/// The market-data service. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct MarketDataService {
    state: Arc<RwLock<State>>,
    publisher: Arc<dyn QuotePublisher>,
    stale_threshold: Duration,
}

impl MarketDataService {
    pub const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(30);

    pub fn new(publisher: Arc<dyn QuotePublisher>) -> Self {
        Self::with_stale_threshold(publisher, Self::DEFAULT_STALE_THRESHOLD)
    }

    pub fn with_stale_threshold(publisher: Arc<dyn QuotePublisher>, threshold: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(State {
                snapshots: BTreeMap::new(),
                heartbeats: BTreeMap::new(),
                subscriptions: Vec::new(),
            })),
            publisher,
            stale_threshold: threshold,
        }
    }

    /// Register a callback for updates on `venue`. An empty instrument list
    /// subscribes to every instrument on that venue.
    pub async fn subscribe(
        &self,
        venue: impl Into<String>,
        instruments: Vec<String>,
        callback: QuoteCallback,
    ) {
        let venue = venue.into();
        let mut g = self.state.write().await;
        debug!(venue = %venue, instruments = instruments.len(), "market_data_subscribed");
        g.subscriptions.push(Subscription {
            venue,
            instruments,
            callback,
        });
    }

    /// Last known snapshot for one `(venue, instrument)`.
    pub async fn get_price(&self, venue: &str, instrument: &str) -> Option<MarketSnapshot> {
        let g = self.state.read().await;
        g.snapshots
            .get(&(venue.to_lowercase(), instrument.to_uppercase()))
            .cloned()
    }

    /// All snapshots currently held for a venue.
    pub async fn venue_snapshots(&self, venue: &str) -> Vec<MarketSnapshot> {
        let g = self.state.read().await;
        let venue = venue.to_lowercase();
        g.snapshots
            .iter()
            .filter(|((v, _), _)| *v == venue)
            .map(|(_, s)| s.clone())
            .collect()
    }

    /// Apply a quote update: normalise, store (last-writer-wins by
    /// `event_time`), heartbeat, notify, publish.
    pub async fn update_quote(&self, update: QuoteUpdate) {
        let receive_time = Utc::now();
        let event_time = update.event_time.unwrap_or(receive_time);

        let mut snapshot = MarketSnapshot::from_quote(
            update.venue.to_lowercase(),
            update.instrument.to_uppercase(),
            update.bid,
            update.ask,
            update.last,
            event_time,
            receive_time,
            update.data_quality,
        );
        snapshot.volume_24h = update.volume_24h;
        snapshot.bid_size = update.bid_size;
        snapshot.ask_size = update.ask_size;
        snapshot.volatility_bps = update.volatility_bps;

        self.store_and_fan_out(snapshot).await;
    }

    /// Apply an L2 book update; best bid/ask become the quote.
    pub async fn update_order_book(
        &self,
        venue: impl Into<String>,
        instrument: impl Into<String>,
        bids: Vec<(f64, f64)>,
        asks: Vec<(f64, f64)>,
        event_time: Option<DateTime<Utc>>,
        data_quality: DataQuality,
    ) {
        let receive_time = Utc::now();
        let best_bid = bids.first().map(|l| l.0).unwrap_or(0.0);
        let best_ask = asks.first().map(|l| l.0).unwrap_or(0.0);
        let last = if best_bid > 0.0 && best_ask > 0.0 {
            (best_bid + best_ask) / 2.0
        } else {
            0.0
        };

        let mut snapshot = MarketSnapshot::from_quote(
            venue.into().to_lowercase(),
            instrument.into().to_uppercase(),
            best_bid,
            best_ask,
            last,
            event_time.unwrap_or(receive_time),
            receive_time,
            data_quality,
        );
        snapshot.bid_size = bids.first().map(|l| l.1);
        snapshot.ask_size = asks.first().map(|l| l.1);
        snapshot.l2 = Some(L2Snapshot { bids, asks });

        self.store_and_fan_out(snapshot).await;
    }

    async fn store_and_fan_out(&self, snapshot: MarketSnapshot) {
        let key = (snapshot.venue.clone(), snapshot.instrument.clone());
        let callbacks: Vec<QuoteCallback>;
        {
            let mut g = self.state.write().await;

            // Last-writer-wins by event_time: never apply an older event over
            // a newer one.
            if let Some(existing) = g.snapshots.get(&key) {
                if existing.event_time > snapshot.event_time {
                    debug!(
                        venue = %snapshot.venue,
                        instrument = %snapshot.instrument,
                        "stale_quote_dropped"
                    );
                    return;
                }
            }

            g.snapshots.insert(key, snapshot.clone());
            g.heartbeats.insert(snapshot.venue.clone(), Utc::now());

            callbacks = g
                .subscriptions
                .iter()
                .filter(|s| s.matches(&snapshot))
                .map(|s| Arc::clone(&s.callback))
                .collect();
        }

        // Notify on a background task so a slow subscriber cannot block the
        // adapter receive loop. Callback errors are swallowed and logged.
        if !callbacks.is_empty() {
            let snap = snapshot.clone();
            tokio::spawn(async move {
                for cb in callbacks {
                    if let Err(e) = cb(snap.clone()) {
                        warn!(error = %e, "subscriber_callback_failed");
                    }
                }
            });
        }

        let topic = format!("prices:{}:{}", snapshot.venue, snapshot.instrument);
        self.publisher.publish(&topic, &snapshot);
    }

    /// Per-venue staleness signal.
    pub async fn check_data_quality(&self, venue: &str) -> VenueDataQuality {
        let g = self.state.read().await;
        match g.heartbeats.get(&venue.to_lowercase()) {
            None => VenueDataQuality {
                venue: venue.to_string(),
                stale: true,
                stale_seconds: None,
                last_update: None,
            },
            Some(hb) => {
                let age = (Utc::now() - *hb)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                VenueDataQuality {
                    venue: venue.to_string(),
                    stale: age > self.stale_threshold,
                    stale_seconds: Some(age.as_secs_f64()),
                    last_update: Some(*hb),
                }
            }
        }
    }

    /// True when any of `venues` is stale (no data at all counts as stale).
    pub async fn any_stale(&self, venues: &[String]) -> bool {
        for v in venues {
            if self.check_data_quality(v).await.stale {
                return true;
            }
        }
        false
    }
}
