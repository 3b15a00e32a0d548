//! View Publisher (C5): on a fixed timer, renders the snapshot into paged
//! text views and creates-or-edits messages in the chat sink.

use crate::catalog::InstrumentCatalog;
use crate::core::config::PublisherConfig;
use crate::registry::SubscriptionRegistry;
use crate::sinks::{MessageHandle, MessageSink};
use crate::snapshot::{Entry, SnapshotStore};
use chrono_tz::Tz;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

const HEADER_MARKER: &str = "LIVE TRACKER ";

/// One row the publisher renders: global 1-based index, display name, and
/// the snapshot entry itself.
struct Row<'a> {
    global_index: usize,
    name: String,
    entry: &'a Entry,
}

pub struct ViewPublisher<S: MessageSink> {
    store: Arc<SnapshotStore>,
    registry: Arc<SubscriptionRegistry>,
    catalog: Arc<InstrumentCatalog>,
    sink: Arc<S>,
    channel_id: String,
    config: PublisherConfig,
    zone: Tz,
    handles: Mutex<Vec<Option<MessageHandle>>>,
}

impl<S: MessageSink> ViewPublisher<S> {
    pub fn new(
        store: Arc<SnapshotStore>,
        registry: Arc<SubscriptionRegistry>,
        catalog: Arc<InstrumentCatalog>,
        sink: Arc<S>,
        channel_id: String,
        config: PublisherConfig,
        zone: Tz,
    ) -> Self {
        Self {
            store,
            registry,
            catalog,
            sink,
            channel_id,
            config,
            zone,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Drops all known page handles so the next tick re-sends every page.
    /// Called by the credential rotator after a pipeline restart.
    pub async fn clear_handles(&self) {
        self.handles.lock().await.clear();
    }

    /// Best-effort adoption of pre-existing tracker messages in the channel,
    /// so a process restart doesn't pile up duplicate trackers. Recognizes
    /// its own messages by the `LIVE TRACKER ` header and assigns them to
    /// page slots by the page number embedded in that header, not by fetch
    /// order (the sink may not return messages oldest-first).
    pub async fn adopt_existing_messages(&self) {
        if !self.config.adopt_existing_messages {
            return;
        }
        let recent = match self.sink.fetch_recent(&self.channel_id, 100).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "failed to fetch recent messages for handle adoption");
                return;
            }
        };

        let mut by_page: Vec<Option<(i64, MessageHandle)>> = Vec::new();
        for msg in recent {
            let Some(page_index) = parse_page_index(&msg.text) else {
                continue;
            };
            if by_page.len() <= page_index {
                by_page.resize(page_index + 1, None);
            }
            let replace = match &by_page[page_index] {
                Some((existing_ts, _)) => msg.created_at_ms > *existing_ts,
                None => true,
            };
            if replace {
                by_page[page_index] = Some((msg.created_at_ms, msg.handle));
            }
        }

        let adopted: Vec<Option<MessageHandle>> = by_page.into_iter().map(|v| v.map(|(_, h)| h)).collect();
        if !adopted.is_empty() {
            debug!(pages = adopted.len(), "adopted pre-existing tracker messages");
            *self.handles.lock().await = adopted;
        }
    }

    /// Spawns the publisher's timer task. Cancel-safe: dropping the returned
    /// handle (or aborting it) abandons any in-flight sink call without
    /// touching the subscription registry.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(self.config.initial_delay).await;

            let mut interval = tokio::time::interval(self.config.tick_interval);
            // A late edit must finish before the next fire begins; Delay (rather
            // than the default catch-up burst) enforces that without a guard flag.
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                self.publish_once().await;
            }
        })
    }

    async fn publish_once(&self) {
        let identifiers = self.registry.list().await;
        let mut resolved: Vec<(usize, u32, String)> = Vec::new();
        for (i, identifier) in identifiers.iter().enumerate() {
            if let Some((token, symbol)) = self.catalog.resolve(identifier) {
                resolved.push((i + 1, token, symbol));
            }
        }

        let tokens: Vec<u32> = resolved.iter().map(|(_, t, _)| *t).collect();
        let entries = self.store.snapshot_for_view(&tokens);

        let rows: Vec<Row> = entries
            .iter()
            .filter_map(|entry| {
                resolved
                    .iter()
                    .find(|(_, t, _)| *t == entry.token)
                    .map(|(idx, _, name)| Row {
                        global_index: *idx,
                        name: name.clone(),
                        entry,
                    })
            })
            .collect();

        let page_size = self.config.page_size.max(1);
        let total = rows.len();
        let pages: Vec<&[Row]> = rows.chunks(page_size).collect();
        let total_pages = pages.len().max(1);
        let ticks_applied = self.store.ticks_applied();

        let mut handles = self.handles.lock().await;
        if handles.len() < pages.len() {
            handles.resize_with(pages.len(), || None);
        }

        for (page_index, page_rows) in pages.iter().enumerate() {
            let is_last = page_index + 1 == total_pages;
            let text = render_page(page_index, total_pages, page_rows, total, ticks_applied, self.zone, is_last);

            match handles[page_index].clone() {
                Some(handle) => {
                    if let Err(e) = self.sink.edit(&self.channel_id, &handle, &text).await {
                        warn!(error = %e, page = page_index, "edit failed; invalidating handle");
                        handles[page_index] = None;
                    }
                }
                None => match self.sink.send(&self.channel_id, &text).await {
                    Ok(handle) => {
                        handles[page_index] = Some(handle);
                        drop(handles);
                        tokio::time::sleep(self.config.inter_page_delay).await;
                        handles = self.handles.lock().await;
                    }
                    Err(e) => warn!(error = %e, page = page_index, "send failed"),
                },
            }
        }
    }
}

fn render_page(page_index: usize, total_pages: usize, rows: &[Row], total: usize, ticks: u64, zone: Tz, is_last: bool) -> String {
    let now = chrono::Utc::now().with_timezone(&zone);
    let mut out = format!(
        "{HEADER_MARKER}{}/{} | {} {}\n",
        page_index + 1,
        total_pages,
        now.format("%H:%M:%S"),
        zone.name()
    );

    for row in rows {
        out.push_str(&render_row(row));
        out.push('\n');
    }

    if is_last {
        out.push_str(&format!("Total: {total} | Ticks: {ticks}"));
    }

    out
}

fn render_row(row: &Row) -> String {
    let entry = row.entry;
    let pct = entry
        .ohlc
        .and_then(|o| entry.last_price.pct_change_from(o.close))
        .unwrap_or(0.0);
    let volume_lakh = entry.volume.unwrap_or(0) as f64 / 100_000.0;
    format!(
        "{}.{} : {} ({:+.2}%) {{{:.2}L}}",
        row.global_index, row.name, entry.last_price, pct, volume_lakh
    )
}

/// Extracts the zero-based page index from a rendered header line.
fn parse_page_index(text: &str) -> Option<usize> {
    let rest = text.strip_prefix(HEADER_MARKER)?;
    let page_part = rest.split('/').next()?;
    let page_number: usize = page_part.trim().parse().ok()?;
    page_number.checked_sub(1)
}
