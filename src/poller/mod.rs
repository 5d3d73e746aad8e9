//! Incremental watermark poller.
//!
//! Single logical worker: poll → classify → dispatch → mark processed →
//! persist → sleep, strictly sequential. A crash mid-batch cannot skip
//! unseen messages because the watermark only advances to timestamps that
//! were actually processed.

pub mod state;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info};

use crate::error::{Error, MailError};
use crate::mail::{EmailContext, MailClient};
use crate::pipeline::{Dispatcher, RuleSet};

pub use state::{JsonStateStore, PROCESSED_ID_CAP, StateStore, WatermarkState};

/// Fetch messages strictly newer than `watermark_ms`, ascending by internal
/// timestamp.
///
/// The upstream time filter may be coarse (whole seconds); this re-filters
/// client-side to millisecond precision, so the strictly-greater-than
/// property holds for any [`MailClient`] implementation.
pub async fn poll(
    client: &dyn MailClient,
    watermark_ms: i64,
) -> Result<Vec<EmailContext>, MailError> {
    let mut messages = client.fetch_since(watermark_ms).await?;
    let fetched = messages.len();
    messages.retain(|m| m.internal_ts > watermark_ms);
    messages.sort_by_key(|m| m.internal_ts);
    debug!(
        fetched,
        fresh = messages.len(),
        watermark_ms,
        "Poll filtered to strictly-after watermark"
    );
    Ok(messages)
}

/// The poll loop and its collaborators.
pub struct Poller {
    mail: Arc<dyn MailClient>,
    rules: RuleSet,
    dispatcher: Dispatcher,
    state_store: Arc<dyn StateStore>,
    poll_interval: Duration,
}

impl Poller {
    pub fn new(
        mail: Arc<dyn MailClient>,
        rules: RuleSet,
        dispatcher: Dispatcher,
        state_store: Arc<dyn StateStore>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            mail,
            rules,
            dispatcher,
            state_store,
            poll_interval,
        }
    }

    /// Load persisted state, or anchor a fresh watermark at now.
    ///
    /// First run persists immediately so a crash before the first message
    /// still never reprocesses history.
    pub fn load_or_init_state(&self) -> Result<WatermarkState, Error> {
        if let Some(state) = self.state_store.load().map_err(Error::Store)? {
            return Ok(state);
        }
        let now_ms = Utc::now().timestamp_millis();
        let state = WatermarkState::starting_at(now_ms);
        self.state_store.save(&state).map_err(Error::Store)?;
        info!(
            watermark_ms = now_ms,
            "Initialized watermark to now; historical messages will not be processed"
        );
        Ok(state)
    }

    /// Run one poll cycle, mutating `state` in place.
    ///
    /// Returns the number of messages processed this cycle. State is
    /// persisted whenever the cycle yielded at least one message, bounding
    /// the loss window to one poll interval.
    pub async fn poll_cycle(&self, state: &mut WatermarkState) -> Result<usize, Error> {
        let messages = poll(self.mail.as_ref(), state.last_internal_ts)
            .await
            .map_err(Error::Mail)?;

        let mut processed = 0;
        for msg in &messages {
            if state.is_processed(&msg.id) {
                debug!(id = %msg.id, "Duplicate delivery, skipping");
                continue;
            }

            info!(
                id = %msg.id,
                ts = msg.internal_ts,
                sender = %msg.sender,
                subject = %msg.subject,
                "New message"
            );

            let matches = self.rules.categorize(msg);
            if matches.is_empty() {
                info!(id = %msg.id, "No rule matched");
            } else {
                self.dispatcher.dispatch(msg, &matches).await;
            }

            // Marked processed even when a handler failed — at-most-once.
            state.mark_processed(&msg.id, msg.internal_ts);
            processed += 1;
        }

        if !messages.is_empty() {
            self.state_store.save(state).map_err(Error::Store)?;
        }
        Ok(processed)
    }

    /// Poll forever. Cycle errors are logged and the loop retries after the
    /// fixed interval; the watermark is untouched, so messages are delayed,
    /// never lost.
    pub async fn run(&self) -> Result<(), Error> {
        let mut state = self.load_or_init_state()?;
        info!(
            interval_secs = self.poll_interval.as_secs(),
            watermark_ms = state.last_internal_ts,
            "Poller started"
        );

        let mut tick = tokio::time::interval(self.poll_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            match self.poll_cycle(&mut state).await {
                Ok(0) => {}
                Ok(n) => info!(processed = n, "Poll cycle complete"),
                Err(e) => error!(error = %e, "Poll cycle failed"),
            }
        }
    }
}
