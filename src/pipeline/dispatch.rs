//! Match dispatcher — static category → handler registry.
//!
//! Handler failures are caught here: they are logged and do not abort the
//! poll loop, and the message is still marked processed afterwards
//! (at-most-once attempt, no automatic re-delivery).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::mail::EmailContext;
use crate::pipeline::rules::{Category, MatchResult};

/// An extraction handler bound to one category.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Category this handler serves.
    fn category(&self) -> Category;

    /// Process one matched message.
    async fn handle(&self, ctx: &EmailContext, matched: &MatchResult)
    -> Result<(), PipelineError>;
}

/// Routes classifier matches to registered handlers.
pub struct Dispatcher {
    handlers: HashMap<Category, Arc<dyn Handler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under its own category.
    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        self.handlers.insert(handler.category(), handler);
    }

    /// Dispatch all matches for one message, in classifier order.
    ///
    /// Stops after the first match whose `stop_after_match` flag is set —
    /// whether or not its handler succeeded. Returns the number of handler
    /// invocations made.
    pub async fn dispatch(&self, ctx: &EmailContext, matches: &[MatchResult]) -> usize {
        let mut invoked = 0;
        for matched in matches {
            info!(
                id = %ctx.id,
                rule = %matched.rule_name,
                category = %matched.category,
                "Dispatching match"
            );

            match self.handlers.get(&matched.category) {
                Some(handler) => {
                    invoked += 1;
                    if let Err(e) = handler.handle(ctx, matched).await {
                        // Caught at the boundary: the message will still be
                        // marked processed by the poller.
                        error!(
                            id = %ctx.id,
                            category = %matched.category,
                            error = %e,
                            "Handler failed"
                        );
                    }
                }
                None => {
                    warn!(
                        category = %matched.category,
                        "No handler registered for matched category"
                    );
                }
            }

            if matched.stop_after_match {
                debug!(id = %ctx.id, "Stop after match");
                break;
            }
        }
        invoked
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
