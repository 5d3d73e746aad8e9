//! Remit Watch — bank-notification email pipeline.
//!
//! Polls a mailbox incrementally, classifies each message against a
//! declarative rule table, and routes matches to extraction handlers that
//! pull structured financial fields out of email bodies or attached advice
//! documents, upserting the results into a single tabular store keyed by
//! business reference numbers.

pub mod archive;
pub mod config;
pub mod decrypt;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod mail;
pub mod pipeline;
pub mod poller;
pub mod store;
