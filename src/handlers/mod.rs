//! Category handlers and their wiring.

pub mod advice;
pub mod intimation;

use std::sync::Arc;

use tracing::warn;

use crate::archive::ArchiveClient;
use crate::config::Config;
use crate::decrypt::{DocumentCodec, PasswordRules};
use crate::extract::Extractor;
use crate::mail::MailClient;
use crate::pipeline::Dispatcher;
use crate::store::SheetStore;

pub use advice::AdviceHandler;
pub use intimation::IntimationHandler;

/// Build the production dispatcher with both handlers registered.
pub fn default_dispatcher(
    config: &Config,
    mail: Arc<dyn MailClient>,
    extractor: Arc<dyn Extractor>,
    archive: Option<Arc<dyn ArchiveClient>>,
    codec: Arc<dyn DocumentCodec>,
    sheet_store: Arc<dyn SheetStore>,
) -> Dispatcher {
    let password_rules = config.password_rules_path.as_deref().and_then(|path| {
        match PasswordRules::load(path) {
            Ok(rules) => Some(rules),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Password rules file ignored");
                None
            }
        }
    });

    let mut dispatcher = Dispatcher::new();
    dispatcher.register(Arc::new(IntimationHandler::new(
        Arc::clone(&extractor),
        Arc::clone(&sheet_store),
        config.max_chars_body,
    )));
    dispatcher.register(Arc::new(AdviceHandler::new(
        mail,
        extractor,
        archive,
        codec,
        sheet_store,
        config.clone(),
        password_rules,
    )));
    dispatcher
}
