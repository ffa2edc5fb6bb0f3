//! One processor invocation inside one session.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::context::ProcessContext;
use crate::error::{ProcessError, TransactionError};
use crate::processor::Processor;
use crate::session::ProcessSessionFactory;

/// Trigger `processor` in a fresh session and end that session.
///
/// When processing succeeds the session is committed, unless the processor
/// already ended it. When processing fails or panics the session is rolled
/// back with penalty and the processing error is returned.
pub fn run_transaction(
    processor: &mut dyn Processor,
    context: &ProcessContext,
    factory: &ProcessSessionFactory,
) -> Result<(), TransactionError> {
    let mut session = factory.create_session(context);

    let outcome = catch_unwind(AssertUnwindSafe(|| processor.on_trigger(context, &mut session)))
        .unwrap_or_else(|payload| Err(ProcessError::Panicked(panic_message(payload.as_ref()))));

    match outcome {
        Ok(()) => {
            if session.state().is_terminal() {
                return Ok(());
            }
            session.commit().map_err(|err| {
                tracing::error!("{} failed to commit session: {}", context, err);
                TransactionError::Commit(err)
            })
        }
        Err(err) => {
            if session.state().is_terminal() {
                tracing::error!("{} failed to process due to {}", context, err);
                return Err(TransactionError::Processing(err));
            }

            let config = context.session_config();
            let unacknowledged = if config.rollback_log_unacknowledged {
                format!(
                    "(unacknowledged flow units {}) ",
                    session.unacknowledged_summary(config.rollback_log_unacknowledged_max)
                )
            } else {
                String::new()
            };
            tracing::error!(
                "{} failed to process {}due to {}; rolling back session",
                context,
                unacknowledged,
                err
            );

            if let Err(rollback_err) = session.rollback(true) {
                tracing::warn!("{} could not roll back session: {}", context, rollback_err);
            }
            Err(TransactionError::Processing(err))
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
