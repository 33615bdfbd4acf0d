//! Panic recovery at connection boundaries
//!
//! The protocol layer runs every connection on its own task. A panic
//! in one of them must not take the process down, so each entry point
//! runs its body through [`guard`], which reports the panic to a
//! [`PanicHandler`] and turns it into [`Error::RuntimeFault`].

use crate::error::{Error, Result};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::error;

/// Receives panics caught at a connection boundary.
pub trait PanicHandler: Send + Sync {
    fn handle_panic(&self, context: &str, message: &str);
}

/// [`PanicHandler`] that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPanicHandler;

impl PanicHandler for LogPanicHandler {
    fn handle_panic(&self, context: &str, message: &str) {
        error!("Recovered from panic in {}: {}", context, message);
    }
}

/// Run `fut`, converting a panic into [`Error::RuntimeFault`].
///
/// Shared tables only hold their locks for single map operations, so
/// unwinding through them leaves them consistent.
pub(crate) async fn guard<T, F>(handler: &dyn PanicHandler, context: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            handler.handle_panic(context, &message);
            Err(Error::RuntimeFault(format!("{context}: {message}")))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}
