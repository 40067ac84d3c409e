use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::outcome::{CallOutcome, FaultKind, TransportFault};
use crate::params::CallParams;
use crate::transport::Transport;

/// Wraps one logical request: issues it, classifies the result, and never
/// lets a misbehaving transport escape as anything but an error outcome.
#[derive(Clone)]
pub struct CallExecutor {
    transport: Arc<dyn Transport>,
}

impl CallExecutor {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    pub async fn execute(&self, id: u64, params: CallParams, cancel: &CancelToken) -> CallOutcome {
        let issued_at = Utc::now();
        if cancel.is_cancelled() {
            debug!(id, "skipping call, run cancelled");
            return CallOutcome::cancelled(id, params, issued_at);
        }

        let result = AssertUnwindSafe(async { self.transport.call(&params).await })
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(reply)) => CallOutcome::from_reply(id, params, issued_at, reply),
            Ok(Err(fault)) => {
                debug!(id, kind = ?fault.kind, "transport fault: {}", fault.message);
                CallOutcome::from_fault(id, params, issued_at, &fault)
            }
            Err(panic) => {
                let fault = TransportFault::new(FaultKind::Internal, panic_message(panic.as_ref()));
                warn!(id, "transport panicked: {}", fault.message);
                CallOutcome::from_fault(id, params, issued_at, &fault)
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
