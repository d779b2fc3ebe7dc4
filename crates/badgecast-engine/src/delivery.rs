//! Per-listener delivery workers.
//!
//! Each registered listener owns one unbounded queue drained by one task, so
//! a listener sees values in the order they were enqueued while publishers
//! never wait on a consumer.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use badgecast_core::{BadgeError, BadgeListener, BadgeModel, ErrorReporter, ListenerKey};
use badgecast_telemetry::metrics;

#[derive(Clone, Debug)]
pub(crate) enum Delivery {
    Update(BadgeModel),
    Cleared,
}

#[derive(Clone)]
pub(crate) struct DeliveryContext {
    pub timeout: Duration,
    pub reporter: Arc<dyn ErrorReporter>,
}

/// How a callback failed, as recorded on `badge_delivery_failures_total`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FailureKind {
    Error,
    Panic,
    Timeout,
}

impl FailureKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Panic => "panic",
            Self::Timeout => "timeout",
        }
    }
}

#[derive(Debug)]
pub(crate) struct DeliveryFailure {
    pub kind: FailureKind,
    pub error: BadgeError,
}

/// A registered listener and the sending half of its queue.
pub(crate) struct ListenerSlot {
    key: ListenerKey,
    tx: mpsc::UnboundedSender<Delivery>,
    active: Arc<AtomicBool>,
}

impl ListenerSlot {
    pub(crate) fn spawn(
        listener: Arc<dyn BadgeListener>,
        runtime: &Handle,
        ctx: DeliveryContext,
    ) -> Self {
        let key = ListenerKey::of(&listener);
        let (tx, rx) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(true));
        drop(runtime.spawn(run_worker(listener, rx, Arc::clone(&active), ctx)));
        Self { key, tx, active }
    }

    pub(crate) fn key(&self) -> ListenerKey {
        self.key
    }

    /// Queue a value. Returns false if the worker is gone.
    pub(crate) fn enqueue(&self, delivery: Delivery) -> bool {
        self.tx.send(delivery).is_ok()
    }

    /// Stop the worker before its next delivery. A callback already running
    /// is allowed to finish.
    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

async fn run_worker(
    listener: Arc<dyn BadgeListener>,
    mut rx: mpsc::UnboundedReceiver<Delivery>,
    active: Arc<AtomicBool>,
    ctx: DeliveryContext,
) {
    let key = ListenerKey::of(&listener);
    while let Some(delivery) = rx.recv().await {
        if !active.load(Ordering::Acquire) {
            break;
        }
        if let Err(failure) = deliver(listener.as_ref(), &delivery, ctx.timeout).await {
            metrics::record_delivery_failure(failure.kind.as_str());
            ctx.reporter.report(&failure.error);
        }
    }
    debug!(listener = %key, name = listener.name(), "delivery worker stopped");
}

/// Run one callback with panic and timeout isolation.
pub(crate) async fn deliver(
    listener: &dyn BadgeListener,
    delivery: &Delivery,
    timeout: Duration,
) -> Result<(), DeliveryFailure> {
    let call = async {
        match delivery {
            Delivery::Update(badge) => listener.on_badge_update(badge).await,
            Delivery::Cleared => listener.on_badge_cleared().await,
        }
    };

    let (kind, reason) =
        match tokio::time::timeout(timeout, AssertUnwindSafe(call).catch_unwind()).await {
            Ok(Ok(Ok(()))) => {
                trace!(name = listener.name(), "badge delivered");
                metrics::record_delivery();
                return Ok(());
            }
            Ok(Ok(Err(e))) => (FailureKind::Error, e.to_string()),
            Ok(Err(panic)) => (
                FailureKind::Panic,
                format!("panicked: {}", panic_message(panic.as_ref())),
            ),
            Err(_) => (
                FailureKind::Timeout,
                format!("timed out after {}ms", timeout.as_millis()),
            ),
        };

    Err(DeliveryFailure {
        kind,
        error: BadgeError::ListenerDelivery {
            listener: listener.name().to_string(),
            reason,
        },
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
