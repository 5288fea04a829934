//! Engine event notifications.
//!
//! Scout and executor emit [`EngineEvent`]s through a [`Notifier`].
//! The default [`ChannelNotifier`] queues events onto an unbounded
//! channel for a background consumer; when disabled it swallows
//! everything so callers never branch on alert configuration.

use std::fmt;

use tokio::sync::mpsc;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Something the engine did that an operator may want to hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Scouting selected a rotation target.
    JumpSelected {
        from_symbol: String,
        to_symbol: String,
        ratio_diff: f64,
    },
    /// A rotation finished with the target coin in the wallet.
    TradeCompleted {
        from_symbol: String,
        to_symbol: String,
        filled_amount: f64,
    },
    /// A rotation leg failed and the trade was abandoned.
    TradeFailed {
        from_symbol: String,
        to_symbol: String,
        reason: String,
    },
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineEvent::JumpSelected {
                from_symbol,
                to_symbol,
                ratio_diff,
            } => write!(
                f,
                "Jump selected: {from_symbol} -> {to_symbol} (diff {ratio_diff:.6})"
            ),
            EngineEvent::TradeCompleted {
                from_symbol,
                to_symbol,
                filled_amount,
            } => write!(
                f,
                "Trade complete: {from_symbol} -> {to_symbol}, filled {filled_amount:.8}"
            ),
            EngineEvent::TradeFailed {
                from_symbol,
                to_symbol,
                reason,
            } => write!(f, "Trade FAILED: {from_symbol} -> {to_symbol} ({reason})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Fire-and-forget event sink. Implementations must never block the
/// trading path.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: EngineEvent);
}

/// Notifier that drops every event.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _event: EngineEvent) {}
}

/// Queues events onto an unbounded channel for a background consumer.
///
/// A disabled notifier keeps the channel but delivers nothing, so the
/// engine wiring is identical whether alerts are on or off.
pub struct ChannelNotifier {
    enabled: bool,
    sender: mpsc::UnboundedSender<EngineEvent>,
}

impl ChannelNotifier {
    pub fn new(enabled: bool) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { enabled, sender }, receiver)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, event: EngineEvent) {
        if !self.enabled {
            return;
        }
        if self.sender.send(event).is_err() {
            warn!("Notification channel closed, event dropped");
        }
    }
}

/// Background consumer that writes queued events to the log.
pub async fn log_notifications(mut receiver: mpsc::UnboundedReceiver<EngineEvent>) {
    while let Some(event) = receiver.recv().await {
        info!(event = %event, "Engine notification");
    }
    warn!("Notification consumer shutting down");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
