//! Subscription - a live listener on one bus lane

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::envelope::Channel;

/// Receiving end of one lane
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription<T> {
    channel: Channel,
    rx: mpsc::UnboundedReceiver<T>,
    backlog_warning: usize,
    behind: bool,
}

impl<T> Subscription<T> {
    pub(crate) fn new(channel: Channel, rx: mpsc::UnboundedReceiver<T>, backlog_warning: usize) -> Self {
        Self {
            channel,
            rx,
            backlog_warning,
            behind: false,
        }
    }

    /// Lane this subscription listens on
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Messages queued for this subscription and not yet received
    pub fn backlog(&self) -> usize {
        self.rx.len()
    }

    /// Wait for the next message
    ///
    /// Returns `None` once the bus has been dropped and everything queued
    /// has been received.
    pub async fn recv(&mut self) -> Option<T> {
        let msg = self.rx.recv().await;
        self.check_backlog();
        msg
    }

    /// Take the next message if one is already queued
    pub fn try_recv(&mut self) -> Option<T> {
        let msg = self.rx.try_recv().ok();
        self.check_backlog();
        msg
    }

    /// Warn once each time the backlog reaches the configured threshold
    fn check_backlog(&mut self) {
        let backlog = self.rx.len();
        if backlog >= self.backlog_warning && !self.behind {
            warn!(channel = %self.channel, backlog, "Subscription: falling behind");
            self.behind = true;
        } else if backlog < self.backlog_warning / 2 {
            self.behind = false;
        }
    }

    /// Explicitly stop listening
    pub fn unsubscribe(self) {
        debug!(channel = %self.channel, "Subscription::unsubscribe");
    }
}
