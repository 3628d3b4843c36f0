//! Redirect sink for session failures.
//!
//! When a session ends underneath a call, the client sends the user to
//! the login route through a [`Navigator`]. Front ends decide what a
//! redirect means for them.

use tokio::sync::mpsc;
use tracing::info;

pub trait Navigator: Send + Sync {
    fn navigate(&self, route: &str);
}

/// Publishes every redirect on an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNavigator {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelNavigator {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Navigator for ChannelNavigator {
    fn navigate(&self, route: &str) {
        info!(route, "Redirecting");
        // Receiver gone means nobody is listening for redirects any more
        let _ = self.tx.send(route.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_navigator_publishes_routes() {
        let (navigator, mut rx) = ChannelNavigator::new();
        navigator.navigate("/login");
        navigator.navigate("/unauthorized");

        assert_eq!(rx.try_recv().unwrap(), "/login");
        assert_eq!(rx.try_recv().unwrap(), "/unauthorized");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_navigate_without_receiver_is_harmless() {
        let (navigator, rx) = ChannelNavigator::new();
        drop(rx);
        navigator.navigate("/login");
    }
}
