use tokio::sync::mpsc;

/// Callback surface notified after pushed data has been merged into the
/// cached charger state.
///
/// Implementations must be cheap and non-blocking; they run on the task
/// that drains the push connection. Consumers that want to react
/// asynchronously should use [`ChannelUpdateListener`] and process the
/// receiver at their own pace.
pub trait UpdateListener: Send + Sync {
    /// Called once per merged push payload.
    fn on_status_update(&self);
}

/// An [`UpdateListener`] that forwards every notification into an
/// unbounded channel.
pub struct ChannelUpdateListener {
    sender: mpsc::UnboundedSender<()>,
}

impl ChannelUpdateListener {
    /// Creates the listener together with the receiving end.
    pub fn create_channel() -> (Self, mpsc::UnboundedReceiver<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl UpdateListener for ChannelUpdateListener {
    fn on_status_update(&self) {
        let _ = self.sender.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_listener_forwards_notifications() {
        let (listener, mut receiver) = ChannelUpdateListener::create_channel();
        listener.on_status_update();
        listener.on_status_update();
        assert!(receiver.recv().await.is_some());
        assert!(receiver.recv().await.is_some());
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_harmless() {
        let (listener, receiver) = ChannelUpdateListener::create_channel();
        drop(receiver);
        listener.on_status_update();
    }
}
