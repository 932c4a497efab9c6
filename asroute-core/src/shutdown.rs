use std::sync::Arc;
use tokio::sync::watch;

/// Tells running routers to stop. Clones are connected: shutting one down
/// shuts down all of them, including clones made afterwards.
#[derive(Debug, Clone)]
pub struct Shutdown {
    notify: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Shutdown {
    /// Creates a new active shutdown.
    pub fn new() -> Self {
        let (notify, receiver) = watch::channel(false);
        Self {
            notify: Arc::new(notify),
            receiver,
        }
    }

    /// Signals every `Shutdown` cloned from this one.
    pub fn shut_down(&self) {
        self.notify.send_replace(true);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Waits until some clone calls [`Shutdown::shut_down`]. Returns at once
    /// if that already happened.
    pub async fn wait_for_shutdown(&mut self) {
        while !*self.receiver.borrow_and_update() {
            // Every clone holds the sender, so the channel cannot close
            // while `self` is alive
            if self.receiver.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
