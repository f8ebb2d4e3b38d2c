use std::sync::{Arc, Mutex};

use crossbeam_channel::{unbounded, Receiver, Sender};

/// Multi-Producer Broadcast to do many to many (N*N) message passing.
///
/// Every message handed to a [`BusSender`] is delivered to every receiver
/// subscribed at that moment. Receivers whose endpoint has been dropped are
/// pruned on the next send.
pub struct MPB<X>
where
    X: Clone + Send + Sync + 'static,
{
    subscribers: Arc<Mutex<Vec<Sender<X>>>>,
}

/// A cloneable producer handle fanning messages out to all subscribers.
pub struct BusSender<X>
where
    X: Clone + Send + Sync + 'static,
{
    subscribers: Arc<Mutex<Vec<Sender<X>>>>,
}

impl<X> MPB<X>
where
    X: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        MPB {
            subscribers: Arc::new(Mutex::new(vec![])),
        }
    }

    pub fn sender(&self) -> BusSender<X> {
        BusSender {
            subscribers: self.subscribers.clone(),
        }
    }

    pub fn receiver(&self) -> Receiver<X> {
        let (tx, rx) = unbounded();

        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }

        rx
    }
}

impl<X> Default for MPB<X>
where
    X: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<X> BusSender<X>
where
    X: Clone + Send + Sync + 'static,
{
    pub fn send(&self, msg: X) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|subscriber| subscriber.send(msg.clone()).is_ok());
        }
    }
}

impl<X> Clone for BusSender<X>
where
    X: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        BusSender {
            subscribers: self.subscribers.clone(),
        }
    }
}
