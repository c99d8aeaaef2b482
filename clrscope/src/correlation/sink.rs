//! Completed-record fan-out
//!
//! Each record type gets its own [`Subscribers`] list. Subscribers run in
//! registration order, synchronously, on the thread feeding the engine.

use crossbeam_channel::Sender;
use log::debug;

type Callback<T> = Box<dyn FnMut(&T) + Send>;

/// Registered receivers of one completed-record type
pub struct Subscribers<T> {
    callbacks: Vec<Callback<T>>,
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self { callbacks: Vec::new() }
    }
}

impl<T> std::fmt::Debug for Subscribers<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribers").field("count", &self.callbacks.len()).finish()
    }
}

impl<T> Subscribers<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&T) + Send + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn publish(&mut self, record: &T) {
        for callback in &mut self.callbacks {
            callback(record);
        }
    }
}

impl<T: Clone + Send + 'static> Subscribers<T> {
    /// Forward a clone of every record into a channel
    ///
    /// A disconnected receiver is not an error; records are dropped from then on.
    pub fn subscribe_channel(&mut self, tx: Sender<T>) {
        self.subscribe(move |record: &T| {
            if tx.send(record.clone()).is_err() {
                debug!("completed-record receiver disconnected");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_callbacks_run_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut subscribers = Subscribers::<u32>::new();
        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            subscribers.subscribe(move |value| seen.lock().unwrap().push(format!("{tag}:{value}")));
        }
        subscribers.publish(&7);
        assert_eq!(*seen.lock().unwrap(), vec!["first:7", "second:7"]);
    }

    #[test]
    fn test_channel_subscriber_receives_clone() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut subscribers = Subscribers::<String>::new();
        subscribers.subscribe_channel(tx);
        subscribers.publish(&"done".to_string());
        assert_eq!(rx.try_recv().unwrap(), "done");
    }

    #[test]
    fn test_disconnected_channel_is_ignored() {
        let (tx, rx) = crossbeam_channel::unbounded::<u8>();
        drop(rx);
        let mut subscribers = Subscribers::new();
        subscribers.subscribe_channel(tx);
        subscribers.publish(&1);
        assert_eq!(subscribers.len(), 1);
    }
}
