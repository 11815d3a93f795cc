//! Synchronous publish/subscribe channels for service composition.
//!
//! Two flavours exist:
//! - **transient**: delivers only to handlers subscribed at publish time
//! - **replaying**: remembers every published event and replays the history
//!   to each new subscriber before it sees future events
//!
//! Everything runs on the thread driving composition. Handlers may publish
//! or subscribe from inside a delivery; the channel never holds a borrow
//! across a handler call.
//!
//! Re-entrancy rules:
//! - delivery walks the live subscriber list, so a handler subscribed during
//!   a delivery still receives the in-flight event exactly once
//! - an event is appended to the replay log only after every subscriber was
//!   notified, so that late subscriber is not handed the event twice
//! - a new subscriber replays the log as it stood when it subscribed

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::Result;

/// A subscriber callback. Failing handlers abort the publish that reached them.
pub type Handler<T> = Rc<dyn Fn(&T) -> Result<()>>;

/// Handle to an event channel. Clones share the same subscribers and history.
pub struct EventChannel<T> {
    inner: Rc<ChannelInner<T>>,
}

struct ChannelInner<T> {
    replaying: bool,
    handlers: RefCell<Vec<Handler<T>>>,
    history: RefCell<Vec<Rc<T>>>,
}

impl<T: 'static> EventChannel<T> {
    /// Create a channel that only delivers to current subscribers.
    pub fn transient() -> Self {
        Self::with_replay(false)
    }

    /// Create a channel that replays its history to every new subscriber.
    pub fn replaying() -> Self {
        Self::with_replay(true)
    }

    fn with_replay(replaying: bool) -> Self {
        Self {
            inner: Rc::new(ChannelInner {
                replaying,
                handlers: RefCell::new(Vec::new()),
                history: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Whether this channel replays history to new subscribers.
    pub fn is_replaying(&self) -> bool {
        self.inner.replaying
    }

    /// Register a handler.
    ///
    /// On a replaying channel the handler is invoked once per past event, in
    /// publish order, before this call returns. A replay failure is returned
    /// to the subscriber; the handler stays registered.
    pub fn subscribe<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&T) -> Result<()> + 'static,
    {
        let handler: Handler<T> = Rc::new(handler);
        self.inner.handlers.borrow_mut().push(Rc::clone(&handler));

        if self.inner.replaying {
            let snapshot: Vec<Rc<T>> = self.inner.history.borrow().clone();
            for event in snapshot {
                handler(&event)?;
            }
        }
        Ok(())
    }

    /// Deliver `event` to every subscriber in subscription order.
    pub fn publish(&self, event: T) -> Result<()> {
        let event = Rc::new(event);

        let mut index = 0;
        loop {
            let handler = match self.inner.handlers.borrow().get(index) {
                Some(handler) => Rc::clone(handler),
                None => break,
            };
            handler(&event)?;
            index += 1;
        }

        if self.inner.replaying {
            self.inner.history.borrow_mut().push(event);
        }
        Ok(())
    }

    /// Number of events recorded for replay.
    pub fn history_len(&self) -> usize {
        self.inner.history.borrow().len()
    }

    /// Number of registered handlers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.handlers.borrow().len()
    }

    /// Drop every handler, keeping the history.
    ///
    /// Handlers commonly capture a handle to whatever owns the channel, so
    /// this is what releases that cycle once composition is done.
    pub fn clear_subscribers(&self) {
        self.inner.handlers.borrow_mut().clear();
    }
}

impl<T> Clone for EventChannel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for EventChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel")
            .field("replaying", &self.inner.replaying)
            .field("subscribers", &self.inner.handlers.borrow().len())
            .field("history", &self.inner.history.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use proptest::prelude::*;

    fn recorder() -> (Rc<RefCell<Vec<u32>>>, impl Fn(&u32) -> Result<()>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        (seen, move |n: &u32| {
            sink.borrow_mut().push(*n);
            Ok(())
        })
    }

    #[test]
    fn transient_channel_does_not_replay() {
        let channel = EventChannel::transient();
        channel.publish(1).unwrap();

        let (seen, handler) = recorder();
        channel.subscribe(handler).unwrap();
        channel.publish(2).unwrap();

        assert_eq!(*seen.borrow(), vec![2]);
        assert_eq!(channel.history_len(), 0);
    }

    #[test]
    fn replaying_channel_replays_then_delivers() {
        let channel = EventChannel::replaying();
        channel.publish(1).unwrap();
        channel.publish(2).unwrap();

        let (seen, handler) = recorder();
        channel.subscribe(handler).unwrap();
        channel.publish(3).unwrap();

        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn delivery_follows_subscription_order() {
        let channel = EventChannel::transient();
        let order = Rc::new(RefCell::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let order = Rc::clone(&order);
            channel
                .subscribe(move |_: &u32| {
                    order.borrow_mut().push(tag);
                    Ok(())
                })
                .unwrap();
        }
        channel.publish(0).unwrap();
        assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn handler_error_propagates_to_publisher() {
        let channel = EventChannel::replaying();
        channel
            .subscribe(|n: &u32| {
                if *n == 2 {
                    Err(Error::validation("two is not allowed"))
                } else {
                    Ok(())
                }
            })
            .unwrap();

        assert!(channel.publish(1).is_ok());
        assert!(channel.publish(2).is_err());
        // A failed publish never reaches the replay log.
        assert_eq!(channel.history_len(), 1);
    }

    #[test]
    fn replay_error_propagates_to_subscriber() {
        let channel = EventChannel::replaying();
        channel.publish(7).unwrap();
        let result = channel.subscribe(|_: &u32| Err(Error::validation("nope")));
        assert!(result.is_err());
    }

    #[test]
    fn subscriber_added_mid_delivery_sees_event_once() {
        let channel: EventChannel<u32> = EventChannel::replaying();
        let late_seen = Rc::new(RefCell::new(Vec::new()));

        let inner_channel = channel.clone();
        let inner_seen = Rc::clone(&late_seen);
        let subscribed = Rc::new(RefCell::new(false));
        channel
            .subscribe(move |_: &u32| {
                if !*subscribed.borrow() {
                    *subscribed.borrow_mut() = true;
                    let sink = Rc::clone(&inner_seen);
                    inner_channel.subscribe(move |n: &u32| {
                        sink.borrow_mut().push(*n);
                        Ok(())
                    })?;
                }
                Ok(())
            })
            .unwrap();

        channel.publish(10).unwrap();
        channel.publish(11).unwrap();

        assert_eq!(*late_seen.borrow(), vec![10, 11]);
    }

    #[test]
    fn reentrant_publish_logs_inner_event_first() {
        let channel: EventChannel<u32> = EventChannel::replaying();
        let inner = channel.clone();
        channel
            .subscribe(move |n: &u32| {
                if *n == 1 {
                    inner.publish(2)?;
                }
                Ok(())
            })
            .unwrap();

        channel.publish(1).unwrap();

        let (seen, handler) = recorder();
        channel.subscribe(handler).unwrap();
        // The nested publish completes before the outer one is logged.
        assert_eq!(*seen.borrow(), vec![2, 1]);
    }

    #[test]
    fn clear_subscribers_keeps_history() {
        let channel = EventChannel::replaying();
        let (seen, handler) = recorder();
        channel.subscribe(handler).unwrap();
        channel.publish(1).unwrap();

        channel.clear_subscribers();
        channel.publish(2).unwrap();

        assert_eq!(*seen.borrow(), vec![1]);
        assert_eq!(channel.subscriber_count(), 0);
        assert_eq!(channel.history_len(), 2);
    }

    proptest! {
        #[test]
        fn replay_is_complete_and_ordered(
            before in proptest::collection::vec(any::<u32>(), 0..32),
            after in proptest::collection::vec(any::<u32>(), 0..32),
        ) {
            let channel = EventChannel::replaying();
            for n in &before {
                channel.publish(*n).unwrap();
            }

            let (seen, handler) = recorder();
            channel.subscribe(handler).unwrap();
            for n in &after {
                channel.publish(*n).unwrap();
            }

            let expected: Vec<u32> = before.iter().chain(after.iter()).copied().collect();
            prop_assert_eq!(seen.borrow().clone(), expected);
        }
    }
}
