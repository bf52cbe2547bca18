//! Settle-once completion for racing outcomes.

use std::sync::Mutex;

use tokio::sync::oneshot;

/// Single-writer completion over a oneshot channel.
///
/// Several paths can race to finish one pending operation (the response
/// arriving, a timeout firing, the channel dying); whichever calls
/// [`settle`] first wins and every later call is a cheap no-op, so a late
/// response after a timeout can never complete the operation twice.
///
/// [`settle`]: CompletionSlot::settle
#[derive(Debug)]
pub struct CompletionSlot<T> {
    tx: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> CompletionSlot<T> {
    /// Creates a slot and the receiver its value is delivered on.
    pub fn new() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Delivers `value` if nothing has settled the slot yet.
    ///
    /// Returns `true` when this call won the race. A `false` return also
    /// covers a dropped receiver; either way the value is discarded.
    pub fn settle(&self, value: T) -> bool {
        let tx = {
            let mut guard = match self.tx.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.take()
        };
        match tx {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Whether the slot has already been settled.
    pub fn is_settled(&self) -> bool {
        match self.tx.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_first_settle_wins() {
        let (slot, rx) = CompletionSlot::new();
        assert!(slot.settle(1));
        assert!(!slot.settle(2));
        assert!(slot.is_settled());
        assert_eq!(rx.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_settle_after_receiver_dropped() {
        let (slot, rx) = CompletionSlot::<u32>::new();
        drop(rx);
        assert!(!slot.settle(1));
        assert!(slot.is_settled());
    }

    /// Exactly one of many concurrent settlers wins, under randomized
    /// scheduling.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_exactly_once_under_races() {
        use rand::Rng;
        for _ in 0..100 {
            let (slot, rx) = CompletionSlot::new();
            let slot = Arc::new(slot);
            let mut tasks = Vec::new();
            for value in 0..4u32 {
                let slot = Arc::clone(&slot);
                let delay = rand::thread_rng().gen_range(0..50);
                tasks.push(tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_micros(delay)).await;
                    slot.settle(value)
                }));
            }
            let mut wins = 0;
            for task in tasks {
                if task.await.unwrap() {
                    wins += 1;
                }
            }
            assert_eq!(wins, 1);
            let winner = rx.await.unwrap();
            assert!(winner < 4);
        }
    }
}
