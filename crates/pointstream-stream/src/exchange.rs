//! Double-buffered handoff of (render, delete) queue pairs.
//!
//! The traverser publishes one pair per tick; the render thread swaps the
//! latest pair in once per frame. Both directions go through a single lock so
//! the consumer never sees a render list and a delete list from different ticks.

use parking_lot::Mutex;

/// A render list and a delete list produced by the same tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePair<T> {
    /// Tick generation that produced this pair; 0 for a pair never published.
    pub generation: u64,
    pub render: Vec<T>,
    pub delete: Vec<T>,
}

impl<T> Default for QueuePair<T> {
    fn default() -> Self {
        Self {
            generation: 0,
            render: Vec::new(),
            delete: Vec::new(),
        }
    }
}

impl<T> QueuePair<T> {
    /// Empty both lists, keeping their allocations.
    pub fn clear(&mut self) {
        self.generation = 0;
        self.render.clear();
        self.delete.clear();
    }
}

struct Slot<T> {
    /// Published but not yet consumed.
    pending: Option<QueuePair<T>>,
    /// Consumed pair handed back for reuse.
    spare: Option<QueuePair<T>>,
    next_generation: u64,
}

/// Single-slot exchange between one producer and one consumer.
pub struct QueueExchange<T> {
    slot: Mutex<Slot<T>>,
}

impl<T> Default for QueueExchange<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> QueueExchange<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                pending: None,
                spare: None,
                next_generation: 1,
            }),
        }
    }

    /// Publish a pair, stamping it with the next generation.
    ///
    /// Returns `(generation, superseded)`, where `superseded` is the previously
    /// published pair if the consumer never picked it up. The producer owns it
    /// again and must re-handle anything in its delete list.
    pub fn publish(&self, mut pair: QueuePair<T>) -> (u64, Option<QueuePair<T>>) {
        let mut slot = self.slot.lock();
        let generation = slot.next_generation;
        slot.next_generation += 1;
        pair.generation = generation;
        (generation, slot.pending.replace(pair))
    }

    /// Take a previously consumed pair for reuse, if one is waiting.
    pub fn take_spare(&self) -> Option<QueuePair<T>> {
        self.slot.lock().spare.take()
    }

    /// Swap the latest published pair into `current`.
    ///
    /// The pair previously held in `current` is cleared and kept for the
    /// producer to reuse. Returns `false` (leaving `current` untouched) when
    /// nothing new was published since the last swap.
    pub fn swap(&self, current: &mut QueuePair<T>) -> bool {
        let mut slot = self.slot.lock();
        let Some(next) = slot.pending.take() else {
            return false;
        };
        let mut previous = std::mem::replace(current, next);
        previous.clear();
        slot.spare = Some(previous);
        true
    }

    /// Whether a published pair is waiting for the consumer.
    pub fn has_pending(&self) -> bool {
        self.slot.lock().pending.is_some()
    }

    /// Generation the next publish will receive.
    pub fn next_generation(&self) -> u64 {
        self.slot.lock().next_generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn pair(render: &[u32], delete: &[u32]) -> QueuePair<u32> {
        QueuePair {
            generation: 0,
            render: render.to_vec(),
            delete: delete.to_vec(),
        }
    }

    #[test]
    fn swap_without_publish_is_noop() {
        let exchange = QueueExchange::<u32>::new();
        let mut current = pair(&[9], &[]);
        assert!(!exchange.swap(&mut current));
        assert_eq!(current.render, vec![9]);
    }

    #[test]
    fn swap_returns_latest_and_recycles_previous() {
        let exchange = QueueExchange::new();
        let (generation, superseded) = exchange.publish(pair(&[1, 2], &[3]));
        assert_eq!(generation, 1);
        assert!(superseded.is_none());

        let mut current = pair(&[7], &[8]);
        assert!(exchange.swap(&mut current));
        assert_eq!(current.generation, 1);
        assert_eq!(current.render, vec![1, 2]);
        assert_eq!(current.delete, vec![3]);

        let spare = exchange.take_spare().expect("previous pair recycled");
        assert!(spare.render.is_empty() && spare.delete.is_empty());
        assert!(exchange.take_spare().is_none());
    }

    #[test]
    fn unconsumed_pair_is_handed_back() {
        let exchange = QueueExchange::new();
        exchange.publish(pair(&[1], &[10]));
        let (generation, superseded) = exchange.publish(pair(&[2], &[20]));
        assert_eq!(generation, 2);

        let superseded = superseded.expect("first pair was never consumed");
        assert_eq!(superseded.generation, 1);
        assert_eq!(superseded.delete, vec![10]);

        let mut current = QueuePair::default();
        exchange.swap(&mut current);
        assert_eq!(current.generation, 2);
        assert!(!exchange.has_pending());
    }

    #[test]
    fn consumer_never_mixes_generations() {
        // Every element of a published pair carries its own generation; a torn
        // pair would show up as a mismatch on the consumer side.
        let exchange = Arc::new(QueueExchange::<u64>::new());
        let done = Arc::new(AtomicBool::new(false));

        let producer = {
            let exchange = Arc::clone(&exchange);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                for _ in 0..5_000 {
                    let tag = exchange.next_generation();
                    let mut pair = exchange.take_spare().unwrap_or_default();
                    pair.render.extend(std::iter::repeat(tag).take(8));
                    pair.delete.extend(std::iter::repeat(tag).take(3));
                    let (generation, _) = exchange.publish(pair);
                    assert_eq!(generation, tag);
                }
                done.store(true, Ordering::Release);
            })
        };

        let mut current = QueuePair::default();
        let mut last_seen = 0;
        let mut swaps = 0;
        loop {
            let finished = done.load(Ordering::Acquire);
            if exchange.swap(&mut current) {
                swaps += 1;
                assert!(current.generation > last_seen);
                last_seen = current.generation;
                assert!(current.render.iter().all(|&t| t == current.generation));
                assert!(current.delete.iter().all(|&t| t == current.generation));
                assert_eq!(current.render.len(), 8);
                assert_eq!(current.delete.len(), 3);
            }
            if finished && !exchange.has_pending() {
                break;
            }
        }

        producer.join().unwrap();
        assert!(swaps > 0);
        assert_eq!(last_seen, 5_000);
    }
}
