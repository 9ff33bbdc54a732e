use crate::types::WithTimestamp;
use std::{collections::VecDeque, time::Duration};

/// A bounded queue of messages with strictly increasing timestamps.
///
/// Pushing into a full buffer evicts the oldest message.
#[derive(Debug)]
pub struct Buffer<T>
where
    T: WithTimestamp,
{
    buffer: VecDeque<T>,
    capacity: usize,
    last_ts: Option<Duration>,
}

/// The result of a successful [Buffer::try_push].
#[derive(Debug)]
pub enum Pushed<T> {
    /// Stored without displacing anything.
    Stored,
    /// Stored after evicting the returned oldest message.
    Evicted(T),
}

impl<T> Buffer<T>
where
    T: WithTimestamp,
{
    /// Create a buffer holding at most `capacity` messages. A zero capacity
    /// is raised to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
            last_ts: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.capacity
    }

    pub fn front(&self) -> Option<&T> {
        self.buffer.front()
    }

    pub fn back(&self) -> Option<&T> {
        self.buffer.back()
    }

    /// The message right behind the front one.
    pub fn second(&self) -> Option<&T> {
        self.buffer.get(1)
    }

    pub fn front_ts(&self) -> Option<Duration> {
        self.buffer.front().map(|item| item.timestamp())
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buffer.iter()
    }

    /// Checks if a message stamped exactly `ts` is pending.
    pub fn contains(&self, ts: Duration) -> bool {
        self.buffer
            .binary_search_by_key(&ts, |item| item.timestamp())
            .is_ok()
    }

    pub fn pop_front(&mut self) -> Option<T> {
        self.buffer.pop_front()
    }

    pub fn front_entry(&mut self) -> Option<FrontEntry<'_, T>> {
        let item = self.buffer.pop_front()?;
        Some(FrontEntry {
            buffer: self,
            item: Some(item),
        })
    }

    /// Drops messages before a specific timestamp and returns the
    /// number of dropped messages.
    pub fn drop_before(&mut self, ts: Duration) -> usize {
        let mut count = 0;

        while let Some(entry) = self.front_entry() {
            if entry.value().timestamp() >= ts {
                break;
            }
            let _ = entry.take();
            count += 1;
        }

        count
    }

    /// Remove and return the message stamped exactly `ts`.
    pub fn take_exact(&mut self, ts: Duration) -> Option<T> {
        let index = self
            .buffer
            .binary_search_by_key(&ts, |item| item.timestamp())
            .ok()?;
        self.buffer.remove(index)
    }

    /// Try to push a message into the buffer.
    ///
    /// A message whose timestamp is not above that of the previously
    /// inserted message is handed back as an error.
    pub fn try_push(&mut self, item: T) -> Result<Pushed<T>, T> {
        let timestamp = item.timestamp();

        match self.last_ts {
            Some(last_ts) if last_ts >= timestamp => return Err(item),
            _ => {}
        }

        let evicted = if self.is_full() {
            self.buffer.pop_front()
        } else {
            None
        };

        self.last_ts = Some(timestamp);
        self.buffer.push_back(item);

        Ok(match evicted {
            Some(evicted) => Pushed::Evicted(evicted),
            None => Pushed::Stored,
        })
    }
}

/// A popped front message that returns to the buffer unless taken.
pub struct FrontEntry<'a, T>
where
    T: WithTimestamp,
{
    buffer: &'a mut Buffer<T>,
    item: Option<T>,
}

impl<T> FrontEntry<'_, T>
where
    T: WithTimestamp,
{
    pub fn take(mut self) -> Option<T> {
        self.item.take()
    }

    pub fn value(&self) -> &T {
        // The item is only moved out by `take`, which consumes the entry.
        match &self.item {
            Some(item) => item,
            None => unreachable!("front entry accessed after take"),
        }
    }
}

impl<T> Drop for FrontEntry<'_, T>
where
    T: WithTimestamp,
{
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.buffer.buffer.push_front(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestMessage(Duration);

    impl WithTimestamp for TestMessage {
        fn timestamp(&self) -> Duration {
            self.0
        }
    }

    fn msg(ms: u64) -> TestMessage {
        TestMessage(Duration::from_millis(ms))
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let buffer: Buffer<TestMessage> = Buffer::with_capacity(0);
        assert_eq!(buffer.capacity(), 1);
    }

    #[test]
    fn test_push_in_order() {
        let mut buffer = Buffer::with_capacity(4);
        assert!(matches!(buffer.try_push(msg(100)), Ok(Pushed::Stored)));
        assert!(matches!(buffer.try_push(msg(200)), Ok(Pushed::Stored)));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.front_ts(), Some(Duration::from_millis(100)));
        assert_eq!(buffer.back(), Some(&msg(200)));
    }

    #[test]
    fn test_reject_non_increasing() {
        let mut buffer = Buffer::with_capacity(4);
        buffer.try_push(msg(200)).unwrap();

        assert_eq!(buffer.try_push(msg(200)).unwrap_err(), msg(200));
        assert_eq!(buffer.try_push(msg(150)).unwrap_err(), msg(150));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_evict_oldest_when_full() {
        let mut buffer = Buffer::with_capacity(2);
        buffer.try_push(msg(100)).unwrap();
        buffer.try_push(msg(200)).unwrap();

        match buffer.try_push(msg(300)) {
            Ok(Pushed::Evicted(evicted)) => assert_eq!(evicted, msg(100)),
            other => panic!("expected eviction, got {other:?}"),
        }
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.front(), Some(&msg(200)));
    }

    #[test]
    fn test_rejection_survives_eviction() {
        let mut buffer = Buffer::with_capacity(1);
        buffer.try_push(msg(100)).unwrap();
        buffer.try_push(msg(200)).unwrap();

        // 100 was evicted, but it's still older than the last accepted stamp.
        assert!(buffer.try_push(msg(100)).is_err());
    }

    #[test]
    fn test_drop_before() {
        let mut buffer = Buffer::with_capacity(8);
        for ts in [100, 200, 300, 400] {
            buffer.try_push(msg(ts)).unwrap();
        }

        assert_eq!(buffer.drop_before(Duration::from_millis(300)), 2);
        assert_eq!(buffer.front(), Some(&msg(300)));
        assert_eq!(buffer.drop_before(Duration::from_millis(300)), 0);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_take_exact() {
        let mut buffer = Buffer::with_capacity(8);
        for ts in [100, 200, 300] {
            buffer.try_push(msg(ts)).unwrap();
        }

        assert!(buffer.contains(Duration::from_millis(200)));
        assert_eq!(buffer.take_exact(Duration::from_millis(200)), Some(msg(200)));
        assert!(!buffer.contains(Duration::from_millis(200)));
        assert_eq!(buffer.take_exact(Duration::from_millis(250)), None);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.second(), Some(&msg(300)));
    }

    #[test]
    fn test_front_entry_returns_on_drop() {
        let mut buffer = Buffer::with_capacity(4);
        buffer.try_push(msg(100)).unwrap();

        {
            let entry = buffer.front_entry().unwrap();
            assert_eq!(entry.value(), &msg(100));
        }

        assert_eq!(buffer.len(), 1);
    }
}
