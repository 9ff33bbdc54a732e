use crate::{
    buffer::{Buffer, Pushed},
    types::WithTimestamp,
};
use std::time::Duration;
use tracing::debug;

/// How the two sides of a [Synchronizer] are paired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Pair iff both stamps are identical.
    Exact,
    /// Pair the mutually closest messages whose stamps differ by at most
    /// `tolerance`.
    Approximate { tolerance: Duration },
}

/// Which side of the join has unmatched messages waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    PendingFirst,
    PendingSecond,
    PendingBoth,
}

/// Counters kept by a [Synchronizer].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncStats {
    /// Pairs handed out.
    pub pairs_emitted: u64,
    /// Messages refused for arriving out of order or at or before the
    /// last paired stamp.
    pub late_rejected: u64,
    /// Messages evicted because a side exceeded its queue bound.
    pub evicted: u64,
    /// Messages discarded because they can no longer find a partner.
    pub unmatched_dropped: u64,
}

/// A bounded two-stream join.
///
/// Each side keeps at most `queue_size` pending messages. Messages on the
/// same side must arrive with strictly increasing stamps; a message at or
/// before the last emitted pair is refused.
#[derive(Debug)]
pub struct Synchronizer<A, B>
where
    A: WithTimestamp,
    B: WithTimestamp,
{
    policy: SyncPolicy,
    first: Buffer<A>,
    second: Buffer<B>,

    /// Marks the timestamp at or before which messages are refused.
    commit_ts: Option<Duration>,

    stats: SyncStats,
}

impl<A, B> Synchronizer<A, B>
where
    A: WithTimestamp,
    B: WithTimestamp,
{
    pub fn new(policy: SyncPolicy, queue_size: usize) -> Self {
        Self {
            policy,
            first: Buffer::with_capacity(queue_size),
            second: Buffer::with_capacity(queue_size),
            commit_ts: None,
            stats: SyncStats::default(),
        }
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    pub fn commit_timestamp(&self) -> Option<Duration> {
        self.commit_ts
    }

    /// Number of pending messages on each side.
    pub fn pending(&self) -> (usize, usize) {
        (self.first.len(), self.second.len())
    }

    pub fn phase(&self) -> Phase {
        match (self.first.is_empty(), self.second.is_empty()) {
            (true, true) => Phase::Idle,
            (false, true) => Phase::PendingFirst,
            (true, false) => Phase::PendingSecond,
            (false, false) => Phase::PendingBoth,
        }
    }

    /// Insert a message on the first side. A message at or before the
    /// last paired stamp, or not above the previous one on this side, is
    /// handed back.
    pub fn push_first(&mut self, item: A) -> Result<(), A> {
        let timestamp = item.timestamp();
        if self.is_late(timestamp) {
            debug!(timestamp = ?timestamp, side = "first", "Rejected late message");
            self.stats.late_rejected += 1;
            return Err(item);
        }

        match self.first.try_push(item) {
            Ok(Pushed::Stored) => Ok(()),
            Ok(Pushed::Evicted(evicted)) => {
                debug!(timestamp = ?evicted.timestamp(), side = "first", "Evicted unmatched message");
                self.stats.evicted += 1;
                Ok(())
            }
            Err(item) => {
                debug!(timestamp = ?timestamp, side = "first", "Rejected out-of-order message");
                self.stats.late_rejected += 1;
                Err(item)
            }
        }
    }

    /// Insert a message on the second side. See [Synchronizer::push_first].
    pub fn push_second(&mut self, item: B) -> Result<(), B> {
        let timestamp = item.timestamp();
        if self.is_late(timestamp) {
            debug!(timestamp = ?timestamp, side = "second", "Rejected late message");
            self.stats.late_rejected += 1;
            return Err(item);
        }

        match self.second.try_push(item) {
            Ok(Pushed::Stored) => Ok(()),
            Ok(Pushed::Evicted(evicted)) => {
                debug!(timestamp = ?evicted.timestamp(), side = "second", "Evicted unmatched message");
                self.stats.evicted += 1;
                Ok(())
            }
            Err(item) => {
                debug!(timestamp = ?timestamp, side = "second", "Rejected out-of-order message");
                self.stats.late_rejected += 1;
                Err(item)
            }
        }
    }

    /// Try to form one pair from the pending messages.
    ///
    /// A single push may unlock several pairs, so callers drain this in a
    /// loop.
    pub fn try_match(&mut self) -> Option<(A, B)> {
        match self.policy {
            SyncPolicy::Exact => self.match_exact(),
            SyncPolicy::Approximate { tolerance } => self.match_approximate(tolerance, false),
        }
    }

    /// Pair what can still be paired once no more input will arrive.
    ///
    /// Under the exact policy this is the same as [Synchronizer::try_match].
    pub fn flush(&mut self) -> Option<(A, B)> {
        match self.policy {
            SyncPolicy::Exact => self.match_exact(),
            SyncPolicy::Approximate { tolerance } => self.match_approximate(tolerance, true),
        }
    }

    fn is_late(&self, timestamp: Duration) -> bool {
        matches!(self.commit_ts, Some(commit_ts) if commit_ts >= timestamp)
    }

    /// Pair the oldest stamp present on both sides. Older pending messages
    /// on both sides can never pair after that and are dropped.
    fn match_exact(&mut self) -> Option<(A, B)> {
        let ts = self
            .first
            .iter()
            .map(|item| item.timestamp())
            .find(|&ts| self.second.contains(ts))?;

        let first = self.first.take_exact(ts)?;
        let second = self.second.take_exact(ts)?;

        let dropped = self.first.drop_before(ts) + self.second.drop_before(ts);
        self.stats.unmatched_dropped += dropped as u64;

        Some(self.emit(first, second))
    }

    /// Greedy closest-pair matching over the two queue fronts.
    ///
    /// With `a` the earlier front and `b` the later one, `b` is the
    /// closest partner of `a` on its side. The pair is emitted once `a`'s
    /// side holds a successor that is no closer to `b`, or when
    /// `flushing`.
    fn match_approximate(&mut self, tolerance: Duration, flushing: bool) -> Option<(A, B)> {
        loop {
            let first_ts = self.first.front_ts()?;
            let second_ts = self.second.front_ts()?;
            let gap = first_ts.abs_diff(second_ts);

            if gap > tolerance {
                // The older front is out of reach of everything on the
                // other side.
                if first_ts < second_ts {
                    self.first.pop_front();
                } else {
                    self.second.pop_front();
                }
                self.stats.unmatched_dropped += 1;
                continue;
            }

            if gap.is_zero() {
                break;
            }

            let (later_ts, successor_ts) = if first_ts < second_ts {
                (second_ts, self.first.second().map(|next| next.timestamp()))
            } else {
                (first_ts, self.second.second().map(|next| next.timestamp()))
            };

            match successor_ts {
                Some(next_ts) if next_ts.abs_diff(later_ts) < gap => {
                    if first_ts < second_ts {
                        self.first.pop_front();
                    } else {
                        self.second.pop_front();
                    }
                    self.stats.unmatched_dropped += 1;
                }
                Some(_) => break,
                None if flushing => break,
                None => return None,
            }
        }

        let first = self.first.pop_front()?;
        let second = self.second.pop_front()?;
        Some(self.emit(first, second))
    }

    fn emit(&mut self, first: A, second: B) -> (A, B) {
        let commit_ts = first.timestamp().min(second.timestamp());
        self.commit_ts = Some(commit_ts);
        self.stats.pairs_emitted += 1;
        (first, second)
    }
}
