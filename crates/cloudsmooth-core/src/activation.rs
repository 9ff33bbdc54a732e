//! The no-consumer fast path.

/// Live consumer counts on the two output channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscriberCounts {
    pub output: usize,
    pub normals: usize,
}

impl SubscriberCounts {
    pub fn total(&self) -> usize {
        self.output.saturating_add(self.normals)
    }
}

/// Returns true if anyone is listening on either output channel.
///
/// When this returns false the invocation must not validate, process or
/// publish anything.
pub fn should_run(counts: SubscriberCounts) -> bool {
    counts.total() > 0
}
