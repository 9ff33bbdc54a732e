use crate::{
    state::{SyncPolicy, SyncStats, Synchronizer},
    types::WithTimestamp,
};
use eyre::{Result, ensure};
use futures::{
    StreamExt,
    future::Either,
    stream::{self, BoxStream, Stream},
};
use std::task::{Context, Poll, Poll::*};
use tokio::sync::watch;
use tracing::debug;

/// The stream returned by [sync], emitting paired messages.
pub type PairStream<'a, A, B> = BoxStream<'a, (A, B)>;

/// The receiver returned by [sync], tracking join statistics.
pub type StatsReceiver = watch::Receiver<SyncStats>;

/// Join two independently timed streams into a stream of pairs.
///
/// Messages from `first` and `second` are buffered, at most `queue_size`
/// per side, and paired under `policy`. When both inputs are depleted the
/// remaining messages are flushed through the policy once more and the
/// output ends.
pub fn sync<'a, A, B, S1, S2>(
    first: S1,
    second: S2,
    policy: SyncPolicy,
    queue_size: usize,
) -> Result<(PairStream<'a, A, B>, StatsReceiver)>
where
    A: WithTimestamp + 'a,
    B: WithTimestamp + 'a,
    S1: Stream<Item = A> + Send + 'a,
    S2: Stream<Item = B> + Send + 'a,
{
    // Sanity check
    ensure!(queue_size >= 1, "queue_size must be at least 1");
    if let SyncPolicy::Approximate { tolerance } = policy {
        ensure!(
            !tolerance.is_zero(),
            "approximate tolerance must be greater than zero"
        );
    }

    let input: BoxStream<'a, Either<A, B>> =
        stream::select(first.map(Either::Left), second.map(Either::Right)).boxed();

    let (stats_tx, stats_rx) = watch::channel(SyncStats::default());
    let mut state = Synchronizer::new(policy, queue_size);

    let output_stream = {
        let mut input = Some(input);
        stream::poll_fn(move |ctx| poll(&mut input, &mut state, &stats_tx, ctx))
    };

    Ok((output_stream.boxed(), stats_rx))
}

/// The polling function is repeatedly called to generate pairs.
fn poll<A, B, S>(
    input: &mut Option<S>,
    state: &mut Synchronizer<A, B>,
    stats_tx: &watch::Sender<SyncStats>,
    ctx: &mut Context<'_>,
) -> Poll<Option<(A, B)>>
where
    A: WithTimestamp,
    B: WithTimestamp,
    S: Stream<Item = Either<A, B>> + Unpin,
{
    loop {
        if let Some(pair) = state.try_match() {
            stats_tx.send_replace(state.stats());
            return Ready(Some(pair));
        }

        let Some(input_stream) = input.as_mut() else {
            // Case: the input streams are depleted.
            let pair = state.flush();
            stats_tx.send_replace(state.stats());
            return Ready(pair);
        };

        match input_stream.poll_next_unpin(ctx) {
            Ready(Some(Either::Left(item))) => {
                let _ = state.push_first(item);
            }
            Ready(Some(Either::Right(item))) => {
                let _ = state.push_second(item);
            }
            Ready(None) => {
                let (first, second) = state.pending();
                debug!(
                    pending_first = first,
                    pending_second = second,
                    "Input streams depleted, flushing"
                );
                *input = None;
            }
            Pending => {
                stats_tx.send_replace(state.stats());
                return Pending;
            }
        }
    }
}
