//! Reassembles an ordered text stream from possibly out-of-order chunk
//! events for one response turn.
//!
//! The raw set is complete and index-sorted the moment a chunk arrives; the
//! animated subsequence advances at most one chunk per commit tick, giving
//! the UI a typing reveal decoupled from network arrival timing. The owner
//! drives ticks (see `session::ChatClient`), so a chunk that arrives late
//! but in-gap is still revealed in index order.

use std::collections::BTreeMap;

use chatstream_protocol::protocol::Chunk;
use tracing::debug;
use tracing::warn;

/// Upper bound on the missing indices listed by the completion gap check.
pub const MAX_REPORTED_GAPS: usize = 64;

/// Opaque key returned by [`ChunkAnimator::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerKey(u64);

pub struct ChunkAnimator {
    /// Raw accumulated chunks, keyed (and therefore iterated) by index.
    /// Chunks are never removed before `reset`, so this map doubles as the
    /// seen-index record for duplicate detection.
    chunks: BTreeMap<u32, Chunk>,
    /// Committed reveal sequence, strictly contiguous in index order.
    animated: Vec<Chunk>,
    listeners: Vec<(ListenerKey, async_channel::Sender<Chunk>)>,
    next_listener_key: u64,
}

impl ChunkAnimator {
    pub fn new() -> Self {
        Self {
            chunks: BTreeMap::new(),
            animated: Vec::new(),
            listeners: Vec::new(),
            next_listener_key: 0,
        }
    }

    /// Accept a chunk. A duplicate index is silently ignored so replayed
    /// deliveries cannot corrupt the reveal sequence. Returns whether the
    /// chunk was accepted.
    pub fn add_chunk(&mut self, chunk: Chunk) -> bool {
        if self.chunks.contains_key(&chunk.index) {
            debug!(index = chunk.index, "ignoring duplicate chunk");
            return false;
        }
        self.chunks.insert(chunk.index, chunk);
        true
    }

    /// The full raw set in index order, regardless of animation progress.
    pub fn chunks(&self) -> Vec<Chunk> {
        self.chunks.values().cloned().collect()
    }

    /// The reveal sequence committed so far.
    pub fn animated(&self) -> &[Chunk] {
        &self.animated
    }

    /// Index the animation wants next: one past the last committed chunk,
    /// or the minimum available index when nothing has been committed yet.
    fn next_index(&self) -> Option<u32> {
        match self.animated.last() {
            Some(last) => Some(last.index + 1),
            None => self.chunks.keys().next().copied(),
        }
    }

    /// Commit at most one chunk per call; this is the pacing quantum.
    pub fn commit_next(&mut self) -> Option<Chunk> {
        let next = self.next_index()?;
        let chunk = self.chunks.get(&next)?.clone();
        self.animated.push(chunk.clone());
        self.notify(&chunk);
        Some(chunk)
    }

    /// Commit every currently contiguous chunk, e.g. when finalizing a turn
    /// without waiting out the remaining ticks.
    pub fn drain_ready(&mut self) -> Vec<Chunk> {
        let mut committed = Vec::new();
        while let Some(chunk) = self.commit_next() {
            committed.push(chunk);
        }
        committed
    }

    /// True when no contiguous next chunk is available to commit.
    pub fn is_idle(&self) -> bool {
        match self.next_index() {
            Some(next) => !self.chunks.contains_key(&next),
            None => true,
        }
    }

    /// Register a listener for committed chunks. Delivery never blocks; a
    /// closed receiver is pruned at the next commit.
    pub fn subscribe(&mut self) -> (ListenerKey, async_channel::Receiver<Chunk>) {
        let key = ListenerKey(self.next_listener_key);
        self.next_listener_key += 1;
        let (tx, rx) = async_channel::unbounded();
        self.listeners.push((key, tx));
        (key, rx)
    }

    /// Idempotent: unknown keys are a no-op.
    pub fn unsubscribe(&mut self, key: ListenerKey) {
        self.listeners.retain(|(k, _)| *k != key);
    }

    fn notify(&mut self, chunk: &Chunk) {
        self.listeners.retain(|(key, tx)| {
            if tx.try_send(chunk.clone()).is_err() {
                debug!(?key, "pruning closed chunk listener");
                false
            } else {
                true
            }
        });
    }

    /// Diagnostic gap check for malformed server streams, run when the turn
    /// completes. Returns (and logs) the first missing indices; never an
    /// error. The span math runs in `u64` and the report is capped at
    /// [`MAX_REPORTED_GAPS`], so a stream with an absurd index (anything up
    /// to `u32::MAX` is valid wire input) cannot overflow or allocate a
    /// span-sized vector inside the drain path.
    pub fn mark_conversation_complete(&self) -> Vec<u32> {
        let (Some(min), Some(max)) = (
            self.chunks.keys().next().copied(),
            self.chunks.keys().next_back().copied(),
        ) else {
            return Vec::new();
        };
        let expected = u64::from(max) - u64::from(min) + 1;
        if self.chunks.len() as u64 >= expected {
            return Vec::new();
        }
        let missing_total = expected - self.chunks.len() as u64;
        // Bounded work: at most `chunks.len()` present indices are skipped
        // before the cap fills, regardless of how wide the span is.
        let missing: Vec<u32> = (min..=max)
            .filter(|i| !self.chunks.contains_key(i))
            .take(MAX_REPORTED_GAPS)
            .collect();
        warn!(?missing, missing_total, min, max, "chunk stream completed with gaps");
        missing
    }

    /// Clear raw and animated state for reuse across turns sharing this
    /// instance key. Listeners survive a reset.
    pub fn reset(&mut self) {
        self.chunks.clear();
        self.animated.clear();
    }
}

impl Default for ChunkAnimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn chunk(index: u32, text: &str) -> Chunk {
        Chunk {
            index,
            text: text.to_string(),
        }
    }

    fn texts(chunks: &[Chunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn raw_set_is_sorted_regardless_of_arrival_order() {
        let mut animator = ChunkAnimator::new();
        animator.add_chunk(chunk(2, "c"));
        animator.add_chunk(chunk(0, "a"));
        animator.add_chunk(chunk(1, "b"));
        assert_eq!(texts(&animator.chunks()), vec!["a", "b", "c"]);
    }

    #[test]
    fn duplicate_index_is_ignored() {
        let mut animator = ChunkAnimator::new();
        assert!(animator.add_chunk(chunk(0, "first")));
        assert!(!animator.add_chunk(chunk(0, "second")));
        assert_eq!(texts(&animator.chunks()), vec!["first"]);
    }

    #[test]
    fn commits_advance_one_contiguous_chunk_per_tick() {
        let mut animator = ChunkAnimator::new();
        animator.add_chunk(chunk(2, "c"));
        animator.add_chunk(chunk(0, "a"));
        animator.add_chunk(chunk(1, "b"));

        let mut committed = Vec::new();
        while let Some(c) = animator.commit_next() {
            committed.push(c.index);
        }
        assert_eq!(committed, vec![0, 1, 2]);
        assert!(animator.is_idle());
    }

    #[test]
    fn commit_stalls_at_a_gap_and_resumes_when_filled() {
        let mut animator = ChunkAnimator::new();
        animator.add_chunk(chunk(0, "a"));
        animator.add_chunk(chunk(2, "c"));

        assert_eq!(animator.commit_next().map(|c| c.index), Some(0));
        // Index 1 has not arrived; the animation must not skip ahead.
        assert_eq!(animator.commit_next(), None);
        assert!(animator.is_idle());

        animator.add_chunk(chunk(1, "b"));
        assert_eq!(animator.commit_next().map(|c| c.index), Some(1));
        assert_eq!(animator.commit_next().map(|c| c.index), Some(2));
    }

    #[test]
    fn listeners_receive_commits_in_order_and_unsubscribe_is_idempotent() {
        let mut animator = ChunkAnimator::new();
        let (key, rx) = animator.subscribe();
        animator.add_chunk(chunk(1, "b"));
        animator.add_chunk(chunk(0, "a"));
        animator.drain_ready();

        assert_eq!(rx.try_recv().map(|c| c.index), Ok(0));
        assert_eq!(rx.try_recv().map(|c| c.index), Ok(1));
        assert!(rx.try_recv().is_err());

        animator.unsubscribe(key);
        animator.unsubscribe(key);
        animator.add_chunk(chunk(2, "c"));
        animator.drain_ready();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn gap_check_reports_missing_indices_without_failing() {
        let mut animator = ChunkAnimator::new();
        animator.add_chunk(chunk(0, "a"));
        animator.add_chunk(chunk(1, "b"));
        animator.add_chunk(chunk(3, "d"));
        assert_eq!(animator.mark_conversation_complete(), vec![2]);
    }

    #[test]
    fn gap_check_survives_the_full_index_range_and_caps_the_report() {
        let mut animator = ChunkAnimator::new();
        animator.add_chunk(chunk(0, "a"));
        animator.add_chunk(chunk(u32::MAX, "z"));
        let missing = animator.mark_conversation_complete();
        assert_eq!(missing.len(), MAX_REPORTED_GAPS);
        assert_eq!(missing[0], 1);
        assert_eq!(missing[MAX_REPORTED_GAPS - 1], MAX_REPORTED_GAPS as u32);
    }

    #[test]
    fn gap_check_is_quiet_for_complete_or_empty_streams() {
        let mut animator = ChunkAnimator::new();
        assert!(animator.mark_conversation_complete().is_empty());
        animator.add_chunk(chunk(0, "a"));
        animator.add_chunk(chunk(1, "b"));
        assert!(animator.mark_conversation_complete().is_empty());
    }

    #[test]
    fn reset_clears_state_but_keeps_listeners() {
        let mut animator = ChunkAnimator::new();
        let (_key, rx) = animator.subscribe();
        animator.add_chunk(chunk(0, "a"));
        animator.drain_ready();
        assert_eq!(rx.try_recv().map(|c| c.index), Ok(0));

        animator.reset();
        assert!(animator.chunks().is_empty());
        assert!(animator.animated().is_empty());

        animator.add_chunk(chunk(0, "again"));
        animator.drain_ready();
        assert_eq!(rx.try_recv().map(|c| c.text), Ok("again".to_string()));
    }
}
