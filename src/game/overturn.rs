//! Score-overturn arbitration.
//!
//! Providers occasionally report a score that momentarily rolls back (a
//! disallowed goal, a feed glitch). A downward revision is held as pending
//! until repeated confirmation snapshots span the confirm window; only then
//! is the lower score committed. Anything else rejects or supersedes the
//! pending revision.

use std::time::{Duration, Instant};

pub const DEFAULT_CONFIRM_WINDOW: Duration = Duration::from_secs(15);

/// A downward score revision awaiting confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingOverturn {
    pub old: (u32, u32),
    pub new: (u32, u32),
    pub first_seen: Instant,
}

/// Outcome of feeding one observed score into the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreEvent {
    /// Same score, or a pending revision still inside the window.
    NoChange,
    /// Commit `score` as the new stored score.
    ScoreChange { score: (u32, u32) },
    /// A downward revision was just opened.
    OverturnPending { old: (u32, u32), new: (u32, u32) },
    /// The provider restored the old score; stored state is untouched.
    OverturnRejected,
    /// The lower score held for the whole window; commit it and clear the
    /// affected tickers' idempotency entries.
    OverturnConfirmed { score: (u32, u32) },
}

#[derive(Debug)]
pub struct OverturnMachine {
    confirm_window: Duration,
    pending: Option<PendingOverturn>,
}

impl OverturnMachine {
    pub fn new(confirm_window: Duration) -> Self {
        Self {
            confirm_window,
            pending: None,
        }
    }

    pub fn pending(&self) -> Option<&PendingOverturn> {
        self.pending.as_ref()
    }

    /// Discard any pending revision (terminal frames, real progress).
    pub fn reset(&mut self) {
        self.pending = None;
    }

    /// Feed one observed score. `stored` is the current committed score; the
    /// caller commits/ignores per the returned event. Time is injected so
    /// replay harnesses control the window.
    pub fn observe(
        &mut self,
        stored: (u32, u32),
        incoming: (u32, u32),
        now: Instant,
    ) -> ScoreEvent {
        match self.pending.take() {
            None => self.observe_fresh(stored, incoming, now),
            Some(pending) => {
                if incoming == pending.new {
                    if now.duration_since(pending.first_seen) >= self.confirm_window {
                        return ScoreEvent::OverturnConfirmed { score: incoming };
                    }
                    self.pending = Some(pending);
                    return ScoreEvent::NoChange;
                }
                if incoming == pending.old {
                    return ScoreEvent::OverturnRejected;
                }
                if incoming.0 > pending.old.0 || incoming.1 > pending.old.1 {
                    // The game progressed past the old score; the revision
                    // was noise.
                    return ScoreEvent::ScoreChange { score: incoming };
                }
                // Neither old, new, nor progress: restart against stored.
                self.observe_fresh(stored, incoming, now)
            }
        }
    }

    fn observe_fresh(
        &mut self,
        stored: (u32, u32),
        incoming: (u32, u32),
        now: Instant,
    ) -> ScoreEvent {
        if incoming == stored {
            return ScoreEvent::NoChange;
        }
        if incoming.0 > stored.0 || incoming.1 > stored.1 {
            return ScoreEvent::ScoreChange { score: incoming };
        }
        self.pending = Some(PendingOverturn {
            old: stored,
            new: incoming,
            first_seen: now,
        });
        ScoreEvent::OverturnPending {
            old: stored,
            new: incoming,
        }
    }
}

impl Default for OverturnMachine {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIRM_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> OverturnMachine {
        OverturnMachine::new(Duration::from_secs(15))
    }

    #[test]
    fn monotone_up_is_a_plain_score_change() {
        let mut m = machine();
        let t = Instant::now();
        assert_eq!(
            m.observe((0, 0), (1, 0), t),
            ScoreEvent::ScoreChange { score: (1, 0) }
        );
        assert!(m.pending().is_none());
    }

    #[test]
    fn equal_score_is_noop() {
        let mut m = machine();
        assert_eq!(m.observe((2, 1), (2, 1), Instant::now()), ScoreEvent::NoChange);
    }

    #[test]
    fn drop_opens_pending_and_rejects_on_restore() {
        let mut m = machine();
        let t = Instant::now();
        assert_eq!(
            m.observe((2, 0), (1, 0), t),
            ScoreEvent::OverturnPending {
                old: (2, 0),
                new: (1, 0)
            }
        );
        // Repeated confirmations inside the window stay silent.
        assert_eq!(
            m.observe((2, 0), (1, 0), t + Duration::from_secs(2)),
            ScoreEvent::NoChange
        );
        // Provider restores the old score: rejected, stored untouched.
        assert_eq!(
            m.observe((2, 0), (2, 0), t + Duration::from_secs(4)),
            ScoreEvent::OverturnRejected
        );
        assert!(m.pending().is_none());
    }

    #[test]
    fn drop_confirms_after_window() {
        let mut m = machine();
        let t = Instant::now();
        m.observe((3, 0), (2, 0), t);
        for s in 1..8 {
            assert_eq!(
                m.observe((3, 0), (2, 0), t + Duration::from_secs(s * 2)),
                ScoreEvent::NoChange
            );
        }
        assert_eq!(
            m.observe((3, 0), (2, 0), t + Duration::from_secs(16)),
            ScoreEvent::OverturnConfirmed { score: (2, 0) }
        );
        assert!(m.pending().is_none());
    }

    #[test]
    fn progress_past_old_supersedes_pending() {
        let mut m = machine();
        let t = Instant::now();
        m.observe((2, 0), (1, 0), t);
        assert_eq!(
            m.observe((2, 0), (2, 1), t + Duration::from_secs(1)),
            ScoreEvent::ScoreChange { score: (2, 1) }
        );
        assert!(m.pending().is_none());
    }

    #[test]
    fn unrelated_drop_restarts_the_machine() {
        let mut m = machine();
        let t = Instant::now();
        m.observe((3, 2), (2, 2), t);
        // A different downward reading replaces the pending entry.
        assert_eq!(
            m.observe((3, 2), (3, 1), t + Duration::from_secs(1)),
            ScoreEvent::OverturnPending {
                old: (3, 2),
                new: (3, 1)
            }
        );
        let pending = m.pending().unwrap();
        assert_eq!(pending.new, (3, 1));
    }
}
