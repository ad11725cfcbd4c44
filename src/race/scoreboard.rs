//! Supervisor-private score keeping and leader/winner decisions.
//!
//! Only the derived leader (and eventually the winner) ever leaves this
//! module; raw scores stay private to the supervisor process.

use super::config::WorkerId;
use crate::error::{RaceError, Result};

/// What one report changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Leader after this report.
    pub leader: WorkerId,
    /// The leader's score after this report.
    pub leader_score: u32,
    /// Set when the sender is the leader and just landed on a milestone.
    pub milestone: Option<u32>,
    /// Set exactly once, on the report that decides the race.
    pub winner: Option<WorkerId>,
}

/// Per-worker scores, indexed by worker id.
#[derive(Debug, Clone)]
pub struct Scoreboard {
    scores: Vec<u32>,
    leader: WorkerId,
    winner: Option<WorkerId>,
    target: u32,
    milestone: u32,
}

impl Scoreboard {
    pub fn new(workers: u32, target: u32, milestone: u32) -> Self {
        Self {
            scores: vec![0; workers as usize],
            leader: WorkerId::new(0),
            winner: None,
            target,
            milestone,
        }
    }

    /// Credit one report to `sender` and re-evaluate the race.
    ///
    /// Only the sender's score moves, so the sender either strictly overtakes
    /// the incumbent or the incumbent stays; equal scores never displace it.
    pub fn record(&mut self, sender: WorkerId) -> Result<Decision> {
        let workers = self.scores.len() as u32;
        let score = self
            .scores
            .get_mut(sender.index())
            .ok_or(RaceError::UnknownWorker {
                worker: sender.get(),
                workers,
            })?;
        *score += 1;
        let sender_score = *score;

        if sender != self.leader && sender_score > self.scores[self.leader.index()] {
            self.leader = sender;
        }
        let leader_score = self.scores[self.leader.index()];
        let sender_leads = sender == self.leader;

        let milestone = (sender_leads && leader_score % self.milestone == 0).then_some(leader_score);

        let winner = if self.winner.is_none() && sender_leads && leader_score == self.target {
            self.winner = Some(sender);
            Some(sender)
        } else {
            None
        };

        Ok(Decision {
            leader: self.leader,
            leader_score,
            milestone,
            winner,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl Scoreboard {
        fn leader(&self) -> WorkerId {
            self.leader
        }

        fn winner(&self) -> Option<WorkerId> {
            self.winner
        }

        fn score(&self, worker: WorkerId) -> Option<u32> {
            self.scores.get(worker.index()).copied()
        }
    }

    fn w(id: u32) -> WorkerId {
        WorkerId::new(id)
    }

    /// Reference: strictly highest score, incumbent kept on ties.
    fn rescan_leader(scores: &[u32], incumbent: WorkerId) -> WorkerId {
        let mut best = incumbent;
        for (index, &score) in scores.iter().enumerate() {
            if score > scores[best.index()] {
                best = w(index as u32);
            }
        }
        best
    }

    #[test]
    fn test_single_runner_scenario() {
        // N=3, R=5, milestone 5: worker 1 sends all five reports first.
        let mut board = Scoreboard::new(3, 5, 5);

        let first = board.record(w(1)).unwrap();
        assert_eq!(first.leader, w(1));
        assert_eq!(first.milestone, None);
        assert_eq!(first.winner, None);

        for _ in 0..3 {
            let d = board.record(w(1)).unwrap();
            assert_eq!(d.milestone, None);
            assert_eq!(d.winner, None);
        }

        let fifth = board.record(w(1)).unwrap();
        assert_eq!(fifth.leader, w(1));
        assert_eq!(fifth.leader_score, 5);
        assert_eq!(fifth.milestone, Some(5));
        assert_eq!(fifth.winner, Some(w(1)));
    }

    #[test]
    fn test_tie_keeps_incumbent() {
        let mut board = Scoreboard::new(3, 10, 5);
        board.record(w(2)).unwrap();
        assert_eq!(board.leader(), w(2));

        // Worker 0 matches but does not exceed.
        let d = board.record(w(0)).unwrap();
        assert_eq!(d.leader, w(2));

        // Now it exceeds.
        let d = board.record(w(0)).unwrap();
        assert_eq!(d.leader, w(0));
    }

    #[test]
    fn test_initial_leader_is_worker_zero() {
        let board = Scoreboard::new(4, 3, 5);
        assert_eq!(board.leader(), w(0));
        assert_eq!(board.winner(), None);
    }

    #[test]
    fn test_simultaneous_finish_first_strict_winner_stays() {
        let mut board = Scoreboard::new(2, 5, 5);
        // Interleave so both sit at 4.
        for _ in 0..4 {
            board.record(w(0)).unwrap();
            board.record(w(1)).unwrap();
        }
        assert_eq!(board.leader(), w(0));

        let d = board.record(w(1)).unwrap();
        assert_eq!(d.leader, w(1));
        assert_eq!(d.winner, Some(w(1)));

        // The equalizing report from worker 0 changes nothing.
        let d = board.record(w(0)).unwrap();
        assert_eq!(d.leader, w(1));
        assert_eq!(d.winner, None);
        assert_eq!(board.winner(), Some(w(1)));
    }

    #[test]
    fn test_milestone_only_for_leader_reports() {
        let mut board = Scoreboard::new(2, 20, 5);
        for _ in 0..6 {
            board.record(w(0)).unwrap();
        }
        // Worker 1 reaching 5 while trailing is not a milestone.
        for _ in 0..4 {
            assert_eq!(board.record(w(1)).unwrap().milestone, None);
        }
        let d = board.record(w(1)).unwrap();
        assert_eq!(d.leader, w(0));
        assert_eq!(d.milestone, None);
    }

    #[test]
    fn test_milestone_every_multiple() {
        let mut board = Scoreboard::new(1, 100, 5);
        let hits: Vec<u32> = (0..20)
            .filter_map(|_| board.record(w(0)).unwrap().milestone)
            .collect();
        assert_eq!(hits, vec![5, 10, 15, 20]);
    }

    #[test]
    fn test_winner_decided_once() {
        let mut board = Scoreboard::new(1, 2, 5);
        board.record(w(0)).unwrap();
        assert_eq!(board.record(w(0)).unwrap().winner, Some(w(0)));
        assert_eq!(board.record(w(0)).unwrap().winner, None);
        assert_eq!(board.winner(), Some(w(0)));
    }

    #[test]
    fn test_unknown_sender_rejected() {
        let mut board = Scoreboard::new(2, 5, 5);
        let err = board.record(w(9)).unwrap_err();
        assert!(matches!(err, RaceError::UnknownWorker { worker: 9, workers: 2 }));
        assert_eq!(board.score(w(0)), Some(0));
    }

    #[test]
    fn test_incremental_matches_rescan() {
        // Deterministic pseudo-random interleaving over 5 workers.
        let mut board = Scoreboard::new(5, 1_000, 5);
        let mut scores = vec![0u32; 5];
        let mut leader = w(0);
        let mut state = 0x2545_f491_u32;
        for _ in 0..500 {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let sender = w(state % 5);
            scores[sender.index()] += 1;
            leader = rescan_leader(&scores, leader);
            assert_eq!(board.record(sender).unwrap().leader, leader);
        }
    }
}
