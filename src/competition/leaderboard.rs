//! Running leaderboard of a competition.
//!
//! Ranking order is `total_score` desc, then `events_won` desc, then `average_time_ms` asc (an
//! agent without any timed result sorts last). Ranks are always `1..=n` without gaps.

use std::cmp::Ordering;

use serde::Serialize;

use super::{TaskResult, TaskStatus};
use crate::agent::{AgentConfig, AgentId};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub agent_id: AgentId,
    pub agent_name: String,
    pub total_score: f64,
    pub events_won: u32,
    pub events_completed: u32,
    pub average_time_ms: Option<f64>,
    pub rank: usize,
    #[serde(skip)]
    timed_events: u32,
    #[serde(skip)]
    total_time_ms: u64,
}

impl LeaderboardEntry {
    fn new(agent: &AgentConfig, rank: usize) -> Self {
        LeaderboardEntry {
            agent_id: agent.id.clone(),
            agent_name: agent.name.clone(),
            total_score: 0.0,
            events_won: 0,
            events_completed: 0,
            average_time_ms: None,
            rank,
            timed_events: 0,
            total_time_ms: 0,
        }
    }

    fn record(&mut self, result: &TaskResult) {
        self.total_score += result.score;
        if result.status == TaskStatus::Completed {
            self.events_completed += 1;
            if let Some(ms) = result.completion_time_ms {
                self.timed_events += 1;
                self.total_time_ms += ms;
                self.average_time_ms = Some(self.total_time_ms as f64 / self.timed_events as f64);
            }
        }
    }
}

fn time_or_infinity(time: Option<f64>) -> f64 {
    time.unwrap_or(f64::INFINITY)
}

/// Leaderboard ordering between two entries.
pub fn ranking_order(a: &LeaderboardEntry, b: &LeaderboardEntry) -> Ordering {
    b.total_score
        .total_cmp(&a.total_score)
        .then_with(|| b.events_won.cmp(&a.events_won))
        .then_with(|| {
            time_or_infinity(a.average_time_ms).total_cmp(&time_or_infinity(b.average_time_ms))
        })
}

/// Results of one event, best first: score desc, then completion time asc.
pub fn event_ordering(results: &[TaskResult]) -> Vec<&TaskResult> {
    let mut ordered = results.iter().collect::<Vec<_>>();
    ordered.sort_by(|a, b| {
        b.score.total_cmp(&a.score).then_with(|| {
            let ta = a.completion_time_ms.map(|t| t as f64);
            time_or_infinity(ta).total_cmp(&time_or_infinity(b.completion_time_ms.map(|t| t as f64)))
        })
    });
    ordered
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Leaderboard {
    entries: Vec<LeaderboardEntry>,
}

impl Leaderboard {
    /// Zeroed leaderboard ranked in submission order.
    pub fn new(agents: &[AgentConfig]) -> Leaderboard {
        Leaderboard {
            entries: agents
                .iter()
                .enumerate()
                .map(|(i, agent)| LeaderboardEntry::new(agent, i + 1))
                .collect(),
        }
    }

    pub fn entries(&self) -> &[LeaderboardEntry] {
        &self.entries
    }

    pub fn entry(&self, agent: &AgentId) -> Option<&LeaderboardEntry> {
        self.entries.iter().find(|e| &e.agent_id == agent)
    }

    /// Applies the results of one event and re-ranks.
    ///
    /// Returns the event winner: the single best result, if it scored more than zero. Two results
    /// tied on score and time leave the event without a winner.
    pub fn apply_event(&mut self, results: &[TaskResult]) -> Option<AgentId> {
        let ordered = event_ordering(results);
        let winner = match ordered.as_slice() {
            [best, second, ..]
                if best.score == second.score
                    && best.completion_time_ms == second.completion_time_ms =>
            {
                None
            }
            [best, ..] if best.score > 0.0 => Some(best.agent_id.clone()),
            _ => None,
        };

        for result in results {
            if let Some(entry) = self.entries.iter_mut().find(|e| e.agent_id == result.agent_id) {
                entry.record(result);
                if winner.as_ref() == Some(&result.agent_id) {
                    entry.events_won += 1;
                }
            }
        }

        self.entries.sort_by(ranking_order);
        for (i, entry) in self.entries.iter_mut().enumerate() {
            entry.rank = i + 1;
        }
        winner
    }
}
