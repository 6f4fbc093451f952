//! Tournament brackets: seeding, pairing and standings.
//!
//! Everything here is pure. A [`Bracket`] is generated from seeded entrants and mutated only
//! through [`Bracket::record_result`] and [`Bracket::next_round`].
//!
//! # Provided formats
//! - [`BracketType::SingleElimination`]: standard seeding, byes for the top seeds.
//! - [`BracketType::RoundRobin`]: circle method, every pair meets exactly once.
//! - [`BracketType::Swiss`]: pairing by points, one round at a time.

use std::{collections::BTreeMap, fmt, str::FromStr};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::agent::AgentId;

pub mod round_robin;
pub mod single_elimination;
pub mod standings;
pub mod swiss;

pub use standings::Standing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BracketType {
    SingleElimination,
    RoundRobin,
    Swiss,
}

impl fmt::Display for BracketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BracketType::SingleElimination => "single-elimination",
            BracketType::RoundRobin => "round-robin",
            BracketType::Swiss => "swiss",
        })
    }
}

impl FromStr for BracketType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "single-elimination" => Ok(BracketType::SingleElimination),
            "round-robin" => Ok(BracketType::RoundRobin),
            "swiss" => Ok(BracketType::Swiss),
            other => bail!("unknown bracket type '{other}'"),
        }
    }
}

/// A participant with its seed (1 = best).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entrant {
    pub agent_id: AgentId,
    pub seed: usize,
}

impl Entrant {
    /// Entrants seeded in the order given.
    pub fn seeded(agents: impl IntoIterator<Item = AgentId>) -> Vec<Entrant> {
        agents
            .into_iter()
            .enumerate()
            .map(|(i, agent_id)| Entrant { agent_id, seed: i + 1 })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Pending,
    Running,
    Completed,
    Bye,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TournamentMatch {
    pub id: String,
    pub round: usize,
    /// 1-based position inside the round.
    pub match_number: usize,
    pub agent1: Option<AgentId>,
    pub agent2: Option<AgentId>,
    pub status: MatchStatus,
    /// `None` on a completed match is a draw.
    pub winner: Option<AgentId>,
    pub scores: BTreeMap<AgentId, f64>,
    pub is_bye: bool,
    pub node_id: Option<String>,
}

impl TournamentMatch {
    pub(crate) fn new(round: usize, match_number: usize) -> TournamentMatch {
        TournamentMatch {
            id: format!("r{round}-m{match_number}"),
            round,
            match_number,
            agent1: None,
            agent2: None,
            status: MatchStatus::Pending,
            winner: None,
            scores: BTreeMap::new(),
            is_bye: false,
            node_id: None,
        }
    }

    pub(crate) fn between(round: usize, match_number: usize, a: AgentId, b: AgentId) -> Self {
        TournamentMatch {
            agent1: Some(a),
            agent2: Some(b),
            ..TournamentMatch::new(round, match_number)
        }
    }

    /// A match `agent` wins without playing.
    pub(crate) fn bye(round: usize, match_number: usize, agent: AgentId) -> Self {
        TournamentMatch {
            agent1: Some(agent.clone()),
            status: MatchStatus::Bye,
            winner: Some(agent),
            is_bye: true,
            ..TournamentMatch::new(round, match_number)
        }
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentId> {
        self.agent1.iter().chain(self.agent2.iter())
    }

    pub fn involves(&self, agent: &AgentId) -> bool {
        self.agents().any(|a| a == agent)
    }

    /// Both agents are known and the match has not been played.
    pub fn is_playable(&self) -> bool {
        self.status == MatchStatus::Pending && self.agent1.is_some() && self.agent2.is_some()
    }

    /// Completed or bye.
    pub fn is_settled(&self) -> bool {
        matches!(self.status, MatchStatus::Completed | MatchStatus::Bye)
    }

    pub fn opponent_of(&self, agent: &AgentId) -> Option<&AgentId> {
        match (&self.agent1, &self.agent2) {
            (Some(a), Some(b)) if a == agent => Some(b),
            (Some(a), Some(b)) if b == agent => Some(a),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TournamentRound {
    pub number: usize,
    pub name: String,
    pub matches: Vec<TournamentMatch>,
}

impl TournamentRound {
    pub fn is_settled(&self) -> bool {
        self.matches.iter().all(TournamentMatch::is_settled)
    }
}

/// Node of the elimination graph. Every node but the final has exactly one child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BracketNode {
    pub id: String,
    pub round: usize,
    /// 0-based position inside the round.
    pub position: usize,
    pub match_id: String,
    pub parent_ids: Vec<String>,
    pub child_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bracket {
    pub bracket_type: BracketType,
    pub entrants: Vec<Entrant>,
    pub rounds: Vec<TournamentRound>,
    /// Empty unless single elimination.
    pub nodes: Vec<BracketNode>,
    pub bracket_size: usize,
    pub num_byes: usize,
    pub total_rounds: usize,
}

impl Bracket {
    /// Generates a bracket.
    ///
    /// Single elimination and round robin generate every round up front. Swiss generates the
    /// first round only, later ones come from [`Bracket::next_round`]. `swiss_rounds == 0` means
    /// `ceil(log2 n)` rounds.
    ///
    /// # Errors
    /// Fails without entrants, with the same agent entered twice, or when seeds are not exactly
    /// `1..=n`.
    pub fn new(
        bracket_type: BracketType,
        entrants: Vec<Entrant>,
        swiss_rounds: usize,
    ) -> anyhow::Result<Bracket> {
        if entrants.is_empty() {
            bail!("a bracket needs at least one entrant");
        }
        for (i, entrant) in entrants.iter().enumerate() {
            if entrants[..i].iter().any(|e| e.agent_id == entrant.agent_id) {
                bail!("agent {} entered twice", entrant.agent_id);
            }
        }
        let mut seeds = entrants.iter().map(|e| e.seed).collect::<Vec<_>>();
        seeds.sort_unstable();
        if seeds.iter().enumerate().any(|(i, seed)| *seed != i + 1) {
            bail!("seeds must run from 1 to {} without gaps, got {seeds:?}", entrants.len());
        }

        match bracket_type {
            BracketType::SingleElimination => Ok(single_elimination::generate(entrants)),
            BracketType::RoundRobin => Ok(round_robin::generate(entrants)),
            BracketType::Swiss => {
                let total_rounds = if swiss_rounds == 0 {
                    swiss::auto_rounds(entrants.len())
                } else {
                    swiss_rounds
                };
                let mut bracket = Bracket {
                    bracket_type,
                    bracket_size: entrants.len(),
                    num_byes: 0,
                    total_rounds,
                    entrants,
                    rounds: vec![],
                    nodes: vec![],
                };
                bracket.next_round()?;
                Ok(bracket)
            }
        }
    }

    pub fn seed_of(&self, agent: &AgentId) -> Option<usize> {
        self.entrants
            .iter()
            .find(|e| &e.agent_id == agent)
            .map(|e| e.seed)
    }

    pub fn round(&self, number: usize) -> Option<&TournamentRound> {
        self.rounds.iter().find(|r| r.number == number)
    }

    pub fn find_match(&self, match_id: &str) -> Option<&TournamentMatch> {
        self.rounds
            .iter()
            .flat_map(|r| r.matches.iter())
            .find(|m| m.id == match_id)
    }

    pub(crate) fn find_match_mut(&mut self, match_id: &str) -> Option<&mut TournamentMatch> {
        self.rounds
            .iter_mut()
            .flat_map(|r| r.matches.iter_mut())
            .find(|m| m.id == match_id)
    }

    pub fn matches(&self) -> impl Iterator<Item = &TournamentMatch> {
        self.rounds.iter().flat_map(|r| r.matches.iter())
    }

    /// Every round generated and settled.
    pub fn is_complete(&self) -> bool {
        self.rounds.len() == self.total_rounds && self.rounds.iter().all(|r| r.is_settled())
    }

    /// Records the result of a played match. `winner == None` is a draw.
    ///
    /// # Errors
    /// Fails for an unknown or unplayable match, a winner that is not in the match, or a draw in
    /// single elimination.
    pub fn record_result(
        &mut self,
        match_id: &str,
        winner: Option<AgentId>,
        scores: BTreeMap<AgentId, f64>,
    ) -> anyhow::Result<()> {
        match (self.bracket_type, winner) {
            (BracketType::SingleElimination, Some(winner)) => {
                single_elimination::record_winner(self, match_id, winner, scores)
            }
            (BracketType::SingleElimination, None) => {
                bail!("match {match_id}: single elimination matches cannot end in a draw")
            }
            (_, winner) => {
                let m = self
                    .find_match_mut(match_id)
                    .with_context(|| format!("unknown match {match_id}"))?;
                m.settle(winner, scores)
            }
        }
    }

    /// Generates the next Swiss round once the current one is settled.
    ///
    /// Returns the new round number, or `None` when there is nothing left to generate (all
    /// rounds generated, or a format whose rounds are all generated up front).
    ///
    /// # Errors
    /// Fails if the current round still has unsettled matches.
    pub fn next_round(&mut self) -> anyhow::Result<Option<usize>> {
        if self.bracket_type != BracketType::Swiss || self.rounds.len() >= self.total_rounds {
            return Ok(None);
        }
        if let Some(last) = self.rounds.last() {
            if !last.is_settled() {
                bail!("round {} is not settled yet", last.number);
            }
        }
        let number = self.rounds.len() + 1;
        let round = swiss::pair_round(&self.entrants, &self.rounds, number);
        self.rounds.push(round);
        Ok(Some(number))
    }

    /// Current standings, best first.
    pub fn standings(&self) -> Vec<Standing> {
        match self.bracket_type {
            BracketType::SingleElimination => single_elimination::standings(self),
            BracketType::RoundRobin => standings::round_robin(&self.entrants, self.matches()),
            BracketType::Swiss => standings::swiss(&self.entrants, self.matches()),
        }
    }
}

impl TournamentMatch {
    pub(crate) fn settle(
        &mut self,
        winner: Option<AgentId>,
        scores: BTreeMap<AgentId, f64>,
    ) -> anyhow::Result<()> {
        if !(self.is_playable() || self.status == MatchStatus::Running) {
            bail!("match {} cannot take a result while {:?}", self.id, self.status);
        }
        if let Some(winner) = &winner {
            if !self.involves(winner) {
                bail!("agent {winner} does not play in match {}", self.id);
            }
        }
        self.status = MatchStatus::Completed;
        self.winner = winner;
        self.scores = scores;
        Ok(())
    }
}
