//! Drives one tournament through its bracket.
//!
//! Rounds run one after the other. Matches inside a round run concurrently, at most
//! `max_concurrent_matches` at a time, each as a two-agent competition over the tournament tasks.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{bail, Context};
use futures::{stream, StreamExt};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::Tournament;
use crate::{
    agent::{AgentConfig, AgentId},
    bracket::{BracketType, MatchStatus, Standing, TournamentMatch},
    competition::{leaderboard::LeaderboardEntry, CompetitionController, CompetitionStatus, Services},
    configuration::Configuration,
    notify::EventKind,
    persistence::TournamentStatus,
};

/// Result of one played match. `winner == None` is a draw.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub match_id: String,
    pub winner: Option<AgentId>,
    pub scores: BTreeMap<AgentId, f64>,
}

pub struct TournamentController {
    config: Configuration,
    services: Services,
    state: Mutex<Tournament>,
    /// Competitions of the matches in flight, by match id.
    live: Mutex<HashMap<String, Arc<CompetitionController>>>,
    cancelled: AtomicBool,
}

impl TournamentController {
    pub fn new(tournament: Tournament, config: Configuration, services: Services) -> Self {
        TournamentController {
            config,
            services,
            state: Mutex::new(tournament),
            live: Mutex::new(HashMap::new()),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> String {
        self.state.lock().expect("poisoned").id.clone()
    }

    pub fn status(&self) -> TournamentStatus {
        self.state.lock().expect("poisoned").status
    }

    /// Live view of the tournament: bracket, current round and standings.
    pub fn snapshot(&self) -> Tournament {
        self.state.lock().expect("poisoned").clone()
    }

    pub fn standings(&self) -> Vec<Standing> {
        self.state.lock().expect("poisoned").bracket.standings()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Plays every round. Returns the terminal status: completed, or cancelled if
    /// [`cancel`](Self::cancel) was called meanwhile.
    ///
    /// # Errors
    /// Any match that cannot be played (a competition failing to start) fails the whole run.
    #[instrument(skip(self), fields(tournament = %self.id()))]
    pub async fn run(&self) -> anyhow::Result<TournamentStatus> {
        let (id, payload) = {
            let mut state = self.state.lock().expect("poisoned");
            if state.status != TournamentStatus::Lobby {
                bail!("tournament {} cannot run from {}", state.id, state.status);
            }
            state.status = TournamentStatus::Running;
            let payload = json!({
                "bracket_type": state.bracket.bracket_type.to_string(),
                "agents": state.agents.iter().map(|a| a.id.clone()).collect::<Vec<_>>(),
                "total_rounds": state.bracket.total_rounds,
            });
            (state.id.clone(), payload)
        };
        self.services
            .sink
            .publish(EventKind::TournamentStart, &id, payload);

        let mut number = 1;
        loop {
            if self.is_cancelled() {
                return Ok(TournamentStatus::Cancelled);
            }
            let has_round = {
                let mut state = self.state.lock().expect("poisoned");
                if state.bracket.rounds.len() < number {
                    state.bracket.next_round()?;
                }
                state.bracket.round(number).is_some()
            };
            if !has_round {
                break;
            }
            self.play_round(&id, number).await?;
            number += 1;
        }

        if self.is_cancelled() {
            return Ok(TournamentStatus::Cancelled);
        }
        let standings = {
            let mut state = self.state.lock().expect("poisoned");
            state.status = TournamentStatus::Completed;
            state.standings = state.bracket.standings();
            state.standings.clone()
        };
        info!(champion = ?standings.first().map(|s| &s.agent_id), "tournament completed");
        self.services.sink.publish(
            EventKind::TournamentEnd,
            &id,
            json!({ "standings": standings }),
        );
        Ok(TournamentStatus::Completed)
    }

    async fn play_round(&self, id: &str, number: usize) -> anyhow::Result<()> {
        let (name, matches) = {
            let mut state = self.state.lock().expect("poisoned");
            state.current_round = number;
            let round = state
                .bracket
                .round(number)
                .with_context(|| format!("round {number} missing"))?;
            let name = round.name.clone();
            let playable = round
                .matches
                .iter()
                .filter(|m| m.is_playable())
                .cloned()
                .collect::<Vec<_>>();
            for m in &playable {
                if let Some(m) = state.bracket.find_match_mut(&m.id) {
                    m.status = MatchStatus::Running;
                }
            }
            (name, playable)
        };

        info!(round = number, name = %name, matches = matches.len(), "round started");
        self.services.sink.publish(
            EventKind::RoundStart,
            id,
            json!({ "round": number, "name": name, "matches": matches }),
        );

        let outcomes = stream::iter(matches)
            .map(|m| self.play_match(m))
            .buffer_unordered(self.config.max_concurrent_matches.max(1))
            .collect::<Vec<_>>()
            .await;

        for outcome in outcomes {
            let Some(outcome) = outcome? else { continue };
            {
                let mut state = self.state.lock().expect("poisoned");
                state
                    .bracket
                    .record_result(&outcome.match_id, outcome.winner.clone(), outcome.scores.clone())?;
            }
            self.services.sink.publish(
                EventKind::MatchEnd,
                id,
                json!({
                    "round": number,
                    "match_id": outcome.match_id,
                    "winner": outcome.winner,
                    "scores": outcome.scores,
                }),
            );
        }

        if self.is_cancelled() {
            return Ok(());
        }
        let standings = {
            let mut state = self.state.lock().expect("poisoned");
            state.standings = state.bracket.standings();
            state.standings.clone()
        };
        if self.config.verbose {
            print_standings(number, &standings);
        }
        self.services.sink.publish(
            EventKind::RoundEnd,
            id,
            json!({ "round": number, "standings": standings }),
        );
        Ok(())
    }

    /// Runs `m` as a two-agent competition. `Ok(None)` when the tournament got cancelled.
    async fn play_match(&self, m: TournamentMatch) -> anyhow::Result<Option<MatchOutcome>> {
        let (competition, seeds) = {
            let state = self.state.lock().expect("poisoned");
            let agents = m
                .agents()
                .map(|id| {
                    state
                        .agents
                        .iter()
                        .find(|a| &a.id == id)
                        .cloned()
                        .with_context(|| format!("agent {id} is not in tournament {}", state.id))
                })
                .collect::<anyhow::Result<Vec<AgentConfig>>>()?;
            let seeds = m
                .agents()
                .map(|a| (a.clone(), state.bracket.seed_of(a).unwrap_or(usize::MAX)))
                .collect::<HashMap<_, _>>();
            let competition = CompetitionController::create_competition(
                format!("{} {} match {}", state.name, m.round, m.match_number),
                format!("{} round {}", state.bracket.bracket_type, m.round),
                agents,
                state.tasks.clone(),
                self.config.clone(),
                self.services.clone(),
            );
            (Arc::new(competition), seeds)
        };

        self.live
            .lock()
            .expect("poisoned")
            .insert(m.id.clone(), competition.clone());
        if self.is_cancelled() {
            self.live.lock().expect("poisoned").remove(&m.id);
            return Ok(None);
        }

        debug!(match_id = %m.id, competition = %competition.id(), "match started");
        let result = competition.start_competition().await;
        competition.cleanup().await;
        self.live.lock().expect("poisoned").remove(&m.id);
        if result.is_err() && self.is_cancelled() {
            return Ok(None);
        }
        result.with_context(|| format!("match {} could not be played", m.id))?;

        if competition.status() == CompetitionStatus::Cancelled {
            return Ok(None);
        }

        let leaderboard = competition.leaderboard();
        let mut winner = match_winner(&leaderboard);
        if winner.is_none() && self.snapshot_bracket_type() == BracketType::SingleElimination {
            // single elimination has no draws: the better seed goes through
            winner = seeds.iter().min_by_key(|(_, seed)| **seed).map(|(a, _)| a.clone());
        }
        let scores = leaderboard
            .iter()
            .map(|e| (e.agent_id.clone(), e.total_score))
            .collect();
        Ok(Some(MatchOutcome {
            match_id: m.id,
            winner,
            scores,
        }))
    }

    fn snapshot_bracket_type(&self) -> BracketType {
        self.state.lock().expect("poisoned").bracket.bracket_type
    }

    /// Stops the tournament: no new match or round starts, and the competitions in flight are
    /// cancelled and release their sandboxes.
    pub async fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let live = self
            .live
            .lock()
            .expect("poisoned")
            .values()
            .cloned()
            .collect::<Vec<_>>();
        for competition in live {
            competition.cancel_competition().await;
        }
        let id = {
            let mut state = self.state.lock().expect("poisoned");
            state.status = TournamentStatus::Cancelled;
            state.id.clone()
        };
        warn!(tournament = %id, "tournament cancelled");
        self.services
            .sink
            .publish(EventKind::TournamentCancelled, &id, json!({}));
    }
}

/// Leaderboard leader, or `None` when the top two tie on every ranking key.
pub fn match_winner(leaderboard: &[LeaderboardEntry]) -> Option<AgentId> {
    match leaderboard {
        [first, second, ..]
            if first.total_score == second.total_score
                && first.events_won == second.events_won
                && first.average_time_ms == second.average_time_ms =>
        {
            None
        }
        [first, ..] => Some(first.agent_id.clone()),
        [] => None,
    }
}

fn print_standings(round: usize, standings: &[Standing]) {
    // green round, default standings
    println!("\x1b[32mAfter round {round}:\x1b[39m");
    for s in standings {
        println!(
            "  {:>2}. {} ({}W {}L {}D, {:.0} pts)",
            s.placement, s.agent_id, s.wins, s.losses, s.ties, s.total_score
        );
    }
}
