//! Tournament persistence port.
//!
//! The orchestrator reads tournament configuration and participants, then writes seeding,
//! status transitions, match rows and final standings. Writes are idempotent upserts so a
//! retried write never duplicates rows. [`InMemoryStore`] backs tests and local runs.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

use anyhow::bail;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    agent::{AgentId, Secret},
    bracket::{BracketType, MatchStatus},
};

/// Outcomes a caller can branch on.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type PersistenceResult<T> = std::result::Result<T, PersistenceError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TournamentStatus {
    /// Accepting participants; also where a failed run returns to.
    Lobby,
    Running,
    Completed,
    Cancelled,
}

impl fmt::Display for TournamentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TournamentStatus::Lobby => "lobby",
            TournamentStatus::Running => "running",
            TournamentStatus::Completed => "completed",
            TournamentStatus::Cancelled => "cancelled",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TournamentRecord {
    pub id: String,
    pub name: String,
    pub bracket_type: BracketType,
    pub status: TournamentStatus,
    pub task_ids: Vec<String>,
}

/// Credentials as stored, still encrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoredCredentials {
    None,
    EncryptedKey(String),
    Webhook {
        url: String,
        encrypted_secret: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub agent_id: AgentId,
    pub name: String,
    pub provider: String,
    pub model: String,
    pub rating: f64,
    pub color: String,
    pub credentials: StoredCredentials,
    /// Ineligible participants (withdrawn, banned, unpaid) are skipped at start.
    pub eligible: bool,
}

impl ParticipantRecord {
    pub fn new(agent_id: impl Into<AgentId>, name: impl Into<String>, rating: f64) -> Self {
        ParticipantRecord {
            agent_id: agent_id.into(),
            name: name.into(),
            provider: "local".to_string(),
            model: "unknown".to_string(),
            rating,
            color: "#888888".to_string(),
            credentials: StoredCredentials::None,
            eligible: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedRow {
    pub agent_id: AgentId,
    pub seed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchRow {
    pub tournament_id: String,
    pub round: usize,
    pub match_number: usize,
    pub agent1: Option<AgentId>,
    pub agent2: Option<AgentId>,
    pub winner: Option<AgentId>,
    pub scores: BTreeMap<AgentId, f64>,
    pub is_bye: bool,
    pub status: MatchStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StandingRow {
    pub agent_id: AgentId,
    pub placement: usize,
    pub matches_won: u32,
    pub matches_lost: u32,
    pub total_score: f64,
}

#[async_trait]
pub trait TournamentStore: Send + Sync {
    async fn load_tournament(&self, id: &str) -> PersistenceResult<TournamentRecord>;

    async fn load_participants(&self, tournament_id: &str) -> PersistenceResult<Vec<ParticipantRecord>>;

    async fn update_tournament_status(
        &self,
        id: &str,
        status: TournamentStatus,
    ) -> PersistenceResult<()>;

    /// Replaces the seeding of a tournament.
    async fn save_seeding(&self, tournament_id: &str, seeds: &[SeedRow]) -> PersistenceResult<()>;

    /// Upserts by `(tournament_id, round, match_number)`.
    async fn insert_match(&self, row: &MatchRow) -> PersistenceResult<()>;

    async fn update_standing(&self, tournament_id: &str, row: &StandingRow) -> PersistenceResult<()>;
}

/// Decrypts stored participant credentials.
pub trait CredentialVault: Send + Sync {
    fn decrypt(&self, ciphertext: &str) -> anyhow::Result<Secret>;
}

/// Development vault: credentials are stored in clear.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaintextVault;

impl CredentialVault for PlaintextVault {
    fn decrypt(&self, ciphertext: &str) -> anyhow::Result<Secret> {
        if ciphertext.is_empty() {
            bail!("empty credential");
        }
        Ok(Secret::new(ciphertext))
    }
}

#[derive(Debug, Default)]
struct Tables {
    tournaments: HashMap<String, TournamentRecord>,
    participants: HashMap<String, Vec<ParticipantRecord>>,
    seeding: HashMap<String, Vec<SeedRow>>,
    matches: BTreeMap<(String, usize, usize), MatchRow>,
    standings: HashMap<String, BTreeMap<AgentId, StandingRow>>,
}

/// In-memory store. Counts successful writes and can simulate an unavailable backend.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    writes: AtomicUsize,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a tournament and its participants. Not counted as a write.
    pub fn insert_tournament(&self, record: TournamentRecord, participants: Vec<ParticipantRecord>) {
        let mut tables = self.tables.lock().expect("poisoned");
        tables.participants.insert(record.id.clone(), participants);
        tables.tournaments.insert(record.id.clone(), record);
    }

    /// Every write call failing with [`PersistenceError::Backend`] while set.
    pub fn set_unavailable(&self, value: bool) {
        self.unavailable.store(value, Ordering::SeqCst);
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn status(&self, id: &str) -> Option<TournamentStatus> {
        let tables = self.tables.lock().expect("poisoned");
        tables.tournaments.get(id).map(|t| t.status)
    }

    pub fn seeding(&self, id: &str) -> Vec<SeedRow> {
        let tables = self.tables.lock().expect("poisoned");
        tables.seeding.get(id).cloned().unwrap_or_default()
    }

    /// Match rows of a tournament by round, then match number.
    pub fn matches(&self, id: &str) -> Vec<MatchRow> {
        let tables = self.tables.lock().expect("poisoned");
        tables
            .matches
            .iter()
            .filter(|((tournament, _, _), _)| tournament == id)
            .map(|(_, row)| row.clone())
            .collect()
    }

    /// Standing rows of a tournament by placement.
    pub fn standings(&self, id: &str) -> Vec<StandingRow> {
        let tables = self.tables.lock().expect("poisoned");
        let mut rows = tables
            .standings
            .get(id)
            .map(|rows| rows.values().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        rows.sort_by_key(|r| r.placement);
        rows
    }

    fn write<T>(&self, f: impl FnOnce(&mut Tables) -> PersistenceResult<T>) -> PersistenceResult<T> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PersistenceError::Backend("store unavailable".to_string()));
        }
        let result = f(&mut self.tables.lock().expect("poisoned"))?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(result)
    }
}

fn tournament_not_found(id: &str) -> PersistenceError {
    PersistenceError::NotFound {
        entity: "tournament",
        id: id.to_string(),
    }
}

#[async_trait]
impl TournamentStore for InMemoryStore {
    async fn load_tournament(&self, id: &str) -> PersistenceResult<TournamentRecord> {
        let tables = self.tables.lock().expect("poisoned");
        tables
            .tournaments
            .get(id)
            .cloned()
            .ok_or_else(|| tournament_not_found(id))
    }

    async fn load_participants(&self, tournament_id: &str) -> PersistenceResult<Vec<ParticipantRecord>> {
        let tables = self.tables.lock().expect("poisoned");
        tables
            .participants
            .get(tournament_id)
            .cloned()
            .ok_or_else(|| tournament_not_found(tournament_id))
    }

    async fn update_tournament_status(
        &self,
        id: &str,
        status: TournamentStatus,
    ) -> PersistenceResult<()> {
        self.write(|tables| {
            let record = tables
                .tournaments
                .get_mut(id)
                .ok_or_else(|| tournament_not_found(id))?;
            record.status = status;
            Ok(())
        })
    }

    async fn save_seeding(&self, tournament_id: &str, seeds: &[SeedRow]) -> PersistenceResult<()> {
        self.write(|tables| {
            let participants = tables
                .participants
                .get(tournament_id)
                .ok_or_else(|| tournament_not_found(tournament_id))?;
            if let Some(stranger) = seeds
                .iter()
                .find(|s| !participants.iter().any(|p| p.agent_id == s.agent_id))
            {
                return Err(PersistenceError::ConstraintViolation(format!(
                    "agent {} is not a participant of {tournament_id}",
                    stranger.agent_id
                )));
            }
            tables.seeding.insert(tournament_id.to_string(), seeds.to_vec());
            Ok(())
        })
    }

    async fn insert_match(&self, row: &MatchRow) -> PersistenceResult<()> {
        self.write(|tables| {
            if !tables.tournaments.contains_key(&row.tournament_id) {
                return Err(tournament_not_found(&row.tournament_id));
            }
            let key = (row.tournament_id.clone(), row.round, row.match_number);
            tables.matches.insert(key, row.clone());
            Ok(())
        })
    }

    async fn update_standing(&self, tournament_id: &str, row: &StandingRow) -> PersistenceResult<()> {
        self.write(|tables| {
            let participants = tables
                .participants
                .get(tournament_id)
                .ok_or_else(|| tournament_not_found(tournament_id))?;
            if !participants.iter().any(|p| p.agent_id == row.agent_id) {
                return Err(PersistenceError::ConstraintViolation(format!(
                    "agent {} is not a participant of {tournament_id}",
                    row.agent_id
                )));
            }
            tables
                .standings
                .entry(tournament_id.to_string())
                .or_default()
                .insert(row.agent_id.clone(), row.clone());
            Ok(())
        })
    }
}
