//! Tournament lifecycle: loading, seeding, running, cancelling and persisting results.
//!
//! [`TournamentManager`] owns the table of active tournaments. A tournament is in that table
//! exactly while its [`TournamentController`] runs; afterwards only the persisted rows remain.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use anyhow::{bail, Context};
use tracing::{error, info, instrument, trace, warn};

use crate::{
    agent::{AgentConfig, AgentCredentials},
    bracket::{Bracket, BracketType, Entrant, MatchStatus, Standing},
    competition::Services,
    configuration::Configuration,
    logger::init_logger,
    persistence::{
        CredentialVault, MatchRow, ParticipantRecord, SeedRow, StandingRow, StoredCredentials,
        TournamentStatus, TournamentStore,
    },
    tasks::{TaskCatalog, TaskDefinition},
};

pub mod controller;

pub use controller::{MatchOutcome, TournamentController};

/// In-memory state of a running tournament.
#[derive(Debug, Clone)]
pub struct Tournament {
    pub id: String,
    pub name: String,
    pub status: TournamentStatus,
    /// Ordered by seed.
    pub agents: Vec<AgentConfig>,
    pub tasks: Vec<TaskDefinition>,
    pub bracket: Bracket,
    pub current_round: usize,
    pub standings: Vec<Standing>,
}

impl Tournament {
    pub fn bracket_type(&self) -> BracketType {
        self.bracket.bracket_type
    }
}

/// Decrypts the stored credentials of `participant` into an executable agent configuration.
pub fn agent_config(
    participant: &ParticipantRecord,
    vault: &dyn CredentialVault,
) -> anyhow::Result<AgentConfig> {
    let credentials = match &participant.credentials {
        StoredCredentials::None => AgentCredentials::None,
        StoredCredentials::EncryptedKey(ciphertext) => AgentCredentials::ApiKey(vault.decrypt(ciphertext)?),
        StoredCredentials::Webhook {
            url,
            encrypted_secret,
        } => AgentCredentials::Webhook {
            url: url.clone(),
            secret: encrypted_secret
                .as_deref()
                .map(|c| vault.decrypt(c))
                .transpose()?,
        },
    };
    Ok(AgentConfig::new(participant.agent_id.clone(), participant.name.clone())
        .with_provider(participant.provider.clone(), participant.model.clone())
        .with_color(participant.color.clone())
        .with_credentials(credentials))
}

/// Removes a tournament from the active table when dropped, unless the table entry was replaced
/// by another controller meanwhile.
struct ActiveGuard<'a> {
    table: &'a Mutex<HashMap<String, Arc<TournamentController>>>,
    id: String,
    controller: Arc<TournamentController>,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let mut table = self.table.lock().expect("poisoned");
        if table
            .get(&self.id)
            .is_some_and(|c| Arc::ptr_eq(c, &self.controller))
        {
            table.remove(&self.id);
        }
    }
}

pub struct TournamentManager {
    config: Configuration,
    services: Services,
    store: Arc<dyn TournamentStore>,
    vault: Arc<dyn CredentialVault>,
    catalog: Arc<dyn TaskCatalog>,
    active: Mutex<HashMap<String, Arc<TournamentController>>>,
}

impl TournamentManager {
    pub fn new(
        config: Configuration,
        services: Services,
        store: Arc<dyn TournamentStore>,
        vault: Arc<dyn CredentialVault>,
        catalog: Arc<dyn TaskCatalog>,
    ) -> TournamentManager {
        if config.log {
            if let Err(e) = init_logger() {
                eprintln!("file logs disabled: {e:#}");
            }
        }
        trace!(?config);

        TournamentManager {
            config,
            services,
            store,
            vault,
            catalog,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Loads, seeds and runs tournament `id` to its end, then persists the results.
    ///
    /// Returns the final state of the tournament, completed or cancelled.
    ///
    /// # Errors
    /// Fails before anything runs if the tournament or its participants cannot be loaded, fewer
    /// than two participants are eligible, a credential cannot be decrypted, no task resolves or
    /// the tournament is already active. A failure while running or persisting puts the
    /// tournament back in the lobby before the error is returned.
    #[instrument(skip(self))]
    pub async fn start_tournament(&self, id: &str) -> anyhow::Result<Tournament> {
        if self.active.lock().expect("poisoned").contains_key(id) {
            bail!("tournament {id} is already running");
        }

        let record = self
            .store
            .load_tournament(id)
            .await
            .with_context(|| format!("could not load tournament {id}"))?;
        let mut participants = self
            .store
            .load_participants(id)
            .await
            .with_context(|| format!("could not load participants of {id}"))?
            .into_iter()
            .filter(|p| p.eligible)
            .collect::<Vec<_>>();
        if participants.len() < 2 {
            bail!(
                "tournament {id} needs at least 2 eligible participants, found {}",
                participants.len()
            );
        }

        // seed 1 = best rating; the sort is stable so equal ratings keep their stored order
        participants.sort_by(|a, b| b.rating.total_cmp(&a.rating));
        let agents = participants
            .iter()
            .map(|p| {
                agent_config(p, self.vault.as_ref())
                    .with_context(|| format!("could not decrypt credentials of {}", p.agent_id))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut tasks = self.catalog.resolve(&record.task_ids);
        if tasks.is_empty() {
            info!(configured = ?record.task_ids, "no configured task resolved, using the default pool");
            tasks = self.catalog.default_pool();
        }
        if tasks.is_empty() {
            bail!("tournament {id} has no task to play");
        }

        let entrants = Entrant::seeded(agents.iter().map(|a| a.id.clone()));
        let bracket = Bracket::new(record.bracket_type, entrants, self.config.swiss_rounds)?;
        let seeds = bracket
            .entrants
            .iter()
            .map(|e| SeedRow {
                agent_id: e.agent_id.clone(),
                seed: e.seed,
            })
            .collect::<Vec<_>>();

        let tournament = Tournament {
            id: record.id.clone(),
            name: record.name.clone(),
            status: TournamentStatus::Lobby,
            agents,
            tasks,
            bracket,
            current_round: 0,
            standings: vec![],
        };
        let controller = Arc::new(TournamentController::new(
            tournament,
            self.config.clone(),
            self.services.clone(),
        ));
        let _guard = {
            let mut active = self.active.lock().expect("poisoned");
            if active.contains_key(id) {
                bail!("tournament {id} is already running");
            }
            active.insert(id.to_string(), controller.clone());
            ActiveGuard {
                table: &self.active,
                id: id.to_string(),
                controller: controller.clone(),
            }
        };

        let run = async {
            self.store.save_seeding(id, &seeds).await?;
            self.store
                .update_tournament_status(id, TournamentStatus::Running)
                .await?;
            info!(
                bracket_type = %record.bracket_type,
                participants = seeds.len(),
                "tournament started"
            );
            controller.run().await
        };

        match run.await {
            Ok(TournamentStatus::Cancelled) => {
                info!("tournament cancelled, results not persisted");
                Ok(controller.snapshot())
            }
            Ok(_) => {
                // leaving the table first: from here on a cancel finds nothing to cancel
                let claimed = {
                    let mut active = self.active.lock().expect("poisoned");
                    let ours = active
                        .get(id)
                        .is_some_and(|c| Arc::ptr_eq(c, &controller));
                    if ours {
                        active.remove(id);
                    }
                    ours
                };
                let mut tournament = controller.snapshot();
                if !claimed {
                    info!("tournament cancelled as it finished, results not persisted");
                    tournament.status = TournamentStatus::Cancelled;
                    return Ok(tournament);
                }
                if let Err(e) = self.persist_results(&tournament).await {
                    error!(error = %format!("{e:#}"), "could not persist results, returning it to the lobby");
                    self.return_to_lobby(id).await;
                    return Err(e);
                }
                Ok(tournament)
            }
            Err(e) => {
                error!(error = %format!("{e:#}"), "tournament failed, returning it to the lobby");
                self.return_to_lobby(id).await;
                Err(e)
            }
        }
    }

    async fn return_to_lobby(&self, id: &str) {
        if let Err(e) = self
            .store
            .update_tournament_status(id, TournamentStatus::Lobby)
            .await
        {
            warn!(error = %e, "could not return tournament to the lobby");
        }
    }

    /// Live controller of an active tournament.
    pub fn get_active_tournament(&self, id: &str) -> Option<Arc<TournamentController>> {
        self.active.lock().expect("poisoned").get(id).cloned()
    }

    /// Cancels an active tournament. Returns `false`, without touching persistence, if `id` is
    /// not active. A tournament whose results are being persisted is no longer active.
    pub async fn cancel_tournament(&self, id: &str) -> bool {
        let Some(controller) = self.active.lock().expect("poisoned").remove(id) else {
            return false;
        };
        controller.cancel().await;
        if let Err(e) = self
            .store
            .update_tournament_status(id, TournamentStatus::Cancelled)
            .await
        {
            warn!(tournament = id, error = %e, "could not persist cancellation");
        }
        true
    }

    /// Cancels every active tournament.
    pub async fn cancel_all(&self) {
        let ids = self
            .active
            .lock()
            .expect("poisoned")
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        for id in ids {
            self.cancel_tournament(&id).await;
        }
    }

    /// Writes one row per settled match and one standing per participant, then marks the
    /// tournament completed.
    pub async fn persist_results(&self, tournament: &Tournament) -> anyhow::Result<()> {
        for m in tournament.bracket.matches().filter(|m| m.is_settled()) {
            let row = MatchRow {
                tournament_id: tournament.id.clone(),
                round: m.round,
                match_number: m.match_number,
                agent1: m.agent1.clone(),
                agent2: m.agent2.clone(),
                winner: m.winner.clone(),
                scores: m.scores.clone(),
                is_bye: m.is_bye,
                status: m.status,
            };
            self.store
                .insert_match(&row)
                .await
                .with_context(|| format!("could not save match {}", m.id))?;
        }

        for standing in tournament.bracket.standings() {
            let row = StandingRow {
                agent_id: standing.agent_id.clone(),
                placement: standing.placement,
                matches_won: standing.wins,
                matches_lost: standing.losses,
                total_score: standing.total_score,
            };
            self.store
                .update_standing(&tournament.id, &row)
                .await
                .with_context(|| format!("could not save standing of {}", standing.agent_id))?;
        }

        self.store
            .update_tournament_status(&tournament.id, TournamentStatus::Completed)
            .await?;
        let played = tournament
            .bracket
            .matches()
            .filter(|m| m.status == MatchStatus::Completed)
            .count();
        info!(tournament = %tournament.id, played, "results persisted");
        Ok(())
    }
}
