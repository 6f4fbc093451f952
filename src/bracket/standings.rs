//! Standings over settled matches.
//!
//! Sort keys, best first:
//! - round robin: wins, ties, total score, then seed
//! - Swiss: Swiss points, Buchholz, total score, then seed
//!
//! The seed makes every key unique, so placements are always `1..=n`.

use std::collections::HashMap;

use serde::Serialize;

use super::{Entrant, TournamentMatch};
use crate::agent::AgentId;

/// Points for a win (or a bye) and for a draw.
pub const WIN_POINTS: f64 = 1.0;
pub const DRAW_POINTS: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Standing {
    pub agent_id: AgentId,
    pub seed: usize,
    pub placement: usize,
    /// Byes included.
    pub wins: u32,
    pub losses: u32,
    pub ties: u32,
    pub byes: u32,
    pub total_score: f64,
    pub swiss_points: f64,
    pub buchholz: f64,
}

impl Standing {
    pub(crate) fn new(entrant: &Entrant) -> Standing {
        Standing {
            agent_id: entrant.agent_id.clone(),
            seed: entrant.seed,
            placement: 0,
            wins: 0,
            losses: 0,
            ties: 0,
            byes: 0,
            total_score: 0.0,
            swiss_points: 0.0,
            buchholz: 0.0,
        }
    }
}

/// Win/loss/tie counts and opponents of every entrant, in entrant order.
pub(crate) fn tally<'a>(
    entrants: &[Entrant],
    matches: impl Iterator<Item = &'a TournamentMatch>,
) -> (Vec<Standing>, HashMap<AgentId, Vec<AgentId>>) {
    let mut table = entrants.iter().map(Standing::new).collect::<Vec<_>>();
    let index = entrants
        .iter()
        .enumerate()
        .map(|(i, e)| (e.agent_id.clone(), i))
        .collect::<HashMap<_, _>>();
    let mut opponents: HashMap<AgentId, Vec<AgentId>> = HashMap::new();

    for m in matches.filter(|m| m.is_settled()) {
        for agent in m.agents() {
            let Some(&i) = index.get(agent) else { continue };
            let standing = &mut table[i];
            standing.total_score += m.scores.get(agent).copied().unwrap_or(0.0);
            if m.is_bye {
                standing.byes += 1;
                standing.wins += 1;
                continue;
            }
            match &m.winner {
                Some(winner) if winner == agent => standing.wins += 1,
                Some(_) => standing.losses += 1,
                None => standing.ties += 1,
            }
            if let Some(opponent) = m.opponent_of(agent) {
                opponents.entry(agent.clone()).or_default().push(opponent.clone());
            }
        }
    }

    for standing in &mut table {
        standing.swiss_points = standing.wins as f64 * WIN_POINTS + standing.ties as f64 * DRAW_POINTS;
    }
    (table, opponents)
}

fn assign_placements(table: &mut [Standing]) {
    for (i, standing) in table.iter_mut().enumerate() {
        standing.placement = i + 1;
    }
}

pub fn round_robin<'a>(
    entrants: &[Entrant],
    matches: impl Iterator<Item = &'a TournamentMatch>,
) -> Vec<Standing> {
    let (mut table, _) = tally(entrants, matches);
    table.sort_by(|a, b| {
        b.wins
            .cmp(&a.wins)
            .then_with(|| b.ties.cmp(&a.ties))
            .then_with(|| b.total_score.total_cmp(&a.total_score))
            .then_with(|| a.seed.cmp(&b.seed))
    });
    assign_placements(&mut table);
    table
}

pub fn swiss<'a>(
    entrants: &[Entrant],
    matches: impl Iterator<Item = &'a TournamentMatch>,
) -> Vec<Standing> {
    let (mut table, opponents) = tally(entrants, matches);
    let points = table
        .iter()
        .map(|s| (s.agent_id.clone(), s.swiss_points))
        .collect::<HashMap<_, _>>();
    for standing in &mut table {
        standing.buchholz = opponents
            .get(&standing.agent_id)
            .map(|list| list.iter().filter_map(|o| points.get(o)).sum::<f64>())
            .unwrap_or(0.0);
    }

    table.sort_by(|a, b| {
        b.swiss_points
            .total_cmp(&a.swiss_points)
            .then_with(|| b.buchholz.total_cmp(&a.buchholz))
            .then_with(|| b.total_score.total_cmp(&a.total_score))
            .then_with(|| a.seed.cmp(&b.seed))
    });
    assign_placements(&mut table);
    table
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn agent(name: &str) -> AgentId {
        AgentId::from(name)
    }

    fn played(round: usize, a: &str, b: &str, winner: Option<&str>) -> TournamentMatch {
        let mut m = TournamentMatch::between(round, 1, agent(a), agent(b));
        m.settle(
            winner.map(agent),
            BTreeMap::from([(agent(a), 10.0), (agent(b), 5.0)]),
        )
        .unwrap();
        m
    }

    #[test]
    fn round_robin_orders_by_wins_then_ties() {
        let entrants = Entrant::seeded(["a", "b", "c"].map(agent));
        let matches = [
            played(1, "a", "b", Some("b")),
            played(2, "a", "c", None),
            played(3, "b", "c", None),
        ];
        let table = round_robin(&entrants, matches.iter());
        let order = table.iter().map(|s| s.agent_id.as_str()).collect::<Vec<_>>();
        assert_eq!(order, vec!["b", "c", "a"]);
        assert_eq!((table[0].wins, table[0].ties), (1, 1));
        assert_eq!(table.iter().map(|s| s.placement).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn unsettled_matches_are_ignored() {
        let entrants = Entrant::seeded(["a", "b"].map(agent));
        let pending = TournamentMatch::between(1, 1, agent("a"), agent("b"));
        let table = round_robin(&entrants, [pending].iter());
        assert!(table.iter().all(|s| s.wins + s.losses + s.ties == 0));
        assert_eq!(table[0].agent_id, agent("a"));
    }

    #[test]
    fn swiss_buchholz_skips_byes() {
        let entrants = Entrant::seeded(["a", "b", "c", "d"].map(agent));
        let matches = [
            played(1, "a", "b", Some("a")),
            played(1, "c", "d", Some("c")),
            TournamentMatch::bye(2, 2, agent("d")),
            played(2, "a", "c", Some("a")),
        ];
        let table = swiss(&entrants, matches.iter());
        let a = table.iter().find(|s| s.agent_id == agent("a")).unwrap();
        let d = table.iter().find(|s| s.agent_id == agent("d")).unwrap();
        assert_eq!(a.swiss_points, 2.0);
        // a met b (0) and c (1)
        assert_eq!(a.buchholz, 1.0);
        assert_eq!(d.swiss_points, 1.0);
        assert_eq!(d.byes, 1);
        // d only met c
        assert_eq!(d.buchholz, 1.0);
        assert_eq!(table[0].agent_id, agent("a"));
    }

    #[test]
    fn draws_are_half_a_point() {
        let entrants = Entrant::seeded(["a", "b"].map(agent));
        let table = swiss(&entrants, [played(1, "a", "b", None)].iter());
        assert!(table.iter().all(|s| s.swiss_points == 0.5));
        // tied on points and Buchholz; a scored more
        assert_eq!(table[0].agent_id, agent("a"));
    }
}
