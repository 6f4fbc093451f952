//! Swiss pairing.
//!
//! The field is ordered by Swiss points (then seed) and every entrant is paired with the
//! highest-ranked unpaired entrant it has not met yet. When greedy choices dead-end, the search
//! backtracks, so no rematch happens as long as a rematch-free pairing exists. When none exists,
//! each remaining entrant is paired with the closest-standing entrant left, rematch or not.
//!
//! With an odd field, the lowest-ranked entrant without a previous bye sits out and wins.

use std::collections::HashSet;

use tracing::{info, warn};

use super::{standings, Entrant, TournamentMatch, TournamentRound};
use crate::agent::AgentId;

/// Pairing attempts before giving up on a rematch-free round.
const SEARCH_BUDGET: usize = 100_000;

/// `ceil(log2 n)` rounds, enough to separate a single winner.
pub fn auto_rounds(num_participants: usize) -> usize {
    num_participants.max(1).next_power_of_two().trailing_zeros() as usize
}

fn pair_key(a: &AgentId, b: &AgentId) -> (AgentId, AgentId) {
    if a < b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

/// Pairs round `number` from the results of `previous` rounds.
pub fn pair_round(entrants: &[Entrant], previous: &[TournamentRound], number: usize) -> TournamentRound {
    let history = || previous.iter().flat_map(|r| r.matches.iter());

    let (mut table, _) = standings::tally(entrants, history());
    table.sort_by(|a, b| {
        b.swiss_points
            .total_cmp(&a.swiss_points)
            .then_with(|| a.seed.cmp(&b.seed))
    });
    let mut order = table.into_iter().map(|s| s.agent_id).collect::<Vec<_>>();

    let played = history()
        .filter(|m| !m.is_bye)
        .filter_map(|m| Some(pair_key(m.agent1.as_ref()?, m.agent2.as_ref()?)))
        .collect::<HashSet<_>>();
    let had_bye = history()
        .filter(|m| m.is_bye)
        .filter_map(|m| m.agent1.clone())
        .collect::<HashSet<_>>();

    let bye = if order.len() % 2 == 1 {
        let position = order
            .iter()
            .rposition(|a| !had_bye.contains(a))
            .unwrap_or(order.len() - 1);
        Some(order.remove(position))
    } else {
        None
    };

    let has_played = |a: &AgentId, b: &AgentId| played.contains(&pair_key(a, b));
    let pool = (0..order.len()).collect::<Vec<_>>();
    let mut pairs = vec![];
    let mut budget = SEARCH_BUDGET;
    if !search(&pool, &order, &has_played, &mut pairs, &mut budget) {
        warn!(round = number, "no rematch-free pairing left, forcing rematches");
        pairs = forced_pairs(&order, &has_played);
    }

    let mut matches = pairs
        .into_iter()
        .enumerate()
        .map(|(i, (a, b))| TournamentMatch::between(number, i + 1, order[a].clone(), order[b].clone()))
        .collect::<Vec<_>>();
    if let Some(agent) = bye {
        if had_bye.contains(&agent) {
            warn!(agent_id = %agent, "every entrant already had a bye, assigning a second one");
        } else {
            info!(agent_id = %agent, round = number, "bye");
        }
        matches.push(TournamentMatch::bye(number, matches.len() + 1, agent));
    }

    TournamentRound {
        number,
        name: format!("Round {number}"),
        matches,
    }
}

/// Depth-first pairing of `pool` (indices into `order`, best first) without rematches.
fn search(
    pool: &[usize],
    order: &[AgentId],
    has_played: &impl Fn(&AgentId, &AgentId) -> bool,
    pairs: &mut Vec<(usize, usize)>,
    budget: &mut usize,
) -> bool {
    let Some((&first, rest)) = pool.split_first() else {
        return true;
    };
    for (j, &candidate) in rest.iter().enumerate() {
        if *budget == 0 {
            return false;
        }
        *budget -= 1;
        if has_played(&order[first], &order[candidate]) {
            continue;
        }
        let remaining = rest
            .iter()
            .enumerate()
            .filter(|&(k, _)| k != j)
            .map(|(_, &i)| i)
            .collect::<Vec<_>>();
        pairs.push((first, candidate));
        if search(&remaining, order, has_played, pairs, budget) {
            return true;
        }
        pairs.pop();
    }
    false
}

/// Greedy pairing where a fresh opponent is preferred but a rematch is accepted.
fn forced_pairs(
    order: &[AgentId],
    has_played: &impl Fn(&AgentId, &AgentId) -> bool,
) -> Vec<(usize, usize)> {
    let mut pool = (0..order.len()).collect::<Vec<_>>();
    let mut pairs = vec![];
    while pool.len() >= 2 {
        let first = pool.remove(0);
        let j = pool
            .iter()
            .position(|&b| !has_played(&order[first], &order[b]))
            .unwrap_or(0);
        pairs.push((first, pool.remove(j)));
    }
    pairs
}
