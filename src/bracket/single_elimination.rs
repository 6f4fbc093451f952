//! Single elimination with standard seeding.
//!
//! The bracket has `2^ceil(log2 n)` slots. Seeds `k` and `size + 1 - k` sit in opposite halves
//! at every level, so the top two seeds can only meet in the final. Empty slots turn into byes
//! for the top seeds, and bye winners are moved into round 2 right away.

use std::collections::BTreeMap;

use anyhow::{bail, Context};
use tracing::debug;

use super::{
    standings::Standing, Bracket, BracketNode, BracketType, Entrant, TournamentMatch,
    TournamentRound,
};
use crate::agent::AgentId;

pub fn bracket_size(num_participants: usize) -> usize {
    num_participants.max(1).next_power_of_two()
}

/// Seed numbers in slot order for a bracket of `size` slots (a power of two).
///
/// `seed_positions(8) == [1, 8, 4, 5, 2, 7, 3, 6]`
pub fn seed_positions(size: usize) -> Vec<usize> {
    let mut positions = vec![1];
    while positions.len() < size {
        let mirror = 2 * positions.len() + 1;
        positions = positions.iter().flat_map(|&s| [s, mirror - s]).collect();
    }
    positions
}

/// Round name derived from the distance to the final.
pub fn round_name(round: usize, total_rounds: usize) -> String {
    match total_rounds.saturating_sub(round) {
        0 => "Finals".to_string(),
        1 => "Semifinals".to_string(),
        2 => "Quarterfinals".to_string(),
        _ => format!("Round {round}"),
    }
}

fn node_id(round: usize, position: usize) -> String {
    format!("n{round}-{position}")
}

pub(crate) fn generate(mut entrants: Vec<Entrant>) -> Bracket {
    entrants.sort_by_key(|e| e.seed);
    let size = bracket_size(entrants.len());
    let total_rounds = size.trailing_zeros() as usize;

    let mut bracket = Bracket {
        bracket_type: BracketType::SingleElimination,
        bracket_size: size,
        num_byes: size - entrants.len(),
        total_rounds,
        entrants,
        rounds: vec![],
        nodes: vec![],
    };
    if total_rounds == 0 {
        return bracket;
    }

    let slot = |seed: usize| bracket.entrants.get(seed - 1).map(|e| e.agent_id.clone());
    let mut first = vec![];
    for (position, pair) in seed_positions(size).chunks(2).enumerate() {
        let number = position + 1;
        let mut m = match (slot(pair[0]), slot(pair[1])) {
            (Some(a), Some(b)) => TournamentMatch::between(1, number, a, b),
            (Some(a), None) | (None, Some(a)) => TournamentMatch::bye(1, number, a),
            (None, None) => TournamentMatch::new(1, number),
        };
        m.node_id = Some(node_id(1, position));
        first.push(m);
    }
    bracket.rounds.push(TournamentRound {
        number: 1,
        name: round_name(1, total_rounds),
        matches: first,
    });

    for round in 1..=total_rounds {
        let count = size >> round;
        for position in 0..count {
            let parent_ids = if round == 1 {
                vec![]
            } else {
                vec![node_id(round - 1, 2 * position), node_id(round - 1, 2 * position + 1)]
            };
            bracket.nodes.push(BracketNode {
                id: node_id(round, position),
                round,
                position,
                match_id: format!("r{round}-m{}", position + 1),
                parent_ids,
                child_id: (round < total_rounds).then(|| node_id(round + 1, position / 2)),
            });
        }
        if round > 1 {
            let matches = (0..count)
                .map(|position| {
                    let mut m = TournamentMatch::new(round, position + 1);
                    m.node_id = Some(node_id(round, position));
                    m
                })
                .collect();
            bracket.rounds.push(TournamentRound {
                number: round,
                name: round_name(round, total_rounds),
                matches,
            });
        }
    }

    let byes = bracket.rounds[0]
        .matches
        .iter()
        .filter(|m| m.is_bye)
        .filter_map(|m| Some((m.node_id.clone()?, m.winner.clone()?)))
        .collect::<Vec<_>>();
    for (node, winner) in byes {
        debug!(agent_id = %winner, "bye into round 2");
        advance(&mut bracket, &node, winner);
    }
    bracket
}

/// Puts `winner` of `node` into the matching slot of the child match.
fn advance(bracket: &mut Bracket, node: &str, winner: AgentId) {
    let Some(child_id) = bracket
        .nodes
        .iter()
        .find(|n| n.id == node)
        .and_then(|n| n.child_id.clone())
    else {
        return;
    };
    let Some(child) = bracket.nodes.iter().find(|n| n.id == child_id) else {
        return;
    };
    let first_slot = child.parent_ids.first().map(String::as_str) == Some(node);
    let match_id = child.match_id.clone();
    if let Some(m) = bracket.find_match_mut(&match_id) {
        if first_slot {
            m.agent1 = Some(winner);
        } else {
            m.agent2 = Some(winner);
        }
    }
}

/// Records the winner of a played match and moves them into the next round.
pub fn record_winner(
    bracket: &mut Bracket,
    match_id: &str,
    winner: AgentId,
    scores: BTreeMap<AgentId, f64>,
) -> anyhow::Result<()> {
    if bracket.bracket_type != BracketType::SingleElimination {
        bail!("not a single elimination bracket");
    }
    let m = bracket
        .find_match_mut(match_id)
        .with_context(|| format!("unknown match {match_id}"))?;
    m.settle(Some(winner.clone()), scores)?;
    if let Some(node) = m.node_id.clone() {
        advance(bracket, &node, winner);
    }
    Ok(())
}

/// Placement by elimination round: the champion is 1, the finalist 2, semifinal losers 3,
/// quarterfinal losers 5, and so on. Agents still in the running share placement 1.
pub fn standings(bracket: &Bracket) -> Vec<Standing> {
    let mut table = bracket
        .entrants
        .iter()
        .map(|entrant| {
            let mut standing = Standing::new(entrant);
            standing.placement = 1;
            for m in bracket.matches().filter(|m| m.involves(&entrant.agent_id)) {
                standing.total_score += m.scores.get(&entrant.agent_id).copied().unwrap_or(0.0);
                if m.is_bye || !m.is_settled() {
                    continue;
                }
                if m.winner.as_ref() == Some(&entrant.agent_id) {
                    standing.wins += 1;
                } else {
                    standing.losses += 1;
                    let distance = bracket.total_rounds - m.round;
                    standing.placement = (1 << distance) + 1;
                }
            }
            standing
        })
        .collect::<Vec<_>>();

    table.sort_by(|a, b| {
        a.placement
            .cmp(&b.placement)
            .then_with(|| b.wins.cmp(&a.wins))
            .then_with(|| a.seed.cmp(&b.seed))
    });
    table
}
