//! Round robin scheduling with the circle method.
//!
//! With an odd field a phantom BYE entrant is added. Each round pairs slot `i` with slot
//! `n - 1 - i`, then every slot but the first rotates by one. Pairings against the BYE are
//! skipped, so that entrant simply sits the round out.

use super::{Bracket, BracketType, Entrant, TournamentMatch, TournamentRound};
use crate::agent::AgentId;

pub(crate) fn generate(mut entrants: Vec<Entrant>) -> Bracket {
    entrants.sort_by_key(|e| e.seed);
    let mut slots = entrants
        .iter()
        .map(|e| Some(e.agent_id.clone()))
        .collect::<Vec<Option<AgentId>>>();
    let odd = slots.len() % 2 == 1;
    if odd {
        slots.push(None);
    }
    let n = slots.len();

    let mut rounds = Vec::with_capacity(n - 1);
    for number in 1..n {
        let mut matches = vec![];
        for i in 0..n / 2 {
            if let (Some(a), Some(b)) = (&slots[i], &slots[n - 1 - i]) {
                matches.push(TournamentMatch::between(
                    number,
                    matches.len() + 1,
                    a.clone(),
                    b.clone(),
                ));
            }
        }
        rounds.push(TournamentRound {
            number,
            name: format!("Round {number}"),
            matches,
        });
        slots[1..].rotate_right(1);
    }

    Bracket {
        bracket_type: BracketType::RoundRobin,
        bracket_size: n,
        // one entrant sits out every round
        num_byes: if odd { n - 1 } else { 0 },
        total_rounds: n - 1,
        entrants,
        rounds,
        nodes: vec![],
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn field(n: usize) -> Vec<Entrant> {
        Entrant::seeded((1..=n).map(|i| AgentId::from(format!("p{i}"))))
    }

    #[test]
    fn every_pair_meets_exactly_once() {
        for n in 2..=13 {
            let bracket = generate(field(n));
            let mut pairs = HashSet::new();
            for m in bracket.matches() {
                let (a, b) = (m.agent1.clone().unwrap(), m.agent2.clone().unwrap());
                assert_ne!(a, b);
                let key = if a < b { (a, b) } else { (b, a) };
                assert!(pairs.insert(key), "pair met twice with n = {n}");
            }
            assert_eq!(pairs.len(), n * (n - 1) / 2);
            assert_eq!(bracket.matches().count(), n * (n - 1) / 2);
        }
    }

    #[test]
    fn nobody_plays_twice_in_a_round() {
        for n in [4, 7, 10] {
            let bracket = generate(field(n));
            assert_eq!(bracket.rounds.len(), bracket.total_rounds);
            for round in &bracket.rounds {
                let mut seen = HashSet::new();
                for agent in round.matches.iter().flat_map(|m| m.agents()) {
                    assert!(seen.insert(agent.clone()));
                }
                // with an odd field exactly one entrant sits out
                assert_eq!(seen.len(), n - n % 2);
            }
        }
    }

    #[test]
    fn round_numbers_are_contiguous() {
        let bracket = generate(field(5));
        assert_eq!(bracket.total_rounds, 5);
        assert_eq!(bracket.num_byes, 5);
        let numbers = bracket.rounds.iter().map(|r| r.number).collect::<Vec<_>>();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        assert_eq!(bracket.rounds[0].name, "Round 1");
    }

    #[test]
    fn first_round_pairs_the_circle() {
        let bracket = generate(field(4));
        let first = bracket.rounds[0]
            .matches
            .iter()
            .map(|m| (m.agent1.clone().unwrap(), m.agent2.clone().unwrap()))
            .collect::<Vec<_>>();
        assert_eq!(
            first,
            vec![
                (AgentId::from("p1"), AgentId::from("p4")),
                (AgentId::from("p2"), AgentId::from("p3")),
            ]
        );
    }
}
