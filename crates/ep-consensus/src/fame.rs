//! # Fame Election
//!
//! Virtual voting over successive rounds of witnesses:
//! round `r+1` witnesses vote directly on whether they see the
//! candidate; each later round's witnesses tally the votes of the
//! round-`r` witnesses they strongly see, deciding as soon as one side
//! reaches supermajority. Every `coinFreq`-th round without a decision
//! falls back to a pseudorandom bit instead of a plain majority, so an
//! adversary cannot force an election to stall by witholding exactly
//! the votes that would produce a majority.

use std::collections::HashMap;
use std::sync::Arc;

use ep_types::{ConsensusConfig, Hash, LinkedEvent};
use tracing::warn;

use crate::ancestry::{is_ancestor, strongly_sees};
use crate::state::ConsensusState;

/// Attempts to decide fame for every witness that doesn't have one yet.
/// Called after every newly linked event, since a new witness in a
/// later round may be exactly what an earlier round's election needed.
pub fn decide_pending(state: &mut ConsensusState, book: &ep_types::AddressBook, config: &ConsensusConfig) {
    let rounds: Vec<u64> = state.witnesses_by_round.keys().copied().collect();
    for round in rounds {
        let candidates = state.witnesses_by_round[&round].clone();
        for hash in candidates {
            if state.fame.contains_key(&hash) {
                continue;
            }
            let Some(candidate) = state.witness(hash).cloned() else { continue };
            if let Some(decided) = decide_fame(&candidate, round, state, book, config) {
                state.fame.insert(hash, decided);
            }
        }
    }
}

/// Returns `Some(fame)` once decided, `None` if more witness rounds are
/// needed before a decision can be made.
fn decide_fame(candidate: &Arc<LinkedEvent>, candidate_round: u64, state: &ConsensusState, book: &ep_types::AddressBook, config: &ConsensusConfig) -> Option<bool> {
    let subsequent_rounds: Vec<u64> = state.witnesses_by_round.keys().copied().filter(|&r| r > candidate_round).collect();
    if subsequent_rounds.is_empty() {
        return None;
    }

    let mut votes: HashMap<Hash, bool> = HashMap::new();
    let mut previous_round_witnesses: Vec<Arc<LinkedEvent>> = Vec::new();

    for d in subsequent_rounds {
        let witnesses_d = state.witnesses_in(d);
        let mut round_votes = HashMap::with_capacity(witnesses_d.len());
        let depth = d - candidate_round;
        let is_coin_round = depth % config.coin_freq.max(1) == 0;

        if depth == 1 {
            for w in &witnesses_d {
                round_votes.insert(w.hash(), is_ancestor(w, candidate));
            }
            votes = round_votes;
            previous_round_witnesses = witnesses_d;
            continue;
        }

        let mut decision = None;
        for w in &witnesses_d {
            let mut yes_weight = 0u64;
            let mut no_weight = 0u64;
            for pw in &previous_round_witnesses {
                if !strongly_sees(w, pw, book) {
                    continue;
                }
                let Some(&vote) = votes.get(&pw.hash()) else { continue };
                let weight = book.weight_of(pw.creator_id());
                if vote {
                    yes_weight += weight;
                } else {
                    no_weight += weight;
                }
            }

            if book.is_supermajority(yes_weight) {
                decision = Some(true);
            } else if book.is_supermajority(no_weight) {
                decision = Some(false);
            } else if is_coin_round {
                // No supermajority at a coin round: fall back to a
                // pseudorandom bit derived from the voter's own hash
                // rather than a plain majority
                round_votes.insert(w.hash(), w.hash()[0] & 1 == 1);
            } else {
                round_votes.insert(w.hash(), yes_weight >= no_weight);
            }

            if decision.is_some() {
                break;
            }
        }

        if let Some(decided) = decision {
            return Some(decided);
        }

        if depth >= config.fame_election_depth_cap {
            let yes_weight: u64 = witnesses_d.iter().filter(|w| round_votes.get(&w.hash()).copied().unwrap_or(false)).map(|w| book.weight_of(w.creator_id())).sum();
            let no_weight = book.total_weight().saturating_sub(yes_weight);
            warn!(candidate = ?candidate.hash(), round = candidate_round, depth, "consensus: fame election depth cap reached, forcing decision");
            ep_telemetry::STAGE_ERRORS.with_label_values(&["consensus", "fame_election_depth_cap"]).inc();
            return Some(yes_weight >= no_weight);
        }

        votes = round_votes;
        previous_round_witnesses = witnesses_d;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use ep_types::{AddressBookEntry, EventBuilder, NodeId};

    fn book(ids: &[u64]) -> ep_types::AddressBook {
        let entries = ids.iter().map(|&id| AddressBookEntry { node_id: NodeId(id), public_key: [0u8; 32], weight: 1, active: true }).collect();
        ep_types::AddressBook::new(0, entries)
    }

    fn witness(creator: NodeId, round: u64, time: u64, hash_byte: u8, parents: Vec<Arc<LinkedEvent>>) -> Arc<LinkedEvent> {
        let mut hash = [0u8; 32];
        hash[0] = hash_byte;
        let event = EventBuilder::new(creator).time_created(time).build().with_hash(hash);
        let mut self_parent = None;
        let mut other_parent = None;
        for (i, p) in parents.into_iter().enumerate() {
            if i == 0 {
                self_parent = Some(p);
            } else {
                other_parent = Some(p);
            }
        }
        let _ = round;
        Arc::new(LinkedEvent { event: Arc::new(event), self_parent, other_parent, round_created: 0, is_witness: true })
    }

    fn insert_witness(state: &mut ConsensusState, round: u64, w: Arc<LinkedEvent>) {
        state.witnesses_by_round.entry(round).or_default().push(w.hash());
        state.events.insert(w.hash(), crate::state::EventRecord { linked: w, stream_sequence_number: 0, round_created: round, is_witness: true });
    }

    #[test]
    fn test_direct_yes_vote_tallied_at_the_next_round_decides_fame_true() {
        // Single-node book: one creator's own weight is always a
        // trivial supermajority, isolating the vote-then-tally shape
        // (round r+1 votes, round r+2 tallies) from the weighting math.
        let book = book(&[1]);
        let config = ConsensusConfig { coin_freq: 10, fame_election_depth_cap: 50 };
        let mut state = ConsensusState::new();

        let candidate = witness(NodeId(1), 1, 1, 1, vec![]);
        insert_witness(&mut state, 1, candidate.clone());
        // w2 descends from the candidate: its direct vote is "yes".
        let w2 = witness(NodeId(1), 2, 2, 2, vec![candidate.clone()]);
        insert_witness(&mut state, 2, w2.clone());
        // w3 strongly sees w2, tallying its "yes" vote.
        let w3 = witness(NodeId(1), 3, 3, 3, vec![w2.clone()]);
        insert_witness(&mut state, 3, w3);

        decide_pending(&mut state, &book, &config);
        assert_eq!(state.fame.get(&candidate.hash()), Some(&true));
    }

    #[test]
    fn test_direct_no_vote_tallied_at_the_next_round_decides_fame_false() {
        let book = book(&[1]);
        let config = ConsensusConfig { coin_freq: 10, fame_election_depth_cap: 50 };
        let mut state = ConsensusState::new();

        let candidate = witness(NodeId(1), 1, 1, 1, vec![]);
        insert_witness(&mut state, 1, candidate.clone());
        // w2 has no relation to the candidate: its direct vote is "no".
        let w2 = witness(NodeId(1), 2, 2, 2, vec![]);
        insert_witness(&mut state, 2, w2.clone());
        let w3 = witness(NodeId(1), 3, 3, 3, vec![w2.clone()]);
        insert_witness(&mut state, 3, w3);

        decide_pending(&mut state, &book, &config);
        assert_eq!(state.fame.get(&candidate.hash()), Some(&false));
    }

    #[test]
    fn test_no_decision_without_a_subsequent_round() {
        let book = book(&[1, 2, 3]);
        let config = ConsensusConfig { coin_freq: 10, fame_election_depth_cap: 50 };
        let mut state = ConsensusState::new();
        let candidate = witness(NodeId(1), 1, 1, 1, vec![]);
        insert_witness(&mut state, 1, candidate.clone());

        decide_pending(&mut state, &book, &config);
        assert!(state.fame.get(&candidate.hash()).is_none());
    }
}
