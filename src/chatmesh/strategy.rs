//! Turn-selection policies.
//!
//! A chat manager picks "who speaks next" after every message it observes.
//! The selection itself is pure: these functions operate on the speaker ring
//! (the chat's member list minus the manager, in insertion order) and are
//! exercised directly by [`ChatManager`](crate::ChatManager).
//!
//! A chat with exactly two ring members needs no policy at all: the next
//! speaker is always the one who didn't just speak.

use rand::seq::SliceRandom;

/// The configurable policies.  The two-party fast path applies before any of
/// them and cannot be turned off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPolicy {
    /// Successor of the last speaker in ring order, wrapping at the end.
    RoundRobin,
    /// Uniform pick among the ring minus the last speaker.
    Random,
    /// Ask the LLM to read the transcript and name the next speaker.
    Ai,
}

/// The ring of eligible speakers: `members` minus the manager, insertion
/// order preserved.
pub fn speaker_ring(members: &[String], manager_id: &str) -> Vec<String> {
    members
        .iter()
        .filter(|id| id.as_str() != manager_id)
        .cloned()
        .collect()
}

/// Two-party alternation: with exactly two ring members the next speaker is
/// the one other than the last.  Returns `None` for any other ring size.
pub fn two_party_successor(ring: &[String], last_speaker: &str) -> Option<String> {
    match ring {
        [a, b] => {
            if last_speaker == b {
                Some(a.clone())
            } else {
                Some(b.clone())
            }
        }
        _ => None,
    }
}

/// Round-robin successor of `last_speaker`, wrapping at the end of the ring.
///
/// A last speaker outside the ring (a listener that briefly spoke, or the
/// manager itself) restarts the rotation at the first ring member.
pub fn round_robin_successor(ring: &[String], last_speaker: &str) -> Option<String> {
    if ring.is_empty() {
        return None;
    }
    match ring.iter().position(|id| id == last_speaker) {
        Some(index) => Some(ring[(index + 1) % ring.len()].clone()),
        None => Some(ring[0].clone()),
    }
}

/// Uniform pick from the ring, excluding the last speaker.
pub fn random_successor(ring: &[String], last_speaker: &str) -> Option<String> {
    let candidates: Vec<&String> = ring.iter().filter(|id| id.as_str() != last_speaker).collect();
    candidates.choose(&mut rand::thread_rng()).map(|id| (*id).clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_speaker_ring_excludes_manager_keeps_order() {
        let members = ring(&["manager", "a", "b", "c"]);
        assert_eq!(speaker_ring(&members, "manager"), ring(&["a", "b", "c"]));
    }

    #[test]
    fn test_two_party_alternation() {
        let pair = ring(&["a", "b"]);
        assert_eq!(two_party_successor(&pair, "a"), Some("b".to_string()));
        assert_eq!(two_party_successor(&pair, "b"), Some("a".to_string()));
        assert_eq!(two_party_successor(&ring(&["a", "b", "c"]), "a"), None);
    }

    #[test]
    fn test_round_robin_wraps() {
        let three = ring(&["a", "b", "c"]);
        assert_eq!(round_robin_successor(&three, "a"), Some("b".to_string()));
        assert_eq!(round_robin_successor(&three, "b"), Some("c".to_string()));
        assert_eq!(round_robin_successor(&three, "c"), Some("a".to_string()));
    }

    #[test]
    fn test_round_robin_is_fair_over_one_lap() {
        // Starting after a message from any member, n consecutive selections
        // visit every member exactly once.
        let members = ring(&["a", "b", "c", "d"]);
        for start in &members {
            let mut seen = Vec::new();
            let mut last = start.clone();
            for _ in 0..members.len() {
                last = round_robin_successor(&members, &last).unwrap();
                seen.push(last.clone());
            }
            let mut sorted = seen.clone();
            sorted.sort();
            sorted.dedup();
            assert_eq!(sorted.len(), members.len());
        }
    }

    #[test]
    fn test_round_robin_restarts_on_outside_speaker() {
        let three = ring(&["a", "b", "c"]);
        assert_eq!(
            round_robin_successor(&three, "listener"),
            Some("a".to_string())
        );
        assert_eq!(round_robin_successor(&[], "a"), None);
    }

    #[test]
    fn test_random_excludes_last_speaker() {
        let three = ring(&["a", "b", "c"]);
        for _ in 0..50 {
            let pick = random_successor(&three, "a").unwrap();
            assert_ne!(pick, "a");
        }
        assert_eq!(random_successor(&ring(&["a"]), "a"), None);
    }
}
