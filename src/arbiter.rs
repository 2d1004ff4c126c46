//! Slot Arbiter (§4.G): a pure function partitioning a session's
//! participants into confirmed seats and waitlist, plus a promotion
//! detector. No teacher counterpart — this is grounded in idiomatic Rust
//! (`sort_by_key` on a derived total-order tuple) rather than any one
//! example file, and is unit tested exhaustively since it has no I/O.

use std::collections::HashSet;
use uuid::Uuid;

use crate::models::{Participant, PositionType};

/// Total order sort key (§4.G): `(priority_tier, tiebreaker)`.
/// Tier 0 = pre-populated (real pre-fills and placeholders alike); tier 1 =
/// self-added. Within tier 0, ties break on `pre_fill_position` (nulls
/// last), then `joined_at`, then `id`. Within tier 1, `joined_at` then `id`.
fn sort_key(p: &Participant) -> (u8, i64, chrono::DateTime<chrono::Utc>, Uuid) {
    match p.position_type {
        PositionType::PrePopulated => (
            0,
            p.pre_fill_position.map(i64::from).unwrap_or(i64::MAX),
            p.joined_at,
            p.id,
        ),
        PositionType::SelfAdded => (1, i64::MAX, p.joined_at, p.id),
    }
}

#[derive(Debug, Clone)]
pub struct Partition {
    pub confirmed: Vec<Participant>,
    pub waitlist: Vec<Participant>,
}

/// Partitions `participants` into confirmed vs. waitlist. Deterministic:
/// equal inputs always produce equal outputs (§8.6).
pub fn arbiter(participants: &[Participant], max_players: Option<i32>) -> Partition {
    let mut sorted = participants.to_vec();
    sorted.sort_by_key(sort_key);

    match max_players {
        None => Partition {
            confirmed: sorted,
            waitlist: Vec::new(),
        },
        Some(max) => {
            let max = max.max(0) as usize;
            let waitlist = sorted.split_off(max.min(sorted.len()));
            Partition {
                confirmed: sorted,
                waitlist,
            }
        }
    }
}

/// Compares a before/after partition pair and returns the user ids that
/// newly became confirmed (§4.G promotion detector, §8.7). Placeholder rows
/// (`user_id` is `None`) never generate a promotion event — there is no one
/// to notify.
pub fn promoted_users(before: &Partition, after: &Partition) -> Vec<Uuid> {
    let before_confirmed: HashSet<Uuid> = before
        .confirmed
        .iter()
        .filter_map(|p| p.user_id)
        .collect();
    after
        .confirmed
        .iter()
        .filter_map(|p| p.user_id)
        .filter(|uid| !before_confirmed.contains(uid))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn participant(
        id: u128,
        user_id: Option<u128>,
        position_type: PositionType,
        pre_fill_position: Option<i32>,
        joined_minute: i64,
    ) -> Participant {
        Participant {
            id: Uuid::from_u128(id),
            session_id: Uuid::nil(),
            user_id: user_id.map(Uuid::from_u128),
            display_name: None,
            joined_at: Utc.timestamp_opt(1_700_000_000 + joined_minute * 60, 0).unwrap(),
            position_type,
            pre_fill_position,
        }
    }

    #[test]
    fn totality_confirmed_and_waitlist_partition_the_input() {
        let participants = vec![
            participant(1, Some(1), PositionType::SelfAdded, None, 0),
            participant(2, Some(2), PositionType::SelfAdded, None, 1),
            participant(3, Some(3), PositionType::SelfAdded, None, 2),
        ];
        let partition = arbiter(&participants, Some(2));
        assert_eq!(partition.confirmed.len(), 2);
        assert_eq!(partition.waitlist.len(), 1);
        assert_eq!(partition.confirmed.len() + partition.waitlist.len(), 3);
    }

    #[test]
    fn pre_populated_outranks_self_added_regardless_of_join_order() {
        let participants = vec![
            participant(1, Some(1), PositionType::SelfAdded, None, 0),
            participant(2, Some(2), PositionType::PrePopulated, Some(0), 10),
        ];
        let partition = arbiter(&participants, Some(1));
        assert_eq!(partition.confirmed[0].id, Uuid::from_u128(2));
        assert_eq!(partition.waitlist[0].id, Uuid::from_u128(1));
    }

    #[test]
    fn placeholder_participants_count_against_max_players() {
        // Open Question, decided: placeholders (user_id=None) occupy a
        // confirmed seat the same as any other pre-populated row.
        let participants = vec![
            participant(1, None, PositionType::PrePopulated, Some(0), 0),
            participant(2, Some(2), PositionType::SelfAdded, None, 1),
        ];
        let partition = arbiter(&participants, Some(1));
        assert_eq!(partition.confirmed.len(), 1);
        assert_eq!(partition.confirmed[0].id, Uuid::from_u128(1));
        assert_eq!(partition.waitlist.len(), 1);
    }

    #[test]
    fn no_max_players_confirms_everyone() {
        let participants = vec![
            participant(1, Some(1), PositionType::SelfAdded, None, 0),
            participant(2, Some(2), PositionType::SelfAdded, None, 1),
        ];
        let partition = arbiter(&participants, None);
        assert_eq!(partition.confirmed.len(), 2);
        assert!(partition.waitlist.is_empty());
    }

    #[test]
    fn deterministic_for_equal_inputs() {
        let participants = vec![
            participant(5, Some(5), PositionType::SelfAdded, None, 3),
            participant(1, Some(1), PositionType::SelfAdded, None, 1),
            participant(3, Some(3), PositionType::SelfAdded, None, 2),
        ];
        let a = arbiter(&participants, Some(2));
        let b = arbiter(&participants, Some(2));
        assert_eq!(
            a.confirmed.iter().map(|p| p.id).collect::<Vec<_>>(),
            b.confirmed.iter().map(|p| p.id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn promotion_detected_when_max_players_increases() {
        let participants: Vec<Participant> = (1..=7)
            .map(|i| participant(i, Some(i), PositionType::SelfAdded, None, i as i64))
            .collect();
        let before = arbiter(&participants, Some(5));
        let after = arbiter(&participants, Some(7));
        let promoted = promoted_users(&before, &after);
        assert_eq!(promoted.len(), 2);
        assert!(promoted.contains(&Uuid::from_u128(6)));
        assert!(promoted.contains(&Uuid::from_u128(7)));
    }

    #[test]
    fn no_promotion_when_nothing_changes() {
        let participants = vec![
            participant(1, Some(1), PositionType::SelfAdded, None, 0),
            participant(2, Some(2), PositionType::SelfAdded, None, 1),
        ];
        let before = arbiter(&participants, Some(2));
        let after = arbiter(&participants, Some(2));
        assert!(promoted_users(&before, &after).is_empty());
    }

    #[test]
    fn placeholder_promotion_is_not_reported() {
        let participants = vec![
            participant(1, None, PositionType::PrePopulated, Some(0), 0),
            participant(2, Some(2), PositionType::SelfAdded, None, 1),
        ];
        let before = arbiter(&participants, Some(1));
        let after = arbiter(&participants, Some(2));
        // user 2 gets promoted; the placeholder has no user id to report.
        let promoted = promoted_users(&before, &after);
        assert_eq!(promoted, vec![Uuid::from_u128(2)]);
    }
}
