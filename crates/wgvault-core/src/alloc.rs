//! Peer id allocation.
//!
//! Each server profile carries a `next_peer_id` counter that is the single
//! source of truth for the next free peer slot on that server. The UI may
//! show an edited value for one generation, but the counter only ever moves
//! forward from the stored value.

use wgvault_types::ServerProfile;

/// The peer id to offer for the upcoming generation.
pub fn next_peer_id(profile: &ServerProfile) -> u32 {
    profile.next_peer_id.max(1)
}

/// Advance the counter after a generation has committed. The returned
/// profile's counter is strictly one greater than the value just consumed;
/// callers persist it with `put_server`. Never call this before the
/// generation is durably recorded.
pub fn advance(mut profile: ServerProfile) -> ServerProfile {
    profile.next_peer_id = next_peer_id(&profile) + 1;
    profile
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use test_case::test_case;

    fn profile_with_counter(next: u32) -> ServerProfile {
        let mut profile = ServerProfile::new("test", Utc::now());
        profile.next_peer_id = next;
        profile
    }

    #[test_case(1, 1 ; "fresh profile")]
    #[test_case(7, 7 ; "mid sequence")]
    #[test_case(0, 1 ; "zero clamps to one")]
    fn next_id_reads_counter(stored: u32, expected: u32) {
        assert_eq!(next_peer_id(&profile_with_counter(stored)), expected);
    }

    #[test]
    fn advancing_n_times_yields_strictly_increasing_ids() {
        let mut profile = profile_with_counter(3);
        let mut seen = Vec::new();
        for _ in 0..10 {
            let id = next_peer_id(&profile);
            seen.push(id);
            profile = advance(profile);
        }
        assert_eq!(seen, (3..13).collect::<Vec<_>>());
        assert!(seen.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn counter_never_decreases() {
        let profile = profile_with_counter(5);
        let advanced = advance(profile.clone());
        assert!(advanced.next_peer_id > profile.next_peer_id);
    }
}
