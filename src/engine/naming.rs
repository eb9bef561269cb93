//! Deploy id generation
//!
//! Ids look like `amber-oslo-2026-08-02-10-00-00`: a word pair for humans, a
//! UTC timestamp for ordering. Two pushes inside the same second collide with
//! probability 1/(|adjectives|*|cities|); callers treat ids as opaque either
//! way.

use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

pub const ADJECTIVES: &[&str] = &[
    "amber", "bold", "brave", "bright", "calm", "clever", "eager", "fierce", "gentle", "golden",
    "humble", "keen", "lively", "lucky", "mellow", "noble", "patient", "proud", "quick", "quiet",
    "rapid", "silent", "steady", "swift", "tidy", "vivid", "warm", "wise",
];

pub const CITIES: &[&str] = &[
    "akita", "bergen", "cairo", "dakar", "exeter", "fresno", "geneva", "hanoi", "ibadan", "jaipur",
    "kyoto", "lagos", "madrid", "nairobi", "oslo", "paris", "quito", "riga", "sofia", "tunis",
    "utrecht", "vienna", "warsaw", "xalapa", "yerevan", "zagreb",
];

fn rng() -> &'static Mutex<SmallRng> {
    static RNG: OnceLock<Mutex<SmallRng>> = OnceLock::new();
    RNG.get_or_init(|| {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u64 ^ d.as_secs())
            .unwrap_or(0);
        Mutex::new(SmallRng::seed_from_u64(nanos))
    })
}

/// A fresh human-readable deploy id
pub fn new_deploy_id() -> String {
    let (adjective, city) = {
        let mut rng = rng().lock().expect("deploy id rng poisoned");
        (
            ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())],
            CITIES[rng.gen_range(0..CITIES.len())],
        )
    };
    format!(
        "{}-{}-{}",
        adjective,
        city,
        Utc::now().format("%Y-%m-%d-%H-%M-%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn matches_expected_shape() {
        let id = new_deploy_id();
        let re = Regex::new(r"^[a-z]+-[a-z]+-\d{4}-\d{2}-\d{2}-\d{2}-\d{2}-\d{2}$").unwrap();
        assert!(re.is_match(&id), "unexpected deploy id: {}", id);
    }

    #[test]
    fn draws_from_the_word_lists() {
        let id = new_deploy_id();
        let mut parts = id.splitn(3, '-');
        let adjective = parts.next().unwrap();
        let city = parts.next().unwrap();
        assert!(ADJECTIVES.contains(&adjective));
        assert!(CITIES.contains(&city));
    }
}
