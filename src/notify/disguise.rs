//! Cover notifications shown while the device is locked.

use rand::seq::SliceRandom;
use rand::Rng;

/// (title, message) pairs that look like routine system chatter.
pub const DISGUISE_PHRASES: [(&str, &str); 5] = [
    (
        "System Update Available",
        "System performance improvements installed",
    ),
    (
        "App Update Completed",
        "Latest features and improvements added",
    ),
    (
        "Storage Optimization Complete",
        "Storage space has been optimized",
    ),
    (
        "Battery Optimization Applied",
        "Battery usage has been optimized",
    ),
    (
        "Security Scan Complete",
        "System security check completed",
    ),
];

/// Pick a random cover phrase.
pub fn pick<R: Rng + ?Sized>(rng: &mut R) -> (&'static str, &'static str) {
    *DISGUISE_PHRASES
        .choose(rng)
        .unwrap_or(&DISGUISE_PHRASES[0])
}
