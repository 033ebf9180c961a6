// src/core/identity.rs

use crate::core::config::IdentitySource;
use rand::Rng;
use rand::seq::IndexedRandom;
use tracing::debug;

/// Pinned desktop browser identities used when the operator supplies none.
pub const BROWSER_IDENTITIES: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/121.0",
];

/// Resolves the identity a client will present for its whole lifetime.
///
/// A fixed identity is returned verbatim. Otherwise one entry of
/// [`BROWSER_IDENTITIES`] is drawn uniformly from `rng`. Callers invoke this
/// once per client, so every request of that client shares the result.
pub fn select_identity<R: Rng + ?Sized>(source: &IdentitySource, rng: &mut R) -> String {
    match source {
        IdentitySource::Fixed(identity) => identity.clone(),
        IdentitySource::Auto => {
            // The pool is a non-empty constant, `choose` only fails on empty slices.
            let identity = BROWSER_IDENTITIES.choose(rng).copied().unwrap_or(BROWSER_IDENTITIES[0]);
            debug!(identity, "Selected random browser identity.");
            identity.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;

    #[test]
    fn fixed_identity_is_used_verbatim() {
        let mut rng = StdRng::seed_from_u64(7);
        let source = IdentitySource::Fixed("CustomScanner/2.0 (+ops)".into());
        assert_eq!(select_identity(&source, &mut rng), "CustomScanner/2.0 (+ops)");
    }

    #[test]
    fn auto_identity_comes_from_the_pool() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let identity = select_identity(&IdentitySource::Auto, &mut rng);
            assert!(BROWSER_IDENTITIES.contains(&identity.as_str()));
        }
    }

    #[test]
    fn same_seed_gives_same_identity() {
        let a = select_identity(&IdentitySource::Auto, &mut StdRng::seed_from_u64(1234));
        let b = select_identity(&IdentitySource::Auto, &mut StdRng::seed_from_u64(1234));
        assert_eq!(a, b);
    }

    #[test]
    fn auto_identity_covers_more_than_one_entry() {
        let mut rng = StdRng::seed_from_u64(99);
        let seen: HashSet<String> = (0..200).map(|_| select_identity(&IdentitySource::Auto, &mut rng)).collect();
        assert!(seen.len() > 1);
    }
}
