//! Stateless random helpers. Every function takes the random source as an
//! argument so callers can pass a seeded one.

use rand::Rng;

pub const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// `len` characters drawn uniformly from `alphabet`. An empty alphabet yields
/// an empty string.
pub fn random_string<R: Rng>(rng: &mut R, len: usize, alphabet: &[u8]) -> String {
    if alphabet.is_empty() {
        return String::new();
    }
    (0..len)
        .map(|_| char::from(alphabet[rng.random_range(0..alphabet.len())]))
        .collect()
}

/// Uniform integer in `min..=max`. Bounds are swapped when reversed.
pub fn random_int<R: Rng>(rng: &mut R, min: i64, max: i64) -> i64 {
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    rng.random_range(lo..=hi)
}

/// W3C trace context header value: `00-<trace id>-<parent id>-01`.
pub fn traceparent<R: Rng>(rng: &mut R) -> String {
    let trace_id: u128 = rng.random();
    let parent_id: u64 = rng.random();
    format!("00-{trace_id:032x}-{parent_id:016x}-01")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn random_string_uses_alphabet() {
        let mut rng = StdRng::seed_from_u64(7);
        let s = random_string(&mut rng, 64, ALPHANUMERIC);
        assert_eq!(s.len(), 64);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));

        let only_x = random_string(&mut rng, 5, b"x");
        assert_eq!(only_x, "xxxxx");
        assert_eq!(random_string(&mut rng, 5, b""), "");
    }

    #[test]
    fn same_seed_same_output() {
        let a = random_string(&mut StdRng::seed_from_u64(42), 16, ALPHANUMERIC);
        let b = random_string(&mut StdRng::seed_from_u64(42), 16, ALPHANUMERIC);
        assert_eq!(a, b);
    }

    #[test]
    fn random_int_is_inclusive() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut seen = [false; 3];
        for _ in 0..500 {
            let v = random_int(&mut rng, 1, 3);
            assert!((1..=3).contains(&v));
            seen[(v - 1) as usize] = true;
        }
        assert_eq!(seen, [true; 3]);
        assert_eq!(random_int(&mut rng, 5, 5), 5);
        assert!((1..=9).contains(&random_int(&mut rng, 9, 1)));
    }

    #[test]
    fn traceparent_has_w3c_shape() {
        let tp = traceparent(&mut StdRng::seed_from_u64(3));
        let parts: Vec<&str> = tp.split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "00");
        assert_eq!(parts[1].len(), 32);
        assert_eq!(parts[2].len(), 16);
        assert_eq!(parts[3], "01");
        assert!(
            parts[1..3]
                .iter()
                .all(|p| p.chars().all(|c| c.is_ascii_hexdigit()))
        );
    }
}
