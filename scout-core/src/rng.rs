use crate::geo::{destination, LatLon};

/// xorshift32. Deterministic for a given seed so jitter is reproducible in
/// tests and replays.
#[derive(Clone, Copy, Debug)]
pub struct SeededRng {
    state: u32,
}

impl SeededRng {
    pub fn new(seed: u32) -> Self {
        Self {
            state: if seed == 0 { 0xDEAD_BEEF } else { seed },
        }
    }

    /// Seed from wall-clock time when no explicit seed is configured.
    pub fn from_time(unix_secs: i64, salt: u32) -> Self {
        Self::new((unix_secs as u32).rotate_left(7) ^ salt)
    }

    pub fn state(&self) -> u32 {
        self.state
    }

    pub fn next(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        self.state
    }

    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        self.next() % max
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        f64::from(self.next()) / (f64::from(u32::MAX) + 1.0)
    }
}

/// Uniform point within a disc of `max_m` metres around `origin`.
pub fn jitter_location(origin: LatLon, max_m: f64, rng: &mut SeededRng) -> LatLon {
    if max_m <= 0.0 {
        return origin;
    }
    let bearing = f64::from(rng.next_int(360));
    let distance = rng.next_f64().sqrt() * max_m;
    destination(origin, bearing, distance).rounded()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::distance_m;

    #[test]
    fn zero_seed_is_replaced() {
        let mut a = SeededRng::new(0);
        let mut b = SeededRng::new(0xDEAD_BEEF);
        assert_eq!(a.next(), b.next());
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut a = SeededRng::new(42);
        let mut b = SeededRng::new(42);
        for _ in 0..16 {
            assert_eq!(a.next_int(1000), b.next_int(1000));
        }
    }

    #[test]
    fn unit_floats_stay_in_range() {
        let mut rng = SeededRng::new(7);
        for _ in 0..1000 {
            let value = rng.next_f64();
            assert!((0.0..1.0).contains(&value));
        }
    }

    #[test]
    fn jitter_stays_inside_the_disc() {
        let mut rng = SeededRng::new(99);
        let origin = LatLon::new(51.5, -0.12);
        for _ in 0..200 {
            let moved = jitter_location(origin, 25.0, &mut rng);
            // Rounding to five decimals adds up to ~1 m.
            assert!(distance_m(origin, moved) <= 26.5);
        }
        assert_eq!(jitter_location(origin, 0.0, &mut rng), origin);
    }
}
