//! The `random` opcode's number generator (spec §4.12).

use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};

pub struct ZRand {
    rng: Box<dyn RngCore + Send>,
}

impl ZRand {
    pub fn new_uniform() -> ZRand {
        ZRand {
            rng: Box::new(rand::thread_rng()),
        }
    }

    pub fn new_seeded(seed: u64) -> ZRand {
        ZRand {
            rng: Box::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// `random` opcode semantics: `n > 0` returns a uniform value in
    /// `1..=n`; `n == 0` reseeds from entropy and returns 0; `n < 0` reseeds
    /// deterministically from `|n|` and returns 0.
    pub fn random(&mut self, n: i16) -> u16 {
        match n.cmp(&0) {
            std::cmp::Ordering::Greater => self.rng.gen_range(1..=(n as u16)),
            std::cmp::Ordering::Equal => {
                self.rng = Box::new(rand::thread_rng());
                0
            }
            std::cmp::Ordering::Less => {
                self.rng = Box::new(StdRng::seed_from_u64((-n) as u64));
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_n_stays_in_range() {
        let mut r = ZRand::new_seeded(1);
        for _ in 0..100 {
            let v = r.random(6);
            assert!((1..=6).contains(&v));
        }
    }

    #[test]
    fn zero_and_negative_return_zero() {
        let mut r = ZRand::new_seeded(1);
        assert_eq!(r.random(0), 0);
        assert_eq!(r.random(-5), 0);
    }

    #[test]
    fn negative_reseed_is_deterministic() {
        let mut a = ZRand::new_uniform();
        let mut b = ZRand::new_uniform();
        a.random(-42);
        b.random(-42);
        let seq_a: Vec<u16> = (0..10).map(|_| a.random(1000)).collect();
        let seq_b: Vec<u16> = (0..10).map(|_| b.random(1000)).collect();
        assert_eq!(seq_a, seq_b);
    }
}
