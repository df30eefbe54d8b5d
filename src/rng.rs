// src/rng.rs  —  Injected randomness. Every random draw in `QsoEngine`
// (station count, call selection, delays, the P2P coin-flip, per-QSO
// WPM/tone) goes through this trait so tests can supply a scripted sequence
// instead of entropy.

pub trait Rng: Send {
    fn gen_range_u32(&mut self, lo: u32, hi_inclusive: u32) -> u32;
    fn gen_range_u64(&mut self, lo: u64, hi_inclusive: u64) -> u64;
    fn gen_bool(&mut self, p: f64) -> bool;

    /// Sample one element index in `0..len` (used for call/park pool draws).
    fn gen_index(&mut self, len: usize) -> usize {
        if len == 0 { return 0; }
        self.gen_range_u32(0, (len - 1) as u32) as usize
    }
}

/// Default production RNG, backed by `rand::SmallRng` seeded from entropy.
pub struct SmallRngSource(rand::rngs::SmallRng);

impl SmallRngSource {
    pub fn from_entropy() -> Self {
        use rand::SeedableRng;
        Self(rand::rngs::SmallRng::from_entropy())
    }

    pub fn from_seed(seed: u64) -> Self {
        use rand::SeedableRng;
        Self(rand::rngs::SmallRng::seed_from_u64(seed))
    }
}

impl Rng for SmallRngSource {
    fn gen_range_u32(&mut self, lo: u32, hi_inclusive: u32) -> u32 {
        use rand::Rng as _;
        self.0.gen_range(lo..=hi_inclusive)
    }
    fn gen_range_u64(&mut self, lo: u64, hi_inclusive: u64) -> u64 {
        use rand::Rng as _;
        self.0.gen_range(lo..=hi_inclusive)
    }
    fn gen_bool(&mut self, p: f64) -> bool {
        use rand::Rng as _;
        self.0.gen_bool(p.clamp(0.0, 1.0))
    }
}

/// Deterministic RNG for tests: replays a fixed script of `u64`s and bools,
/// looping if exhausted.
#[cfg(test)]
pub struct FakeRng {
    values: Vec<u64>,
    idx: usize,
}

#[cfg(test)]
impl FakeRng {
    pub fn new(values: Vec<u64>) -> Self {
        Self { values, idx: 0 }
    }

    fn next_raw(&mut self) -> u64 {
        if self.values.is_empty() { return 0; }
        let v = self.values[self.idx % self.values.len()];
        self.idx += 1;
        v
    }
}

#[cfg(test)]
impl Rng for FakeRng {
    fn gen_range_u32(&mut self, lo: u32, hi_inclusive: u32) -> u32 {
        if hi_inclusive <= lo { return lo; }
        lo + (self.next_raw() as u32) % (hi_inclusive - lo + 1)
    }
    fn gen_range_u64(&mut self, lo: u64, hi_inclusive: u64) -> u64 {
        if hi_inclusive <= lo { return lo; }
        lo + self.next_raw() % (hi_inclusive - lo + 1)
    }
    fn gen_bool(&mut self, p: f64) -> bool {
        let threshold = (p.clamp(0.0, 1.0) * 1000.0) as u64;
        (self.next_raw() % 1000) < threshold
    }
}
