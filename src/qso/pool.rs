// src/qso/pool.rs  —  Simulated-station and POTA-park data sources
//
// Templates only ever need a callsign and, for POTA, a park reference, so
// the pools are narrowed to just that — but kept pluggable behind traits so
// a `--other-calls-file`/`--parks-file` can override the embedded defaults.

use crate::error::ConfigError;
use crate::rng::Rng;
use std::collections::HashSet;
use std::path::Path;

/// Abstract collaborator: draws distinct callsigns for a CQ batch.
pub trait CallPool: Send {
    fn sample(&self, rng: &mut dyn Rng, n: usize, exclude: &HashSet<String>) -> Vec<String>;
    fn len(&self) -> usize;
}

/// Abstract collaborator: draws a park reference for a P2P station.
pub trait ParkPool: Send {
    fn sample_ref(&self, rng: &mut dyn Rng) -> Option<String>;
}

const EMBEDDED_CALLS: &[&str] = &[
    "K1ABC", "W2XYZ", "N3DEF", "KB4GHI", "VE3JKL", "G4MNO", "DL5PQR", "F6STU",
    "EA7VWX", "I8YZA", "JA1BCD", "VK2EFG", "ON4HIJ", "PA3KLM", "OK1NOP",
    "SM5QRS", "LA6TUV", "OH7WXY", "HB9ZAB", "YO8CDE", "SP9FGH", "9A1IJK",
    "S51LMN", "EA3IMR", "EA3XYZ", "K2AB",
];

const EMBEDDED_PARKS: &[&str] = &["US-1234", "K-0123", "DA-0456", "ON-0789", "F-1122"];

pub struct StaticCallPool {
    calls: Vec<String>,
}

impl StaticCallPool {
    pub fn new() -> Self {
        Self { calls: EMBEDDED_CALLS.iter().map(|s| s.to_string()).collect() }
    }
}

impl Default for StaticCallPool {
    fn default() -> Self {
        Self::new()
    }
}

impl CallPool for StaticCallPool {
    fn sample(&self, rng: &mut dyn Rng, n: usize, exclude: &HashSet<String>) -> Vec<String> {
        sample_distinct(&self.calls, rng, n, exclude)
    }

    fn len(&self) -> usize {
        self.calls.len()
    }
}

pub struct StaticParkPool {
    refs: Vec<String>,
}

impl StaticParkPool {
    pub fn new() -> Self {
        Self { refs: EMBEDDED_PARKS.iter().map(|s| s.to_string()).collect() }
    }
}

impl Default for StaticParkPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ParkPool for StaticParkPool {
    fn sample_ref(&self, rng: &mut dyn Rng) -> Option<String> {
        if self.refs.is_empty() {
            return None;
        }
        Some(self.refs[rng.gen_index(self.refs.len())].clone())
    }
}

/// Call pool backed by a user-supplied file (UTF-8 lines, `#` comments,
/// empty lines ignored, first comma-separated field is the callsign).
pub struct FileCallPool {
    calls: Vec<String>,
}

impl FileCallPool {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::CallPool {
            path: path.to_path_buf(),
            source,
        })?;
        let calls = raw
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(|l| l.split(',').next().unwrap_or(l).trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .collect();
        Ok(Self { calls })
    }
}

impl CallPool for FileCallPool {
    fn sample(&self, rng: &mut dyn Rng, n: usize, exclude: &HashSet<String>) -> Vec<String> {
        sample_distinct(&self.calls, rng, n, exclude)
    }

    fn len(&self) -> usize {
        self.calls.len()
    }
}

#[derive(Debug, serde::Deserialize)]
struct ParkRow {
    reference: String,
    active: u8,
}

/// Park pool backed by a CSV file (columns `reference`, `active`; only
/// `active=1` rows loaded).
pub struct CsvParkPool {
    refs: Vec<String>,
}

impl CsvParkPool {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut reader = csv::Reader::from_path(path).map_err(|source| ConfigError::Parks {
            path: path.to_path_buf(),
            source,
        })?;
        let mut refs = Vec::new();
        for row in reader.deserialize() {
            let row: ParkRow = row.map_err(|source| ConfigError::Parks {
                path: path.to_path_buf(),
                source,
            })?;
            if row.active == 1 {
                refs.push(row.reference);
            }
        }
        Ok(Self { refs })
    }
}

impl ParkPool for CsvParkPool {
    fn sample_ref(&self, rng: &mut dyn Rng) -> Option<String> {
        if self.refs.is_empty() {
            return None;
        }
        Some(self.refs[rng.gen_index(self.refs.len())].clone())
    }
}

fn sample_distinct(
    pool: &[String],
    rng: &mut dyn Rng,
    n: usize,
    exclude: &HashSet<String>,
) -> Vec<String> {
    let available: Vec<&String> = pool.iter().filter(|c| !exclude.contains(*c)).collect();
    let mut chosen = HashSet::new();
    let mut out = Vec::new();
    let attempts = available.len().saturating_mul(4).max(n * 4).min(10_000);
    for _ in 0..attempts {
        if out.len() >= n || available.is_empty() {
            break;
        }
        let idx = rng.gen_index(available.len());
        let call = available[idx].clone();
        if chosen.insert(call.clone()) {
            out.push(call);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::FakeRng;

    #[test]
    fn static_pool_draws_distinct_calls() {
        let pool = StaticCallPool::new();
        let mut rng = FakeRng::new(vec![1, 2, 3, 4, 5, 6, 7, 8]);
        let picked = pool.sample(&mut rng, 3, &HashSet::new());
        let unique: HashSet<_> = picked.iter().collect();
        assert_eq!(picked.len(), 3);
        assert_eq!(unique.len(), 3);
    }
}
