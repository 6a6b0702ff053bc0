//! Policy trait and the two built-in strategies.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use mining_core::{InfoHash, SwarmRecord};

/// A ranking strategy over loaded swarms.
///
/// `rank` returns every input swarm exactly once, most preferred first.
pub trait Policy: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn rank(&mut self, swarms: &[&SwarmRecord]) -> Vec<InfoHash>;
}

/// Prefers swarms that have uploaded the most while seeding.
///
/// Equal upload counts fall back to ascending info-hash order.
#[derive(Debug, Clone, Default)]
pub struct UploadPolicy;

impl UploadPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl Policy for UploadPolicy {
    fn name(&self) -> &'static str {
        "upload"
    }

    fn rank(&mut self, swarms: &[&SwarmRecord]) -> Vec<InfoHash> {
        let mut ranked: Vec<(u64, InfoHash)> =
            swarms.iter().map(|s| (s.uploaded(), s.info_hash)).collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        ranked.into_iter().map(|(_, ih)| ih).collect()
    }
}

/// Uniformly shuffled order, redrawn on every call.
///
/// Gives swarms without upload history a chance to be admitted.
#[derive(Debug, Clone)]
pub struct RandomPolicy {
    rng: StdRng,
}

impl RandomPolicy {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Deterministic shuffles for reproducible runs.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl Policy for RandomPolicy {
    fn name(&self) -> &'static str {
        "random"
    }

    fn rank(&mut self, swarms: &[&SwarmRecord]) -> Vec<InfoHash> {
        // Sort first so the shuffle depends only on the rng, not on map order.
        let mut ranked: Vec<InfoHash> = swarms.iter().map(|s| s.info_hash).collect();
        ranked.sort();
        ranked.shuffle(&mut self.rng);
        ranked
    }
}

/// Half the active set by upload, half at random.
pub fn default_policies() -> Vec<Box<dyn Policy>> {
    vec![Box::new(UploadPolicy::new()), Box::new(RandomPolicy::new())]
}
