/// Sampling decision for a transaction.
///
/// Called at most once per transaction. The sampler may raise or lower the
/// transaction's priority through `priority`.
pub trait AdaptiveSampler: Send + Sync {
    fn compute_sampled(&self, priority: &mut f32) -> bool;
}

impl<F> AdaptiveSampler for F
where
    F: Fn(&mut f32) -> bool + Send + Sync,
{
    fn compute_sampled(&self, priority: &mut f32) -> bool {
        self(priority)
    }
}

/// Sampler with a fixed decision.
///
/// Sampled transactions get their priority promoted by `1.0` so they sort
/// ahead of unsampled ones downstream.
#[derive(Debug, Clone, Copy)]
pub struct ConstantSampler {
    sampled: bool,
}

impl ConstantSampler {
    pub const PRIORITY_BOOST: f32 = 1.0;

    pub const fn new(sampled: bool) -> Self {
        Self { sampled }
    }

    pub const fn always() -> Self {
        Self::new(true)
    }

    pub const fn never() -> Self {
        Self::new(false)
    }
}

impl AdaptiveSampler for ConstantSampler {
    fn compute_sampled(&self, priority: &mut f32) -> bool {
        if self.sampled {
            *priority += Self::PRIORITY_BOOST;
        }
        self.sampled
    }
}
