use crate::bucket::K;

/// How bucket capacities are assigned when a bucket splits.
///
/// Both variants give the half that contains our own id the standard
/// capacity; they differ in what the sibling gets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SplitPolicy {
    /// Every bucket holds `K` nodes.
    #[default]
    Uniform,

    /// The sibling of the self-side bucket gets `max(128 / 2^splits, K)`
    /// slots, where `splits` counts splits this table has performed.
    /// Early, far-away buckets fan out wide while coverage near our own
    /// id stays detailed.
    Tapered,
}

impl SplitPolicy {
    pub(crate) fn sibling_capacity(self, splits_performed: u32) -> usize {
        match self {
            SplitPolicy::Uniform => K,
            SplitPolicy::Tapered => 128usize
                .checked_shr(splits_performed)
                .unwrap_or(0)
                .max(K),
        }
    }
}
