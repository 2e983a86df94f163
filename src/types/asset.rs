use super::AssetId;

/// Static per-market metadata. Immutable after creation; cached in-process
/// for the lifetime of a run (see `crate::store::AssetCache`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Asset {
    pub asset_id: AssetId,
    pub symbol: String,
    /// Price grid spacing, ×10^6. Must be `> 0`; a non-positive tick read
    /// from the store is a `BadConfig` failure at load time, not something
    /// callers of `bucket()` should ever see.
    pub tick_x6: i64,
    pub lot_num: i64,
    pub lot_den: i64,
}
