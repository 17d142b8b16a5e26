//! Deterministic hashing primitives shared by the engine.
//!
//! [`fasthash`] and [`range_map`] are carried over from the AnchorHash
//! lineage this crate descends from; [`jump_hash`] is the bucket-hash used
//! by [`BinomialEngine`](crate::binomial::BinomialEngine), chosen because it
//! needs no auxiliary state to grow monotonically (see spec §4.1).

use std::hash::{BuildHasher, Hash, Hasher};

/// Hash an arbitrary key, producing a 64 bit digest suitable for feeding into
/// [`jump_hash`] or [`range_map`].
pub(crate) fn hash_key<K: Hash, B: BuildHasher>(key: &K, build: &B) -> u64 {
    let mut hasher = build.build_hasher();
    key.hash(&mut hasher);
    hasher.finish()
}

/// A hash function producing a 32 bit hash for `k`, using `seed` as the
/// initial hasher state.
///
/// This implementation makes use of the [`_mm_crc32_u32`] intrinsic available
/// on x86_64 platforms that support SSE4.2 or higher.
///
/// The non-simd fallback implementation uses the [Fowler–Noll–Vo hash] and
/// can be used by disabling the `simd` crate feature.
///
/// [`_mm_crc32_u32`]: https://software.intel.com/sites/landingpage/IntrinsicsGuide/#text=_mm_crc32_u32&expand=1287
/// [Fowler–Noll–Vo hash]: http://www.isthe.com/chongo/tech/comp/fnv/index.html
#[cfg(all(target_arch = "x86_64", target_feature = "sse4.2", feature = "simd"))]
pub(crate) fn fasthash(k: u32, seed: u32) -> u32 {
    unsafe { std::arch::x86_64::_mm_crc32_u32(seed, k) }
}

/// A hash function producing a 32 bit hash for `k`, using `seed` as the
/// initial hasher state.
///
/// This is a fallback implementation for platforms that do not support the
/// [`_mm_crc32_u32`] intrinsic. It makes use of the [Fowler–Noll–Vo hash]
/// function which is extremely quick at hashing small amounts of data.
///
/// [`_mm_crc32_u32`]: https://software.intel.com/sites/landingpage/IntrinsicsGuide/#text=_mm_crc32_u32&expand=1287
/// [Fowler–Noll–Vo hash]: http://www.isthe.com/chongo/tech/comp/fnv/index.html
#[cfg(not(all(target_arch = "x86_64", target_feature = "sse4.2", feature = "simd")))]
pub(crate) fn fasthash(k: u32, seed: u32) -> u32 {
    use fnv::FnvHasher;

    let mut h = FnvHasher::with_key(seed.into());
    h.write_u32(k);
    h.finish() as u32 // Truncate down to u32, discarding 32 bits
}

/// An efficient modulo-like operation mapping `v` into the range `[0, max)`
/// for modern 64-bit CPUs.
///
/// Algorithm taken from Daniel Lemire's [`Fast Random Integer Generation in
/// an Interval`] without the rejection method, therefore accepting a bias in
/// the result.
///
/// [`Fast Random Integer Generation in an Interval`]: https://arxiv.org/abs/1805.10941
#[cfg(all(target_pointer_width = "64", feature = "fastmod"))]
pub(crate) fn range_map(v: u32, max: u32) -> u32 {
    debug_assert_ne!(max, 0);
    ((v as u64 * max as u64) >> 32) as u32
}

/// A 32-bit replacement for Daniel Lemire's [`Fast Random Integer Generation
/// in an Interval`] used on 64-bit CPUs.
///
/// Computed as `v % max`, including the result bias.
///
/// [`Fast Random Integer Generation in an Interval`]: https://arxiv.org/abs/1805.10941
#[cfg(not(all(target_pointer_width = "64", feature = "fastmod")))]
pub(crate) fn range_map(v: u32, max: u32) -> u32 {
    v % max
}

/// Jump consistent hash (Lamping & Veach): maps `key` onto `[0, num_buckets)`
/// such that a `num_buckets → num_buckets + 1` transition moves a key with
/// probability `1 / (num_buckets + 1)`, and only ever to the new bucket.
///
/// `num_buckets` must be greater than zero.
pub(crate) fn jump_hash(mut key: u64, num_buckets: u32) -> u32 {
    debug_assert_ne!(num_buckets, 0);

    let num_buckets = num_buckets as i64;
    let mut b: i64 = -1;
    let mut j: i64 = 0;

    while j < num_buckets {
        b = j;
        key = key.wrapping_mul(2_862_933_555_777_941_757).wrapping_add(1);
        j = ((b + 1) as f64 * ((1i64 << 31) as f64 / ((key >> 33) as f64 + 1.0))) as i64;
    }

    b as u32
}
