//! Process-wide pool of ring-buffer backing storage for exchanges built at
//! the standard capacity. A buffer is returned to the pool on dispose only if
//! the capacity it was allocated with still matches the *current* standard
//! capacity — the knob is runtime-adjustable, so a buffer allocated under a
//! stale setting is simply dropped rather than returned.
//!
//! Buffers are tagged with the capacity they were handed out for rather than
//! relying on `VecDeque::capacity()`, whose actual allocation size is not
//! guaranteed to equal the requested value.

use crate::cnf::STANDARD_SCAN_CAP;
use crate::datastore::IndexEntry;
use concurrent_queue::ConcurrentQueue;
use once_cell::sync::Lazy;
use std::collections::VecDeque;

struct PooledBuffer {
	entries: VecDeque<IndexEntry>,
	capacity: usize,
}

static POOL: Lazy<ConcurrentQueue<PooledBuffer>> = Lazy::new(ConcurrentQueue::unbounded);

/// Hands back a buffer tagged with the current standard capacity, reusing a
/// pooled one if one at that same capacity is free.
pub fn acquire_standard() -> (VecDeque<IndexEntry>, usize) {
	let cap = *STANDARD_SCAN_CAP;
	loop {
		match POOL.pop() {
			Ok(buf) if buf.capacity == cap => return (buf.entries, cap),
			Ok(_stale) => continue,
			Err(_) => return (VecDeque::with_capacity(cap), cap),
		}
	}
}

/// Returns a buffer to the pool, but only if `allocated_capacity` still
/// matches the current standard capacity; otherwise it is simply dropped.
pub fn release_standard(mut entries: VecDeque<IndexEntry>, allocated_capacity: usize) {
	let cap = *STANDARD_SCAN_CAP;
	if allocated_capacity == cap {
		entries.clear();
		let _ = POOL.push(PooledBuffer {
			entries,
			capacity: cap,
		});
	}
	// else: stale capacity, drop it on the floor.
}
