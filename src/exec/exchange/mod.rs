//! The bounded, multi-waiter, two-phase-close queue that is the sole
//! inter-operator channel (§4.6). Every plan operator task sends into and
//! receives from one of these; there is no other way for two operator tasks
//! to exchange data.
//!
//! The reference implementation hand-rolls an intrusive doubly-linked waiter
//! list under two locks (value-lock, then observation-lock) to get FIFO wake
//! order. Here both locks collapse into one `Mutex` guarding the shared
//! state, and the intrusive waiter list is replaced by two [`event_listener::Event`]s
//! (one for "space freed up", one for "item available") — `Event` already
//! wakes listeners in the order they started listening, which is the FIFO
//! guarantee the original waiter list existed to provide.

pub mod pool;

use crate::datastore::IndexEntry;
use event_listener::Event;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

/// The outcome of a [`EntryExchange::receive`] call.
#[derive(Debug)]
pub enum Received {
	Item(IndexEntry),
	/// Stop was signalled; no further items will ever be available.
	Stopped,
	/// The exchange is closed and drained; there is nothing left to receive.
	Exhausted,
}

struct State {
	buffer: VecDeque<IndexEntry>,
	capacity: usize,
	closed: bool,
	stop: bool,
}

/// A single-producer/single-consumer bounded queue with cooperative stop and
/// two-phase close. See module docs and spec §4.6 for the full contract.
pub struct EntryExchange {
	state: Mutex<State>,
	item_available: Event,
	space_available: Event,
	close_count: AtomicU8,
	/// Tracks whether this exchange's buffer came from the standard pool, so
	/// `dispose` knows whether to offer it back.
	pooled: bool,
}

impl EntryExchange {
	/// `capacity = 1` gets a dedicated single-slot buffer. `capacity` equal to
	/// the current standard scan capacity draws from the process-wide pool.
	/// Any other capacity is freshly allocated and never pooled.
	pub fn new(capacity: usize) -> Self {
		let standard = *crate::cnf::STANDARD_SCAN_CAP;
		let (buffer, pooled) = if capacity == standard {
			let (buf, _cap) = pool::acquire_standard();
			(buf, true)
		} else {
			(VecDeque::with_capacity(capacity), false)
		};
		EntryExchange {
			state: Mutex::new(State {
				buffer,
				capacity,
				closed: false,
				stop: false,
			}),
			item_available: Event::new(),
			space_available: Event::new(),
			close_count: AtomicU8::new(0),
			pooled,
		}
	}

	pub fn standard() -> Self {
		Self::new(*crate::cnf::STANDARD_SCAN_CAP)
	}

	pub fn single_slot() -> Self {
		Self::new(1)
	}

	/// Sends one entry. Returns `false` immediately if stop has been
	/// signalled, and `false` if the exchange is closed while waiting for
	/// space; otherwise blocks (cooperatively) until there is room, then
	/// returns `true`.
	pub async fn send(&self, item: IndexEntry) -> bool {
		loop {
			let listener = {
				let mut state = match self.state.lock() {
					Ok(g) => g,
					Err(_) => return false,
				};
				if state.stop {
					return false;
				}
				if state.closed {
					self.item_available.notify(usize::MAX);
					self.space_available.notify(usize::MAX);
					return false;
				}
				if state.buffer.len() < state.capacity {
					state.buffer.push_back(item);
					drop(state);
					trace!("EntryExchange: item enqueued");
					self.item_available.notify(1);
					self.space_available.notify(1);
					return true;
				}
				self.space_available.listen()
			};
			listener.await;
		}
	}

	/// Receives one entry, per [`Received`]'s contract.
	pub async fn receive(&self) -> Received {
		loop {
			let listener = {
				let mut state = match self.state.lock() {
					Ok(g) => g,
					Err(_) => return Received::Stopped,
				};
				if state.stop {
					return Received::Stopped;
				}
				if let Some(item) = state.buffer.pop_front() {
					drop(state);
					trace!("EntryExchange: item dequeued");
					self.space_available.notify(1);
					return Received::Item(item);
				}
				if state.closed {
					return Received::Exhausted;
				}
				self.item_available.listen()
			};
			listener.await;
		}
	}

	/// Signals cooperative stop: every blocked and future `send`/`receive`
	/// call returns immediately without further blocking. Takes precedence
	/// over `closed` at every check point.
	pub fn send_stop(&self) {
		if let Ok(mut state) = self.state.lock() {
			state.stop = true;
		}
		self.item_available.notify(usize::MAX);
		self.space_available.notify(usize::MAX);
	}

	pub fn is_stopped(&self) -> bool {
		self.state.lock().map(|s| s.stop).unwrap_or(true)
	}

	/// Two-phase close. The first call marks the exchange closed and wakes
	/// every waiter (who will then observe "no more"). The second call drains
	/// and disposes of the backing buffer, offering it back to the pool if it
	/// still matches the current standard capacity. Contract: exactly two
	/// calls total, one from each end; a third call is a caller bug.
	pub fn close(&self) {
		let n = self.close_count.fetch_add(1, Ordering::SeqCst) + 1;
		match n {
			1 => {
				if let Ok(mut state) = self.state.lock() {
					state.closed = true;
				}
				self.item_available.notify(usize::MAX);
				self.space_available.notify(usize::MAX);
			}
			2 => {
				let (buffer, capacity, pooled) = {
					let mut state = match self.state.lock() {
						Ok(g) => g,
						Err(_) => return,
					};
					let buffer = std::mem::take(&mut state.buffer);
					(buffer, state.capacity, self.pooled)
				};
				if pooled {
					pool::release_standard(buffer, capacity);
				}
			}
			_ => {
				warn!("EntryExchange::close called more than twice; ignoring");
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::value::Value;

	fn entry(k: &str) -> IndexEntry {
		IndexEntry {
			primary_key: k.to_owned(),
			covers: Value::Null,
			metadata: None,
		}
	}

	#[tokio::test]
	async fn fifo_order_preserved() {
		let ex = EntryExchange::new(4);
		for k in ["a", "b", "c"] {
			assert!(ex.send(entry(k)).await);
		}
		for k in ["a", "b", "c"] {
			match ex.receive().await {
				Received::Item(e) => assert_eq!(e.primary_key, k),
				other => panic!("expected item, got {other:?}"),
			}
		}
	}

	#[tokio::test]
	async fn never_exceeds_capacity() {
		let ex = std::sync::Arc::new(EntryExchange::new(2));
		assert!(ex.send(entry("a")).await);
		assert!(ex.send(entry("b")).await);
		// Third send should block until a slot frees up.
		let ex2 = ex.clone();
		let sender = tokio::spawn(async move { ex2.send(entry("c")).await });
		tokio::task::yield_now().await;
		assert!(!sender.is_finished());
		match ex.receive().await {
			Received::Item(e) => assert_eq!(e.primary_key, "a"),
			other => panic!("expected item, got {other:?}"),
		}
		assert!(sender.await.unwrap());
	}

	#[tokio::test]
	async fn stop_short_circuits_send_and_receive() {
		let ex = EntryExchange::new(2);
		ex.send_stop();
		assert!(!ex.send(entry("a")).await);
		assert!(matches!(ex.receive().await, Received::Stopped));
	}

	#[tokio::test]
	async fn close_is_two_phase() {
		let ex = EntryExchange::new(2);
		assert!(ex.send(entry("a")).await);
		ex.close();
		// First close: still readable until drained, then exhausted.
		match ex.receive().await {
			Received::Item(e) => assert_eq!(e.primary_key, "a"),
			other => panic!("expected item, got {other:?}"),
		}
		assert!(matches!(ex.receive().await, Received::Exhausted));
		ex.close();
	}
}
