//! The small state machine every executor task shares: dormant → active →
//! stopping → closed, phase timers, a once-latch on `run`, and the panic-safe
//! wrapper that funnels a task panic into a Context error (§4.4). In Rust
//! terms a "task" is a `tokio::spawn`-managed future; the panic-safe wrapper
//! is the `JoinHandle` join plus panic/error mapping described in the design
//! notes, in place of the reference implementation's `defer Recover(&base)`.

use crate::ctx::Context;
use crate::err::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
	Dormant,
	Active,
	Stopping,
	Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	Exec,
	Serv,
	Kernel,
}

#[derive(Default, Debug, Clone, Copy)]
pub struct PhaseTimers {
	exec: Duration,
	serv: Duration,
	kernel: Duration,
}

/// Tracks accumulated time in each phase. Operators call [`Self::enter`] at
/// every phase transition; the previous phase's elapsed time is frozen and
/// added to its running total.
pub struct PhaseClock {
	current: Option<(Phase, Instant)>,
	totals: PhaseTimers,
}

impl Default for PhaseClock {
	fn default() -> Self {
		PhaseClock {
			current: None,
			totals: PhaseTimers::default(),
		}
	}
}

impl PhaseClock {
	pub fn enter(&mut self, phase: Phase) {
		self.freeze();
		self.current = Some((phase, Instant::now()));
	}

	fn freeze(&mut self) {
		if let Some((phase, started)) = self.current.take() {
			let elapsed = started.elapsed();
			match phase {
				Phase::Exec => self.totals.exec += elapsed,
				Phase::Serv => self.totals.serv += elapsed,
				Phase::Kernel => self.totals.kernel += elapsed,
			}
		}
	}

	/// Freezes whatever phase is running and returns the accumulated totals.
	pub fn finish(&mut self) -> PhaseTimers {
		self.freeze();
		self.totals
	}
}

/// Per-executor lifecycle state, shared by every concrete operator via
/// composition rather than inheritance.
pub struct Lifecycle {
	state: std::sync::Mutex<State>,
	ran_once: AtomicBool,
	clock: std::sync::Mutex<PhaseClock>,
}

impl Default for Lifecycle {
	fn default() -> Self {
		Lifecycle {
			state: std::sync::Mutex::new(State::Dormant),
			ran_once: AtomicBool::new(false),
			clock: std::sync::Mutex::new(PhaseClock::default()),
		}
	}
}

impl Lifecycle {
	/// Enters the latch: panics (a programming error, not a runtime
	/// condition) if `run_once` has already fired for this executor.
	pub fn enter_run_once(&self) {
		if self.ran_once.swap(true, Ordering::SeqCst) {
			panic!("RunOnce invoked more than once on the same executor");
		}
		*self.state.lock().unwrap() = State::Active;
		self.clock.lock().unwrap().enter(Phase::Exec);
	}

	pub fn transition_stopping(&self) {
		*self.state.lock().unwrap() = State::Stopping;
	}

	pub fn transition_closed(&self) -> PhaseTimers {
		*self.state.lock().unwrap() = State::Closed;
		self.clock.lock().unwrap().finish()
	}

	pub fn state(&self) -> State {
		*self.state.lock().unwrap()
	}

	pub fn enter_phase(&self, phase: Phase) {
		self.clock.lock().unwrap().enter(phase);
	}
}

/// Spawns `fut` as a panic-safe operator task: a panic or propagated task
/// error is appended to `ctx`'s error log and the whole tree is told to stop,
/// mirroring the reference implementation's top-of-task recover wrapper.
pub fn spawn_guarded<F>(ctx: Context, op_name: &'static str, fut: F) -> JoinHandle<()>
where
	F: std::future::Future<Output = Result<(), Error>> + Send + 'static,
{
	tokio::spawn(async move {
		let span = tracing::debug_span!("operator", op = op_name);
		let _enter = span.enter();
		match fut.await {
			Ok(()) => {}
			Err(err) => {
				error!(op = op_name, %err, "operator reported an error");
				ctx.push_error(err);
				ctx.cancel();
			}
		}
	})
}

/// Joins a spawned operator task, converting a panic into the same
/// Context-error + cancel path a returned `Err` takes.
pub async fn join_guarded(ctx: &Context, op_name: &'static str, handle: JoinHandle<()>) {
	if let Err(join_err) = handle.await {
		if join_err.is_panic() {
			let message = panic_message(&join_err);
			error!(op = op_name, %message, "operator panicked");
			ctx.push_error(Error::OperatorPanicked(format!("{op_name}: {message}")));
			ctx.cancel();
		}
	}
}

fn panic_message(err: &tokio::task::JoinError) -> String {
	// `JoinError` only exposes the panic payload via `into_panic`, which
	// consumes it; since we only have a reference here we fall back to the
	// `Display` impl, which already includes the panic message when present.
	err.to_string()
}
