use once_cell::sync::Lazy;

/// The capacity an [`crate::exec::exchange::EntryExchange`] uses when the operator
/// building it did not ask for a one-slot or bespoke capacity. Buffers at this
/// capacity are drawn from and returned to a process-wide pool (see
/// [`crate::exec::exchange::pool`]).
///
/// Adjustable at runtime: a buffer is only returned to the pool on dispose if this
/// value still matches the capacity the buffer was allocated with.
pub static STANDARD_SCAN_CAP: Lazy<usize> = lazy_env_parse!("FLOWQL_STANDARD_SCAN_CAP", usize, 64);

/// How many concurrent operator tasks the execution runtime will run at once.
pub static MAX_CONCURRENT_TASKS: Lazy<usize> =
	lazy_env_parse!("FLOWQL_MAX_CONCURRENT_TASKS", usize, 256);

/// How long an operator is given to reach `closed` after `sendStop` before the
/// runtime stops waiting on it and logs a warning instead of blocking forever.
pub static STOP_TIMEOUT_MS: Lazy<u64> = lazy_env_parse!("FLOWQL_STOP_TIMEOUT_MS", u64, 5_000);
