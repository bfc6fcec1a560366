//! Unattended farming bot for a co-op quest loop.
//!
//! The bot watches the screen through template matching, clicks through the
//! game's menus, joins public rooms, and re-derives where it is from the
//! visible screen whenever an expected signal fails to appear. The
//! architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (geometry, room selection,
//!   recovery classification, session bookkeeping, correlation). No I/O.
//! - **[`io`]**: Side-effecting collaborators (screen capture, matcher,
//!   desktop input, process control, diagnostics, config) behind traits.
//!
//! Orchestration modules ([`verify`], [`recover`], [`farm`], [`start`],
//! [`scan`], [`check`]) combine the two to implement CLI commands.

pub mod check;
pub mod core;
pub mod exit_codes;
pub mod farm;
pub mod io;
pub mod logging;
pub mod recover;
pub mod scan;
pub mod start;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod verify;
