//! Side-effecting collaborators of the farming loop.
//!
//! Each concern sits behind a trait ([`clock::Clock`], [`matcher::Matcher`],
//! [`desktop::Desktop`], [`launcher::Launcher`], [`diagnostics::Diagnostics`])
//! so the state machine can be driven by scripted fakes in tests.

pub mod capture;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod desktop;
pub mod diagnostics;
pub mod launcher;
pub mod matcher;
pub mod process;
