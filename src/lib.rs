//! Agent immune system: a compliance kernel for autonomous agents.
//!
//! Every action an agent wants to take goes through
//! [`ComplianceKernel::process`], which scores it, consults local decision
//! history and the shared threat registry, and returns a [`Verdict`]: allow,
//! allow with audit, require confirmation, or block. The kernel never runs the
//! action itself. Ledger writes and threat publication are best-effort and
//! time-bounded.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod classifier;
pub mod config;
pub mod db;
pub mod decision;
pub mod external;
pub mod kernel;
pub mod ledger;
pub mod logging;
pub mod memory;
pub mod registry;
pub mod types;

pub use kernel::{ComplianceKernel, KernelError, Verdict};
pub use types::{ActionRequest, AlertLevel, Decision, RiskCategory};
