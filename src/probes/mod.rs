//! Probes: test units that measure something instead of checking a value.
//!
//! Performance probes drive an [`Operation`] and compare the measurement
//! against a threshold. Security probes scan files once and report findings.

pub mod command;
pub mod operation;
pub mod performance;
pub mod sampler;
pub mod security;

pub use self::command::CommandProbe;
pub use self::operation::{from_fn, CommandOperation, FnOperation, HttpGet, Operation};
pub use self::performance::{ResourceUsageProbe, ResponseTimeProbe, ThroughputProbe};
pub use self::sampler::TargetPid;
pub use self::security::{
    Advisory, ConfigAudit, DependencyCheck, Finding, PermissionCheck, RiskRule, VulnerabilityScan,
};
