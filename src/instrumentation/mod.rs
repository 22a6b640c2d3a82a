//! The instrumentation agent: deployment selection, agent rebuild,
//! activation on the device and removal.
//!
//! Exactly one deployment per test class is instrumented. Its agent is
//! rebuilt with a manifest naming the deployment's package, signed with the
//! same key as the deployment, installed, started through `am instrument` and
//! reached over a forwarded TCP port.

mod agent;
mod deployment;
mod orchestrator;
mod probe;
mod template;

pub use agent::AgentBuilder;
pub use deployment::{Deployment, DeploymentDeclaration, DeploymentPlan, MIN_PORT, validate_port};
pub use orchestrator::{Instrumentation, InstrumentationOrchestrator};
pub use probe::{HttpStatusProbe, ReadinessProbe};
pub use template::{AgentIdentity, BUILTIN_MANIFEST, ManifestTemplate};
