//! Deployment declarations and the choice of which one is instrumented.

use crate::core::error::{Error, Result};
use std::collections::HashSet;
use std::path::PathBuf;

/// Lowest port an instrumentation agent may listen on.
pub const MIN_PORT: u16 = 1024;

/// Reject ports outside 1024..=65535.
pub fn validate_port(port: u16) -> Result<()> {
    if port < MIN_PORT {
        return Err(Error::InvalidConfig {
            field: "instrumentation.port".to_string(),
            value: port.to_string(),
        });
    }
    Ok(())
}

/// A package a test class asks to have installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentDeclaration {
    /// Logical name, unique per test class.
    pub name: String,
    /// The APK as built, possibly signed with another key.
    pub archive: PathBuf,
    /// Explicitly marked as the package to instrument.
    pub instrumented: bool,
    /// Base package, read from the APK when unset.
    pub package: Option<String>,
    /// Activity the agent starts, read from the APK when unset.
    pub activity: Option<String>,
    /// Agent port for this deployment, the configured default when unset.
    pub port: Option<u16>,
}

impl DeploymentDeclaration {
    pub fn new(name: impl Into<String>, archive: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            archive: archive.into(),
            instrumented: false,
            package: None,
            activity: None,
            port: None,
        }
    }

    pub fn instrumented(mut self) -> Self {
        self.instrumented = true;
        self
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    pub fn with_activity(mut self, activity: impl Into<String>) -> Self {
        self.activity = Some(activity.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

/// The validated deployments of one test class.
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    declarations: Vec<DeploymentDeclaration>,
    instrumented: Option<usize>,
}

impl DeploymentPlan {
    /// Validate `declarations` before anything touches a device.
    ///
    /// A single declaration is instrumented implicitly. With several, exactly
    /// one must be marked. Names must be unique, and so must explicit ports.
    pub fn new(declarations: Vec<DeploymentDeclaration>) -> Result<Self> {
        let mut names = HashSet::new();
        let mut ports = HashSet::new();
        for declaration in &declarations {
            if !names.insert(declaration.name.as_str()) {
                return Err(Error::InvalidConfig {
                    field: "deployment.name".to_string(),
                    value: declaration.name.clone(),
                });
            }
            if let Some(port) = declaration.port {
                validate_port(port)?;
                if !ports.insert(port) {
                    return Err(Error::InvalidConfig {
                        field: format!("deployment.{}.port", declaration.name),
                        value: port.to_string(),
                    });
                }
            }
        }

        let instrumented = match declarations.len() {
            0 => None,
            1 => Some(0),
            _ => {
                let marked: Vec<usize> = declarations
                    .iter()
                    .enumerate()
                    .filter(|(_, d)| d.instrumented)
                    .map(|(i, _)| i)
                    .collect();
                match marked.as_slice() {
                    [only] => Some(*only),
                    [] => {
                        return Err(Error::Config(
                            "several deployments declared but none is marked for instrumentation".to_string(),
                        ));
                    }
                    many => {
                        let names: Vec<&str> = many.iter().map(|&i| declarations[i].name.as_str()).collect();
                        return Err(Error::InvalidConfig {
                            field: "deployment.instrumented".to_string(),
                            value: names.join(", "),
                        });
                    }
                }
            }
        };

        Ok(Self {
            declarations,
            instrumented,
        })
    }

    pub fn declarations(&self) -> &[DeploymentDeclaration] {
        &self.declarations
    }

    /// The declaration to instrument, if any deployment exists.
    pub fn instrumented(&self) -> Option<&DeploymentDeclaration> {
        self.instrumented.map(|i| &self.declarations[i])
    }

    pub fn is_instrumented(&self, name: &str) -> bool {
        self.instrumented().is_some_and(|d| d.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&DeploymentDeclaration> {
        self.declarations.iter().find(|d| d.name == name)
    }
}

/// A package that has been prepared for installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub name: String,
    pub archive: PathBuf,
    /// Signature-free copy of the archive.
    pub exported: PathBuf,
    pub resigned: PathBuf,
    pub package: String,
    pub activity: Option<String>,
    pub instrumented: bool,
    pub port: Option<u16>,
}
