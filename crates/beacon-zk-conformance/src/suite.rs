//! Conformance suite runner.
//!
//! Every module is checked in its own task: a positive vector must be accepted and its
//! tampered counterpart rejected. A failure, error or panic in one module is reported for
//! that module only.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::modules::CircuitModule;
use crate::vectors::{tampered, write_case, ModuleVectors, TestVector};
use crate::ConformanceError;

/// Something that can tell whether a circuit maps a vector's input to its output
#[async_trait]
pub trait CircuitChecker: Send + Sync {
    async fn check(&self, vector: &TestVector) -> Result<bool, ConformanceError>;
}

/// Checks vectors against the native reference models
#[derive(Debug, Default, Clone)]
pub struct NativeChecker;

#[async_trait]
impl CircuitChecker for NativeChecker {
    async fn check(&self, vector: &TestVector) -> Result<bool, ConformanceError> {
        match vector.module.evaluate(&vector.input) {
            Ok(output) => Ok(output == vector.output),
            // The circuit would be unsatisfiable for an input the model refuses
            Err(ConformanceError::InvalidInput(reason)) => {
                debug!("{}/{}: input refused: {}", vector.module, vector.case, reason);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}

/// Runs an external circuit tester per vector.
///
/// The template is run through `sh -c` after substituting `{module}`, `{input}`,
/// `{output}` and `{case_dir}`; exit status 0 means the circuit accepted the vector.
#[derive(Debug, Clone)]
pub struct CommandChecker {
    template: String,
    timeout: Duration,
}

impl CommandChecker {
    pub fn new(template: String, timeout: Duration) -> Self {
        Self { template, timeout }
    }

    fn render(&self, module: CircuitModule, case_dir: &Path) -> String {
        let path = |name: &str| case_dir.join(name).display().to_string();
        self.template
            .replace("{module}", module.name())
            .replace("{input}", &path("input.json"))
            .replace("{output}", &path("output.json"))
            .replace("{case_dir}", &case_dir.display().to_string())
    }
}

#[async_trait]
impl CircuitChecker for CommandChecker {
    async fn check(&self, vector: &TestVector) -> Result<bool, ConformanceError> {
        let scratch = tempfile::tempdir()?;
        let case_dir = scratch.path().join(&vector.case);
        write_case(&case_dir, vector)?;

        let command = self.render(vector.module, &case_dir);
        debug!("Running checker: {}", command);
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| ConformanceError::Command(format!("{command}: {err}")))?;

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => Ok(status?.success()),
            Err(_) => Err(ConformanceError::Timeout(self.timeout)),
        }
    }
}

/// Outcome of one module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleReport {
    pub module: CircuitModule,
    pub passed: bool,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SuiteReport {
    pub modules: Vec<ModuleReport>,
}

impl SuiteReport {
    pub fn all_passed(&self) -> bool {
        !self.modules.is_empty() && self.modules.iter().all(|report| report.passed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &ModuleReport> {
        self.modules.iter().filter(|report| !report.passed)
    }

    pub fn get(&self, module: CircuitModule) -> Option<&ModuleReport> {
        self.modules.iter().find(|report| report.module == module)
    }
}

async fn check_module(
    checker: Arc<dyn CircuitChecker>,
    vectors: Result<Vec<TestVector>, ConformanceError>,
) -> Result<(), String> {
    let vectors = vectors.map_err(|err| err.to_string())?;
    if vectors.is_empty() {
        return Err("no test vectors".to_string());
    }
    for vector in &vectors {
        match checker.check(vector).await {
            Ok(true) => {}
            Ok(false) => return Err(format!("case {} rejected", vector.case)),
            Err(err) => return Err(format!("case {}: {}", vector.case, err)),
        }
        let negative = tampered(vector).map_err(|err| err.to_string())?;
        match checker.check(&negative).await {
            Ok(false) => {}
            Ok(true) => return Err(format!("tampered case {} accepted", negative.case)),
            Err(err) => return Err(format!("case {}: {}", negative.case, err)),
        }
    }
    Ok(())
}

/// Check every module concurrently and collect one report per module, in input order
pub async fn run_suite(
    checker: Arc<dyn CircuitChecker>,
    vectors: ModuleVectors,
) -> SuiteReport {
    let handles: Vec<_> = vectors
        .into_iter()
        .map(|(module, vectors)| {
            let checker = checker.clone();
            (module, tokio::spawn(check_module(checker, vectors)))
        })
        .collect();

    let mut report = SuiteReport::default();
    for (module, handle) in handles {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(err) if err.is_panic() => Err("checker panicked".to_string()),
            Err(err) => Err(err.to_string()),
        };
        match outcome {
            Ok(()) => {
                info!("{} is okay", module);
                report.modules.push(ModuleReport {
                    module,
                    passed: true,
                    detail: None,
                });
            }
            Err(detail) => {
                error!("{} failed: {}", module, detail);
                report.modules.push(ModuleReport {
                    module,
                    passed: false,
                    detail: Some(detail),
                });
            }
        }
    }
    report
}
