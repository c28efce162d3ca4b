//! Bringing juju environments up before a run and tearing them down after.

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::process::{Exec, Invocation};

/// Memory constraint used while bootstrapping.
pub const BOOTSTRAP_CONSTRAINTS: &str = "mem=4G";

/// Default constraint applied to every environment after bootstrap.
pub const DEFAULT_CONSTRAINTS: &str = "mem=2G";

/// Builds juju invocations bound to one credentials home.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Juju {
    bin: String,
    home: Utf8PathBuf,
}

impl Juju {
    pub fn new(bin: impl Into<String>, home: &Utf8Path) -> Self {
        Self {
            bin: bin.into(),
            home: home.to_owned(),
        }
    }

    fn command(&self) -> Invocation {
        Invocation::new(&self.bin).env("JUJU_HOME", self.home.as_str())
    }

    pub fn version(&self) -> Invocation {
        self.command().arg("--version")
    }

    pub fn bootstrap(&self, model: &str) -> Invocation {
        self.command().args([
            "bootstrap",
            "--show-log",
            "-e",
            model,
            "--constraints",
            BOOTSTRAP_CONSTRAINTS,
        ])
    }

    pub fn set_constraints(&self, model: &str) -> Invocation {
        self.command()
            .args(["set-constraints", "-e", model, DEFAULT_CONSTRAINTS])
    }

    pub fn destroy(&self, model: &str) -> Invocation {
        self.command()
            .args(["destroy-environment", "--force", "--yes", model])
    }
}

/// Run a cleanup action; a failure is logged and otherwise ignored.
pub fn best_effort<F>(what: &str, f: F)
where
    F: FnOnce() -> Result<()>,
{
    if let Err(e) = f() {
        warn!("{what} failed (ignored): {e}");
    }
}

fn bring_up(exec: &dyn Exec, juju: &Juju, model: &str) -> Result<()> {
    exec.exec(&juju.bootstrap(model))?;
    exec.exec(&juju.set_constraints(model))
}

/// Bootstrap every model, run `body`, then destroy them again.
///
/// Every model whose bootstrap was attempted is destroyed exactly once,
/// whether bootstrap, `body`, or nothing failed. Teardown failures never
/// replace the error from bootstrap or `body`.
pub fn with_models<T, F>(exec: &dyn Exec, juju: &Juju, models: &[String], body: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let version = exec.capture(&juju.version())?;
    info!("Using juju {}", version.trim());
    info!("Juju home is set to {}", juju.home);

    let mut attempted = Vec::with_capacity(models.len());
    let mut brought_up = Ok(());
    for model in models {
        attempted.push(model.as_str());
        if let Err(e) = bring_up(exec, juju, model) {
            brought_up = Err(Error::Bootstrap {
                model: model.clone(),
                source: Box::new(e),
            });
            break;
        }
    }

    let r = brought_up.and_then(|()| body());
    for model in attempted {
        best_effort(&format!("Destroying environment {model}"), || {
            exec.exec(&juju.destroy(model))
        });
    }
    r
}
