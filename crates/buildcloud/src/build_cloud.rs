//! The `build-cloud` workflow: prepare a workspace, bootstrap the requested
//! juju environments, run cloud-weather-report in a container, tear down.

use std::ffi::{OsStr, OsString};

use camino::{Utf8Path, Utf8PathBuf};
use clap::{ArgAction, Parser};
use tracing::{info, instrument};

use crate::container::{self, ContainerPaths, Stage};
use crate::error::{Error, Result};
use crate::juju::{self, Juju};
use crate::process::Exec;
use crate::workspace::Workspace;

/// Models that can only be reached with host networking.
pub const HOST_NETWORK_MODELS: [&str; 2] = ["lxd", "localhost"];

/// Credentials home used when neither `--juju-home` nor `JUJU_HOME` is set,
/// relative to `$HOME`.
pub const DEFAULT_JUJU_HOME: &str = "cloud-city";

/// Run cloud-weather-report tests against juju models inside a container.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[clap(name = "build-cloud", version)]
pub struct BuildCloudOpts {
    /// Name of models to use
    #[clap(required = true)]
    pub model: Vec<String>,

    /// File path to test plan
    pub test_plan: Utf8PathBuf,

    /// Name of bundle file to deploy, if url points to a bundle containing
    /// multiple bundle files
    #[clap(long, env = "bundle")]
    pub bundle_args: Option<String>,

    /// Increase logging; may be repeated
    #[clap(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Juju home directory (defaults to $HOME/cloud-city)
    #[clap(long, env = "JUJU_HOME")]
    pub juju_home: Option<Utf8PathBuf>,

    /// The directory to dump logs to
    #[clap(long)]
    pub log_dir: Option<Utf8PathBuf>,

    /// Container network mode (defaults to host for lxd and localhost models)
    #[clap(long)]
    pub network: Option<String>,

    /// Identifier of the CI job driving this run
    #[clap(long, env = "job_id")]
    pub job_id: Option<String>,

    /// Free-form configuration string passed to the container
    #[clap(long, env = "config")]
    pub config: Option<String>,

    /// Version control identity passed to the container
    #[clap(long, env = "vcs_user")]
    pub vcs_user: Option<String>,

    /// Container runtime binary
    #[clap(long, default_value = "docker")]
    pub runtime: String,

    /// Juju binary
    #[clap(long, default_value = "juju")]
    pub juju: String,

    /// Do not wrap container and ownership commands in sudo
    #[clap(long)]
    pub no_sudo: bool,

    /// Directory in which to create the per-run temporary root
    #[clap(long)]
    pub tmpdir: Option<Utf8PathBuf>,
}

/// Fully resolved parameters for one run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunParameters {
    pub models: Vec<String>,
    pub test_plan: Utf8PathBuf,
    pub bundle: Option<String>,
    pub verbose: u8,
    pub juju_home: Utf8PathBuf,
    pub log_dir: Option<Utf8PathBuf>,
    pub network: Option<String>,
    pub job_id: Option<String>,
    pub config: Option<String>,
    pub vcs_user: Option<String>,
    pub runtime: String,
    pub juju: String,
    pub sudo: bool,
    pub tmpdir: Option<Utf8PathBuf>,
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.is_empty())
}

/// The network mode for `models`: an explicit choice wins, otherwise host
/// networking when any model needs it.
pub fn default_network(models: &[String], explicit: Option<String>) -> Option<String> {
    non_empty(explicit).or_else(|| {
        models
            .iter()
            .any(|m| HOST_NETWORK_MODELS.contains(&m.as_str()))
            .then(|| "host".to_owned())
    })
}

/// The credentials home: explicit value, else `$HOME/cloud-city`.
pub fn resolve_juju_home(explicit: Option<Utf8PathBuf>, home: Option<&Utf8Path>) -> Result<Utf8PathBuf> {
    if let Some(p) = explicit.filter(|p| !p.as_str().is_empty()) {
        return Ok(p);
    }
    home.map(|h| h.join(DEFAULT_JUJU_HOME))
        .ok_or_else(|| Error::Config("cannot determine juju home: set --juju-home or HOME".into()))
}

/// The invoking user's home directory, if it is valid UTF-8.
pub fn user_home() -> Option<Utf8PathBuf> {
    dirs::home_dir().and_then(|p| Utf8PathBuf::from_path_buf(p).ok())
}

impl BuildCloudOpts {
    /// Derive the run parameters. Pure: the same options and `home` always
    /// give the same result.
    pub fn resolve(self, home: Option<&Utf8Path>) -> Result<RunParameters> {
        let juju_home = resolve_juju_home(self.juju_home, home)?;
        let network = default_network(&self.model, self.network);
        Ok(RunParameters {
            models: self.model,
            test_plan: self.test_plan,
            bundle: non_empty(self.bundle_args),
            verbose: self.verbose,
            juju_home,
            log_dir: self.log_dir,
            network,
            job_id: non_empty(self.job_id),
            config: non_empty(self.config),
            vcs_user: non_empty(self.vcs_user),
            runtime: self.runtime,
            juju: self.juju,
            sudo: !self.no_sudo,
            tmpdir: self.tmpdir,
        })
    }
}

impl RunParameters {
    /// Extra environment forwarded into the container.
    pub fn container_env(&self) -> Vec<(&'static str, &str)> {
        [
            ("JOB_ID", self.job_id.as_deref()),
            ("CWR_CONFIG", self.config.as_deref()),
            ("VCS_USER", self.vcs_user.as_deref()),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k, v)))
        .collect()
    }
}

/// Map the verbosity count to a log level: warn, info, then debug.
pub fn log_level(verbose: u8) -> tracing::Level {
    match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    }
}

/// Sets an environment variable for the lifetime of the guard and restores
/// the previous value (or its absence) when dropped.
#[derive(Debug)]
pub struct ScopedEnv {
    key: &'static str,
    prior: Option<OsString>,
}

impl ScopedEnv {
    pub fn set(key: &'static str, value: impl AsRef<OsStr>) -> Self {
        let prior = std::env::var_os(key);
        std::env::set_var(key, value);
        Self { key, prior }
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        match self.prior.take() {
            Some(v) => std::env::set_var(self.key, v),
            None => std::env::remove_var(self.key),
        }
    }
}

/// Bootstrap, run the container, tear down. All state is passed explicitly.
pub fn execute(exec: &dyn Exec, workspace: &Workspace, params: &RunParameters) -> Result<Stage> {
    let container = ContainerPaths::default();
    let juju = Juju::new(&params.juju, &workspace.host().juju_home);
    juju::with_models(exec, &juju, &params.models, || {
        container::run_container(exec, workspace, &container, params)
    })
}

/// Resolve the test plan and build the per-run workspace.
///
/// Nothing process-wide is touched; the caller decides whether to point
/// `JUJU_HOME` at the workspace copy (see [`ScopedEnv`]).
#[instrument(skip_all)]
pub fn prepare(mut params: RunParameters) -> Result<(Workspace, RunParameters)> {
    params.test_plan = params
        .test_plan
        .canonicalize_utf8()
        .map_err(|e| Error::resource(&params.test_plan, e))?;
    let workspace = Workspace::prepare(&params.juju_home, params.tmpdir.as_deref())?;
    info!("Prepared workspace {}", workspace.host().root);
    Ok((workspace, params))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::testutil::{sample_params, RecordingExec};

    fn parse(args: &[&str]) -> BuildCloudOpts {
        BuildCloudOpts::try_parse_from(std::iter::once("build-cloud").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_parse_args() {
        let opts = parse(&["--juju-home", "/srv/juju", "cwr-model", "test-plan"]);
        assert_eq!(opts.model, ["cwr-model"]);
        assert_eq!(opts.test_plan, "test-plan");
        assert_eq!(opts.verbose, 0);
        assert_eq!(opts.log_dir, None);
        assert_eq!(opts.runtime, "docker");
        assert!(!opts.no_sudo);
    }

    #[test]
    fn test_parse_multiple_models() {
        let opts = parse(&["-vv", "--juju-home", "/srv/juju", "aws", "gce", "plan.yaml"]);
        assert_eq!(opts.model, ["aws", "gce"]);
        assert_eq!(opts.test_plan, "plan.yaml");
        assert_eq!(opts.verbose, 2);
    }

    #[test]
    fn test_parse_requires_model_and_plan() {
        assert!(BuildCloudOpts::try_parse_from(["build-cloud", "plan.yaml"]).is_err());
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let args = ["--juju-home", "/srv/juju", "--log-dir", "/srv/logs", "aws", "p.yaml"];
        let home = Some(Utf8Path::new("/home/u"));
        let a = parse(&args).resolve(home).unwrap();
        let b = parse(&args).resolve(home).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.juju_home, "/srv/juju");
        assert_eq!(a.log_dir.as_deref(), Some(Utf8Path::new("/srv/logs")));
        assert!(a.sudo);
    }

    #[test]
    fn test_resolve_juju_home_default() {
        let home = Utf8Path::new("/tmp/home");
        assert_eq!(resolve_juju_home(None, Some(home)).unwrap(), "/tmp/home/cloud-city");
        assert_eq!(
            resolve_juju_home(Some("/x".into()), Some(home)).unwrap(),
            "/x"
        );
        assert_eq!(
            resolve_juju_home(Some("".into()), Some(home)).unwrap(),
            "/tmp/home/cloud-city"
        );
        assert!(matches!(resolve_juju_home(None, None), Err(Error::Config(_))));
    }

    #[test]
    fn test_default_network() {
        let m = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(default_network(&m(&["lxd"]), None).as_deref(), Some("host"));
        assert_eq!(default_network(&m(&["localhost"]), None).as_deref(), Some("host"));
        assert_eq!(default_network(&m(&["aws"]), None), None);
        assert_eq!(
            default_network(&m(&["lxd"]), Some("bridge".into())).as_deref(),
            Some("bridge")
        );
        assert_eq!(
            default_network(&m(&["aws"]), Some("none".into())).as_deref(),
            Some("none")
        );
    }

    #[test]
    fn test_container_env() {
        let mut p = sample_params();
        assert!(p.container_env().is_empty());
        p.job_id = Some("17".into());
        p.vcs_user = Some("octo".into());
        assert_eq!(p.container_env(), [("JOB_ID", "17"), ("VCS_USER", "octo")]);
    }

    #[test]
    fn test_empty_values_are_unset() {
        let mut opts = parse(&["--juju-home", "/j", "--bundle-args", "", "aws", "p.yaml"]);
        opts.job_id = Some(String::new());
        let p = opts.resolve(None).unwrap();
        assert_eq!(p.bundle, None);
        assert_eq!(p.job_id, None);
    }

    #[test]
    fn test_log_level() {
        assert_eq!(log_level(0), tracing::Level::WARN);
        assert_eq!(log_level(1), tracing::Level::INFO);
        assert_eq!(log_level(2), tracing::Level::DEBUG);
        assert_eq!(log_level(9), tracing::Level::DEBUG);
    }

    #[test]
    fn test_scoped_env_restores() {
        const KEY: &str = "BUILDCLOUD_TEST_SCOPED_ENV";
        std::env::remove_var(KEY);
        {
            let _g = ScopedEnv::set(KEY, "inner");
            assert_eq!(std::env::var(KEY).unwrap(), "inner");
        }
        assert!(std::env::var_os(KEY).is_none());

        std::env::set_var(KEY, "outer");
        let r = std::panic::catch_unwind(|| {
            let _g = ScopedEnv::set(KEY, "inner");
            panic!("fail inside scope");
        });
        assert!(r.is_err());
        assert_eq!(std::env::var(KEY).unwrap(), "outer");
        std::env::remove_var(KEY);
    }

    #[test]
    fn test_execute_end_to_end() {
        let (_td, ws, mut params) = crate::testutil::workspace();
        params.models = vec!["aws".into(), "lxd".into()];
        let exec = RecordingExec::default();
        let stage = execute(&exec, &ws, &params).unwrap();
        assert_eq!(stage, Stage::Skipped);
        let lines = exec.lines();
        assert_eq!(lines.first().map(String::as_str), Some("juju --version"));
        let run = lines.iter().position(|l| l.starts_with("sudo docker run")).unwrap();
        let chown = lines.iter().position(|l| l.starts_with("sudo chown")).unwrap();
        let destroy = lines.iter().position(|l| l.contains("destroy-environment")).unwrap();
        assert!(run < chown && chown < destroy);
        assert_eq!(
            lines.iter().filter(|l| l.contains("destroy-environment")).count(),
            2
        );
        assert!(fs::metadata(&ws.host().juju_home).unwrap().is_dir());
    }

    #[test]
    fn test_prepare_missing_test_plan() {
        let mut params = sample_params();
        params.test_plan = "/nonexistent/plan.yaml".into();
        let r = prepare(params);
        assert!(matches!(r, Err(Error::Resource { .. })));
    }

    #[test]
    fn test_prepare_and_execute_leave_environment_alone() {
        let (_td, _ws, mut params) = crate::testutil::workspace();
        let plan = params.tmpdir.as_ref().unwrap().join("plan.yaml");
        fs::write(&plan, "bundle_name: x\n").unwrap();
        params.test_plan = plan;
        let before = std::env::var_os("JUJU_HOME");

        let (ws, params) = prepare(params).unwrap();
        let exec = RecordingExec::default();
        execute(&exec, &ws, &params).unwrap();

        assert_eq!(std::env::var_os("JUJU_HOME"), before);
        let home = ws.host().juju_home.to_string();
        let calls = exec.calls();
        let bootstrap = calls
            .iter()
            .find(|i| i.argv().first().map(String::as_str) == Some("bootstrap"))
            .unwrap();
        assert_eq!(bootstrap.envs(), [("JUJU_HOME".to_owned(), home)]);
    }
}
