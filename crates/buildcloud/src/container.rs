//! Running cloud-weather-report inside a disposable container.
//!
//! The host side of a run is a [`Workspace`]; the container side is the fixed
//! [`ContainerPaths`] layout baked into the `seman/cwrbox` image. A run pulls
//! the image, runs `cwr` against the bind-mounted workspace, hands ownership of
//! everything back to the invoking user and optionally copies the results out.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};

use crate::build_cloud::RunParameters;
use crate::error::{Error, Result};
use crate::fsutil;
use crate::process::{Exec, Invocation};
use crate::workspace::{HostPaths, Workspace};

/// The image providing `cwr` and juju.
pub const IMAGE: &str = "seman/cwrbox";

/// Unprivileged user inside the image.
pub const USER: &str = "ubuntu";

/// Container-side paths. A naming convention of the image; never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerPaths {
    pub image: String,
    pub user: String,
    pub home: Utf8PathBuf,
    pub juju_home: Utf8PathBuf,
    pub ssh_home: Utf8PathBuf,
    pub test_results: Utf8PathBuf,
    pub repository: Utf8PathBuf,
    pub test_plans: Utf8PathBuf,
}

impl Default for ContainerPaths {
    fn default() -> Self {
        let home = Utf8Path::new("/home").join(USER);
        Self {
            image: IMAGE.to_owned(),
            user: USER.to_owned(),
            juju_home: home.join(".juju"),
            ssh_home: home.join(".ssh"),
            test_results: home.join("results"),
            repository: home.join("charm-repo"),
            test_plans: home.join("test_plans"),
            home,
        }
    }
}

/// A bind mount of a host path into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: Utf8PathBuf,
    pub container: Utf8PathBuf,
}

impl Mount {
    fn new(host: impl Into<Utf8PathBuf>, container: impl Into<Utf8PathBuf>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
        }
    }
}

impl fmt::Display for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.container)
    }
}

/// The ordered volume mounts for a run.
///
/// The scratch directory appears twice: below the container credentials
/// home and at its own host path.
pub fn mounts(host: &HostPaths, container: &ContainerPaths, test_plan: &Utf8Path) -> Vec<Mount> {
    let plan_dir = match test_plan.parent() {
        Some(p) if !p.as_str().is_empty() => p.to_owned(),
        _ => Utf8PathBuf::from("."),
    };
    vec![
        Mount::new(&host.test_results, &container.test_results),
        Mount::new(&host.juju_home, &container.juju_home),
        Mount::new(
            host.juju_home.join(".deployer-store-cache"),
            container.juju_home.join(".deployer-store-cache"),
        ),
        Mount::new(&host.repository, &container.repository),
        Mount::new(&host.tmp, container.juju_home.join("tmp")),
        Mount::new(&host.tmp, &host.tmp),
        Mount::new(plan_dir, &container.test_plans),
    ]
}

/// The container-side path of the test plan.
pub fn container_test_plan(container: &ContainerPaths, test_plan: &Utf8Path) -> Result<Utf8PathBuf> {
    let name = test_plan
        .file_name()
        .ok_or_else(|| Error::Config(format!("test plan {test_plan} has no file name")))?;
    Ok(container.test_plans.join(name))
}

/// The `cwr` command line run by `sh -c` inside the container, quoted as a
/// single shell string.
pub fn cwr_command(container: &ContainerPaths, params: &RunParameters) -> Result<String> {
    let plan = container_test_plan(container, &params.test_plan)?;
    let mut words = vec!["sudo", "cwr", "-F", "-l", "DEBUG", "-v"];
    if let Some(bundle) = params.bundle.as_deref() {
        words.extend(["--bundle-file", bundle]);
    }
    words.extend(params.models.iter().map(String::as_str));
    words.push(plan.as_str());
    shlex::try_join(words)
        .map_err(|e| Error::Config(format!("cannot quote cwr command line: {e}")))
}

fn host_command(params: &RunParameters, invocation: Invocation) -> Invocation {
    if params.sudo {
        invocation.wrapped_in("sudo")
    } else {
        invocation
    }
}

/// `docker pull <image>`
pub fn pull_invocation(params: &RunParameters, container: &ContainerPaths) -> Invocation {
    host_command(
        params,
        Invocation::new(&params.runtime).args(["pull", container.image.as_str()]),
    )
}

/// `docker run ... <image> sh -c '<cwr ...>'`
pub fn run_invocation(
    params: &RunParameters,
    host: &HostPaths,
    container: &ContainerPaths,
) -> Result<Invocation> {
    let mut r = Invocation::new(&params.runtime).args([
        "run",
        "--rm",
        "-u",
        container.user.as_str(),
        "-e",
        &format!("HOME={}", container.home),
        "-e",
        &format!("JUJU_HOME={}", container.juju_home),
        "-w",
        container.home.as_str(),
    ]);
    if let Some(net) = params.network.as_deref() {
        r = r.arg(format!("--net={net}"));
    }
    for (k, v) in params.container_env() {
        r = r.args(["-e".to_owned(), format!("{k}={v}")]);
    }
    for m in mounts(host, container, &params.test_plan) {
        r = r.args(["-v".to_owned(), m.to_string()]);
    }
    r = r
        .args(["-t", container.image.as_str(), "sh", "-c"])
        .arg(cwr_command(container, params)?);
    Ok(host_command(params, r))
}

/// `chown -R uid:gid <root>`, returning the tree to the invoking user.
pub fn chown_invocation(params: &RunParameters, root: &Utf8Path, uid: u32, gid: u32) -> Invocation {
    host_command(
        params,
        Invocation::new("chown").args(["-R".to_owned(), format!("{uid}:{gid}"), root.to_string()]),
    )
}

/// Progress of a single container run. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    NotStarted,
    ImagePulled,
    ContainerRan,
    OwnershipFixed,
    LogsCopied,
    Skipped,
    Done,
}

impl Stage {
    fn advance(&mut self, next: Stage) {
        debug!("Container run: {self:?} -> {next:?}");
        *self = next;
    }
}

/// Pull, run, reconcile ownership and copy logs.
///
/// Any command failure aborts at the current stage. On success returns
/// whether the logs were copied ([`Stage::LogsCopied`]) or not
/// ([`Stage::Skipped`]).
pub fn run_container(
    exec: &dyn Exec,
    workspace: &Workspace,
    container: &ContainerPaths,
    params: &RunParameters,
) -> Result<Stage> {
    let host = workspace.host();
    debug!("Host data: {host:?}");
    debug!("Container data: {container:?}");

    let mut stage = Stage::NotStarted;
    exec.exec(&pull_invocation(params, container))?;
    stage.advance(Stage::ImagePulled);

    exec.exec(&run_invocation(params, host, container)?)?;
    stage.advance(Stage::ContainerRan);

    let uid = rustix::process::getuid().as_raw();
    let gid = rustix::process::getgid().as_raw();
    exec.exec(&chown_invocation(params, &host.root, uid, gid))?;
    stage.advance(Stage::OwnershipFixed);

    let outcome = match params.log_dir.as_deref() {
        Some(log_dir) => {
            info!("Copying results to {log_dir}");
            fsutil::copytree_force(&host.test_results, log_dir, None)?;
            Stage::LogsCopied
        }
        None => Stage::Skipped,
    };
    stage.advance(outcome);
    stage.advance(Stage::Done);
    Ok(outcome)
}
