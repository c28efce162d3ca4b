//! Per-run working directory on the invoking host.
//!
//! A [`Workspace`] owns a scoped temporary root and the [`HostPaths`] inside
//! it. The paths can only be reached by borrowing the workspace, so nothing
//! can refer to them after the root has been removed.

use std::fs;
use std::os::unix::fs::PermissionsExt;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;
use tracing::debug;

use crate::error::{Error, Result};
use crate::fsutil;

/// Name of the staged deployment key inside the credentials home.
pub const STAGING_KEY: &str = "staging-juju-rsa";

/// Credentials-home entries that are never copied into a run.
pub const EXCLUDED_ENTRY: &str = "environments";

/// Host-side directories participating in a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    /// The scoped temporary root everything else lives in
    pub root: Utf8PathBuf,
    /// Copy of the credentials home
    pub juju_home: Utf8PathBuf,
    /// Initially empty charm repository
    pub repository: Utf8PathBuf,
    /// Initially empty results directory
    pub test_results: Utf8PathBuf,
    /// Scratch space
    pub tmp: Utf8PathBuf,
    /// Holds the staged private key as `id_rsa`
    pub ssh: Utf8PathBuf,
}

impl HostPaths {
    /// The directory layout below `root`. Nothing is created.
    pub fn under(root: &Utf8Path) -> Self {
        let tmp = root.join("tmp");
        Self {
            root: root.to_owned(),
            juju_home: root.join("tmp_juju_home"),
            repository: root.join("juju_repository"),
            test_results: root.join("results"),
            ssh: tmp.join("ssh"),
            tmp,
        }
    }
}

/// A prepared per-run directory tree, removed on drop.
#[derive(Debug)]
pub struct Workspace {
    host: HostPaths,
    _root: TempDir,
}

impl Workspace {
    /// Build a fresh working tree from the credentials home at `juju_home`.
    ///
    /// `parent` selects where the temporary root is created (the system
    /// temporary directory by default).
    pub fn prepare(juju_home: &Utf8Path, parent: Option<&Utf8Path>) -> Result<Self> {
        if !juju_home.is_dir() {
            return Err(Error::resource(
                juju_home,
                "credentials home directory does not exist",
            ));
        }
        let key = juju_home.join(STAGING_KEY);
        if !key.is_file() {
            return Err(Error::resource(key, "staging key not found"));
        }

        let td = fsutil::temp_dir(parent)?;
        let root = fsutil::temp_path(&td)?;
        let host = HostPaths::under(root);
        debug!("Preparing workspace in {root}");

        fsutil::copy_tree(juju_home, &host.juju_home, &|name| name == EXCLUDED_ENTRY)
            .map_err(|e| Error::resource(&host.juju_home, e))?;
        for dir in [&host.repository, &host.test_results, &host.tmp, &host.ssh] {
            fsutil::ensure_dir(dir, None).map_err(|e| Error::resource(dir, e))?;
        }

        let staged = host.ssh.join("id_rsa");
        fs::copy(host.juju_home.join(STAGING_KEY), &staged)
            .and_then(|_| fs::set_permissions(&staged, fs::Permissions::from_mode(0o600)))
            .map_err(|e| Error::resource(&staged, e))?;

        Ok(Self { host, _root: td })
    }

    pub fn host(&self) -> &HostPaths {
        &self.host
    }
}
