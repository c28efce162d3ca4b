//! Test plans and the job parameters derived from them.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;
use yaml_rust2::{Yaml, YamlLoader};

use crate::error::{Error, Result};

/// Only files with this suffix are treated as test plans.
pub const PLAN_EXTENSION: &str = ".yaml";

/// Parameters for one scheduled `cwr-test` job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobParameters {
    pub test_plan: Utf8PathBuf,
    pub controllers: Vec<String>,
    pub bundle_name: Option<String>,
    pub bundle_file: Option<String>,
}

impl JobParameters {
    /// The key/value pairs submitted to the job server. Empty values are
    /// left out entirely rather than sent as empty strings.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let controllers = (!self.controllers.is_empty()).then(|| self.controllers.join(" "));
        [
            ("test_plan", Some(self.test_plan.to_string())),
            ("controllers", controllers),
            ("bundle_name", self.bundle_name.clone()),
            ("bundle_file", self.bundle_file.clone()),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.filter(|v| !v.is_empty()).map(|v| (k, v)))
        .collect()
    }
}

fn scalar(v: &Yaml) -> Option<String> {
    let s = match v {
        Yaml::String(s) | Yaml::Real(s) => s.clone(),
        Yaml::Integer(i) => i.to_string(),
        Yaml::Boolean(b) => b.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

/// Extract job parameters from the text of a test plan.
pub fn parse_plan(path: &Utf8Path, contents: &str, controllers: &[String]) -> Result<JobParameters> {
    let plan_error = |message: String| Error::Plan {
        path: path.to_owned(),
        message,
    };
    let docs = YamlLoader::load_from_str(contents).map_err(|e| plan_error(e.to_string()))?;
    let doc = docs
        .into_iter()
        .next()
        .ok_or_else(|| plan_error("empty document".into()))?;
    if doc.as_hash().is_none() {
        return Err(plan_error("expected a mapping".into()));
    }
    Ok(JobParameters {
        test_plan: path.to_owned(),
        controllers: controllers.iter().filter(|c| !c.is_empty()).cloned().collect(),
        bundle_name: scalar(&doc["bundle_name"]),
        bundle_file: scalar(&doc["bundle_file"]),
    })
}

/// Read a test plan from disk and extract its job parameters.
pub fn make_parameters(path: &Utf8Path, controllers: &[String]) -> Result<JobParameters> {
    let contents = fs::read_to_string(path).map_err(Error::io(format!("reading {path}")))?;
    parse_plan(path, &contents, controllers)
}

/// The test plan files to schedule: `explicit` names when given, otherwise
/// every entry of `dir`. Names without the plan extension are skipped.
pub fn plan_files(dir: &Utf8Path, explicit: Option<&[String]>) -> Result<Vec<Utf8PathBuf>> {
    let names = match explicit {
        Some(names) => names.to_vec(),
        None => {
            let mut names = dir
                .read_dir_utf8()
                .map_err(Error::io(format!("reading directory {dir}")))?
                .map(|e| e.map(|e| e.file_name().to_owned()))
                .collect::<std::io::Result<Vec<_>>>()
                .map_err(Error::io(format!("reading directory {dir}")))?;
            // Listing order is filesystem dependent
            names.sort();
            names
        }
    };
    Ok(names
        .into_iter()
        .filter(|n| {
            let keep = n.ends_with(PLAN_EXTENSION);
            if !keep {
                debug!("Skipping {n}");
            }
            keep
        })
        .map(|n| dir.join(n))
        .collect())
}

/// One [`JobParameters`] per test plan.
pub fn make_jobs(
    dir: &Utf8Path,
    explicit: Option<&[String]>,
    controllers: &[String],
) -> Result<Vec<JobParameters>> {
    plan_files(dir, explicit)?
        .iter()
        .map(|p| make_parameters(p, controllers))
        .collect()
}
