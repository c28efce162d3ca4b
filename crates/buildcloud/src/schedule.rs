//! The `schedule-cwr-jobs` workflow: one Jenkins job per test plan.

use camino::Utf8PathBuf;
use clap::{ArgAction, Parser, ValueEnum};
use itertools::Itertools;
use tracing::{info, instrument, warn};

use crate::error::{Error, Result};
use crate::jenkins::{Credentials, JobServer, JOB_NAME};
use crate::plan::{self, JobParameters};

/// What to do when one submission fails.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmitPolicy {
    /// Stop at the first failed submission.
    #[default]
    FailFast,
    /// Attempt every job and report the failures at the end.
    Continue,
}

/// Schedule cloud-weather-report test jobs on Jenkins.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[clap(name = "schedule-cwr-jobs", version)]
pub struct ScheduleOpts {
    /// Directory containing the test plans
    pub test_plan_dir: Utf8PathBuf,

    /// Controllers to run each test plan against
    #[clap(required = true)]
    pub controllers: Vec<String>,

    /// Jenkins user name
    #[clap(long, env = "JENKINS_USER")]
    pub user: Option<String>,

    /// Jenkins password
    #[clap(long, env = "JENKINS_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Token used to trigger the cwr-test job remotely
    #[clap(long, env = "CWR_TEST_TOKEN", hide_env_values = true)]
    pub cwr_test_token: Option<String>,

    /// Only schedule these plan files from the test plan directory
    #[clap(long, alias = "test_plans", num_args = 1..)]
    pub test_plans: Option<Vec<String>>,

    /// Behavior when a job submission fails
    #[clap(long, value_enum, default_value_t)]
    pub on_failure: SubmitPolicy,

    /// Increase logging; may be repeated
    #[clap(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

fn required<'a>(v: &'a Option<String>, what: &str) -> Option<&'a str> {
    let v = v.as_deref().filter(|s| !s.is_empty());
    if v.is_none() {
        warn!("No {what} configured");
    }
    v
}

/// Jenkins credentials from the options (which include their env fallbacks).
pub fn get_credentials(opts: &ScheduleOpts) -> Result<Credentials> {
    let user = required(&opts.user, "Jenkins user");
    let password = required(&opts.password, "Jenkins password");
    match (user, password) {
        (Some(user), Some(password)) => Ok(Credentials {
            user: user.to_owned(),
            password: password.to_owned(),
        }),
        _ => Err(Error::Config(
            "Jenkins credentials required: set --user/JENKINS_USER and --password/JENKINS_PASSWORD"
                .into(),
        )),
    }
}

/// The remote trigger token for the job.
pub fn token(opts: &ScheduleOpts) -> Result<&str> {
    required(&opts.cwr_test_token, "job token")
        .ok_or_else(|| Error::Config("job token required: set --cwr-test-token/CWR_TEST_TOKEN".into()))
}

/// Submit every job in order, returning how many were queued.
pub fn build_jobs(server: &dyn JobServer, jobs: &[JobParameters], policy: SubmitPolicy) -> Result<usize> {
    let mut failed = Vec::new();
    for job in jobs {
        info!("Scheduling {JOB_NAME} for {}", job.test_plan);
        if let Err(e) = server.build_job(JOB_NAME, &job.to_params()) {
            match policy {
                SubmitPolicy::FailFast => return Err(e),
                SubmitPolicy::Continue => {
                    warn!("Failed to schedule {}: {e}", job.test_plan);
                    failed.push(&job.test_plan);
                }
            }
        }
    }
    if !failed.is_empty() {
        return Err(Error::JobServer(format!(
            "{} of {} submissions failed: {}",
            failed.len(),
            jobs.len(),
            failed.iter().join(", ")
        )));
    }
    Ok(jobs.len())
}

/// Validate configuration, read every plan, then submit.
///
/// `connect` is only called once credentials, token and all plans are known
/// to be good.
#[instrument(skip_all)]
pub fn run<S, F>(opts: &ScheduleOpts, connect: F) -> Result<usize>
where
    S: JobServer,
    F: FnOnce(Credentials, String) -> Result<S>,
{
    let token = token(opts)?.to_owned();
    let credentials = get_credentials(opts)?;
    let jobs = plan::make_jobs(
        &opts.test_plan_dir,
        opts.test_plans.as_deref(),
        &opts.controllers,
    )?;
    if jobs.is_empty() {
        warn!("No test plans found in {}", opts.test_plan_dir);
    }
    let server = connect(credentials, token)?;
    let n = build_jobs(&server, &jobs, opts.on_failure)?;
    info!("Scheduled {n} jobs");
    Ok(n)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::fs;

    use super::*;
    use crate::fsutil;

    #[derive(Debug, Default)]
    struct FakeServer {
        submitted: RefCell<Vec<Vec<(&'static str, String)>>>,
        reject: Option<String>,
    }

    impl JobServer for FakeServer {
        fn build_job(&self, name: &str, params: &[(&'static str, String)]) -> Result<()> {
            assert_eq!(name, JOB_NAME);
            let rejected = self
                .reject
                .as_deref()
                .is_some_and(|r| params.iter().any(|(_, v)| v.ends_with(r)));
            self.submitted.borrow_mut().push(params.to_vec());
            if rejected {
                return Err(Error::JobServer("rejected".into()));
            }
            Ok(())
        }
    }

    fn parse(args: &[&str]) -> ScheduleOpts {
        ScheduleOpts::try_parse_from(std::iter::once("schedule-cwr-jobs").chain(args.iter().copied()))
            .unwrap()
    }

    fn plans_dir() -> (tempfile::TempDir, Utf8PathBuf) {
        let td = fsutil::temp_dir(None).unwrap();
        let dir = fsutil::temp_path(&td).unwrap().to_owned();
        for name in ["test1.yaml", "test2.yaml"] {
            fs::write(dir.join(name), "bundle_name: make_life_easy\n").unwrap();
        }
        fs::write(dir.join("test3.py"), "print()\n").unwrap();
        (td, dir)
    }

    fn opts_for(dir: &Utf8PathBuf, extra: &[&str]) -> ScheduleOpts {
        let mut args = vec![
            "--user",
            "joe",
            "--password",
            "pass",
            "--cwr-test-token",
            "sekrit",
        ];
        args.extend_from_slice(extra);
        args.extend([dir.as_str(), "default-aws"]);
        parse(&args)
    }

    #[test]
    fn test_parse_args() {
        let opts = parse(&["--test-plans", "a.yaml", "b.yaml", "--", "plans", "c1", "c2"]);
        assert_eq!(opts.test_plan_dir, "plans");
        assert_eq!(opts.controllers, ["c1", "c2"]);
        assert_eq!(
            opts.test_plans,
            Some(vec!["a.yaml".to_owned(), "b.yaml".to_owned()])
        );
        assert_eq!(opts.on_failure, SubmitPolicy::FailFast);
        let opts = parse(&["--on-failure", "continue", "plans", "c1"]);
        assert_eq!(opts.on_failure, SubmitPolicy::Continue);
    }

    #[test]
    fn test_get_credentials() {
        let (_td, dir) = plans_dir();
        let opts = opts_for(&dir, &[]);
        assert_eq!(
            get_credentials(&opts).unwrap(),
            Credentials {
                user: "joe".into(),
                password: "pass".into()
            }
        );
        let mut missing = opts.clone();
        missing.password = Some(String::new());
        assert!(matches!(get_credentials(&missing), Err(Error::Config(_))));
    }

    #[test]
    fn test_run_schedules_each_plan() {
        let (_td, dir) = plans_dir();
        let opts = opts_for(&dir, &[]);
        let mut connected = None;
        let n = run(&opts, |c, t| {
            connected = Some((c, t));
            Ok(FakeServer::default())
        });
        assert_eq!(n.unwrap(), 2);
        let (creds, token) = connected.unwrap();
        assert_eq!(creds.user, "joe");
        assert_eq!(token, "sekrit");
    }

    #[test]
    fn test_build_jobs_params() {
        let (_td, dir) = plans_dir();
        let jobs = plan::make_jobs(&dir, None, &["default-aws".to_owned()]).unwrap();
        let server = FakeServer::default();
        assert_eq!(build_jobs(&server, &jobs, SubmitPolicy::FailFast).unwrap(), 2);
        let submitted = server.submitted.into_inner();
        assert_eq!(
            submitted[0],
            vec![
                ("test_plan", dir.join("test1.yaml").to_string()),
                ("controllers", "default-aws".to_owned()),
                ("bundle_name", "make_life_easy".to_owned()),
            ]
        );
    }

    #[test]
    fn test_missing_credentials_before_connect() {
        let (_td, dir) = plans_dir();
        let mut opts = opts_for(&dir, &[]);
        opts.user = None;
        opts.password = None;
        let r = run(&opts, |_, _| -> Result<FakeServer> {
            panic!("connected without credentials")
        });
        assert!(matches!(r, Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_token() {
        let (_td, dir) = plans_dir();
        let mut opts = opts_for(&dir, &[]);
        opts.cwr_test_token = None;
        let r = run(&opts, |_, _| -> Result<FakeServer> { panic!("connected without token") });
        assert!(matches!(r, Err(Error::Config(_))));
    }

    #[test]
    fn test_fail_fast_stops() {
        let (_td, dir) = plans_dir();
        let jobs = plan::make_jobs(&dir, None, &[]).unwrap();
        let server = FakeServer {
            reject: Some("test1.yaml".into()),
            ..Default::default()
        };
        let r = build_jobs(&server, &jobs, SubmitPolicy::FailFast);
        assert!(matches!(r, Err(Error::JobServer(_))));
        assert_eq!(server.submitted.borrow().len(), 1);
    }

    #[test]
    fn test_continue_attempts_all() {
        let (_td, dir) = plans_dir();
        let jobs = plan::make_jobs(&dir, None, &[]).unwrap();
        let server = FakeServer {
            reject: Some("test1.yaml".into()),
            ..Default::default()
        };
        let r = build_jobs(&server, &jobs, SubmitPolicy::Continue);
        let Err(Error::JobServer(msg)) = r else {
            panic!("expected a job server error, got {r:?}");
        };
        assert!(msg.starts_with("1 of 2 submissions failed"), "{msg}");
        assert_eq!(server.submitted.borrow().len(), 2);
    }
}
