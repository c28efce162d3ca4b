//! Submitting jobs to a Jenkins server.

use std::fmt;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// The Jenkins instance jobs are scheduled on.
pub const JENKINS_URL: &str = "http://localhost:8080";

/// The parameterized job every test plan is submitted to.
pub const JOB_NAME: &str = "cwr-test";

/// Jenkins user and password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Something that can queue a parameterized build.
pub trait JobServer {
    fn build_job(&self, name: &str, params: &[(&'static str, String)]) -> Result<()>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Crumb {
    crumb: String,
    crumb_request_field: String,
}

/// A blocking HTTP client for the Jenkins remote API.
#[derive(Debug)]
pub struct JenkinsClient {
    base: String,
    credentials: Credentials,
    token: String,
    http: Client,
}

fn request_error(e: reqwest::Error) -> Error {
    Error::JobServer(e.to_string())
}

impl JenkinsClient {
    pub fn new(url: &str, credentials: Credentials, token: String) -> Result<Self> {
        // Crumbs are bound to the session that issued them
        let http = Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(request_error)?;
        Ok(Self {
            base: url.trim_end_matches('/').to_owned(),
            credentials,
            token,
            http,
        })
    }

    fn authed(&self, r: RequestBuilder) -> RequestBuilder {
        r.basic_auth(&self.credentials.user, Some(&self.credentials.password))
    }

    pub fn build_url(&self, name: &str) -> String {
        format!("{}/job/{name}/buildWithParameters", self.base)
    }

    /// Fetch a CSRF crumb; servers without crumb protection answer 404.
    fn crumb(&self) -> Result<Option<Crumb>> {
        let url = format!("{}/crumbIssuer/api/json", self.base);
        let resp = self.authed(self.http.get(&url)).send().map_err(request_error)?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!("No crumb issuer at {url}");
            return Ok(None);
        }
        let body = resp
            .error_for_status()
            .and_then(|r| r.text())
            .map_err(request_error)?;
        let crumb = serde_json::from_str(&body)
            .map_err(|e| Error::JobServer(format!("invalid crumb response: {e}")))?;
        Ok(Some(crumb))
    }
}

impl JobServer for JenkinsClient {
    fn build_job(&self, name: &str, params: &[(&'static str, String)]) -> Result<()> {
        let mut req = self
            .authed(self.http.post(self.build_url(name)))
            .query(&[("token", self.token.as_str())])
            .query(params);
        if let Some(c) = self.crumb()? {
            req = req.header(c.crumb_request_field, c.crumb);
        }
        let resp = req.send().map_err(request_error)?;
        let status = resp.status();
        resp.error_for_status().map_err(request_error)?;
        info!("Queued {name} ({status})");
        Ok(())
    }
}
