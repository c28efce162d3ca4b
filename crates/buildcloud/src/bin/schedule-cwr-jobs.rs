use buildcloud::build_cloud::log_level;
use buildcloud::error::exit_code_for;
use buildcloud::jenkins::{JenkinsClient, JENKINS_URL};
use buildcloud::logging::install_tracing;
use buildcloud::schedule::{self, ScheduleOpts};
use clap::Parser;
use color_eyre::eyre::Report;

fn run() -> Result<(), Report> {
    let opts = ScheduleOpts::parse();
    install_tracing(log_level(opts.verbose));
    color_eyre::install()?;

    let n = schedule::run(&opts, |credentials, token| {
        JenkinsClient::new(JENKINS_URL, credentials, token)
    })?;
    println!("Scheduled {n} jobs");
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:?}");
        std::process::exit(exit_code_for(&e));
    }
}
