use buildcloud::build_cloud::{self, log_level, user_home, BuildCloudOpts, ScopedEnv};
use buildcloud::error::exit_code_for;
use buildcloud::logging::install_tracing;
use buildcloud::process::HostExec;
use clap::Parser;
use color_eyre::eyre::Report;

fn run() -> Result<(), Report> {
    let opts = BuildCloudOpts::parse();
    install_tracing(log_level(opts.verbose));
    color_eyre::install()?;

    let params = opts.resolve(user_home().as_deref())?;
    let (workspace, params) = build_cloud::prepare(params)?;
    let _juju_home = ScopedEnv::set("JUJU_HOME", workspace.host().juju_home.as_str());
    build_cloud::execute(&HostExec::default(), &workspace, &params)?;
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:?}");
        std::process::exit(exit_code_for(&e));
    }
}
