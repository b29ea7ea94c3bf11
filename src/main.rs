use clap::Parser;
use f5vpn::daemon::Role;
use f5vpn::{Cli, Outcome, Standby, bootstrap, platform};
use std::process;
use tracing::error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() {
    // before anything else can spawn a thread
    let role = Role::detect_and_clear();

    let cli = Cli::parse();
    if cli.version {
        println!("{}", f5vpn::cli::build_info());
        return;
    }

    // The daemon child's stderr is its log file
    if let Err(e) = init_logging(cli.debug, role == Role::DaemonChild) {
        eprintln!("failed to set up logging: {}", e);
        process::exit(1);
    }

    let invocation = match cli.into_invocation() {
        Ok(invocation) => invocation,
        Err(e) => fatal(&e),
    };

    match bootstrap::run(invocation, role, &Standby) {
        Ok(Outcome::Finished) | Ok(Outcome::HandedOff { .. }) => {}
        Err(e) => fatal(&e),
    }
}

fn init_logging(debug: bool, daemon_child: bool) -> Result<(), Box<dyn std::error::Error>> {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(!daemon_child)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn fatal(err: &dyn std::error::Error) -> ! {
    error!("{}", err);
    platform::pause_on_fatal();
    process::exit(1);
}
