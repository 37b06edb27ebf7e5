use std::process::ExitCode;

use waitkit::cli::Cli;
use waitkit::config::WaitConfig;
use waitkit::core::context::WaitContext;
use waitkit::core::debug_logger::get_debug_logger;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    match main_impl().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("waitkit: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn main_impl() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse_args();
    let config = cli.effective_config(WaitConfig::load()?)?;

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let strategy = cli.build_strategy(&config)?;
    let target = cli.target();

    let logger = get_debug_logger();
    logger.debug_sync(
        "main",
        "wait_start",
        &format!("{} check(s), deadline {} ms", checks_of(&strategy), config.startup_timeout_ms),
    );

    strategy
        .wait_until_ready(&WaitContext::background(), &target)
        .await?;
    println!("ready");
    Ok(())
}

fn checks_of(strategy: &waitkit::Strategy) -> usize {
    match strategy {
        waitkit::Strategy::Multi(multi) => multi.strategies().len(),
        _ => 1,
    }
}
