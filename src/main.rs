#[cfg(not(target_family = "unix"))]
compile_error!("backdrop only runs on UNIX-like systems.");

use backdrop::cli::Cli;
use clap::Parser;
use notify_rust::Notification;

fn main() -> anyhow::Result<()> {
    trace_panics();
    let cli = Cli::parse();

    let log_path = match cli.log_path.clone() {
        Some(path) => path,
        None => backdrop::get_default_log_path()?,
    };
    backdrop::init_logging(&cli.log_level, &log_path)?;

    if let Err(err) = backdrop::start(cli.command(), cli.config.clone()) {
        tracing::error!("{:#}", err);
        return Err(err);
    }

    Ok(())
}

fn trace_panics() {
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        tracing_panic::panic_hook(panic_info);
        prev_hook(panic_info);

        // we are already in a panic hook, if that panics as well... then we are
        // entering a recursion loop so we're just ignoring the result
        let _ = Notification::new()
            .appname(clap::crate_name!())
            .urgency(notify_rust::Urgency::Critical)
            .summary("Backdrop paniced!")
            .body(concat![
                "You likely found a bug. ",
                "Please take a look into the log file (see `backdrop -h`) and ",
                "create an issue if suitable."
            ])
            .show();
    }));
}
