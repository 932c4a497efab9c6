use anyhow::Context;
use std::{
    fs::{create_dir_all, OpenOptions},
    sync::Arc,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes event output. Events go to stderr, filtered by `RUST_LOG`
/// (default `info`). With `log_to_file` they are also written as JSON to
/// `./logs/debug-<timestamp>.log`. Call once, before any router starts.
pub fn initialize_logging(log_to_file: bool) -> anyhow::Result<()> {
    let file_layer = if log_to_file {
        let main_path = "./logs";
        create_dir_all(main_path).context("Could not create the log directory")?;
        let file_path = format!(
            "{}/debug-{}.log",
            main_path,
            chrono::offset::Local::now().format("%y-%m-%d_%H-%M-%S")
        );
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&file_path)
            .with_context(|| format!("Could not open {file_path}"))?;
        Some(fmt::layer().json().with_writer(Arc::new(file)))
    } else {
        None
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("Could not install the event subscriber")
}
