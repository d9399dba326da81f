use std::fs;
use std::io;
use std::path::Path;

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mztracer::{MZTracer, MZTracerError};

#[cfg(feature = "mimalloc")]
use mimalloc::MiMalloc;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn make_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
}

/// Log to STDERR, and to `log_file` when given. The returned guard flushes the file on drop.
fn init_logging(log_file: Option<&Path>) -> io::Result<Option<WorkerGuard>> {
    tracing_log::LogTracer::init().map_err(io::Error::other)?;

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let handle = fs::File::create(path)?;
            let (writer, guard) = tracing_appender::non_blocking(handle);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_timer(fmt::time::ChronoLocal::rfc_3339())
                .with_writer(writer)
                .with_filter(make_filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .compact()
                .with_writer(io::stderr)
                .with_filter(make_filter()),
        )
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber).map_err(io::Error::other)?;
    Ok(guard)
}

fn main() -> Result<(), MZTracerError> {
    let args = MZTracer::parse();

    let mut config = Figment::new()
        .merge(Serialized::defaults(&args))
        .merge(Toml::file("mztracer.toml"));
    if let Some(path) = args.config_file.as_ref() {
        config = config.merge(Toml::file_exact(path));
    }
    config = config.merge(Env::prefixed("MZTRACER_").split("__"));
    let driver: MZTracer = config.extract()?;

    let _guard = init_logging(driver.log_file.as_deref())?;
    driver.main()?;
    Ok(())
}
