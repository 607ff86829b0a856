use env_logger::{Builder, Env};
use log::info;
use std::io::Write;

/// Colored single-line log format. Defaults to `info`; `RUST_LOG` overrides it.
pub fn setup_logger() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let level_color = match record.level() {
                log::Level::Error => "\x1B[1;31m",
                log::Level::Warn => "\x1B[1;33m",
                log::Level::Info => "\x1B[1;32m",
                log::Level::Debug => "\x1B[1;36m",
                log::Level::Trace => "\x1B[1;35m",
            };

            writeln!(
                buf,
                "[{}] {}{}\x1B[0m [{}:{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                level_color,
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .init();

    info!("Logger initialized");
}
