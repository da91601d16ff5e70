use env_logger::{Builder, Env, Target};
use std::io::Write;

/// Install the global logger. `RUST_LOG` takes precedence over `default_level`.
pub fn setup_logging(default_level: &str) {
    let mut builder = Builder::from_env(Env::default().default_filter_or(default_level));

    builder
        .target(Target::Stdout)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] [{}:{}] {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .init();
}
