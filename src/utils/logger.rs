use env_logger::{Builder, Env, Target};
use std::io::Write;

/// Installs the process-wide logger. `RUST_LOG` overrides the default `info` level.
pub fn setup_logging() {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    builder
        .target(Target::Stderr)
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
        });

    // A second call (e.g. from tests) keeps the first logger.
    let _ = builder.try_init();
}
