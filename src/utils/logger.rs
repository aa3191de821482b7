use env_logger::{Builder, Env, Target};
use log::LevelFilter;
use std::io::Write;

/// Install the process wide logger.
///
/// `RUST_LOG` wins over `level` when it is set.
pub fn setup_logging(level: LevelFilter) {
    let mut builder = Builder::new();

    builder
        .target(Target::Stderr)
        .filter_level(level)
        .parse_env(Env::default())
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
