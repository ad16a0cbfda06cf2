//! Logger setup for the CLI.
//!
//! The library only uses the `log` facade; the binary installs `env_logger` here.

use std::io::Write;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Elapsed time as `HH:MM:SS`.
fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Install the stderr logger.
///
/// `verbose` selects `Info`, otherwise `Warn`. `RUST_LOG` is applied on top, so
/// `RUST_LOG=bucketjoin=debug` shows per-bucket detail. Debug and trace lines also
/// carry the module path. Calling this twice is a no-op.
pub fn init_logger(verbose: bool) {
    let start = *START_TIME.get_or_init(Instant::now);
    let level = if verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    };

    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(move |buf, record| {
            let stamp = format_elapsed(start.elapsed());
            if record.level() >= log::Level::Debug {
                writeln!(
                    buf,
                    "[{}] {} {}: {}",
                    stamp,
                    record.level(),
                    record.target(),
                    record.args()
                )
            } else {
                writeln!(buf, "[{}] {}: {}", stamp, record.level(), record.args())
            }
        })
        .target(env_logger::Target::Stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_elapsed(Duration::from_millis(61_500)), "00:01:01");
        assert_eq!(format_elapsed(Duration::from_secs(3 * 3600 + 7)), "03:00:07");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logger(false);
        init_logger(true);
    }
}
