use fern::Dispatch;
use log::{Level, LevelFilter};
use std::time::Instant;

/// Maps the verbosity from 0 to 2 onto a log level. Quiet only lets errors through.
pub fn level_for(verbosity: u8, quiet: bool) -> LevelFilter {
    match (quiet, verbosity) {
        (true, _) => LevelFilter::Error,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    }
}

/// Errors are logged into stderr, everything else into stdout.
pub fn setup_logging(log_level: LevelFilter) -> anyhow::Result<()> {
    let start = Instant::now();

    Dispatch::new()
        .format(move |out, msg, record| {
            out.finish(format_args!(
                "{: >11.3} {: >5} {}",
                start.elapsed().as_secs_f32(),
                record.level(),
                msg
            ))
        })
        .level(LevelFilter::Trace)
        .level_for("ureq", LevelFilter::Info)
        .chain(
            Dispatch::new()
                .filter(|metadata| metadata.level() > Level::Error)
                .chain(std::io::stdout()),
        )
        .chain(Dispatch::new().level(LevelFilter::Error).chain(std::io::stderr()))
        .apply()?;

    set_level(log_level);
    Ok(())
}

/// Changes the log level of the already set up logger.
pub fn set_level(log_level: LevelFilter) {
    log::set_max_level(log_level);
}

#[cfg(test)]
mod tests {
    use super::level_for;
    use log::LevelFilter;

    #[test]
    fn verbosity_levels() {
        assert_eq!(level_for(0, false), LevelFilter::Info);
        assert_eq!(level_for(1, false), LevelFilter::Debug);
        assert_eq!(level_for(2, false), LevelFilter::Trace);
        assert_eq!(level_for(2, true), LevelFilter::Error);
    }
}
