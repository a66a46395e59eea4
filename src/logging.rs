use std::path::Path;
use log::LevelFilter;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_line(timestamp: &str, level: log::Level, message: &std::fmt::Arguments) -> String {
    format!("{} >> {} - {}", timestamp, level, message)
}

fn dispatch() -> fern::Dispatch {
    fern::Dispatch::new()
        .format(|out, message, record| {
            let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
            out.finish(format_args!("{}", format_line(&timestamp, record.level(), message)))
        })
        .level(LevelFilter::Info)
        .level_for("async_imap", LevelFilter::Warn)
        .level_for("lettre", LevelFilter::Warn)
}

/// Console always, plus `log_file` when given.
pub fn setup_logging(log_file: Option<&Path>) -> Result<(), fern::InitError> {
    let mut dispatch = dispatch().chain(std::io::stdout());

    if let Some(path) = log_file {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    dispatch.apply()?;
    Ok(())
}

pub fn check_finished_line(now: chrono::DateTime<chrono::Local>) -> String {
    now.format("Check finished at %Y-%m-%d %H:%M:%S").to_string()
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_line_layout() {
        let line = format_line("2024-05-01 10:00:00", log::Level::Error, &format_args!("boom"));
        assert_eq!(line, "2024-05-01 10:00:00 >> ERROR - boom");
    }

    #[test]
    fn test_check_finished_line() {
        let now = chrono::Local.with_ymd_and_hms(2024, 5, 1, 10, 30, 5).unwrap();
        assert_eq!(check_finished_line(now), "Check finished at 2024-05-01 10:30:05");
    }

    #[test]
    fn test_captured_lines_use_the_relay_format() {
        capture::install();
        log::error!("capture check for logging-format@example.com");

        let lines = capture::matching("logging-format@example.com");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains(" >> ERROR - capture check for"));
    }
}
