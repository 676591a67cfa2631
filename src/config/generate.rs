pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# LOG SENDER CONFIGURATION
# =============================================================================
# Ships the learning platform's event log to an LRS endpoint in batches.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/log-sender/config.yml
#   3. /etc/log-sender/config.yml
#
# Environment variables can be referenced as $env{NAME}.
#
# Runtime settings (endpoint URL, allowed targets, export cursor) are not
# kept here. They live in the storage database and are managed with:
#
#   log-sender settings set endpoint_url http://localhost:8089/moodle_log
#   log-sender settings set log_targets course,course_module
#   log-sender settings list

# =============================================================================
# STORAGE
# =============================================================================
# DuckDB database holding the event log, reference data and settings.

storage:
  path: ~/.local/share/log-sender/platform.duckdb

# =============================================================================
# PLATFORM
# =============================================================================

platform:
  # Public base URL, used for activity links and the report callback.
  # site_url: https://learn.example.org

  # Language key of the localized activity names sent to the LRS
  lang: en

# =============================================================================
# EXPORT JOB
# =============================================================================

export:
  # Records per HTTP request
  batch_size: 50

  # Batches per scheduled run; the rest waits for the next run
  max_batches_per_run: 20

  # Time between scheduled runs
  interval: 5m

  lock:
    # Must exceed max_batches_per_run × shipper.timeout
    ttl: 15m

    # How long a run waits for a busy lock before skipping (0s = don't wait)
    wait: 0s

# =============================================================================
# HTTP
# =============================================================================

shipper:
  timeout: 30s

report:
  timeout: 30s
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn test_starter_config_is_valid() {
        let config = parse_config(&generate_starter_config()).unwrap();
        assert_eq!(config.export.batch_size, 50);
        assert_eq!(config.export.max_batches_per_run, 20);
        assert!(config.storage.path.ends_with("log-sender/platform.duckdb"));
    }
}
