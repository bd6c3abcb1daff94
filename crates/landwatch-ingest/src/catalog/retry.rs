//! Transient database error classification and backoff
//!
//! Catalog operations never retry internally. The per-file pipeline wraps
//! whole transactions in a retry loop and acquires a fresh connection for
//! every attempt, so a dead connection from a failed attempt is never reused.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;

/// Error-message fragments that mark a recoverable connection problem.
const TRANSIENT_MARKERS: &[&str] = &[
    "connection timed out",
    "could not connect",
    "server closed the connection",
    "connection already closed",
    "terminating connection",
    "software caused connection abort",
    "ssl syscall error",
    "connection reset by peer",
    "could not receive data",
    "timeout expired",
];

fn message_is_transient(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| msg.contains(marker))
}

/// Whether a database error is worth retrying on a fresh connection.
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) => true,
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::PoolClosed => true,
        sqlx::Error::WorkerCrashed => true,
        other => message_is_transient(&other.to_string()),
    }
}

/// Transient check through an `anyhow` chain.
///
/// Pipeline steps surface errors as `anyhow::Error`; the underlying
/// `sqlx::Error` is recovered by walking the chain, falling back to the
/// rendered message for errors wrapped beyond recognition.
pub fn is_transient_anyhow(err: &anyhow::Error) -> bool {
    for cause in err.chain() {
        if let Some(sqlx_err) = cause.downcast_ref::<sqlx::Error>() {
            return is_transient(sqlx_err);
        }
    }
    message_is_transient(&format!("{err:#}"))
}

/// Exponential backoff delay for a 1-based attempt number.
///
/// Doubles from the base, caps at the maximum, then applies symmetric
/// jitter so simultaneous retries spread out.
pub fn retry_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let attempt = attempt.max(1);
    let base = config.base_delay_secs * 2f64.powi(attempt as i32 - 1);
    let delay = base.min(config.max_delay_secs);
    let jitter = delay * config.jitter;
    let secs = if jitter <= 0.0 {
        delay
    } else {
        let offset = rand::thread_rng().gen_range(-jitter..=jitter);
        (delay + offset).max(0.0)
    };
    Duration::from_secs_f64(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay_secs: 3.0,
            max_delay_secs: 60.0,
            jitter: 0.0,
        }
    }

    #[test]
    fn test_delay_doubles_from_base() {
        let config = no_jitter();
        assert_eq!(retry_delay(1, &config), Duration::from_secs_f64(3.0));
        assert_eq!(retry_delay(2, &config), Duration::from_secs_f64(6.0));
        assert_eq!(retry_delay(3, &config), Duration::from_secs_f64(12.0));
    }

    #[test]
    fn test_delay_caps_at_max() {
        let config = no_jitter();
        assert_eq!(retry_delay(10, &config), Duration::from_secs_f64(60.0));
    }

    #[test]
    fn test_zero_attempt_treated_as_first() {
        let config = no_jitter();
        assert_eq!(retry_delay(0, &config), retry_delay(1, &config));
    }

    #[test]
    fn test_jitter_stays_within_band() {
        let config = RetryConfig {
            jitter: 0.3,
            ..no_jitter()
        };
        for attempt in 1..=5 {
            let unjittered = retry_delay(attempt, &no_jitter()).as_secs_f64();
            let delay = retry_delay(attempt, &config).as_secs_f64();
            assert!(delay >= unjittered * 0.7 - 1e-9);
            assert!(delay <= unjittered * 1.3 + 1e-9);
        }
    }

    #[test]
    fn test_io_error_is_transient() {
        let err = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "broken pipe",
        ));
        assert!(is_transient(&err));
    }

    #[test]
    fn test_pool_timeout_is_transient() {
        assert!(is_transient(&sqlx::Error::PoolTimedOut));
    }

    #[test]
    fn test_row_not_found_is_not_transient() {
        assert!(!is_transient(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn test_marker_match_through_anyhow() {
        let err = anyhow::anyhow!("server closed the connection unexpectedly");
        assert!(is_transient_anyhow(&err));

        let err = anyhow::anyhow!("syntax error at or near SELECT");
        assert!(!is_transient_anyhow(&err));
    }
}
