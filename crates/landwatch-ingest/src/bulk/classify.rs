//! Loader output-line classification
//!
//! ogr2ogr mixes progress dots, warnings, skipped-feature notices and fatal
//! errors into the same two streams. Each line is sorted into a bucket so
//! warnings can be aggregated and skipped features counted instead of
//! flooding the log.

/// Classification of one loader output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineClass {
    /// Error output, logged at error level immediately.
    Fatal,
    /// A "Warning 1:" line; carries the normalized warning text.
    Warning(String),
    /// A feature skipped for invalid geometry.
    SkippedInvalid,
    /// Known harmless noise, dropped entirely.
    Benign,
    /// Everything else, logged at debug level.
    Trace,
}

/// Notices ogr2ogr emits against PostgreSQL targets that carry no signal.
fn is_benign(lower: &str) -> bool {
    lower.contains("does not support layer creation option encoding")
        || lower.contains("lacks super user privilege")
        || lower.contains("ogr_system_tables_event_trigger_for_metadata")
}

fn is_skipped_invalid(lower: &str) -> bool {
    lower.contains("skipping feature")
        || lower.contains("skipped feature")
        || lower.contains("invalid geometry")
        || lower.contains("geometry has invalid")
}

/// Classify one output line.
///
/// Warning texts are normalized by stripping the per-feature
/// "at or near point …" tail so repeated warnings collapse into one count.
pub fn classify_line(line: &str) -> LineClass {
    if line.contains("ERROR") || line.contains("Error") || line.contains("FATAL") {
        return LineClass::Fatal;
    }

    if let Some(pos) = line.find("Warning 1:") {
        let text = line[pos + "Warning 1:".len()..].trim();
        let text = match text.find(" at or near point") {
            Some(tail) => text[..tail].trim(),
            None => text,
        };
        return LineClass::Warning(text.to_string());
    }

    let lower = line.to_lowercase();
    if is_skipped_invalid(&lower) {
        return LineClass::SkippedInvalid;
    }
    if is_benign(&lower) {
        return LineClass::Benign;
    }
    LineClass::Trace
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_lines_are_fatal() {
        assert_eq!(
            classify_line("ERROR 1: COPY statement failed"),
            LineClass::Fatal
        );
        assert_eq!(classify_line("FATAL: terminating"), LineClass::Fatal);
    }

    #[test]
    fn test_warning_text_is_extracted_and_normalized() {
        let class = classify_line(
            "[ogr2ogr] Warning 1: Ring Self-intersection at or near point 123.4 -5.6",
        );
        assert_eq!(
            class,
            LineClass::Warning("Ring Self-intersection".to_string())
        );

        let class = classify_line("Warning 1: Value truncated");
        assert_eq!(class, LineClass::Warning("Value truncated".to_string()));
    }

    #[test]
    fn test_skipped_invalid_detection() {
        assert_eq!(
            classify_line("Skipping feature 42 with invalid geometry"),
            LineClass::SkippedInvalid
        );
        assert_eq!(
            classify_line("feature 9: geometry has invalid coordinates, skipped feature"),
            LineClass::SkippedInvalid
        );
    }

    #[test]
    fn test_benign_noise_is_dropped() {
        assert_eq!(
            classify_line("driver does not support layer creation option ENCODING"),
            LineClass::Benign
        );
        assert_eq!(
            classify_line("current user lacks super user privilege"),
            LineClass::Benign
        );
    }

    #[test]
    fn test_progress_output_is_trace() {
        assert_eq!(classify_line("0...10...20...30"), LineClass::Trace);
    }
}
