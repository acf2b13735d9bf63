//! Pure progress arithmetic: totals from response headers, speed and ETA,
//! and per-download aggregation.

use std::time::Duration;

use easel_db::models::download::DownloadFile;

/// Parse the total size out of a `Content-Range` header
/// (`bytes <start>-<end>/<total>`); an unknown total (`*`) yields `None`.
pub fn content_range_total(header: &str) -> Option<i64> {
    let (_, total) = header.trim().rsplit_once('/')?;
    total.trim().parse().ok()
}

/// Instantaneous speed over one flush window; `None` until time passes.
pub fn speed_bps(bytes_delta: u64, elapsed: Duration) -> Option<i64> {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return None;
    }
    Some((bytes_delta as f64 / secs) as i64)
}

/// Estimated seconds remaining at the current speed.
pub fn eta_secs(total: i64, downloaded: i64, speed_bps: i64) -> Option<i64> {
    if total <= 0 || speed_bps <= 0 {
        return None;
    }
    let remaining = (total - downloaded).max(0);
    Some((remaining as f64 / speed_bps as f64).ceil() as i64)
}

/// Aggregate over the file rows of one download: total downloaded bytes,
/// total expected bytes, and overall fraction (0 when the total is unknown).
pub fn aggregate(files: &[DownloadFile]) -> (i64, i64, f64) {
    let downloaded: i64 = files.iter().map(|f| f.downloaded_bytes).sum();
    let total: i64 = files.iter().map(|f| f.total_bytes).sum();
    let fraction = if total > 0 {
        (downloaded as f64 / total as f64).min(1.0)
    } else {
        0.0
    };
    (downloaded, total, fraction)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn file(downloaded: i64, total: i64) -> DownloadFile {
        DownloadFile {
            id: 1,
            download_id: "d".into(),
            remote_path: "f".into(),
            dest_path: "/tmp/f".into(),
            total_bytes: total,
            downloaded_bytes: downloaded,
            complete: false,
        }
    }

    // -- content_range_total -------------------------------------------------

    #[test]
    fn parses_total_from_content_range() {
        assert_eq!(content_range_total("bytes 100-199/5000"), Some(5000));
        assert_eq!(content_range_total("bytes 0-0/1"), Some(1));
    }

    #[test]
    fn unknown_total_is_none() {
        assert_eq!(content_range_total("bytes 100-199/*"), None);
        assert_eq!(content_range_total("garbage"), None);
    }

    // -- speed / eta ---------------------------------------------------------

    #[test]
    fn speed_over_window() {
        let speed = speed_bps(1_048_576, Duration::from_secs(2)).unwrap();
        assert_eq!(speed, 524_288);
    }

    #[test]
    fn speed_none_for_zero_window() {
        assert_eq!(speed_bps(1000, Duration::ZERO), None);
    }

    #[test]
    fn eta_rounds_up() {
        assert_eq!(eta_secs(1000, 0, 300), Some(4));
        assert_eq!(eta_secs(1000, 700, 300), Some(1));
        assert_eq!(eta_secs(1000, 1000, 300), Some(0));
    }

    #[test]
    fn eta_none_without_total_or_speed() {
        assert_eq!(eta_secs(0, 0, 300), None);
        assert_eq!(eta_secs(1000, 0, 0), None);
    }

    // -- aggregate -----------------------------------------------------------

    #[test]
    fn aggregate_sums_files() {
        let files = vec![file(600, 1000), file(100, 500)];
        let (downloaded, total, fraction) = aggregate(&files);
        assert_eq!(downloaded, 700);
        assert_eq!(total, 1500);
        assert!((fraction - 700.0 / 1500.0).abs() < 1e-9);
    }

    #[test]
    fn aggregate_zero_total_is_zero_progress() {
        let files = vec![file(600, 0)];
        assert_eq!(aggregate(&files).2, 0.0);
    }

    #[test]
    fn aggregate_caps_at_one() {
        let files = vec![file(2000, 1000)];
        assert_eq!(aggregate(&files).2, 1.0);
    }
}
