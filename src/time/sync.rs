// Network time synchronization
//
// Uses a worker thread pattern with calloop channel to keep async I/O
// off the main event loop. The computed offset is written straight into the
// shared TimeSource; the channel only carries status for logging/display.

use calloop::channel::{sync_channel, Channel, SyncSender};
use chrono::{DateTime, Utc};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::TimeSource;
use crate::error::{SyncError, SyncResult};

/// Offsets beyond this are reported as drift
const DRIFT_THRESHOLD_MS: i64 = 1000;

/// Outcome of one synchronization attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Clock agrees with the server within a second
    Synced { offset_ms: i64 },
    /// Offset applied, local clock was noticeably off
    Drifting { offset_ms: i64 },
    /// Server unreachable; previous offset kept
    Offline,
}

impl SyncStatus {
    fn from_offset(offset_ms: i64) -> Self {
        if offset_ms.abs() > DRIFT_THRESHOLD_MS {
            SyncStatus::Drifting { offset_ms }
        } else {
            SyncStatus::Synced { offset_ms }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SyncStatus::Synced { .. } => "synced",
            SyncStatus::Drifting { .. } => "out of sync, adjusting",
            SyncStatus::Offline => "offline",
        }
    }
}

/// Time sync service that polls the time API in a background thread
pub struct TimeSyncService {
    sender: SyncSender<SyncStatus>,
    pub channel: Channel<SyncStatus>,
}

impl TimeSyncService {
    /// Create a new sync service with channel for status communication
    pub fn new() -> Self {
        let (sender, channel) = sync_channel(4);
        Self { sender, channel }
    }

    /// Start polling `url` every `interval`, updating `source` on success
    ///
    /// Each request is bounded by `timeout`. A failed attempt leaves the
    /// offset untouched.
    pub fn start(&self, source: TimeSource, url: String, interval: Duration, timeout: Duration) {
        let sender = self.sender.clone();

        info!(
            url = %url,
            interval_secs = interval.as_secs(),
            "Starting time sync thread"
        );

        thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!(error = %e, "Failed to create tokio runtime for time sync");
                    let _ = sender.send(SyncStatus::Offline);
                    return;
                }
            };

            let client = match reqwest::Client::builder().timeout(timeout).build() {
                Ok(client) => client,
                Err(e) => {
                    error!(error = %e, "Failed to build HTTP client for time sync");
                    let _ = sender.send(SyncStatus::Offline);
                    return;
                }
            };

            loop {
                let status = match rt.block_on(fetch_offset(&client, &url)) {
                    Ok(offset_ms) => {
                        source.set_offset_ms(offset_ms);
                        let status = SyncStatus::from_offset(offset_ms);
                        if let SyncStatus::Drifting { offset_ms } = status {
                            warn!(offset_ms, "Local clock drift detected, applying offset");
                        } else {
                            debug!(offset_ms, "Time synchronized");
                        }
                        status
                    }
                    Err(e) => {
                        warn!(error = %e, offset_ms = source.offset_ms(), "Time sync failed, keeping offset");
                        SyncStatus::Offline
                    }
                };

                if sender.send(status).is_err() {
                    debug!("Time sync channel disconnected, stopping sync thread");
                    break;
                }

                thread::sleep(interval);
            }
        });
    }
}

impl Default for TimeSyncService {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a single synchronization request and return the offset in ms
pub async fn fetch_offset(client: &reqwest::Client, url: &str) -> SyncResult<i64> {
    debug!(url = %url, "Sending time API request");

    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        let status = response.status();
        warn!(status = %status, "Time API returned error status");
        return Err(SyncError::InvalidResponse(format!("HTTP {}", status)));
    }

    let json: serde_json::Value = response.json().await?;
    let received_at = Utc::now();
    let server_time = parse_server_time(&json)?;

    Ok((server_time - received_at).num_milliseconds())
}

/// Extract the server timestamp from a time API response body
pub fn parse_server_time(json: &serde_json::Value) -> SyncResult<DateTime<Utc>> {
    let raw = json
        .get("datetime")
        .and_then(|v| v.as_str())
        .ok_or_else(|| SyncError::ParseError("missing or invalid datetime field".to_string()))?;

    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SyncError::ParseError(format!("{}: {}", raw, e)))
}

/// One-off synchronization for the `sync` command
pub fn sync_once(source: &TimeSource, url: &str, timeout: Duration) -> SyncResult<SyncStatus> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| SyncError::InvalidResponse(format!("Failed to create async runtime: {}", e)))?;
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let offset_ms = rt.block_on(fetch_offset(&client, url))?;
    source.set_offset_ms(offset_ms);
    Ok(SyncStatus::from_offset(offset_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_server_time() {
        let json = serde_json::json!({
            "datetime": "2024-03-04T07:00:00.250000-06:00",
            "timezone": "America/Mexico_City"
        });
        let parsed = parse_server_time(&json).unwrap();
        assert_eq!(
            parsed,
            Utc.with_ymd_and_hms(2024, 3, 4, 13, 0, 0).unwrap() + chrono::Duration::milliseconds(250)
        );
    }

    #[test]
    fn test_parse_server_time_missing_field() {
        let json = serde_json::json!({ "unixtime": 1709557200 });
        assert!(matches!(
            parse_server_time(&json),
            Err(SyncError::ParseError(_))
        ));

        let json = serde_json::json!({ "datetime": "yesterday" });
        assert!(matches!(
            parse_server_time(&json),
            Err(SyncError::ParseError(_))
        ));
    }

    #[test]
    fn test_status_drift_threshold() {
        assert_eq!(SyncStatus::from_offset(999), SyncStatus::Synced { offset_ms: 999 });
        assert_eq!(
            SyncStatus::from_offset(-1001),
            SyncStatus::Drifting { offset_ms: -1001 }
        );
    }

    #[test]
    fn test_sync_service_creation() {
        let service = TimeSyncService::new();
        drop(service);
    }
}
