//! One-shot reachability check of the API per zone, without retries.

use crate::fetcher::{Transport, WindowRequest};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::BTreeMap;

/// Number of days requested per zone.
pub const PROBE_DAYS: i64 = 3;

pub fn probe_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Result per zone: `OK`, `HTTP <status>` or `ERR <error kind>`.
pub fn zone_quickcheck<T: Transport>(transport: &T, zones: &[String]) -> BTreeMap<String, String> {
    let start = probe_start();
    let end = start + Duration::days(PROBE_DAYS);

    zones
        .iter()
        .map(|zone| {
            let request = WindowRequest::new(zone.as_str(), start, end);
            let status = match transport.get(&request) {
                Ok(response) if response.is_success() => "OK".to_string(),
                Ok(response) => format!("HTTP {}", response.status),
                Err(e) => format!("ERR {}", e.kind()),
            };
            (zone.clone(), status)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::fetcher::TransportResponse;

    struct ByZone;

    impl Transport for ByZone {
        fn get(&self, request: &WindowRequest) -> Result<TransportResponse, TransportError> {
            assert_eq!(request.end - request.start, Duration::days(PROBE_DAYS));
            match request.zone.as_str() {
                "FR" => Ok(TransportResponse { status: 200, body: "{}".into() }),
                "XX" => Ok(TransportResponse { status: 401, body: String::new() }),
                _ => Err(TransportError::Timeout),
            }
        }
    }

    #[test]
    fn test_reports_each_zone() {
        let zones: Vec<String> = ["FR", "XX", "BR"].iter().map(|s| s.to_string()).collect();
        let report = zone_quickcheck(&ByZone, &zones);
        assert_eq!(report["FR"], "OK");
        assert_eq!(report["XX"], "HTTP 401");
        assert_eq!(report["BR"], "ERR Timeout");
    }
}
