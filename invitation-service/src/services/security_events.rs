//! Security event log: append, query, streaming export and alert summary.
//!
//! Writes are awaited but never fail the caller. A lost audit row is logged
//! at `warn` and the request proceeds.

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, Stream};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::metrics;
use super::repository::{
    EventAudience, EventCursor, EventFilter, Repositories, SecurityEventRepository,
};
use crate::models::{SecurityEvent, SecurityEventType};

pub const MAX_PAGE_SIZE: i64 = 1000;
pub const EXPORT_BATCH_SIZE: i64 = 500;

const CSV_HEADER: &str = "id,created_at,event_type,user_id,ip_address,details\n";

#[derive(Debug, Clone)]
pub struct AlertThresholds {
    pub window: Duration,
    pub thresholds: Vec<(SecurityEventType, i64)>,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            window: Duration::hours(1),
            thresholds: vec![
                (SecurityEventType::UnauthorizedInstitutionAccess, 5),
                (SecurityEventType::RateLimitExceeded, 10),
                (SecurityEventType::TokenValidationFailure, 20),
            ],
        }
    }
}

impl From<&crate::config::AlertConfig> for AlertThresholds {
    fn from(config: &crate::config::AlertConfig) -> Self {
        Self {
            window: Duration::minutes(config.window_minutes),
            thresholds: vec![
                (
                    SecurityEventType::UnauthorizedInstitutionAccess,
                    config.unauthorized_access_threshold,
                ),
                (SecurityEventType::RateLimitExceeded, config.rate_limit_threshold),
                (
                    SecurityEventType::TokenValidationFailure,
                    config.token_failure_threshold,
                ),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityEventPage {
    pub events: Vec<SecurityEvent>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub event_type: SecurityEventType,
    pub count: i64,
    pub threshold: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertSummary {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub counts: Vec<EventCount>,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventCount {
    pub event_type: SecurityEventType,
    pub count: i64,
}

#[derive(Clone)]
pub struct SecurityEventLog {
    repo: Arc<dyn Repositories>,
    thresholds: AlertThresholds,
}

impl SecurityEventLog {
    pub fn new(repo: Arc<dyn Repositories>, thresholds: AlertThresholds) -> Self {
        Self { repo, thresholds }
    }

    /// Append one event. Storage failures are swallowed after a warning.
    pub async fn log(
        &self,
        event_type: SecurityEventType,
        user_id: Option<Uuid>,
        ip_address: Option<String>,
        details: serde_json::Value,
    ) {
        let event = SecurityEvent::new(event_type, user_id, ip_address, details);

        match event_type.severity() {
            "critical" => tracing::error!(
                event_type = %event.event_type,
                user_id = ?event.user_id,
                ip_address = ?event.ip_address,
                details = %event.details,
                "Security event"
            ),
            "warning" => tracing::warn!(
                event_type = %event.event_type,
                user_id = ?event.user_id,
                ip_address = ?event.ip_address,
                details = %event.details,
                "Security event"
            ),
            _ => tracing::info!(
                event_type = %event.event_type,
                user_id = ?event.user_id,
                details = %event.details,
                "Security event"
            ),
        }
        metrics::record_security_event(event_type);

        if let Err(e) = self.repo.append_event(&event).await {
            tracing::warn!(
                error = %e,
                event_type = %event.event_type,
                "Failed to write security event"
            );
        }
    }

    /// Newest-first page; `limit` is clamped to 1..=1000.
    pub async fn query(
        &self,
        filter: &EventFilter,
        limit: i64,
        offset: i64,
    ) -> Result<SecurityEventPage, anyhow::Error> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let offset = offset.max(0);
        let (events, total) = self.repo.query_events(filter, limit, offset).await?;

        Ok(SecurityEventPage {
            events,
            total,
            limit,
            offset,
        })
    }

    /// CSV rendering of every matching event, newest first, fetched in
    /// batches so the full result never sits in memory.
    pub fn export(
        &self,
        filter: EventFilter,
    ) -> impl Stream<Item = Result<String, anyhow::Error>> + Send + 'static {
        enum Step {
            Header,
            After(Option<EventCursor>),
            Done,
        }

        let repo = self.repo.clone();
        stream::unfold(
            (Step::Header, repo, filter),
            |(step, repo, filter)| async move {
                match step {
                    Step::Header => Some((Ok(CSV_HEADER.to_string()), (Step::After(None), repo, filter))),
                    Step::After(cursor) => {
                        match repo.events_after(&filter, cursor, EXPORT_BATCH_SIZE).await {
                            Ok(events) if events.is_empty() => None,
                            Ok(events) => {
                                let next = if (events.len() as i64) < EXPORT_BATCH_SIZE {
                                    Step::Done
                                } else {
                                    Step::After(events.last().map(EventCursor::from))
                                };
                                let chunk: String = events.iter().map(csv_row).collect();
                                Some((Ok(chunk), (next, repo, filter)))
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Security event export failed");
                                Some((Err(e), (Step::Done, repo, filter)))
                            }
                        }
                    }
                    Step::Done => None,
                }
            },
        )
    }

    /// Counts per type over the trailing window, flagging types at or above
    /// their threshold.
    pub async fn alert_summary(
        &self,
        audience: Option<EventAudience>,
        now: DateTime<Utc>,
    ) -> Result<AlertSummary, anyhow::Error> {
        let window_start = now - self.thresholds.window;
        let filter = EventFilter {
            from: Some(window_start),
            to: Some(now),
            // Counts only: failures tied to no institution reach every admin.
            audience: audience.map(|a| EventAudience {
                include_unattributed: true,
                ..a
            }),
            ..Default::default()
        };

        let counts = self.repo.count_by_type(&filter).await?;
        let alerts = self
            .thresholds
            .thresholds
            .iter()
            .filter_map(|(event_type, threshold)| {
                let count = counts
                    .iter()
                    .find(|(t, _)| t == event_type)
                    .map(|(_, c)| *c)
                    .unwrap_or(0);
                (count >= *threshold).then_some(Alert {
                    event_type: *event_type,
                    count,
                    threshold: *threshold,
                })
            })
            .collect();

        Ok(AlertSummary {
            window_start,
            window_end: now,
            counts: counts
                .into_iter()
                .map(|(event_type, count)| EventCount { event_type, count })
                .collect(),
            alerts,
        })
    }
}

fn csv_row(event: &SecurityEvent) -> String {
    let fields = [
        event.id.to_string(),
        event.created_at.to_rfc3339(),
        event.event_type.as_str().to_string(),
        event.user_id.map(|u| u.to_string()).unwrap_or_default(),
        event.ip_address.clone().unwrap_or_default(),
        event.details.to_string(),
    ];
    let mut row = fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(",");
    row.push('\n');
    row
}

/// Quote a field when it contains a delimiter, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::MemoryDatabase;
    use futures::StreamExt;
    use serde_json::json;

    fn log_with(db: Arc<MemoryDatabase>) -> SecurityEventLog {
        SecurityEventLog::new(db, AlertThresholds::default())
    }

    #[test]
    fn csv_fields_are_escaped() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field(r#"{"k":"v"}"#), r#""{""k"":""v""}""#);
    }

    #[tokio::test]
    async fn query_clamps_limit() {
        let db = Arc::new(MemoryDatabase::new());
        let log = log_with(db.clone());
        for _ in 0..3 {
            log.log(SecurityEventType::InvitationCreated, None, None, json!({})).await;
        }

        let page = log.query(&EventFilter::default(), 0, -5).await.unwrap();
        assert_eq!(page.limit, 1);
        assert_eq!(page.offset, 0);
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.total, 3);

        let page = log.query(&EventFilter::default(), 50_000, 0).await.unwrap();
        assert_eq!(page.limit, MAX_PAGE_SIZE);
        assert_eq!(page.events.len(), 3);
    }

    #[tokio::test]
    async fn export_streams_header_and_every_row() {
        let db = Arc::new(MemoryDatabase::new());
        let log = log_with(db.clone());
        let total = EXPORT_BATCH_SIZE as usize + 7;
        for n in 0..total {
            log.log(
                SecurityEventType::TokenValidationFailure,
                None,
                Some("203.0.113.9".to_string()),
                json!({"n": n}),
            )
            .await;
        }

        let chunks: Vec<String> = log
            .export(EventFilter::default())
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        let body = chunks.concat();
        let mut lines = body.lines();

        assert_eq!(lines.next(), Some(CSV_HEADER.trim_end()));
        assert_eq!(lines.count(), total);
        assert_eq!(chunks.len(), 3);
    }

    #[tokio::test]
    async fn alert_summary_flags_thresholds_in_window() {
        let db = Arc::new(MemoryDatabase::new());
        let log = log_with(db.clone());
        for _ in 0..5 {
            log.log(
                SecurityEventType::UnauthorizedInstitutionAccess,
                None,
                None,
                json!({}),
            )
            .await;
        }
        for _ in 0..9 {
            log.log(SecurityEventType::RateLimitExceeded, None, None, json!({})).await;
        }

        let summary = log.alert_summary(None, Utc::now()).await.unwrap();
        assert_eq!(
            summary.alerts,
            vec![Alert {
                event_type: SecurityEventType::UnauthorizedInstitutionAccess,
                count: 5,
                threshold: 5,
            }]
        );
        assert!(summary
            .counts
            .contains(&EventCount {
                event_type: SecurityEventType::RateLimitExceeded,
                count: 9
            }));

        let later = log
            .alert_summary(None, Utc::now() + Duration::hours(2))
            .await
            .unwrap();
        assert!(later.alerts.is_empty());
    }
}
