//! Newline-delimited JSON bridge in front of a [`ReminderService`].
//!
//! Each request line is a [`CommandEnvelope`]; each gets exactly one
//! [`ResponseEnvelope`] line back. Stdout is reserved for the protocol, so
//! all diagnostics go through `tracing` to stderr.

use crate::error::{ChimeError, Result};
use crate::host::contract::{
    CommandEnvelope, CommandName, ReadPayload, ReminderRef, ResponseEnvelope, SchedulePayload,
    SnoozePayload,
};
use crate::scheduler::runner::SchedulerHandle;
use crate::service::ReminderService;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

/// Serve requests from stdin until EOF, `runtime.stop`, or `shutdown`.
pub async fn run_stdio_bridge(
    service: ReminderService,
    scheduler: SchedulerHandle,
    shutdown: CancellationToken,
) -> Result<()> {
    let reader = BufReader::new(tokio::io::stdin());
    let writer = tokio::io::stdout();
    run_bridge(&service, &scheduler, reader, writer, shutdown).await
}

/// Serve requests from any line reader to any writer.
pub async fn run_bridge<R, W>(
    service: &ReminderService,
    scheduler: &SchedulerHandle,
    mut reader: R,
    mut writer: W,
    shutdown: CancellationToken,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("shutdown requested; closing bridge");
                break;
            }
            read = reader.read_line(&mut line) => read
                .map_err(|e| ChimeError::Channel(format!("failed to read request: {e}")))?,
        };

        if bytes_read == 0 {
            tracing::info!("input closed (EOF); closing bridge");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let envelope: CommandEnvelope = match serde_json::from_str(trimmed) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(error = %e, raw_line = %trimmed, "unparseable request");
                let response =
                    ResponseEnvelope::error("parse-error", format!("failed to parse request: {e}"));
                write_response(&mut writer, &response).await?;
                continue;
            }
        };

        let is_stop = envelope.command == CommandName::RuntimeStop;
        let request_id = envelope.request_id.clone();
        let response = match dispatch(service, scheduler, envelope).await {
            Ok(payload) => ResponseEnvelope::ok(request_id, payload),
            Err(e) => {
                tracing::warn!(error = %e, "request failed");
                ResponseEnvelope::error(request_id, e.to_string())
            }
        };
        write_response(&mut writer, &response).await?;

        if is_stop {
            tracing::info!("runtime.stop received; closing bridge");
            break;
        }
    }

    Ok(())
}

async fn dispatch(
    service: &ReminderService,
    scheduler: &SchedulerHandle,
    envelope: CommandEnvelope,
) -> Result<serde_json::Value> {
    let payload = envelope.payload;
    match envelope.command {
        CommandName::HostPing => Ok(json!({ "pong": true, "version": env!("CARGO_PKG_VERSION") })),
        CommandName::RuntimeStop => Ok(json!({ "stopping": true })),
        CommandName::ReminderSchedule => {
            let req: SchedulePayload = parse_payload(payload)?;
            let outcome = service
                .schedule_text(&req.text, req.client_now.as_deref(), req.preview)
                .await?;
            to_value(&outcome)
        }
        CommandName::ReminderCancel => {
            let req: ReminderRef = parse_payload(payload)?;
            service.cancel(req.id).await?;
            Ok(json!({ "id": req.id, "status": "cancelled" }))
        }
        CommandName::ReminderComplete => {
            let req: ReminderRef = parse_payload(payload)?;
            let completion = service.complete(req.id).await?;
            to_value(&completion)
        }
        CommandName::ReminderSnooze => {
            let req: SnoozePayload = parse_payload(payload)?;
            let reminder = service.snooze(req.id, req.minutes).await?;
            to_value(&reminder)
        }
        CommandName::ReminderList => to_value(&service.active_reminders().await?),
        CommandName::NotificationList => to_value(&service.notifications().await?),
        CommandName::NotificationRead => {
            let req: ReadPayload = parse_payload(payload)?;
            match req.id {
                Some(id) => {
                    let found = service.mark_notification_read(id).await?;
                    Ok(json!({ "id": id, "found": found }))
                }
                None => {
                    let cleared = service.mark_all_read().await?;
                    Ok(json!({ "cleared": cleared }))
                }
            }
        }
        CommandName::SchedulerSnapshot => to_value(&scheduler.snapshot().await?),
    }
}

/// Missing payloads deserialize like an empty object.
fn parse_payload<T: DeserializeOwned>(payload: serde_json::Value) -> Result<T> {
    let payload = if payload.is_null() {
        json!({})
    } else {
        payload
    };
    serde_json::from_value(payload)
        .map_err(|e| ChimeError::Channel(format!("invalid payload: {e}")))
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| ChimeError::Channel(format!("failed to serialize response: {e}")))
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &ResponseEnvelope,
) -> Result<()> {
    let json = serde_json::to_string(response)
        .map_err(|e| ChimeError::Channel(format!("failed to serialize response: {e}")))?;
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| ChimeError::Channel(format!("failed to write response: {e}")))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| ChimeError::Channel(format!("failed to write newline: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| ChimeError::Channel(format!("failed to flush output: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::config::{ChimeConfig, SchedulerConfig};
    use crate::resolver::KeywordResolver;
    use crate::scheduler::clock::ManualClock;
    use crate::scheduler::runner::Scheduler;
    use crate::store::SqliteReminderStore;
    use chrono::NaiveDate;
    use std::sync::Arc;

    async fn run_lines(input: &str) -> Vec<ResponseEnvelope> {
        let clock = ManualClock::new(
            NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
        );
        let store = Arc::new(
            SqliteReminderStore::open_in_memory()
                .unwrap()
                .with_clock(Arc::new(clock.clone())),
        );
        let running = Scheduler::new(store.clone(), store.clone(), SchedulerConfig::default())
            .with_clock(Arc::new(clock.clone()))
            .start();
        let service = ReminderService::new(
            store,
            running.handle(),
            Arc::new(KeywordResolver::new().unwrap()),
            &ChimeConfig::default(),
        )
        .with_clock(Arc::new(clock));

        let mut output = Vec::new();
        run_bridge(
            &service,
            &running.handle(),
            input.as_bytes(),
            &mut output,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        running.stop().await.unwrap();

        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn schedule_then_list() {
        let responses = run_lines(concat!(
            r#"{"request_id":"1","command":"reminder.schedule","payload":{"text":"tea in 5 minutes"}}"#,
            "\n",
            r#"{"request_id":"2","command":"reminder.list"}"#,
            "\n",
            r#"{"request_id":"3","command":"scheduler.snapshot"}"#,
            "\n",
        ))
        .await;

        assert_eq!(responses.len(), 3);
        assert!(responses[0].ok);
        assert_eq!(responses[0].payload["type"], "scheduled");
        assert_eq!(responses[0].payload["reminder"]["task"], "tea");
        assert_eq!(responses[1].payload.as_array().unwrap().len(), 1);
        assert_eq!(
            responses[2].payload[0]["job_id"],
            responses[0].payload["reminder"]["id"]
                .as_i64()
                .map(|id| format!("reminder_{id}"))
                .unwrap()
        );
    }

    #[tokio::test]
    async fn bad_lines_get_error_responses() {
        let responses = run_lines(concat!(
            "not json\n",
            r#"{"request_id":"x","command":"reminder.cancel","payload":{}}"#,
            "\n",
            r#"{"request_id":"y","command":"reminder.schedule","payload":{"text":"buy milk"}}"#,
            "\n",
        ))
        .await;

        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0].request_id, "parse-error");
        assert!(responses.iter().all(|r| !r.ok));
        assert_eq!(responses[2].request_id, "y");
    }

    #[tokio::test]
    async fn runtime_stop_ends_session() {
        let responses = run_lines(concat!(
            r#"{"request_id":"a","command":"host.ping"}"#,
            "\n",
            r#"{"request_id":"b","command":"runtime.stop"}"#,
            "\n",
            r#"{"request_id":"c","command":"host.ping"}"#,
            "\n",
        ))
        .await;

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].payload["pong"], true);
        assert_eq!(responses[1].payload["stopping"], true);
    }

    #[tokio::test]
    async fn read_without_id_clears_all() {
        let responses = run_lines(concat!(
            r#"{"request_id":"1","command":"notification.read"}"#,
            "\n",
        ))
        .await;
        assert!(responses[0].ok);
        assert_eq!(responses[0].payload["cleared"], 0);
    }
}
