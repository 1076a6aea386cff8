//! Interactive chat client over the reconnecting transport
//!
//! Lines typed on stdin are sent as chat messages. `/detect <text>` runs
//! detection only, `/reconnect` retries after the transport gave up, and
//! `/quit` exits.

use crate::cli::ConnectArgs;
use railguard_core::{ClientEvent, ServerEvent};
use railguard_transport::{ConnectionState, Inbound, Transport, TransportConfig, WsConnector};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

/// Endpoint with the session pinned, so reconnects rejoin the same session
pub fn session_url(base: &str, session_id: &str) -> String {
    let sep = if base.contains('?') { '&' } else { '?' };
    format!("{base}{sep}session_id={session_id}")
}

/// Render one inbound item for the terminal, `None` for items not shown
pub fn render(item: &Inbound) -> Option<String> {
    match item {
        Inbound::Event(ServerEvent::ChatResponse(outcome)) => {
            let mut line = format!("assistant> {}", outcome.response);
            if outcome.blocked {
                line.push_str(&format!("  [blocked: {}]", outcome.blocking_reasons.join(", ")));
            }
            if !outcome.warnings.is_empty() {
                line.push_str(&format!("  [warnings: {}]", outcome.warnings.join(", ")));
            }
            Some(line)
        }
        Inbound::Event(ServerEvent::DetectionResult { verdict, .. }) => Some(format!(
            "detection> blocked={} reasons=[{}] warnings=[{}]",
            verdict.blocked,
            verdict.reasons.join(", "),
            verdict.warnings.join(", ")
        )),
        Inbound::Event(ServerEvent::Error { code, message, .. }) => {
            Some(format!("error> {message} ({code})"))
        }
        Inbound::Event(ServerEvent::StatusUpdate { .. }) => None,
        Inbound::ConnectionLost { attempts } => Some(format!(
            "connection lost after {attempts} attempts; type /reconnect to retry"
        )),
    }
}

pub async fn run(args: ConnectArgs, config: TransportConfig) -> anyhow::Result<()> {
    let session_id = args
        .session
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let url = session_url(&args.url, &session_id);
    println!("Connecting to {url}");

    let (transport, inbox) = Transport::connect(WsConnector::new(url), config);
    let printer = inbox.on_event(|item| {
        if let Some(line) = render(&item) {
            println!("{line}");
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event = match line {
            "/quit" => break,
            "/reconnect" => {
                if let Err(e) = transport.reconnect().await {
                    warn!(error = %e, "Reconnect failed");
                }
                continue;
            }
            _ => match line.strip_prefix("/detect ") {
                Some(text) => ClientEvent::DetectionRequest {
                    session_id: Some(session_id.clone()),
                    message_id: None,
                    text: text.to_string(),
                    detectors: None,
                },
                None => ClientEvent::ChatMessage {
                    session_id: Some(session_id.clone()),
                    message_id: None,
                    text: line.to_string(),
                    config: Default::default(),
                },
            },
        };

        if let Err(e) = transport.send(event).await {
            println!("error> {}", e.public_message());
        } else if transport.state() != ConnectionState::Connected {
            println!("(queued until the connection is back)");
        }
    }

    transport.close().await;
    printer.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use railguard_core::{Phase, Verdict};

    #[test]
    fn test_session_url() {
        assert_eq!(
            session_url("ws://127.0.0.1:8080/ws", "abc"),
            "ws://127.0.0.1:8080/ws?session_id=abc"
        );
        assert_eq!(
            session_url("ws://host/ws?token=x", "abc"),
            "ws://host/ws?token=x&session_id=abc"
        );
    }

    #[test]
    fn test_render_skips_status_updates() {
        let status = Inbound::Event(ServerEvent::StatusUpdate {
            session_id: "s1".into(),
            message_id: "m1".into(),
            state: railguard_core::RailState::Generating,
        });
        assert_eq!(render(&status), None);

        let detection = Inbound::Event(ServerEvent::DetectionResult {
            session_id: "s1".into(),
            message_id: "m1".into(),
            verdict: Verdict::pass(Phase::Input),
        });
        assert!(render(&detection).unwrap().contains("blocked=false"));

        let lost = Inbound::ConnectionLost { attempts: 5 };
        assert!(render(&lost).unwrap().contains("/reconnect"));
    }
}
