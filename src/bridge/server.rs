//! Host-facing server: JSON requests in, responses and events out
//!
//! One request per line on the input stream. Each response is written
//! before the events its command produced; backend events are forwarded
//! as they arrive.

use std::future::Future;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::backend::BackendEvent;
use crate::common::{config::Config, error::HostError, Result};

use super::handler;
use super::protocol::{HostEvent, Message, Request, Response};
use super::session::{DebugSession, SessionState};

pub struct Server {
    config: Config,
    session: Option<DebugSession>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            session: None,
        }
    }

    /// Serve on stdin/stdout until the host closes stdin or a signal arrives
    pub async fn run(&mut self) -> Result<()> {
        let shutdown = shutdown_signal()?;
        self.serve(tokio::io::stdin(), tokio::io::stdout(), shutdown)
            .await
    }

    pub async fn serve<R, W, S>(&mut self, reader: R, writer: W, shutdown: S) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
        S: Future<Output = ()>,
    {
        let mut lines = BufReader::new(reader).lines();
        let mut writer = writer;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
                line = lines.next_line() => {
                    match line? {
                        Some(line) if line.trim().is_empty() => {}
                        Some(line) => self.handle_line(&line, &mut writer).await?,
                        None => {
                            tracing::debug!("Host closed input");
                            break;
                        }
                    }
                }
                Some(event) = next_event(&mut self.session) => {
                    self.forward_event(event, &mut writer).await?;
                }
            }
        }

        if let Some(mut session) = self.session.take() {
            tracing::debug!("Stopping debug session");
            if let Err(e) = session.disconnect(true).await {
                tracing::warn!(error = %e, "Could not stop debugger");
            }
        }
        tracing::info!("Server shutdown complete");
        Ok(())
    }

    async fn handle_line<W: AsyncWrite + Unpin>(&mut self, line: &str, writer: &mut W) -> Result<()> {
        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(error = %e, "Invalid request");
                let response = Response::error(
                    0,
                    HostError {
                        code: "INVALID_REQUEST".to_string(),
                        message: e.to_string(),
                    },
                );
                return write_message(writer, &Message::Response(response)).await;
            }
        };

        tracing::debug!(id = request.id, command = ?request.command, "Received command");
        let mut events = Vec::new();
        let response = handler::handle_command(
            &mut self.session,
            &self.config,
            request.id,
            request.command,
            &mut events,
        )
        .await;

        write_message(writer, &Message::Response(response)).await?;
        self.write_events(events, writer).await
    }

    async fn forward_event<W: AsyncWrite + Unpin>(&mut self, event: BackendEvent, writer: &mut W) -> Result<()> {
        let events = match self.session.as_mut() {
            Some(session) => session.handle_event(event).await,
            None => return Ok(()),
        };
        self.write_events(events, writer).await
    }

    async fn write_events<W: AsyncWrite + Unpin>(&mut self, events: Vec<HostEvent>, writer: &mut W) -> Result<()> {
        for event in events {
            write_message(writer, &Message::Event(event)).await?;
        }
        if self
            .session
            .as_ref()
            .is_some_and(|s| s.state() == SessionState::Terminated)
        {
            tracing::info!("Debug session ended");
            self.session = None;
        }
        Ok(())
    }
}

/// Next backend event, or never when no session is active
async fn next_event(session: &mut Option<DebugSession>) -> Option<BackendEvent> {
    match session {
        Some(session) => session.next_event().await,
        None => std::future::pending().await,
    }
}

async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> Result<()> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(unix)]
fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
            _ = sigint.recv() => tracing::info!("Received SIGINT"),
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    Ok(async {
        let _ = tokio::signal::ctrl_c().await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    async fn exchange(input: &str) -> Vec<serde_json::Value> {
        let (mut host_in, server_in) = duplex(64 * 1024);
        let (server_out, host_out) = duplex(64 * 1024);
        host_in.write_all(input.as_bytes()).await.unwrap();
        drop(host_in);

        let mut server = Server::new(Config::default());
        server
            .serve(server_in, server_out, std::future::pending())
            .await
            .unwrap();

        let mut out = Vec::new();
        let mut lines = BufReader::new(host_out).lines();
        while let Some(line) = lines.next_line().await.unwrap() {
            out.push(serde_json::from_str(&line).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_invalid_request_gets_error_response() {
        let out = exchange("not json\n").await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["type"], "response");
        assert_eq!(out[0]["success"], false);
        assert_eq!(out[0]["error"]["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_one_response_per_request_in_order() {
        let out = exchange(
            "{\"id\":1,\"command\":{\"type\":\"threads\"}}\n\n{\"id\":2,\"command\":{\"type\":\"list_breakpoints\"}}\n",
        )
        .await;
        let ids: Vec<u64> = out.iter().map(|m| m["id"].as_u64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(out.iter().all(|m| m["error"]["code"] == "SESSION_NOT_ACTIVE"));
    }
}
