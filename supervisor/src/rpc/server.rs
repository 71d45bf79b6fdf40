//! TCP transport for the control plane
//!
//! Length-prefixed bincode frames, one call per connection. Unary calls get
//! one response frame. `WatchServiceHealth` streams updates until the client
//! hangs up. `StreamLogs` reads entries until the client half-closes, then
//! answers with the count received.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use shared::wire::{read_frame, write_frame};
use shared::{process_debug, process_info, process_warn, LogsAck, ProcessId, RpcRequest, RpcResponse, WatchRequest};

use super::handler::ControlPlane;
use crate::error::{SupervisorError, SupervisorResult};

pub struct RpcServer {
    listener: TcpListener,
    control: Arc<ControlPlane>,
}

impl RpcServer {
    pub async fn bind(addr: SocketAddr, control: Arc<ControlPlane>) -> SupervisorResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SupervisorError::communication(format!("Failed to bind to {addr}: {e}")))?;
        Ok(Self { listener, control })
    }

    pub fn local_addr(&self) -> SupervisorResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until cancelled
    pub async fn serve(self, cancel: CancellationToken) {
        if let Ok(addr) = self.listener.local_addr() {
            process_info!(ProcessId::current(), "🌐 Control plane listening on {}", addr);
        }

        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let control = Arc::clone(&self.control);
                    let cancel = cancel.child_token();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, control, cancel).await {
                            process_debug!(ProcessId::current(), "Connection from {} ended with error: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    process_warn!(ProcessId::current(), "⚠️ Accept failed: {}", e);
                }
            }
        }

        process_info!(ProcessId::current(), "Control plane listener closed");
    }
}

async fn handle_connection(
    stream: TcpStream,
    control: Arc<ControlPlane>,
    cancel: CancellationToken,
) -> SupervisorResult<()> {
    let (mut reader, mut writer) = stream.into_split();

    let Some(request) = read_frame::<_, RpcRequest>(&mut reader).await? else {
        return Ok(());
    };
    process_debug!(ProcessId::current(), "RPC {}", request.name());

    match request {
        RpcRequest::WatchServiceHealth(watch) => serve_watch(reader, writer, &control, watch, cancel).await,
        RpcRequest::StreamLogs => serve_log_stream(reader, writer, &control, cancel).await,
        RpcRequest::LogEntry(_) => {
            let response = RpcResponse::Error {
                message: "LogEntry is only valid inside StreamLogs".to_string(),
            };
            write_frame(&mut writer, &response).await?;
            Ok(())
        }
        unary => serve_unary(reader, writer, &control, unary, cancel).await,
    }
}

/// A client that disconnects mid-call cancels the call's token; the handler
/// still runs to completion so no state is left half-applied
async fn serve_unary(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    control: &ControlPlane,
    request: RpcRequest,
    cancel: CancellationToken,
) -> SupervisorResult<()> {
    let disconnect = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 1];
            let _ = reader.read(&mut buf).await;
            cancel.cancel();
        })
    };

    let response = control.handle_unary(request, &cancel).await;
    disconnect.abort();

    write_frame(&mut writer, &response).await?;
    Ok(())
}

async fn serve_watch(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    control: &ControlPlane,
    request: WatchRequest,
    cancel: CancellationToken,
) -> SupervisorResult<()> {
    let mut subscription = control.watch(request).await;
    let mut buf = [0u8; 1];

    let result = loop {
        tokio::select! {
            update = subscription.updates.recv() => match update {
                Some(update) => {
                    if let Err(e) = write_frame(&mut writer, &RpcResponse::HealthUpdate(update)).await {
                        break Err(e.into());
                    }
                }
                None => break Ok(()),
            },
            // Watch clients never send after the request; any read result means hang-up
            _ = reader.read(&mut buf) => break Ok(()),
            _ = cancel.cancelled() => break Ok(()),
        }
    };

    control.unwatch(subscription.id).await;
    result
}

async fn serve_log_stream(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    control: &ControlPlane,
    cancel: CancellationToken,
) -> SupervisorResult<()> {
    let mut received = 0u64;

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            frame = read_frame::<_, RpcRequest>(&mut reader) => frame?,
        };

        match frame {
            Some(RpcRequest::LogEntry(entry)) => {
                control.ingest_log(entry).await;
                received += 1;
            }
            Some(other) => {
                let response = RpcResponse::Error {
                    message: format!("unexpected {} inside StreamLogs", other.name()),
                };
                write_frame(&mut writer, &response).await?;
                return Ok(());
            }
            None => break,
        }
    }

    process_debug!(ProcessId::current(), "Log stream closed after {} entries", received);
    write_frame(&mut writer, &RpcResponse::LogsAck(LogsAck { received })).await?;
    Ok(())
}
