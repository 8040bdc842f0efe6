//! Unix-socket IPC: 4-byte little-endian length prefix + MessagePack body,
//! one `CallscopeResponse` per `CallscopeRequest`.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use callscope_core::ipc::{CallscopeRequest, CallscopeResponse};
use callscope_core::RagSession;
use futures::{SinkExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder().little_endian().new_codec()
}

pub async fn run_unix_server(
    socket_path: &str,
    session: Arc<RagSession>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    remove_stale_socket(socket_path)?;

    let listener = UnixListener::bind(socket_path)?;
    tracing::info!(socket = socket_path, "IPC server listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                tokio::spawn(serve_connection(stream, session.clone()));
            }
            _ = shutdown.recv() => {
                tracing::info!("Shutting down IPC server");
                break;
            }
        }
    }

    remove_stale_socket(socket_path)?;
    Ok(())
}

fn remove_stale_socket(socket_path: &str) -> std::io::Result<()> {
    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }
    Ok(())
}

async fn serve_connection(stream: UnixStream, session: Arc<RagSession>) {
    let (read, write) = stream.into_split();
    let mut frames_in = FramedRead::new(read, frame_codec());
    let mut frames_out = FramedWrite::new(write, frame_codec());

    while let Some(frame) = frames_in.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "IPC frame error");
                break;
            }
        };

        let response = match rmp_serde::from_slice::<CallscopeRequest>(&frame) {
            Ok(request) => crate::router::handle_request(request, &session).await,
            Err(e) => CallscopeResponse::err(format!("Deserialization error: {}", e)),
        };

        let encoded = match rmp_serde::to_vec_named(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize IPC response");
                break;
            }
        };

        if let Err(e) = frames_out.send(Bytes::from(encoded)).await {
            tracing::error!(error = %e, "Failed to send IPC response");
            break;
        }
    }
}
