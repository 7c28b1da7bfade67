use crate::daemon::protocol::{DaemonRequest, DaemonResponse};
use crate::error::{DealscopeError, Result};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

pub struct DaemonClient {
    stream: UnixStream,
}

impl DaemonClient {
    pub async fn connect(socket: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket)
            .await
            .map_err(|_| DealscopeError::DaemonNotRunning)?;

        Ok(Self { stream })
    }

    pub async fn send(&mut self, request: DaemonRequest) -> Result<DaemonResponse> {
        let request_json = serde_json::to_string(&request)?;

        self.stream.write_all(request_json.as_bytes()).await?;
        self.stream.write_all(b"\n").await?;
        self.stream.flush().await?;

        let mut reader = BufReader::new(&mut self.stream);
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(DealscopeError::DaemonNotRunning);
        }

        let response: DaemonResponse = serde_json::from_str(&line)?;
        Ok(response)
    }

    pub async fn ping(socket: &Path) -> Result<bool> {
        match Self::connect(socket).await {
            Ok(mut client) => match client.send(DaemonRequest::Ping).await {
                Ok(DaemonResponse::Pong) => Ok(true),
                _ => Ok(false),
            },
            Err(_) => Ok(false),
        }
    }
}

pub async fn is_daemon_running(socket: &Path) -> bool {
    DaemonClient::ping(socket).await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::server::handle_connection;
    use crate::daemon::server::testing::test_state;
    use tempfile::tempdir;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn test_is_daemon_running_returns_false_when_not_running() {
        let dir = tempdir().unwrap();
        assert!(!is_daemon_running(&dir.path().join("missing.sock")).await);
    }

    #[tokio::test]
    async fn test_client_connect_fails_when_daemon_not_running() {
        let dir = tempdir().unwrap();
        match DaemonClient::connect(&dir.path().join("missing.sock")).await {
            Err(DealscopeError::DaemonNotRunning) => {}
            _ => panic!("Expected DaemonNotRunning error"),
        }
    }

    #[tokio::test]
    async fn test_round_trip_over_socket() {
        let dir = tempdir().unwrap();
        let socket = dir.path().join("dealscope.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let (state, _rx, _shutdown) = test_state(4);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = state.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, state).await;
                });
            }
        });

        assert!(is_daemon_running(&socket).await);

        let mut client = DaemonClient::connect(&socket).await.unwrap();
        let response = client
            .send(DaemonRequest::Submit {
                meeting_id: "m1".to_string(),
                analysis_types: Some(vec!["icp".to_string()]),
            })
            .await
            .unwrap();
        assert!(matches!(response, DaemonResponse::JobQueued { .. }));

        match client.send(DaemonRequest::GetStatus).await.unwrap() {
            DaemonResponse::Status(status) => assert_eq!(status.queued, 1),
            other => panic!("Expected Status response, got {:?}", other),
        }
    }
}
