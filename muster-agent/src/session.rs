//! Server session
//!
//! One WebSocket connection to the server: registers, then runs assignments until
//! either side closes. Jobs still running when the connection drops are cancelled,
//! the server has already errored them.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use muster_core::dto::protocol::{AgentMessage, Registration, ServerMessage};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::executor::Executor;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A registered connection
pub struct Session {
    socket: Socket,
    token: String,
}

impl Session {
    /// Connects and registers, fails if the server refuses the registration
    pub async fn connect(config: &Config) -> Result<Self> {
        let (mut socket, _) = connect_async(config.server_url.as_str())
            .await
            .with_context(|| format!("Failed to connect to {}", config.server_url))?;

        let registration = AgentMessage::Register(Registration {
            token: config.token.clone(),
            capabilities: config.capabilities(),
        });
        socket
            .send(Message::Text(encode(&registration)?.into()))
            .await
            .context("Failed to send registration")?;

        loop {
            let frame = socket
                .next()
                .await
                .context("Connection closed during registration")?
                .context("Failed to read registration answer")?;

            let text = match frame {
                Message::Text(text) => text,
                Message::Close(_) => anyhow::bail!("Connection closed during registration"),
                _ => continue,
            };

            match serde_json::from_str::<ServerMessage>(text.as_str())? {
                ServerMessage::Registered { token } => {
                    info!("Registered as {}", token);
                    return Ok(Self { socket, token });
                }
                ServerMessage::Rejected { reason } => {
                    anyhow::bail!("Registration rejected: {}", reason);
                }
                other => debug!("Ignoring {:?} while registering", other),
            }
        }
    }

    /// Serves assignments until the connection ends
    pub async fn run(self, config: &Config) -> Result<()> {
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel();
        let executor = Arc::new(Executor::new(
            config.commands.clone(),
            config.max_parallel_jobs,
            outgoing,
        ));

        let token = self.token;
        let (mut writer, mut reader) = self.socket.split();

        let result = loop {
            tokio::select! {
                Some(message) = outgoing_rx.recv() => {
                    let sent = match encode(&message) {
                        Ok(json) => writer.send(Message::Text(json.into())).await,
                        Err(e) => {
                            warn!("Dropping unencodable message: {:#}", e);
                            continue;
                        }
                    };
                    if let Err(e) = sent {
                        break Err(anyhow::Error::new(e).context("Failed to send to server"));
                    }
                }
                frame = reader.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerMessage>(text.as_str()) {
                            Ok(ServerMessage::Assign(assignment)) => {
                                debug!("Assigned job {}", assignment.job_id);
                                executor.spawn(assignment);
                            }
                            Ok(ServerMessage::Cancel { job_id }) => {
                                if !executor.cancel(job_id) {
                                    debug!("Cancel for job {} that is not running", job_id);
                                }
                            }
                            Ok(ServerMessage::Ping) => {}
                            Ok(other) => warn!("Unexpected message from server: {:?}", other),
                            Err(e) => warn!("Malformed message from server: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Server closed the connection of {}", token);
                        break Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        break Err(anyhow::Error::new(e).context("Connection to server failed"));
                    }
                },
            }
        };

        executor.cancel_all();
        result
    }
}

fn encode(message: &AgentMessage) -> Result<String> {
    serde_json::to_string(message).context("Failed to encode message")
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_core::domain::job::{JobStatus, Request};
    use muster_core::dto::protocol::{Assignment, FinishReport};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    type ServerSocket = WebSocketStream<TcpStream>;

    async fn listen() -> (TcpListener, Config) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/agent", listener.local_addr().unwrap());
        let config = Config::new("agent-test".to_string(), url).with_command("greet", "echo", &["hi"]);
        (listener, config)
    }

    async fn accept(listener: &TcpListener) -> ServerSocket {
        let (stream, _) = listener.accept().await.unwrap();
        accept_async(stream).await.unwrap()
    }

    async fn send(socket: &mut ServerSocket, message: &ServerMessage) {
        let json = serde_json::to_string(message).unwrap();
        socket.send(Message::Text(json.into())).await.unwrap();
    }

    async fn receive(socket: &mut ServerSocket) -> AgentMessage {
        loop {
            if let Message::Text(text) = socket.next().await.unwrap().unwrap() {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_rejected_registration_fails_connect() {
        let (listener, config) = listen().await;

        let server = tokio::spawn(async move {
            let mut socket = accept(&listener).await;
            receive(&mut socket).await;
            send(
                &mut socket,
                &ServerMessage::Rejected {
                    reason: "duplicate token".to_string(),
                },
            )
            .await;
        });

        let err = Session::connect(&config).await.err().unwrap();
        assert!(err.to_string().contains("duplicate token"));
        server.await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_session_runs_assignment() {
        let (listener, config) = listen().await;

        let server = tokio::spawn(async move {
            let mut socket = accept(&listener).await;

            let AgentMessage::Register(registration) = receive(&mut socket).await else {
                panic!("expected a registration");
            };
            assert_eq!(registration.token, "agent-test");
            assert_eq!(registration.capabilities, vec!["greet".to_string()]);

            send(
                &mut socket,
                &ServerMessage::Registered {
                    token: registration.token,
                },
            )
            .await;
            send(&mut socket, &ServerMessage::Ping).await;

            let request = Request {
                command: "greet".to_string(),
                args: vec!["there".to_string()],
                ..Default::default()
            };
            send(&mut socket, &ServerMessage::Assign(Assignment::new(3, &request))).await;

            assert_eq!(
                receive(&mut socket).await,
                AgentMessage::Log {
                    job_id: 3,
                    line: "hi there".to_string()
                }
            );
            let AgentMessage::Finish(report) = receive(&mut socket).await else {
                panic!("expected a report");
            };
            assert_eq!(report, FinishReport::successful(3));
            assert_eq!(report.status, JobStatus::Successful);

            socket.close(None).await.unwrap();
        });

        let session = Session::connect(&config).await.unwrap();
        session.run(&config).await.unwrap();
        server.await.unwrap();
    }
}
