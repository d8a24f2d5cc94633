//! Subprocess bridge connector.
//!
//! Spawns one bridge process per client and bridges its stdio to the
//! command/event channels: commands are written as JSON lines to stdin,
//! events are parsed from JSON lines on stdout. The bridge owns the browser
//! session under `{sessions_dir}/session-{client_id}`.
//!
//! There is no restart supervision: a bridge exit is a terminal
//! `Disconnected` for its session, and re-pairing is an operator action.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use zapgate_gateway_protocol::{GatewayCommand, GatewayEvent};

use super::{Connection, Connector, ConnectorError};

/// Capacity of the command and event channels per bridge.
const CHANNEL_CAPACITY: usize = 64;

/// Grace period between writing `Disconnect` and killing the process.
const DISCONNECT_GRACE: Duration = Duration::from_millis(500);

/// Spawns the configured bridge executable per client.
pub struct SubprocessConnector {
    command: String,
    args: Vec<String>,
    sessions_dir: PathBuf,
}

impl SubprocessConnector {
    pub fn new(command: String, args: Vec<String>, sessions_dir: PathBuf) -> Self {
        Self {
            command,
            args,
            sessions_dir,
        }
    }

    fn spawn_child(&self, client_id: &str) -> std::io::Result<Child> {
        let session_dir = self.sessions_dir.join(format!("session-{}", client_id));

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .arg("--client-id")
            .arg(client_id)
            .arg("--session-dir")
            .arg(&session_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        // On Linux, set PR_SET_PDEATHSIG to ensure the bridge dies with us
        #[cfg(target_os = "linux")]
        unsafe {
            cmd.pre_exec(|| {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        cmd.spawn()
    }
}

#[async_trait]
impl Connector for SubprocessConnector {
    async fn connect(&self, client_id: &str) -> Result<Connection, ConnectorError> {
        info!(
            client_id,
            command = %self.command,
            "Spawning bridge process"
        );
        let child = self.spawn_child(client_id)?;

        let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (evt_tx, evt_rx) = mpsc::channel(CHANNEL_CAPACITY);

        tokio::spawn(bridge_stdio(client_id.to_string(), child, evt_tx, cmd_rx));

        Ok(Connection {
            commands: cmd_tx,
            events: evt_rx,
        })
    }
}

/// Bridge the child's stdio to the command/event channels until either side
/// goes away.
async fn bridge_stdio(
    client_id: String,
    mut child: Child,
    evt_tx: mpsc::Sender<GatewayEvent>,
    mut cmd_rx: mpsc::Receiver<GatewayCommand>,
) {
    let Some(stdin) = child.stdin.take() else {
        error!(client_id = %client_id, "Bridge stdin not piped");
        return;
    };
    let Some(stdout) = child.stdout.take() else {
        error!(client_id = %client_id, "Bridge stdout not piped");
        return;
    };

    let mut stdin = stdin;
    let mut stdout_reader = BufReader::new(stdout).lines();
    let mut saw_disconnected = false;

    loop {
        tokio::select! {
            line = stdout_reader.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        match serde_json::from_str::<GatewayEvent>(&line) {
                            Ok(event) => {
                                let done = matches!(event, GatewayEvent::Disconnected { .. });
                                if evt_tx.send(event).await.is_err() {
                                    debug!(client_id = %client_id, "Event channel closed");
                                    break;
                                }
                                if done {
                                    saw_disconnected = true;
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(
                                    client_id = %client_id,
                                    line = %line,
                                    error = %e,
                                    "Failed to parse bridge event"
                                );
                            }
                        }
                    }
                    Ok(None) => {
                        debug!(client_id = %client_id, "Bridge stdout closed");
                        break;
                    }
                    Err(e) => {
                        error!(client_id = %client_id, error = %e, "Error reading bridge stdout");
                        break;
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                let Some(command) = cmd else {
                    // Command side dropped (session torn down); ask the
                    // bridge to stop and exit the loop.
                    let _ = write_command(&mut stdin, &GatewayCommand::Disconnect).await;
                    break;
                };

                let is_disconnect = matches!(command, GatewayCommand::Disconnect);
                if let Err(e) = write_command(&mut stdin, &command).await {
                    error!(client_id = %client_id, error = %e, "Failed to write to bridge stdin");
                    break;
                }
                if is_disconnect {
                    // Give the bridge a moment to log out cleanly
                    tokio::time::sleep(DISCONNECT_GRACE).await;
                    break;
                }
            }
        }
    }

    // A bridge that vanished without saying goodbye still ends its session
    if !saw_disconnected {
        let _ = evt_tx
            .send(GatewayEvent::Disconnected {
                reason: "bridge process exited".to_string(),
            })
            .await;
    }

    if let Err(e) = child.kill().await {
        debug!(client_id = %client_id, error = %e, "Bridge process already gone");
    }
    let _ = child.wait().await;

    debug!(client_id = %client_id, "Bridge stdio loop stopped");
}

async fn write_command(
    stdin: &mut tokio::process::ChildStdin,
    command: &GatewayCommand,
) -> std::io::Result<()> {
    let json = serde_json::to_string(command)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    stdin.write_all(json.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}
