//! Companion-loader socket
//!
//! A Unix stream socket accepting one text command per line:
//!
//! ```text
//! load <slot> <path>     import a dump file and place the tag
//! set <slot> <path>      import a dump file, presence unchanged
//! present <slot>         place the tag
//! absent <slot>          remove the tag
//! status                 summary of both slots
//! ```
//!
//! Every command gets a single reply line starting with `OK` or `ERR`.
//! Commands are forwarded to the gadget thread over the loader bridge.

use crate::config::expand_path;
use anyhow::{Context, Result};
use common::{LoaderBridge, TAG_CAPACITY};
use protocol::MAX_SLOTS;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

/// One parsed loader command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderRequest {
    Load { slot: usize, path: PathBuf },
    Set { slot: usize, path: PathBuf },
    Present { slot: usize },
    Absent { slot: usize },
    Status,
}

/// Parse one command line
///
/// The path argument is the rest of the line, so it may contain spaces.
pub fn parse_request(line: &str) -> Result<LoaderRequest, String> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim_start()),
        None => (line, ""),
    };

    match verb.to_ascii_lowercase().as_str() {
        "load" | "set" => {
            let (slot, path) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| format!("usage: {} <slot> <path>", verb))?;
            let slot = parse_slot(slot)?;
            let path = path.trim();
            if path.is_empty() {
                return Err(format!("usage: {} <slot> <path>", verb));
            }
            let path = PathBuf::from(path);
            if verb.eq_ignore_ascii_case("load") {
                Ok(LoaderRequest::Load { slot, path })
            } else {
                Ok(LoaderRequest::Set { slot, path })
            }
        }
        "present" => Ok(LoaderRequest::Present {
            slot: parse_slot(rest)?,
        }),
        "absent" => Ok(LoaderRequest::Absent {
            slot: parse_slot(rest)?,
        }),
        "status" if rest.is_empty() => Ok(LoaderRequest::Status),
        "status" => Err("usage: status".to_string()),
        "" => Err("empty command".to_string()),
        other => Err(format!("unknown command '{}'", other)),
    }
}

fn parse_slot(s: &str) -> Result<usize, String> {
    let s = s.trim();
    let slot: usize = s.parse().map_err(|_| format!("invalid slot '{}'", s))?;
    if slot >= MAX_SLOTS {
        return Err(format!("slot {} out of range (0..{})", slot, MAX_SLOTS));
    }
    Ok(slot)
}

/// Run a parsed command against the gadget thread and format the reply
pub async fn execute(bridge: &LoaderBridge, request: LoaderRequest) -> Result<String> {
    let reply = match request {
        LoaderRequest::Load { slot, path } => {
            let data = read_dump(&path).await?;
            let stored = bridge.import_dump(slot, data).await?;
            info!(slot, path = %path.display(), stored, "Tag loaded");
            format!("OK slot {}: {} bytes, present", slot, stored)
        }
        LoaderRequest::Set { slot, path } => {
            let data = read_dump(&path).await?;
            let stored = bridge.set_slot_data(slot, data).await?;
            info!(slot, path = %path.display(), stored, "Tag data replaced");
            format!("OK slot {}: {} bytes", slot, stored)
        }
        LoaderRequest::Present { slot } => {
            bridge.mark_present(slot).await?;
            info!(slot, "Tag placed");
            "OK".to_string()
        }
        LoaderRequest::Absent { slot } => {
            bridge.mark_absent(slot).await?;
            info!(slot, "Tag removed");
            "OK".to_string()
        }
        LoaderRequest::Status => {
            let summary = bridge.status().await?;
            let slots: Vec<String> = summary.iter().map(ToString::to_string).collect();
            format!("OK {}", slots.join("; "))
        }
    };
    Ok(reply)
}

/// Read at most one byte past tag capacity so oversized and endless sources
/// still finish and get reported as truncated
async fn read_dump(path: &Path) -> Result<Vec<u8>> {
    let path = expand_path(path);
    let file = tokio::fs::File::open(&path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;
    let mut data = Vec::with_capacity(TAG_CAPACITY + 1);
    file.take(TAG_CAPACITY as u64 + 1)
        .read_to_end(&mut data)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;
    Ok(data)
}

/// Listener for loader connections
pub struct LoaderServer {
    listener: UnixListener,
    bridge: LoaderBridge,
    path: PathBuf,
}

impl LoaderServer {
    /// Bind the socket, replacing a stale socket file left by an earlier run
    pub fn bind(path: &Path, bridge: LoaderBridge) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create socket directory: {}", parent.display())
            })?;
        }
        if path.exists() {
            debug!(path = %path.display(), "Removing stale loader socket");
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to remove stale socket: {}", path.display()))?;
        }

        let listener = UnixListener::bind(path)
            .with_context(|| format!("Failed to bind loader socket: {}", path.display()))?;
        info!(path = %path.display(), "Loader socket listening");

        Ok(Self {
            listener,
            bridge,
            path: path.to_path_buf(),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until the listener fails
    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, _) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Loader socket accept failed: {}", e);
                    return Err(e).context("Loader socket closed");
                }
            };

            let bridge = self.bridge.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_client(stream, bridge).await {
                    error!("Loader connection error: {:#}", e);
                }
            });
        }
    }
}

async fn handle_client(stream: UnixStream, bridge: LoaderBridge) -> Result<()> {
    debug!("Loader client connected");
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = match parse_request(&line) {
            Ok(request) => match execute(&bridge, request).await {
                Ok(reply) => reply,
                Err(e) => format!("ERR {:#}", e),
            },
            Err(reason) => format!("ERR {}", reason),
        };
        debug!(command = line.trim(), reply = %reply, "Loader command handled");
        writer.write_all(reply.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }

    debug!("Loader client disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{DEFAULT_TEST_TIMEOUT, tag_image, with_timeout};
    use common::{SlotStore, create_loader_bridge};
    use tokio::io::Lines;
    use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

    #[test]
    fn test_parse_requests() {
        assert_eq!(
            parse_request("load 0 /tmp/tag.bin"),
            Ok(LoaderRequest::Load {
                slot: 0,
                path: PathBuf::from("/tmp/tag.bin")
            })
        );
        assert_eq!(
            parse_request("  SET 1   /tmp/my tag.bin \n"),
            Ok(LoaderRequest::Set {
                slot: 1,
                path: PathBuf::from("/tmp/my tag.bin")
            })
        );
        assert_eq!(
            parse_request("present 1"),
            Ok(LoaderRequest::Present { slot: 1 })
        );
        assert_eq!(
            parse_request("absent 0"),
            Ok(LoaderRequest::Absent { slot: 0 })
        );
        assert_eq!(parse_request("status"), Ok(LoaderRequest::Status));
    }

    #[test]
    fn test_parse_rejects_bad_requests() {
        assert!(parse_request("").is_err());
        assert!(parse_request("load").is_err());
        assert!(parse_request("load 0").is_err());
        assert!(parse_request("present two").is_err());
        assert!(parse_request("status now").is_err());
        assert_eq!(
            parse_request("present 2"),
            Err("slot 2 out of range (0..2)".to_string())
        );
        assert_eq!(
            parse_request("eject 0"),
            Err("unknown command 'eject'".to_string())
        );
    }

    struct Session {
        writer: OwnedWriteHalf,
        replies: Lines<BufReader<OwnedReadHalf>>,
    }

    impl Session {
        async fn connect(path: &Path) -> Self {
            let stream = UnixStream::connect(path).await.unwrap();
            let (reader, writer) = stream.into_split();
            Self {
                writer,
                replies: BufReader::new(reader).lines(),
            }
        }

        async fn ask(&mut self, line: &str) -> String {
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
            with_timeout(DEFAULT_TEST_TIMEOUT, self.replies.next_line())
                .await
                .unwrap()
                .unwrap()
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_socket_session() {
        let dir = tempfile::tempdir().unwrap();
        let dump = dir.path().join("tag.bin");
        std::fs::write(&dump, tag_image(2048)).unwrap();
        let socket = dir.path().join("run").join("loader.sock");

        let (bridge, worker) = create_loader_bridge();
        std::thread::spawn(move || {
            let mut store = SlotStore::new();
            while let Ok(cmd) = worker.recv_command() {
                cmd.apply(&mut store);
            }
        });

        let server = LoaderServer::bind(&socket, bridge).unwrap();
        assert_eq!(server.socket_path(), socket.as_path());
        let server_task = tokio::spawn(server.run());

        let mut session = Session::connect(&socket).await;

        let load = format!("load 1 {}", dump.display());
        assert_eq!(session.ask(&load).await, "OK slot 1: 1024 bytes, present");
        assert_eq!(
            session.ask("status").await,
            "OK slot 0: absent empty 0 bytes; slot 1: present loaded 1024 bytes"
        );
        assert_eq!(session.ask("absent 1").await, "OK");
        assert_eq!(
            session.ask("status").await,
            "OK slot 0: absent empty 0 bytes; slot 1: absent empty 1024 bytes"
        );
        assert!(
            session.ask("load 0 /nonexistent/tag.bin")
                .await
                .starts_with("ERR cannot read")
        );
        assert_eq!(session.ask("present 5").await, "ERR slot 5 out of range (0..2)");

        server_task.abort();
    }

    #[tokio::test]
    async fn test_load_from_endless_source() {
        let (bridge, worker) = create_loader_bridge();
        let store = std::thread::spawn(move || {
            let mut store = SlotStore::new();
            while let Ok(cmd) = worker.recv_command() {
                cmd.apply(&mut store);
            }
            store
        });

        let reply = with_timeout(
            DEFAULT_TEST_TIMEOUT,
            execute(
                &bridge,
                LoaderRequest::Load {
                    slot: 0,
                    path: PathBuf::from("/dev/zero"),
                },
            ),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(reply, "OK slot 0: 1024 bytes, present");

        drop(bridge);
        let store = store.join().unwrap();
        assert_eq!(store.slot(0).unwrap().size(), TAG_CAPACITY);
    }

    #[tokio::test]
    async fn test_read_dump_stops_past_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let dump = dir.path().join("big.bin");
        std::fs::write(&dump, vec![0x5a; 64 * 1024]).unwrap();

        let data = read_dump(&dump).await.unwrap();
        assert_eq!(data.len(), TAG_CAPACITY + 1);
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("loader.sock");
        std::fs::write(&socket, b"stale").unwrap();

        let (bridge, _worker) = create_loader_bridge();
        let server = LoaderServer::bind(&socket, bridge).unwrap();
        assert!(server.socket_path().exists());
    }
}
