//! Record-file persistence (ambient stack, §6 "Record file"): the concrete
//! load/append implementation behind the caller-managed, append-only history
//! log. Line-delimited JSON, one canonical [`Message`] per line.
//!
//! Load is newline-scanning and tolerant: a line that doesn't parse is logged
//! and skipped rather than failing the whole load, and a missing file means
//! empty history rather than an error (§6, §8 scenario 5).

use std::io;
use std::path::Path;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::message::Message;

/// Load history-sendable messages from `path`. A missing file yields an empty
/// history (§6); a line that fails to parse is logged and skipped rather than
/// aborting the load, matching the "tolerant parsing" the design calls for.
pub async fn load_history(path: &Path) -> io::Result<Vec<Message>> {
    let file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut lines = BufReader::new(file).lines();
    let mut history = Vec::new();
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Message>(trimmed) {
            Ok(msg) => history.push(msg),
            Err(e) => log::warn!("record file {path:?}: skipping unparsable line: {e}"),
        }
    }
    Ok(history)
}

/// Append one history-sendable message to `path`, creating it if necessary
/// (§6: the record file is append-only and managed by the caller — the core
/// just implements the mechanics).
pub async fn append_message(path: &Path, message: &Message) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    let line = serde_json::to_string(message)?;
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    Ok(())
}
