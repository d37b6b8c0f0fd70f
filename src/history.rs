/*!
Append-only chat history, one rendered event per line.

Best effort: failures get logged, never returned.
*/
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tokio::{
    fs::OpenOptions,
    io::AsyncWriteExt,
};
use tracing::{event, Level};

pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    pub fn new<P: AsRef<Path>>(path: P) -> HistoryLog {
        HistoryLog { path: path.as_ref().to_path_buf() }
    }

    /// Create the file if it isn't there yet.
    pub async fn touch(&self) {
        if let Err(e) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
        {
            event!(Level::ERROR,
                "could not create history file {:?}: {}", &self.path, &e
            );
        }
    }

    /// Write `entry` as one line.
    ///
    /// Callers that can race each other must serialize; the hub does this
    /// under its lock.
    pub async fn append(&self, entry: &str) {
        let mut line: String = entry.chars()
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .collect();
        line.push('\n');

        // The file is dropped (and so closed) on every return path.
        let mut f = match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                event!(Level::ERROR,
                    "error opening history file {:?}: {}", &self.path, &e
                );
                return;
            },
        };

        if let Err(e) = f.write_all(line.as_bytes()).await {
            event!(Level::ERROR, "error saving message to history: {}", &e);
            return;
        }
        if let Err(e) = f.flush().await {
            event!(Level::ERROR, "error flushing history: {}", &e);
        }
    }

    /// Every stored line, oldest first.
    pub async fn read_all(&self) -> Vec<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => s.lines().map(String::from).collect(),
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                event!(Level::WARN,
                    "error reading history file {:?}: {}", &self.path, &e
                );
                Vec::new()
            },
        }
    }
}
