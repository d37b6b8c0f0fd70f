/*!
The account store: a flat file of `username:password` records, one per
line.

Nothing is cached; every lookup re-reads the file.
*/
use std::path::{Path, PathBuf};

use tokio::{
    fs::OpenOptions,
    io::AsyncWriteExt,
    sync::Mutex,
};
use tracing::{event, Level};

pub struct CredentialStore {
    path: PathBuf,
    /// Held across the check-then-append in `register()`.
    write_lock: Mutex<()>,
}

/// Split a record at its first colon. Lines without one aren't records.
fn parse_record(line: &str) -> Option<(&str, &str)> {
    line.split_once(':')
}

fn same_user(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

impl CredentialStore {
    /// Use the file at `path`, creating it if it doesn't exist.
    ///
    /// Failing to create the file isn't fatal; the store will just look
    /// empty until something can be written to it.
    pub async fn open<P: AsRef<Path>>(path: P) -> CredentialStore {
        let path = path.as_ref().to_path_buf();
        if let Err(e) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
        {
            event!(Level::ERROR,
                "could not create user file {:?}: {}", &path, &e
            );
        }

        CredentialStore { path, write_lock: Mutex::new(()) }
    }

    /// Read the whole file. A read failure looks like an empty store.
    async fn records(&self) -> String {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) => {
                event!(Level::WARN,
                    "error reading user file {:?}: {}", &self.path, &e
                );
                String::new()
            },
        }
    }

    pub async fn exists(&self, username: &str) -> bool {
        self.records().await
            .lines()
            .filter_map(parse_record)
            .any(|(user, _)| same_user(user, username))
    }

    /// Add a record for `username`. Returns `false` without touching the
    /// file if the name is taken (case-insensitively) or the write fails.
    pub async fn register(&self, username: &str, password: &str) -> bool {
        let _guard = self.write_lock.lock().await;

        if self.exists(username).await {
            return false;
        }

        let mut f = match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                event!(Level::ERROR,
                    "error opening user file {:?}: {}", &self.path, &e
                );
                return false;
            },
        };

        let record = format!("{}:{}\n", username, password);
        if let Err(e) = f.write_all(record.as_bytes()).await {
            event!(Level::ERROR,
                "error writing to user file {:?}: {}", &self.path, &e
            );
            return false;
        }
        if let Err(e) = f.flush().await {
            event!(Level::ERROR,
                "error flushing user file {:?}: {}", &self.path, &e
            );
            return false;
        }

        event!(Level::DEBUG, "registered user {:?}", username);
        true
    }

    /// The first record whose name matches decides; the password must
    /// match exactly.
    pub async fn verify(&self, username: &str, password: &str) -> bool {
        self.records().await
            .lines()
            .filter_map(parse_record)
            .find(|(user, _)| same_user(user, username))
            .map(|(_, pass)| pass == password)
            .unwrap_or(false)
    }
}
