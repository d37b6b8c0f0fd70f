/*!
The chat server's driving nexus.

The hub knows every live session, by id and (once logged in) by name,
and is the only way sessions reach each other. All routing happens under
one lock, which also covers the history append, so each chat line is
written to the log and fanned out as a unit.
*/
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    sync::{
        mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
        watch, Mutex,
    },
};
use tracing::{event, Level};

use crate::{
    credentials::CredentialStore,
    history::HistoryLog,
    message::{self, Outbound, HISTORY_END, HISTORY_START},
    session::Session,
};

/// The hub's handle on one session.
struct Member {
    tx: UnboundedSender<Outbound>,
    /// The name this session is logged in as; `None` until then.
    name: Option<String>,
}

#[derive(Default)]
struct Registry {
    live: BTreeMap<usize, Member>,
    by_name: HashMap<String, usize>,
}

impl Registry {
    /// Queue a line for session `id`. A session whose receiver is gone is
    /// already on its way out, so failures are only logged.
    fn deliver(&self, id: usize, text: &str) {
        if let Some(m) = self.live.get(&id) {
            if m.tx.send(Outbound::Line(text.to_string())).is_err() {
                event!(Level::DEBUG, "session {} no longer receiving", &id);
            }
        }
    }

    /// Point `name` at session `id`; whoever held it before loses it.
    fn register(&mut self, name: &str, id: usize) {
        if let Some(old) = self.by_name.insert(name.to_string(), id) {
            if old != id {
                event!(Level::DEBUG,
                    "name {:?} moved from session {} to {}", name, &old, &id
                );
            }
        }
        if let Some(m) = self.live.get_mut(&id) {
            m.name = Some(name.to_string());
        }
    }

    /// Remove `name` only if it still belongs to session `id`.
    fn unregister(&mut self, name: &str, id: usize) -> bool {
        if self.by_name.get(name) == Some(&id) {
            self.by_name.remove(name);
            true
        } else {
            false
        }
    }
}

pub struct Hub {
    registry: Mutex<Registry>,
    credentials: CredentialStore,
    history: HistoryLog,
    next_id: AtomicUsize,
    stop: watch::Sender<bool>,
    /// Size of the live set, for anyone waiting for it to drain.
    live: watch::Sender<usize>,
}

impl Hub {
    pub fn new(credentials: CredentialStore, history: HistoryLog) -> Hub {
        let (stop, _) = watch::channel(false);
        let (live, _) = watch::channel(0);
        Hub {
            registry: Mutex::new(Registry::default()),
            credentials,
            history,
            next_id: AtomicUsize::new(0),
            stop,
            live,
        }
    }

    pub fn credentials(&self) -> &CredentialStore { &self.credentials }

    pub fn is_shutting_down(&self) -> bool { *self.stop.borrow() }

    pub async fn live_count(&self) -> usize {
        self.registry.lock().await.live.len()
    }

    /// Resolve once no sessions are left.
    pub async fn wait_idle(&self) {
        let mut live = self.live.subscribe();
        // The sender lives as long as `self`, so this can't fail.
        let _ = live.wait_for(|&n| n == 0).await;
    }

    /// Add a new session to the live set and hand back its id and the
    /// receiving end of its channel.
    pub async fn connect(&self) -> (usize, UnboundedReceiver<Outbound>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = unbounded_channel();

        let mut reg = self.registry.lock().await;
        // A session that sneaks in after shutdown() took its snapshot still
        // gets told to leave.
        if self.is_shutting_down() {
            let _ = tx.send(Outbound::Close);
        }
        reg.live.insert(id, Member { tx, name: None });
        self.live.send_replace(reg.live.len());
        event!(Level::DEBUG, "session {} connected; {} live", &id, reg.live.len());

        (id, rx)
    }

    /// Take session `id` out of both views. Returns the name it was logged
    /// in as, if any. Calling this again for the same id does nothing.
    pub async fn disconnect(&self, id: usize) -> Option<String> {
        let mut reg = self.registry.lock().await;
        let member = reg.live.remove(&id)?;
        if let Some(ref name) = member.name {
            reg.unregister(name, id);
        }
        self.live.send_replace(reg.live.len());
        event!(Level::DEBUG, "session {} gone; {} live", &id, reg.live.len());

        member.name
    }

    pub async fn register_username(&self, name: &str, id: usize) {
        self.registry.lock().await.register(name, id);
    }

    pub async fn unregister_username(&self, name: &str, id: usize) -> bool {
        self.registry.lock().await.unregister(name, id)
    }

    /// Mark session `id` as logged in as `name`, then queue the greeting
    /// and the history replay. Nothing can be broadcast between the two,
    /// so the replay is never split by live traffic.
    pub async fn login(&self, id: usize, name: &str) {
        let mut reg = self.registry.lock().await;
        reg.register(name, id);

        reg.deliver(id, &message::login_ok(name));
        reg.deliver(id, HISTORY_START);
        for line in self.history.read_all().await.iter() {
            reg.deliver(id, line);
        }
        reg.deliver(id, HISTORY_END);
        event!(Level::DEBUG, "session {} logged in as {:?}", &id, name);
    }

    /// Move session `id` from `old` to `new`. Fails if another session
    /// currently holds `new`.
    pub async fn rename(&self, id: usize, old: &str, new: &str) -> bool {
        let mut reg = self.registry.lock().await;
        match reg.by_name.get(new) {
            Some(&other) if other != id => return false,
            _ => {},
        }
        reg.unregister(old, id);
        reg.register(new, id);
        true
    }

    /// Log `text` and send it to every logged-in session.
    pub async fn broadcast(&self, text: &str) {
        let reg = self.registry.lock().await;
        self.history.append(text).await;

        let mut n: usize = 0;
        for (&id, m) in reg.live.iter() {
            if m.name.is_some() {
                reg.deliver(id, text);
                n += 1;
            }
        }
        event!(Level::TRACE, "broadcast {:?} to {} sessions", text, &n);
    }

    /// Send a direct message from session `from_id` (logged in as `from`)
    /// to whoever is logged in as `to`, echoing it back to the sender.
    pub async fn send_direct(&self, from_id: usize, from: &str, to: &str, text: &str) {
        let line = message::direct(from, to, text);

        let reg = self.registry.lock().await;
        self.history.append(&line).await;

        match reg.by_name.get(to) {
            Some(&to_id) => {
                reg.deliver(to_id, &line);
                if to_id != from_id {
                    reg.deliver(from_id, &line);
                }
            },
            None => {
                event!(Level::TRACE, "DM from {:?}: no user {:?}", from, to);
                reg.deliver(from_id, &message::not_found(to));
            },
        }
    }

    /// Start a session for a freshly-accepted connection.
    pub async fn spawn_session<S>(self: &Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (id, rx) = self.connect().await;
        let session = Session::new(id, stream, rx, self.clone());
        tokio::spawn(async move {
            session.start().await
        });
    }

    /// Accept connections until `shutdown()` is called. The listener is
    /// dropped (closing the endpoint) on the way out.
    pub async fn run(self: Arc<Self>, listener: TcpListener) {
        let mut stop = self.stop.subscribe();
        if let Ok(addr) = listener.local_addr() {
            event!(Level::INFO, "listening on {}", &addr);
        }

        loop {
            if *stop.borrow_and_update() {
                break;
            }

            tokio::select!{
                biased;

                _ = stop.changed() => { /* checked at the top */ },

                res = listener.accept() => match res {
                    Ok((socket, addr)) => {
                        event!(Level::DEBUG, "accepted connection from {}", &addr);
                        self.spawn_session(socket).await;
                    },
                    Err(e) => {
                        event!(Level::WARN, "error accepting connection: {}", &e);
                    },
                },
            }
        }

        drop(listener);
        event!(Level::INFO, "no longer accepting connections");
    }

    /// Stop accepting and tell every live session to close.
    pub async fn shutdown(&self) {
        self.stop.send_replace(true);

        let reg = self.registry.lock().await;
        for (id, m) in reg.live.iter() {
            if m.tx.send(Outbound::Close).is_err() {
                event!(Level::DEBUG, "session {} already closing", id);
            }
        }
        event!(Level::INFO, "shutdown sent to {} sessions", reg.live.len());
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::{
        io::{AsyncBufReadExt, BufReader},
        net::TcpStream,
        time::timeout,
    };

    use super::*;

    async fn test_hub(dir: &tempfile::TempDir) -> Arc<Hub> {
        let creds = CredentialStore::open(dir.path().join("users.txt")).await;
        let history = HistoryLog::new(dir.path().join("chat_history.txt"));
        Arc::new(Hub::new(creds, history))
    }

    fn line(s: &str) -> Outbound { Outbound::Line(s.to_string()) }

    fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut v = Vec::new();
        while let Ok(o) = rx.try_recv() {
            v.push(o);
        }
        v
    }

    #[tokio::test]
    async fn login_replays_history() {
        let dir = tempfile::tempdir().unwrap();
        let hub = test_hub(&dir).await;
        hub.history.append("old news").await;

        let (id, mut rx) = hub.connect().await;
        hub.login(id, "alice").await;

        assert_eq!(
            drain(&mut rx),
            vec![
                line("Login successful. Welcome, alice!"),
                line(HISTORY_START),
                line("old news"),
                line(HISTORY_END),
            ]
        );
    }

    #[tokio::test]
    async fn broadcast_reaches_logged_in_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let hub = test_hub(&dir).await;

        let (a, mut a_rx) = hub.connect().await;
        let (b, mut b_rx) = hub.connect().await;
        let (_c, mut c_rx) = hub.connect().await;
        hub.register_username("A", a).await;
        hub.register_username("B", b).await;

        hub.broadcast("A: hi").await;

        assert_eq!(drain(&mut a_rx), vec![line("A: hi")]);
        assert_eq!(drain(&mut b_rx), vec![line("A: hi")]);
        // Not logged in yet.
        assert!(drain(&mut c_rx).is_empty());
        assert_eq!(hub.history.read_all().await, vec!["A: hi".to_string()]);
    }

    #[tokio::test]
    async fn direct_messages() {
        let dir = tempfile::tempdir().unwrap();
        let hub = test_hub(&dir).await;

        let (a, mut a_rx) = hub.connect().await;
        let (b, mut b_rx) = hub.connect().await;
        let (c, mut c_rx) = hub.connect().await;
        hub.register_username("A", a).await;
        hub.register_username("B", b).await;
        hub.register_username("C", c).await;

        hub.send_direct(a, "A", "B", "hello").await;
        assert_eq!(drain(&mut b_rx), vec![line("[DM] A -> B: hello")]);
        assert_eq!(drain(&mut a_rx), vec![line("[DM] A -> B: hello")]);
        assert!(drain(&mut c_rx).is_empty());

        hub.send_direct(a, "A", "Z", "anyone?").await;
        assert_eq!(
            drain(&mut a_rx),
            vec![line("User 'Z' not found or not logged in.")]
        );
        assert!(drain(&mut b_rx).is_empty());
        assert!(drain(&mut c_rx).is_empty());

        // Talking to yourself only shows up once.
        hub.send_direct(a, "A", "A", "note").await;
        assert_eq!(drain(&mut a_rx), vec![line("[DM] A -> A: note")]);

        assert_eq!(
            hub.history.read_all().await,
            vec![
                "[DM] A -> B: hello".to_string(),
                "[DM] A -> Z: anyone?".to_string(),
                "[DM] A -> A: note".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn sender_without_session_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let hub = test_hub(&dir).await;
        let (b, mut b_rx) = hub.connect().await;
        hub.register_username("B", b).await;

        hub.send_direct(999, "ghost", "B", "boo").await;
        assert_eq!(drain(&mut b_rx), vec![line("[DM] ghost -> B: boo")]);
        hub.send_direct(999, "ghost", "nobody", "boo").await;
        assert!(drain(&mut b_rx).is_empty());
    }

    #[tokio::test]
    async fn last_login_wins() {
        let dir = tempfile::tempdir().unwrap();
        let hub = test_hub(&dir).await;

        let (old, mut old_rx) = hub.connect().await;
        let (new, mut new_rx) = hub.connect().await;
        let (x, mut x_rx) = hub.connect().await;
        hub.register_username("alice", old).await;
        hub.register_username("alice", new).await;
        hub.register_username("x", x).await;

        hub.send_direct(x, "x", "alice", "which?").await;
        assert_eq!(drain(&mut new_rx), vec![line("[DM] x -> alice: which?")]);
        assert!(drain(&mut old_rx).is_empty());
        drain(&mut x_rx);

        // The stale session leaving must not evict the newer login.
        assert!(!hub.unregister_username("alice", old).await);
        assert_eq!(hub.disconnect(old).await, Some("alice".to_string()));
        hub.send_direct(x, "x", "alice", "still there?").await;
        assert_eq!(drain(&mut new_rx), vec![line("[DM] x -> alice: still there?")]);

        assert!(hub.unregister_username("alice", new).await);
        hub.send_direct(x, "x", "alice", "gone?").await;
        assert_eq!(
            drain(&mut x_rx),
            vec![line("User 'alice' not found or not logged in.")]
        );
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let hub = test_hub(&dir).await;

        let (a, _a_rx) = hub.connect().await;
        hub.register_username("A", a).await;
        assert_eq!(hub.live_count().await, 1);

        assert_eq!(hub.disconnect(a).await, Some("A".to_string()));
        assert_eq!(hub.disconnect(a).await, None);
        assert_eq!(hub.live_count().await, 0);
        timeout(Duration::from_secs(5), hub.wait_idle()).await.unwrap();
        assert!(!hub.unregister_username("A", a).await);
    }

    #[tokio::test]
    async fn wait_idle_follows_disconnects() {
        let dir = tempfile::tempdir().unwrap();
        let hub = test_hub(&dir).await;

        // Nothing connected yet.
        timeout(Duration::from_secs(5), hub.wait_idle()).await.unwrap();

        let (a, _a_rx) = hub.connect().await;
        let (b, _b_rx) = hub.connect().await;
        let waiter = tokio::spawn({
            let hub = hub.clone();
            async move { hub.wait_idle().await }
        });

        hub.disconnect(a).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        hub.disconnect(b).await;
        timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn rename_moves_the_entry() {
        let dir = tempfile::tempdir().unwrap();
        let hub = test_hub(&dir).await;

        let (a, mut a_rx) = hub.connect().await;
        let (b, _b_rx) = hub.connect().await;
        hub.register_username("A", a).await;
        hub.register_username("B", b).await;

        assert!(!hub.rename(a, "A", "B").await);
        assert!(hub.rename(a, "A", "Alpha").await);

        hub.send_direct(b, "B", "Alpha", "hey").await;
        assert_eq!(drain(&mut a_rx), vec![line("[DM] B -> Alpha: hey")]);
        assert_eq!(hub.disconnect(a).await, Some("Alpha".to_string()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_broadcasts_keep_lines_whole() {
        let dir = tempfile::tempdir().unwrap();
        let hub = test_hub(&dir).await;
        let (a, mut a_rx) = hub.connect().await;
        hub.register_username("A", a).await;

        let mut handles = Vec::new();
        for n in 0..32 {
            let hub = hub.clone();
            handles.push(tokio::spawn(async move {
                let text = format!("user{}: {}", n, "x".repeat(512));
                hub.broadcast(&text).await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let logged = hub.history.read_all().await;
        assert_eq!(logged.len(), 32);
        for l in logged.iter() {
            assert!(l.starts_with("user"));
            assert!(l.ends_with(&"x".repeat(512)));
        }

        // The session saw them in the same order they were logged.
        let seen: Vec<Outbound> = drain(&mut a_rx);
        let logged: Vec<Outbound> = logged.into_iter().map(Outbound::Line).collect();
        assert_eq!(seen, logged);
    }

    #[tokio::test]
    async fn shutdown_closes_everyone() {
        let dir = tempfile::tempdir().unwrap();
        let hub = test_hub(&dir).await;

        let (_a, mut a_rx) = hub.connect().await;
        let (_b, mut b_rx) = hub.connect().await;
        hub.shutdown().await;
        assert!(hub.is_shutting_down());
        assert_eq!(drain(&mut a_rx), vec![Outbound::Close]);
        assert_eq!(drain(&mut b_rx), vec![Outbound::Close]);

        // Latecomers are told too.
        let (_c, mut c_rx) = hub.connect().await;
        assert_eq!(drain(&mut c_rx), vec![Outbound::Close]);

        // Twice is fine.
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn accept_loop_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let hub = test_hub(&dir).await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(hub.clone().run(listener));

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        let first = timeout(Duration::from_secs(5), lines.next_line())
            .await.unwrap().unwrap();
        assert_eq!(first.as_deref(), Some(message::WELCOME_TEXT));

        hub.shutdown().await;
        timeout(Duration::from_secs(5), server).await.unwrap().unwrap();

        // The client is told, then the connection ends.
        let mut rest = Vec::new();
        while let Some(l) = timeout(Duration::from_secs(5), lines.next_line())
            .await.unwrap().unwrap()
        {
            rest.push(l);
        }
        assert_eq!(rest.last().map(String::as_str), Some(message::SHUTDOWN_TEXT));

        // Nothing is listening any more.
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
