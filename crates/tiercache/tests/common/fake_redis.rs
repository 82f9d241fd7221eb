//! In-process RESP server speaking just enough Redis for the lock and
//! publish paths, with switches to stop answering chosen commands.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use deadpool_redis::{Pool, PoolConfig, Runtime};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[derive(Default)]
struct State {
    keys: Mutex<HashMap<String, String>>,
    silent_on: Mutex<HashSet<String>>,
    connections: AtomicUsize,
    set_calls: AtomicUsize,
}

pub struct FakeRedis {
    url: String,
    state: Arc<State>,
}

impl FakeRedis {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("redis://{}", listener.local_addr().unwrap());
        let state = Arc::new(State::default());

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(socket, Arc::clone(&accept_state)));
            }
        });

        Self { url, state }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Pool of at most `size` connections, without the startup PING.
    pub fn pool(&self, size: usize) -> Pool {
        let mut config = deadpool_redis::Config::from_url(self.url.as_str());
        config.pool = Some(PoolConfig::new(size));
        config.create_pool(Some(Runtime::Tokio1)).unwrap()
    }

    /// Swallow every `command` from now on. The connection that received it
    /// stays silent afterwards, as replies must keep their order.
    pub fn never_answer(&self, command: &str) {
        self.state
            .silent_on
            .lock()
            .unwrap()
            .insert(command.to_ascii_uppercase());
    }

    /// Drop every key, as if all leases had expired.
    pub fn expire_all(&self) {
        self.state.keys.lock().unwrap().clear();
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.keys.lock().unwrap().contains_key(key)
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> usize {
        self.state.set_calls.load(Ordering::SeqCst)
    }
}

async fn serve(socket: TcpStream, state: Arc<State>) {
    let (read, mut write) = socket.into_split();
    let mut reader = BufReader::new(read);
    let mut silent = false;

    while let Some(args) = read_command(&mut reader).await {
        let Some(command) = args.first().map(|c| c.to_ascii_uppercase()) else {
            continue;
        };
        if silent || state.silent_on.lock().unwrap().contains(&command) {
            silent = true;
            continue;
        }
        let reply = respond(&state, &command, &args[1..]);
        if write.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

async fn read_command<R>(reader: &mut BufReader<R>) -> Option<Vec<String>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    let count: usize = line.trim_end().strip_prefix('*')?.parse().ok()?;

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        line.clear();
        reader.read_line(&mut line).await.ok()?;
        let len: usize = line.trim_end().strip_prefix('$')?.parse().ok()?;
        let mut buf = vec![0u8; len + 2];
        reader.read_exact(&mut buf).await.ok()?;
        buf.truncate(len);
        args.push(String::from_utf8_lossy(&buf).into_owned());
    }
    Some(args)
}

fn bulk(value: &str) -> String {
    format!("${}\r\n{}\r\n", value.len(), value)
}

fn respond(state: &State, command: &str, args: &[String]) -> String {
    let mut keys = state.keys.lock().unwrap();
    match command {
        "PING" => args.first().map_or_else(|| "+PONG\r\n".to_string(), |v| bulk(v)),
        "CLIENT" | "UNWATCH" => "+OK\r\n".to_string(),
        "SET" => {
            state.set_calls.fetch_add(1, Ordering::SeqCst);
            let nx = args.iter().any(|a| a.eq_ignore_ascii_case("NX"));
            if nx && keys.contains_key(&args[0]) {
                "$-1\r\n".to_string()
            } else {
                keys.insert(args[0].clone(), args[1].clone());
                "+OK\r\n".to_string()
            }
        }
        "GET" => keys
            .get(&args[0])
            .map_or_else(|| "$-1\r\n".to_string(), |v| bulk(v)),
        "DEL" => {
            let removed = args.iter().filter(|k| keys.remove(*k).is_some()).count();
            format!(":{removed}\r\n")
        }
        // Both lock scripts take one key and compare its value with the
        // token; the release script passes no further arguments.
        "EVALSHA" | "EVAL" => {
            let (key, token) = (&args[2], &args[3]);
            let owned = keys.get(key) == Some(token);
            if owned && args.len() == 4 {
                keys.remove(key);
            }
            format!(":{}\r\n", i64::from(owned))
        }
        "PUBLISH" => ":0\r\n".to_string(),
        other => format!("-ERR unknown command '{other}'\r\n"),
    }
}
