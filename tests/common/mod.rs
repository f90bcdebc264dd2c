//! Shared test fixtures: a scripted in-memory transport standing in for a
//! running Discord client, plus frame constructors for the server side of
//! the conversation.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use presencewire::{
    ClientOptions, DiscordRpcClient, EngineConfig, Frame, Message, NullLogger, Opcode, Transport,
};

#[derive(Default)]
struct Inner {
    available: Vec<i32>,
    connected: bool,
    pipe: i32,
    connect_attempts: u32,
    written: Vec<Frame>,
    inbound: VecDeque<Frame>,
}

/// Engine-side endpoint of the scripted pipe.
pub struct ScriptedTransport(Arc<Mutex<Inner>>);

/// Test-side endpoint: inspect what the engine wrote, inject server
/// frames, yank the pipe.
#[derive(Clone)]
pub struct ServerHandle(Arc<Mutex<Inner>>);

/// Build a connected pair. `available` lists the pipe indices that will
/// accept a connection.
pub fn scripted_pipe(available: &[i32]) -> (Box<ScriptedTransport>, ServerHandle) {
    let inner = Arc::new(Mutex::new(Inner {
        available: available.to_vec(),
        pipe: -1,
        ..Inner::default()
    }));
    (
        Box::new(ScriptedTransport(inner.clone())),
        ServerHandle(inner),
    )
}

impl Transport for ScriptedTransport {
    fn connect(&mut self, pipe: i32) -> bool {
        let mut inner = self.0.lock().unwrap();
        inner.connect_attempts += 1;

        let candidates: Vec<i32> = if pipe < 0 { (0..10).collect() } else { vec![pipe] };
        for candidate in candidates {
            if inner.available.contains(&candidate) {
                inner.connected = true;
                inner.pipe = candidate;
                return true;
            }
        }
        false
    }

    fn read_frame(&mut self) -> Option<Frame> {
        let mut inner = self.0.lock().unwrap();
        if !inner.connected {
            return None;
        }
        inner.inbound.pop_front()
    }

    fn write_frame(&mut self, frame: &Frame) -> bool {
        let mut inner = self.0.lock().unwrap();
        if !inner.connected {
            return false;
        }
        inner.written.push(frame.clone());
        true
    }

    fn close(&mut self) {
        let mut inner = self.0.lock().unwrap();
        inner.connected = false;
        inner.pipe = -1;
        inner.inbound.clear();
    }

    fn is_connected(&self) -> bool {
        self.0.lock().unwrap().connected
    }

    fn connected_pipe(&self) -> i32 {
        self.0.lock().unwrap().pipe
    }
}

impl ServerHandle {
    /// Queue a frame for the engine to read.
    pub fn push(&self, frame: Frame) {
        self.0.lock().unwrap().inbound.push_back(frame);
    }

    /// Everything the engine has written so far.
    pub fn written(&self) -> Vec<Frame> {
        self.0.lock().unwrap().written.clone()
    }

    /// Drop the connection from the server side, as a crashed or closed
    /// Discord would.
    pub fn sever(&self) {
        let mut inner = self.0.lock().unwrap();
        inner.connected = false;
        inner.pipe = -1;
        inner.inbound.clear();
    }

    /// Change which pipe indices accept connections.
    pub fn set_available(&self, pipes: &[i32]) {
        self.0.lock().unwrap().available = pipes.to_vec();
    }

    pub fn is_connected(&self) -> bool {
        self.0.lock().unwrap().connected
    }

    pub fn connect_attempts(&self) -> u32 {
        self.0.lock().unwrap().connect_attempts
    }

    /// Wait until the engine has written `count` frames of the given
    /// opcode, returning them all.
    pub fn wait_written(&self, opcode: Opcode, count: usize) -> Vec<Frame> {
        assert!(
            wait_until(Duration::from_secs(5), || {
                self.written().iter().filter(|f| f.opcode == opcode).count() >= count
            }),
            "timed out waiting for {count} written {opcode:?} frame(s); got {:?}",
            self.written()
                .iter()
                .map(|f| f.opcode)
                .collect::<Vec<_>>()
        );
        self.written()
            .into_iter()
            .filter(|f| f.opcode == opcode)
            .collect()
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

/// Engine timings shrunk so scenarios complete in milliseconds.
pub fn fast_engine() -> EngineConfig {
    EngineConfig::new()
        .with_backoff(5, 20)
        .with_tick_interval(Duration::from_millis(2))
        .with_keepalive(Duration::from_secs(15), Duration::from_secs(10))
}

/// A pull-mode client wired to a scripted pipe.
pub fn pull_client(available: &[i32]) -> (DiscordRpcClient, ServerHandle) {
    client_with(available, false, fast_engine())
}

pub fn client_with(
    available: &[i32],
    auto_events: bool,
    engine: EngineConfig,
) -> (DiscordRpcClient, ServerHandle) {
    let (transport, server) = scripted_pipe(available);
    let options = ClientOptions {
        auto_events,
        engine,
        logger: Arc::new(NullLogger),
        transport: Some(transport),
        ..ClientOptions::default()
    };
    let client = DiscordRpcClient::with_options("424087019149328395", options).unwrap();
    (client, server)
}

/// The JSON payload of a frame.
pub fn payload_json(frame: &Frame) -> Value {
    serde_json::from_slice(&frame.payload).unwrap()
}

/// `DISPATCH`/`READY` as Discord sends it after a handshake.
pub fn ready_frame() -> Frame {
    Frame::json(
        Opcode::Frame,
        &json!({
            "cmd": "DISPATCH",
            "evt": "READY",
            "data": {
                "v": 1,
                "config": {
                    "cdn_host": "cdn.discordapp.com",
                    "api_endpoint": "//discordapp.com/api",
                    "environment": "production"
                },
                "user": {
                    "id": "81",
                    "username": "wumpus",
                    "discriminator": "0001",
                    "avatar": "abc123"
                }
            }
        }),
    )
    .unwrap()
}

/// Acknowledgement of a `SET_ACTIVITY`, echoing the activity.
pub fn set_activity_ack(nonce: &str, activity: Value) -> Frame {
    Frame::json(
        Opcode::Frame,
        &json!({"cmd": "SET_ACTIVITY", "data": activity, "nonce": nonce}),
    )
    .unwrap()
}

/// Acknowledgement of a `SUBSCRIBE`/`UNSUBSCRIBE`.
pub fn subscribe_ack(nonce: &str, cmd: &str, evt: &str) -> Frame {
    Frame::json(
        Opcode::Frame,
        &json!({"cmd": cmd, "data": {"evt": evt}, "nonce": nonce}),
    )
    .unwrap()
}

/// A dispatched server event.
pub fn dispatch_frame(evt: &str, data: Value) -> Frame {
    Frame::json(
        Opcode::Frame,
        &json!({"cmd": "DISPATCH", "evt": evt, "data": data}),
    )
    .unwrap()
}

/// Drive the connection to Ready: wait for the handshake, answer READY.
pub fn bring_ready(server: &ServerHandle) {
    server.wait_written(Opcode::Handshake, 1);
    server.push(ready_frame());
}

/// Drain `invoke` into `inbox` until it holds at least `count` messages.
pub fn collect_messages(
    client: &DiscordRpcClient,
    inbox: &mut Vec<Message>,
    count: usize,
) -> bool {
    wait_until(Duration::from_secs(5), || {
        inbox.extend(client.invoke());
        inbox.len() >= count
    })
}
