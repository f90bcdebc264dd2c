//! The connection engine.
//!
//! One worker thread per client owns the pipe transport outright: it
//! discovers pipes, performs the handshake, drains the outbound command
//! queue, decodes inbound frames into [`Message`]s, answers pings, and
//! reconnects with linear backoff when the pipe goes away. Nothing else
//! in the process touches the pipe.

pub mod backoff;
pub(crate) mod queue;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::ipc::frame::Frame;
use crate::ipc::protocol::{
    constants, ClosePayload, CommandKind, CommandPayload, ErrorData, EventPayload,
    HandshakePayload, JoinRequestData, Opcode, ReadyData, SecretData, ServerEvent,
};
use crate::ipc::transport::Transport;
use crate::logging::{log_at, Logger};
use crate::message::{Message, MessageBody};
use crate::nonce::{next_nonce, PendingAcks};
use crate::presence::RichPresence;
use crate::subscription::Subscription;

use backoff::Backoff;
pub(crate) use queue::{Command, CommandQueue};

/// Tunables for the engine worker.
///
/// The defaults implement the documented protocol behavior; tests shrink
/// the timings to keep scenarios fast.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Floor of the reconnect backoff schedule.
    pub backoff_min_ms: u64,

    /// Ceiling of the reconnect backoff schedule.
    pub backoff_max_ms: u64,

    /// Idle sleep between engine ticks; an enqueued command cuts it short.
    pub tick_interval: Duration,

    /// Quiet time on the pipe before a Ping probes it.
    pub ping_after: Duration,

    /// Missing Pong grace before the connection is treated as broken.
    /// Also bounds how long a handshake may stay unanswered.
    pub pong_timeout: Duration,

    /// Outbound commands written per tick.
    pub commands_per_tick: usize,

    /// How long an unacknowledged nonce stays correlatable.
    pub nonce_ttl: Duration,

    /// Name of the worker thread.
    pub thread_name: String,

    /// Send an opcode=Close frame (with our pid) before dropping the
    /// pipe, instead of just disappearing.
    pub shutdown_only: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backoff_min_ms: Backoff::DEFAULT_MIN_MS,
            backoff_max_ms: Backoff::DEFAULT_MAX_MS,
            tick_interval: Duration::from_millis(50),
            ping_after: Duration::from_secs(15),
            pong_timeout: Duration::from_secs(10),
            commands_per_tick: 10,
            nonce_ttl: Duration::from_secs(constants::NONCE_TTL_SECS),
            thread_name: "Discord RPC".to_owned(),
            shutdown_only: true,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backoff(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.backoff_min_ms = min_ms;
        self.backoff_max_ms = max_ms;
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn with_keepalive(mut self, ping_after: Duration, pong_timeout: Duration) -> Self {
        self.ping_after = ping_after;
        self.pong_timeout = pong_timeout;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn with_shutdown_only(mut self, shutdown_only: bool) -> Self {
        self.shutdown_only = shutdown_only;
        self
    }
}

/// Handle to a running engine worker.
pub(crate) struct ConnectionEngine {
    commands: Arc<CommandQueue>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<Box<dyn Transport>>>,
}

impl ConnectionEngine {
    /// Spawn the worker thread. `pipe` selects a single pipe index, or
    /// scans 0 through 9 when negative.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        config: EngineConfig,
        application_id: String,
        pid: u32,
        pipe: i32,
        command_capacity: usize,
        transport: Box<dyn Transport>,
        dispatcher: Arc<Dispatcher>,
        logger: Arc<dyn Logger>,
    ) -> Result<Self> {
        let commands = Arc::new(CommandQueue::new(command_capacity));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            backoff: Backoff::new(config.backoff_min_ms, config.backoff_max_ms),
            config,
            application_id,
            pid,
            pipe,
            transport,
            commands: commands.clone(),
            dispatcher,
            logger,
            shutdown: shutdown.clone(),
            state: EngineState::Disconnected,
            pending: PendingAcks::default(),
            keepalive: KeepAlive::new(),
            subscription: Subscription::EMPTY,
            handshake_started: Instant::now(),
            stopping: false,
        };

        let handle = std::thread::Builder::new()
            .name(worker.config.thread_name.clone())
            .spawn(move || worker.run())?;

        Ok(Self {
            commands,
            shutdown,
            handle: Some(handle),
        })
    }

    /// Enqueue a command; returns the evicted oldest command on overflow.
    pub fn enqueue(&self, command: Command) -> Option<Command> {
        self.commands.push(command)
    }

    /// Signal the worker and join it, recovering the transport so a later
    /// `initialize` can reuse it.
    pub fn stop(mut self) -> Option<Box<dyn Transport>> {
        self.signal_and_join()
    }

    fn signal_and_join(&mut self) -> Option<Box<dyn Transport>> {
        self.shutdown.store(true, Ordering::Release);
        self.commands.interrupt();
        self.handle.take().and_then(|handle| handle.join().ok())
    }
}

impl Drop for ConnectionEngine {
    fn drop(&mut self) {
        let _ = self.signal_and_join();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Disconnected,
    Connecting,
    Handshaking,
    Connected,
    Disconnecting,
}

struct Worker {
    config: EngineConfig,
    application_id: String,
    pid: u32,
    pipe: i32,
    transport: Box<dyn Transport>,
    commands: Arc<CommandQueue>,
    dispatcher: Arc<Dispatcher>,
    logger: Arc<dyn Logger>,
    shutdown: Arc<AtomicBool>,
    state: EngineState,
    backoff: Backoff,
    pending: PendingAcks,
    keepalive: KeepAlive,
    /// Last subscription intent seen on the wire, replayed after re-Ready.
    subscription: Subscription,
    handshake_started: Instant,
    stopping: bool,
}

impl Worker {
    fn run(mut self) -> Box<dyn Transport> {
        log_at!(self.logger, Trace, "connection engine started");

        while !self.should_stop() {
            match self.state {
                EngineState::Connected | EngineState::Handshaking => self.tick_online(),
                _ => self.tick_offline(),
            }
        }

        self.state = EngineState::Disconnecting;
        self.disconnect();
        log_at!(self.logger, Trace, "connection engine stopped");
        self.transport
    }

    fn should_stop(&self) -> bool {
        self.stopping || self.shutdown.load(Ordering::Acquire)
    }

    /// Not connected: try every candidate pipe, then back off.
    fn tick_offline(&mut self) {
        self.state = EngineState::Connecting;

        if self.transport.connect(self.pipe) {
            let pipe = self.transport.connected_pipe();
            log_at!(self.logger, Info, "pipe {pipe} accepted, handshaking");

            let handshake = HandshakePayload {
                v: constants::IPC_VERSION,
                client_id: self.application_id.clone(),
            };
            match Frame::json(Opcode::Handshake, &handshake) {
                Ok(frame) if self.send_frame(&frame) => {
                    self.state = EngineState::Handshaking;
                    self.handshake_started = Instant::now();
                    return;
                }
                _ => {
                    log_at!(self.logger, Warning, "handshake write failed on pipe {pipe}");
                    self.transport.close();
                }
            }
        }

        self.dispatcher
            .deliver(Message::new(MessageBody::ConnectionFailed { pipe: self.pipe }));

        let delay = self.backoff.next();
        log_at!(
            self.logger,
            Trace,
            "no pipe accepted the connection, retrying in {delay:?}"
        );
        self.sleep_interruptible(delay);
    }

    fn tick_online(&mut self) {
        if self.state == EngineState::Handshaking
            && self.handshake_started.elapsed() > self.config.pong_timeout
        {
            self.recycle("handshake timed out");
            return;
        }

        // Outbound, only once Ready; handshake responses outrank commands.
        if self.state == EngineState::Connected {
            for command in self.commands.drain(self.config.commands_per_tick) {
                if !self.send_command(command) {
                    self.recycle("command write failed");
                    return;
                }
                if self.stopping {
                    return;
                }
            }
        }

        // Inbound.
        while let Some(frame) = self.transport.read_frame() {
            self.handle_frame(frame);
            if !self.online() {
                return;
            }
        }
        if !self.transport.is_connected() {
            self.recycle("pipe closed");
            return;
        }

        if self.state == EngineState::Connected {
            match self
                .keepalive
                .poll(self.config.ping_after, self.config.pong_timeout)
            {
                KeepAliveAction::SendPing(sequence) => {
                    log_at!(self.logger, Trace, "pinging idle connection (seq {sequence})");
                    match Frame::json(Opcode::Ping, &json!({ "seq": sequence })) {
                        Ok(frame) if self.send_frame(&frame) => {}
                        _ => {
                            self.recycle("ping write failed");
                            return;
                        }
                    }
                }
                KeepAliveAction::Broken => {
                    self.recycle("no pong before the deadline");
                    return;
                }
                KeepAliveAction::Idle => {}
            }
        }

        let expired = self.pending.expire(self.config.nonce_ttl);
        if expired > 0 {
            log_at!(self.logger, Trace, "expired {expired} unacknowledged nonce(s)");
        }

        self.commands.wait_for_work(self.config.tick_interval);
    }

    fn online(&self) -> bool {
        matches!(
            self.state,
            EngineState::Connected | EngineState::Handshaking
        )
    }

    fn send_command(&mut self, command: Command) -> bool {
        match command {
            Command::Presence { pid, presence } => {
                let args = json!({ "pid": pid, "activity": presence });
                self.send_tracked(CommandKind::SetActivity, None, Some(args))
            }
            Command::Subscribe { event, unsubscribe } => {
                let cmd = if unsubscribe {
                    self.subscription.remove(event);
                    CommandKind::Unsubscribe
                } else {
                    self.subscription.insert(event);
                    CommandKind::Subscribe
                };
                self.send_tracked(cmd, Some(event), None)
            }
            Command::Respond { user_id, accept } => {
                let cmd = if accept {
                    CommandKind::SendActivityJoinInvite
                } else {
                    CommandKind::CloseActivityJoinRequest
                };
                let args = json!({ "user_id": user_id.to_string() });
                self.send_tracked(cmd, None, Some(args))
            }
            Command::Close => {
                self.stopping = true;
                true
            }
        }
    }

    /// Write one command frame, recording its nonce for ack correlation.
    fn send_tracked(
        &mut self,
        cmd: CommandKind,
        event: Option<crate::subscription::EventType>,
        args: Option<Value>,
    ) -> bool {
        let nonce = next_nonce();
        let payload = CommandPayload {
            cmd,
            nonce: nonce.clone(),
            evt: event.map(|e| e.server_event()),
            args,
        };

        let frame = match Frame::json(Opcode::Frame, &payload) {
            Ok(frame) => frame,
            Err(e) => {
                // A command we cannot serialize is dropped, not fatal.
                log_at!(self.logger, Error, "failed to encode {cmd:?}: {e}");
                return true;
            }
        };

        self.pending.record(nonce, cmd, event);
        self.send_frame(&frame)
    }

    fn send_frame(&mut self, frame: &Frame) -> bool {
        if self.transport.write_frame(frame) {
            self.keepalive.touch();
            true
        } else {
            false
        }
    }

    fn handle_frame(&mut self, frame: Frame) {
        self.keepalive.touch();

        match frame.opcode {
            Opcode::Ping => {
                let pong = Frame::new(Opcode::Pong, frame.payload);
                if !self.send_frame(&pong) {
                    self.recycle("pong write failed");
                }
            }
            Opcode::Pong => self.keepalive.pong(),
            Opcode::Close => {
                let close: ClosePayload =
                    serde_json::from_slice(&frame.payload).unwrap_or_default();
                self.dispatcher.deliver(Message::new(MessageBody::Close {
                    code: close.code.unwrap_or(0),
                    reason: close.message.unwrap_or_default(),
                }));
                self.recycle("server closed the connection");
            }
            Opcode::Handshake => {
                log_at!(self.logger, Warning, "unexpected handshake opcode from server");
            }
            Opcode::Frame => self.handle_envelope(&frame.payload),
        }
    }

    fn handle_envelope(&mut self, payload: &[u8]) {
        let envelope: EventPayload = match serde_json::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                // Malformed JSON is logged and skipped; the connection stays.
                log_at!(self.logger, Warning, "skipping malformed payload: {e}");
                return;
            }
        };

        if envelope.cmd == Some(CommandKind::Dispatch) {
            self.handle_dispatch(envelope);
        } else if let Some(nonce) = envelope.nonce.clone() {
            self.handle_ack(&nonce, envelope);
        } else {
            log_at!(self.logger, Trace, "ignoring un-correlated response frame");
        }
    }

    fn handle_dispatch(&mut self, envelope: EventPayload) {
        let data = envelope.data.unwrap_or(Value::Null);
        match envelope.evt {
            Some(ServerEvent::Ready) => self.on_ready(data),
            Some(ServerEvent::Error) => {
                let error: ErrorData = serde_json::from_value(data).unwrap_or_default();
                self.dispatcher.deliver(Message::new(MessageBody::Error {
                    code: error.code,
                    message: error.message,
                }));
            }
            Some(ServerEvent::ActivityJoin) => match serde_json::from_value::<SecretData>(data) {
                Ok(data) => self.dispatcher.deliver(Message::new(MessageBody::Join {
                    secret: data.secret,
                })),
                Err(e) => log_at!(self.logger, Warning, "malformed join event: {e}"),
            },
            Some(ServerEvent::ActivitySpectate) => {
                match serde_json::from_value::<SecretData>(data) {
                    Ok(data) => self.dispatcher.deliver(Message::new(MessageBody::Spectate {
                        secret: data.secret,
                    })),
                    Err(e) => log_at!(self.logger, Warning, "malformed spectate event: {e}"),
                }
            }
            Some(ServerEvent::ActivityJoinRequest) => {
                match serde_json::from_value::<JoinRequestData>(data) {
                    Ok(data) => self
                        .dispatcher
                        .deliver(Message::new(MessageBody::JoinRequest { user: data.user })),
                    Err(e) => log_at!(self.logger, Warning, "malformed join request: {e}"),
                }
            }
            _ => log_at!(self.logger, Trace, "ignoring unrecognized dispatch event"),
        }
    }

    fn on_ready(&mut self, data: Value) {
        let ready: ReadyData = serde_json::from_value(data).unwrap_or_default();
        let pipe = self.transport.connected_pipe();

        self.state = EngineState::Connected;
        self.backoff.reset();
        log_at!(self.logger, Info, "ready on pipe {pipe} (protocol v{})", ready.v);

        self.dispatcher
            .deliver(Message::new(MessageBody::ConnectionEstablished { pipe }));
        self.dispatcher.deliver(Message::new(MessageBody::Ready {
            version: ready.v,
            config: ready.config,
            user: ready.user.unwrap_or_default(),
        }));

        // Re-issue the last known subscription; queued commands follow on
        // the next drain pass.
        for event in self.subscription.iter() {
            if !self.send_tracked(CommandKind::Subscribe, Some(event), None) {
                self.recycle("subscription replay failed");
                return;
            }
        }
    }

    fn handle_ack(&mut self, nonce: &str, envelope: EventPayload) {
        let Some(pending) = self.pending.take(nonce) else {
            log_at!(self.logger, Trace, "ack for unknown nonce {nonce}");
            return;
        };

        if envelope.evt == Some(ServerEvent::Error) {
            let error: ErrorData =
                serde_json::from_value(envelope.data.unwrap_or(Value::Null)).unwrap_or_default();
            log_at!(
                self.logger,
                Warning,
                "{:?} rejected: {} (code {})",
                pending.cmd,
                error.message,
                error.code
            );
            self.dispatcher.deliver(Message::new(MessageBody::Error {
                code: error.code,
                message: error.message,
            }));
            return;
        }

        match pending.cmd {
            CommandKind::SetActivity => {
                let presence = match envelope.data {
                    Some(Value::Null) | None => RichPresence::default(),
                    Some(data) => match serde_json::from_value::<RichPresence>(data) {
                        Ok(presence) => presence,
                        Err(e) => {
                            log_at!(self.logger, Warning, "malformed activity echo: {e}");
                            return;
                        }
                    },
                };
                self.dispatcher
                    .deliver(Message::new(MessageBody::PresenceUpdate { presence }));
            }
            CommandKind::Subscribe => {
                if let Some(event) = pending.event {
                    self.dispatcher
                        .deliver(Message::new(MessageBody::Subscribe { event }));
                }
            }
            CommandKind::Unsubscribe => {
                if let Some(event) = pending.event {
                    self.dispatcher
                        .deliver(Message::new(MessageBody::Unsubscribe { event }));
                }
            }
            CommandKind::SendActivityJoinInvite | CommandKind::CloseActivityJoinRequest => {
                log_at!(self.logger, Trace, "join response acknowledged");
            }
            _ => {}
        }
    }

    /// Drop the pipe and go back to connecting.
    fn recycle(&mut self, reason: &str) {
        log_at!(self.logger, Warning, "connection lost ({reason}), will reconnect");
        self.transport.close();
        self.pending.clear();
        self.keepalive.reset();
        self.state = EngineState::Connecting;
    }

    /// Final teardown on worker exit.
    fn disconnect(&mut self) {
        if self.transport.is_connected() {
            if self.config.shutdown_only {
                let payload = ClosePayload {
                    code: None,
                    message: Some("closing connection".to_owned()),
                    pid: Some(self.pid),
                };
                if let Ok(frame) = Frame::json(Opcode::Close, &payload) {
                    self.send_frame(&frame);
                }
            }
            self.transport.close();
        }
        self.dispatcher.deliver(Message::new(MessageBody::Close {
            code: 0,
            reason: "connection closed by client".to_owned(),
        }));
        self.state = EngineState::Disconnected;
        self.pending.clear();
        self.commands.clear();
    }

    fn sleep_interruptible(&self, total: Duration) {
        let slice = Duration::from_millis(50);
        let deadline = Instant::now() + total;
        while !self.should_stop() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(slice.min(deadline - now));
        }
    }
}

enum KeepAliveAction {
    Idle,
    SendPing(u64),
    Broken,
}

/// Idle detection and ping/pong bookkeeping.
struct KeepAlive {
    last_traffic: Instant,
    outstanding: Option<Instant>,
    sequence: u64,
}

impl KeepAlive {
    fn new() -> Self {
        Self {
            last_traffic: Instant::now(),
            outstanding: None,
            sequence: 0,
        }
    }

    /// Note traffic in either direction.
    fn touch(&mut self) {
        self.last_traffic = Instant::now();
    }

    fn pong(&mut self) {
        self.outstanding = None;
        self.touch();
    }

    fn poll(&mut self, ping_after: Duration, pong_timeout: Duration) -> KeepAliveAction {
        if let Some(sent) = self.outstanding {
            if sent.elapsed() > pong_timeout {
                return KeepAliveAction::Broken;
            }
            return KeepAliveAction::Idle;
        }

        if self.last_traffic.elapsed() > ping_after {
            self.sequence += 1;
            self.outstanding = Some(Instant::now());
            return KeepAliveAction::SendPing(self.sequence);
        }
        KeepAliveAction::Idle
    }

    /// Forget any outstanding probe (connection recycled).
    fn reset(&mut self) {
        self.outstanding = None;
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keepalive_pings_after_idle_and_breaks_without_pong() {
        let mut keepalive = KeepAlive::new();
        let ping_after = Duration::from_millis(10);
        let pong_timeout = Duration::from_millis(10);

        assert!(matches!(
            keepalive.poll(ping_after, pong_timeout),
            KeepAliveAction::Idle
        ));

        std::thread::sleep(Duration::from_millis(15));
        let KeepAliveAction::SendPing(seq) = keepalive.poll(ping_after, pong_timeout) else {
            panic!("expected a ping");
        };
        assert_eq!(seq, 1);

        // Probe outstanding: no second ping inside the grace window.
        assert!(matches!(
            keepalive.poll(ping_after, pong_timeout),
            KeepAliveAction::Idle
        ));

        std::thread::sleep(Duration::from_millis(15));
        assert!(matches!(
            keepalive.poll(ping_after, pong_timeout),
            KeepAliveAction::Broken
        ));
    }

    #[test]
    fn pong_clears_the_outstanding_probe() {
        let mut keepalive = KeepAlive::new();
        let ping_after = Duration::from_millis(5);
        let pong_timeout = Duration::from_millis(50);

        std::thread::sleep(Duration::from_millis(10));
        assert!(matches!(
            keepalive.poll(ping_after, pong_timeout),
            KeepAliveAction::SendPing(_)
        ));

        keepalive.pong();
        assert!(matches!(
            keepalive.poll(ping_after, pong_timeout),
            KeepAliveAction::Idle
        ));

        // The next idle stretch pings again with a fresh sequence.
        std::thread::sleep(Duration::from_millis(10));
        let KeepAliveAction::SendPing(seq) = keepalive.poll(ping_after, pong_timeout) else {
            panic!("expected a second ping");
        };
        assert_eq!(seq, 2);
    }

    #[test]
    fn engine_config_builders_apply() {
        let config = EngineConfig::new()
            .with_backoff(100, 2_000)
            .with_tick_interval(Duration::from_millis(5))
            .with_keepalive(Duration::from_millis(20), Duration::from_millis(10))
            .with_thread_name("rpc-worker")
            .with_shutdown_only(false);

        assert_eq!(config.backoff_min_ms, 100);
        assert_eq!(config.backoff_max_ms, 2_000);
        assert_eq!(config.tick_interval, Duration::from_millis(5));
        assert_eq!(config.ping_after, Duration::from_millis(20));
        assert_eq!(config.thread_name, "rpc-worker");
        assert!(!config.shutdown_only);
    }
}
