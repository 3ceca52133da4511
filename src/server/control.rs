use std::{
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    thread,
    time::Duration,
};

use log::{debug, error, info, warn};
use uuid::Uuid;

use super::registry::{SessionControl, SessionRegistry};
use super::session::{Session, SessionEvent, spawn_worker};
use super::ServerError;
use crate::config::ServerConfig;
use crate::engine::Engine;
use crate::protocol::{Command, ProtocolTransport, Response, TransportError};

/// How often an idle control connection checks for shutdown.
const CONTROL_POLL: Duration = Duration::from_millis(250);

/// Control-plane state shared with the connection handlers.
struct Shared<E: Engine> {
    engine: E,
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    running: Arc<AtomicBool>,
    events: mpsc::Sender<SessionEvent>,
}

/// Accepts control connections and turns each `Connect` into a session with
/// its own listener, worker thread and database handle.
pub struct ControlServer<E: Engine> {
    listener: TcpListener,
    local_addr: SocketAddr,
    shared: Arc<Shared<E>>,
}

impl<E: Engine> ControlServer<E> {
    pub fn bind(config: ServerConfig, engine: E) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.control_addr)?;
        let local_addr = listener.local_addr()?;

        let registry = Arc::new(SessionRegistry::new());
        let (events, receiver) = mpsc::channel();
        spawn_supervisor(Arc::clone(&registry), receiver)?;

        Ok(Self {
            listener,
            local_addr,
            shared: Arc::new(Shared {
                engine,
                config,
                registry,
                running: Arc::new(AtomicBool::new(true)),
                events,
            }),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            control_addr: reachable(self.local_addr),
            registry: Arc::clone(&self.shared.registry),
            running: Arc::clone(&self.shared.running),
        }
    }

    /// Serve control connections until shut down, then tear down every
    /// remaining session.
    ///
    /// Clients hold their control connection for the lifetime of their
    /// session, so each one is served on its own thread.
    pub fn serve(self) -> Result<(), ServerError> {
        info!("listening at {}", self.local_addr);

        for stream in self.listener.incoming() {
            if !self.shared.running.load(Ordering::SeqCst) {
                break;
            }
            match stream {
                Ok(stream) => {
                    if let Err(e) = spawn_handler(stream, Arc::clone(&self.shared)) {
                        error!("failed to start control handler: {e}");
                    }
                }
                Err(e) => warn!("broken connection: {e:?}"),
            }
        }

        info!("control server stopping");
        self.shutdown_handle().stop_sessions();
        Ok(())
    }
}

impl<E: Engine> Shared<E> {
    fn open_session(&self) -> Result<(Uuid, u16), ServerError> {
        let id = Uuid::new_v4();
        let listener = TcpListener::bind((self.config.session_host, 0))?;
        let listen_addr = listener.local_addr()?;
        let handle = self.engine.duplicate_handle()?;
        let control = Arc::new(SessionControl::new(reachable(listen_addr)));

        self.registry.insert(id, Arc::clone(&control));
        let spawned = spawn_worker(
            Session::new(id, handle),
            listener,
            control,
            self.events.clone(),
            self.config.max_frame_size,
        );
        if let Err(e) = spawned {
            self.registry.discard(id);
            return Err(e.into());
        }

        info!("session {id} listening on {listen_addr}");
        Ok((id, listen_addr.port()))
    }

    fn close_session(&self, id: Uuid) -> Result<(), ServerError> {
        let control = self.registry.remove(id)?;
        control.stop();
        info!("session {id} disconnected");
        Ok(())
    }
}

fn spawn_handler<E: Engine>(stream: TcpStream, shared: Arc<Shared<E>>) -> io::Result<()> {
    let peer = stream.peer_addr()?;
    thread::Builder::new()
        .name(format!("control-{peer}"))
        .spawn(move || {
            if let Err(e) = handle_connection(stream, &shared) {
                warn!("control connection failed: {e}");
            }
        })?;
    Ok(())
}

fn handle_connection<E: Engine>(stream: TcpStream, shared: &Shared<E>) -> Result<(), ServerError> {
    let peer = stream.peer_addr()?;
    stream.set_read_timeout(Some(CONTROL_POLL))?;
    debug!("control connection from {peer}");

    let mut transport = ProtocolTransport::with_max_frame_size(stream, shared.config.max_frame_size);
    while shared.running.load(Ordering::SeqCst) {
        let command = match transport.read_command() {
            Ok(Some(command)) => command,
            Ok(None) => break,
            Err(TransportError::Io(e)) if is_timeout(&e) => continue,
            Err(e) if e.is_recoverable() => {
                warn!("control connection {peer}: {e}");
                transport.write_response(&Response::exception(e))?;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        debug!("control connection {peer} received '{}'", command.op());
        let response = match command {
            Command::Connect => match shared.open_session() {
                Ok((session_id, port)) => Response::Connected { port, session_id },
                Err(e) => {
                    error!("failed to open session: {e}");
                    Response::exception(e)
                }
            },
            Command::Disconnect { session_id } => match shared.close_session(session_id) {
                Ok(()) => Response::Disconnected { session_id },
                Err(e) => {
                    warn!("disconnect from {peer} refused: {e}");
                    Response::exception(e)
                }
            },
            other => Response::exception(ServerError::WrongChannel(other.op())),
        };
        transport.write_response(&response)?;
    }

    debug!("control connection from {peer} closed");
    Ok(())
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Releases registry entries of sessions whose worker ended on its own,
/// such as when the client dropped its connection without `Disconnect`.
fn spawn_supervisor(
    registry: Arc<SessionRegistry>,
    events: mpsc::Receiver<SessionEvent>,
) -> io::Result<()> {
    thread::Builder::new()
        .name("session-supervisor".into())
        .spawn(move || {
            for event in events {
                match event {
                    SessionEvent::Closed(id) => {
                        if registry.discard(id) {
                            info!("session {id} ended without Disconnect, released");
                        }
                    }
                }
            }
            debug!("session supervisor exiting");
        })?;
    Ok(())
}

/// An address a local client can connect to, even when bound to the
/// unspecified address.
fn reachable(addr: SocketAddr) -> SocketAddr {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, addr.port())
}

/// Stops a running [`ControlServer`] from another thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    control_addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    running: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Stop accepting control connections and tear down every session.
    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            // Wake the accept loop so it notices.
            if let Err(e) = TcpStream::connect_timeout(&self.control_addr, CONTROL_POLL) {
                debug!("waking control listener: {e}");
            }
        }
        self.stop_sessions();
    }

    pub fn active_sessions(&self) -> usize {
        self.registry.len()
    }

    fn stop_sessions(&self) {
        for (id, control) in self.registry.drain() {
            control.stop();
            info!("session {id} stopped");
        }
    }
}
