//! Network service registration and the accept loop.
//!
//! Listeners are bound synchronously while the initialization pipeline runs,
//! and are only driven once [`ServiceManager::run`] starts a tokio runtime on
//! the main thread. Several protocols may share one port; connections on a
//! shared port are routed by their first byte.

mod protocol;

pub use protocol::{GameProtocol, LoginProtocol, Protocol, StatusProtocol};

use crate::error::StageError;
use socket2::{Domain, Protocol as SocketProtocol, Socket, Type};
use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Grace period for open connections once the service loop stops.
const CONNECTION_DRAIN: Duration = Duration::from_secs(3);

const LISTEN_BACKLOG: i32 = 1024;

/// One bound listener and the protocols served on it.
struct ServicePort {
    listener: StdTcpListener,
    local_addr: SocketAddr,
    protocols: Vec<Arc<dyn Protocol>>,
}

impl ServicePort {
    fn server_sends_first(&self) -> bool {
        self.protocols.iter().any(|p| p.server_sends_first())
    }
}

/// Owns every listening service of the process.
pub struct ServiceManager {
    bind_ip: IpAddr,
    ports: BTreeMap<u16, ServicePort>,
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager {
    pub fn new() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            ports: BTreeMap::new(),
        }
    }

    pub fn with_bind_ip(bind_ip: IpAddr) -> Self {
        Self {
            bind_ip,
            ports: BTreeMap::new(),
        }
    }

    pub fn set_bind_ip(&mut self, bind_ip: IpAddr) {
        self.bind_ip = bind_ip;
    }

    /// Registers `protocol` on `port`, binding a listener if the port is not
    /// open yet. Port 0 always binds a fresh ephemeral listener.
    ///
    /// A failed registration is logged and leaves the manager unchanged.
    pub fn add(&mut self, protocol: Arc<dyn Protocol>, port: u16) -> Result<SocketAddr, StageError> {
        let result = self.register(protocol.clone(), port);
        match &result {
            Ok(addr) => info!("{} protocol listening on {}", protocol.name(), addr),
            Err(e) => error!("{}", e),
        }
        result
    }

    fn register(&mut self, protocol: Arc<dyn Protocol>, port: u16) -> Result<SocketAddr, StageError> {
        if port != 0 {
            if let Some(service_port) = self.ports.get_mut(&port) {
                let conflict = if protocol.server_sends_first() || service_port.server_sends_first() {
                    Some("a protocol that speaks first cannot share its port")
                } else if service_port
                    .protocols
                    .iter()
                    .any(|p| p.identifier() == protocol.identifier())
                {
                    Some("another protocol already uses this identifier")
                } else {
                    None
                };

                if let Some(reason) = conflict {
                    return Err(StageError::NetworkBind {
                        protocol: protocol.name().to_string(),
                        port,
                        source: io::Error::new(io::ErrorKind::AddrInUse, reason),
                    });
                }

                service_port.protocols.push(protocol);
                return Ok(service_port.local_addr);
            }
        }

        let addr = SocketAddr::new(self.bind_ip, port);
        let listener = bind_listener(addr).map_err(|source| StageError::NetworkBind {
            protocol: protocol.name().to_string(),
            port,
            source,
        })?;
        let local_addr = listener.local_addr().map_err(|source| StageError::NetworkBind {
            protocol: protocol.name().to_string(),
            port,
            source,
        })?;

        self.ports.insert(
            local_addr.port(),
            ServicePort {
                listener,
                local_addr,
                protocols: vec![protocol],
            },
        );
        Ok(local_addr)
    }

    /// True iff at least one listener is registered.
    pub fn is_running(&self) -> bool {
        !self.ports.is_empty()
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.ports.values().map(|port| port.local_addr).collect()
    }

    /// `(protocol name, bound port)` for every registered service.
    pub fn services(&self) -> Vec<(&'static str, u16)> {
        self.ports
            .iter()
            .flat_map(|(&port, service_port)| {
                service_port.protocols.iter().map(move |p| (p.name(), port))
            })
            .collect()
    }

    /// Serves every listener until `shutdown` resolves.
    ///
    /// Blocks the calling thread on a dedicated multi-threaded runtime. Open
    /// connections are told to stop and get [`CONNECTION_DRAIN`] to finish.
    pub fn run<S>(self, shutdown: S) -> io::Result<()>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("service-io")
            .enable_all()
            .build()?;

        let result = runtime.block_on(async move {
            let (stop_sender, _) = broadcast::channel(1);
            let mut loops = JoinSet::new();

            for (port, service_port) in self.ports {
                let listener = TcpListener::from_std(service_port.listener)?;
                let protocols: Arc<[Arc<dyn Protocol>]> = service_port.protocols.into();
                debug!(port, "starting accept loop");
                let stop = stop_sender.subscribe();
                loops.spawn(accept_loop(listener, protocols, stop_sender.clone(), stop));
            }

            shutdown.await;
            info!("Stopping network services...");
            // Accept loops hold their own receivers, so a send error only
            // means every loop already exited.
            let _ = stop_sender.send(());

            while let Some(joined) = loops.join_next().await {
                if let Err(e) = joined {
                    warn!("accept loop ended abnormally: {}", e);
                }
            }
            Ok::<(), io::Error>(())
        });

        runtime.shutdown_timeout(CONNECTION_DRAIN);
        result
    }
}

fn bind_listener(addr: SocketAddr) -> io::Result<StdTcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(SocketProtocol::TCP))?;

    #[cfg(unix)]
    socket.set_reuse_address(true)?;

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}

async fn accept_loop(
    listener: TcpListener,
    protocols: Arc<[Arc<dyn Protocol>]>,
    stop_sender: broadcast::Sender<()>,
    mut stop: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = stop.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let protocols = protocols.clone();
                    let mut stop = stop_sender.subscribe();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = stop.recv() => {}
                            result = serve_connection(stream, peer, &protocols) => {
                                if let Err(e) = result {
                                    debug!(%peer, "connection ended with error: {}", e);
                                }
                            }
                        }
                    });
                }
                Err(e) => warn!("failed to accept connection: {}", e),
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    protocols: &[Arc<dyn Protocol>],
) -> io::Result<()> {
    let protocol = match protocols {
        [only] => only.clone(),
        _ => {
            let mut first = [0u8; 1];
            if stream.peek(&mut first).await? == 0 {
                return Ok(());
            }
            match protocols.iter().find(|p| p.identifier() == first[0]) {
                Some(protocol) => protocol.clone(),
                None => {
                    debug!(%peer, identifier = first[0], "no protocol for identifier");
                    return Ok(());
                }
            }
        }
    };

    debug!(%peer, protocol = protocol.name(), "connection accepted");
    protocol.handle(stream, peer).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct Named {
        name: &'static str,
        identifier: u8,
        speaks_first: bool,
    }

    #[async_trait]
    impl Protocol for Named {
        fn name(&self) -> &'static str {
            self.name
        }

        fn identifier(&self) -> u8 {
            self.identifier
        }

        fn server_sends_first(&self) -> bool {
            self.speaks_first
        }

        async fn handle(&self, mut stream: TcpStream, _peer: SocketAddr) -> io::Result<()> {
            let mut identifier = [0u8; 1];
            stream.read_exact(&mut identifier).await?;
            stream.write_all(self.name.as_bytes()).await
        }
    }

    fn named(name: &'static str, identifier: u8, speaks_first: bool) -> Arc<dyn Protocol> {
        Arc::new(Named {
            name,
            identifier,
            speaks_first,
        })
    }

    fn loopback() -> ServiceManager {
        ServiceManager::with_bind_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    #[test]
    fn test_empty_manager_is_not_running() {
        assert!(!ServiceManager::new().is_running());
    }

    #[test]
    fn test_add_binds_listener() {
        let mut services = loopback();
        let addr = services.add(named("game", 0, true), 0).unwrap();
        assert!(services.is_running());
        assert_ne!(addr.port(), 0);
        assert_eq!(services.services(), vec![("game", addr.port())]);
    }

    #[test]
    fn test_bind_failure_leaves_manager_unchanged() {
        let occupied = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let port = occupied.local_addr().unwrap().port();

        let mut services = loopback();
        let result = services.add(named("login", 1, false), port);
        assert!(matches!(result, Err(StageError::NetworkBind { .. })));
        assert!(!services.is_running());
    }

    #[test]
    fn test_shared_port_rules() {
        let mut services = loopback();
        let addr = services.add(named("login", 0x01, false), 0).unwrap();
        let port = addr.port();

        assert_eq!(services.add(named("status", 0xFF, false), port).unwrap(), addr);
        assert!(services.add(named("game", 0x00, true), port).is_err());
        assert!(services.add(named("other", 0xFF, false), port).is_err());

        assert_eq!(services.local_addrs().len(), 1);
        assert_eq!(services.services().len(), 2);
    }

    #[test]
    fn test_run_routes_shared_port_by_first_byte() {
        let mut services = loopback();
        let addr = services.add(named("login", 0x01, false), 0).unwrap();
        services.add(named("status", 0xFF, false), addr.port()).unwrap();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = std::thread::spawn(move || {
            services.run(async move {
                let _ = stop_rx.await;
            })
        });

        let reply = |identifier: u8| {
            use std::io::{Read, Write};
            let mut stream = std::net::TcpStream::connect(addr).unwrap();
            stream.write_all(&[identifier]).unwrap();
            let mut reply = String::new();
            stream.read_to_string(&mut reply).unwrap();
            reply
        };

        assert_eq!(reply(0xFF), "status");
        assert_eq!(reply(0x01), "login");

        stop_tx.send(()).unwrap();
        server.join().unwrap().unwrap();
    }
}
