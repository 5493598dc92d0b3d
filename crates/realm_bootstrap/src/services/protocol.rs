//! Protocol descriptors for the listeners the server registers.
//!
//! The session logic behind each protocol belongs to the game engine; what
//! lives here is the part the service layer needs: a name, the identifier used
//! to route shared ports, and connection handling that respects the world's
//! game state.

use crate::context::{GameState, World};
use async_trait::async_trait;
use serde_json::json;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// A protocol that can be served on a listening port.
#[async_trait]
pub trait Protocol: Send + Sync {
    fn name(&self) -> &'static str;

    /// First byte a client sends to select this protocol on a shared port.
    fn identifier(&self) -> u8;

    /// Whether the server talks before the client does. Such protocols cannot
    /// be routed by first byte and need a port of their own.
    fn server_sends_first(&self) -> bool {
        false
    }

    async fn handle(&self, stream: TcpStream, peer: SocketAddr) -> io::Result<()>;
}

/// Notice for clients arriving while the world is not accepting sessions.
fn unavailable_notice(state: GameState) -> Option<&'static str> {
    match state {
        GameState::Startup | GameState::Init => Some("Gameworld is starting up. Please wait."),
        GameState::Closing | GameState::Shutdown => {
            Some("Gameworld is shutting down. Please reconnect later.")
        }
        GameState::Normal => None,
    }
}

async fn write_line(stream: &mut TcpStream, line: &str) -> io::Result<()> {
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.flush().await
}

async fn read_identifier(stream: &mut TcpStream) -> io::Result<u8> {
    let mut identifier = [0u8; 1];
    stream.read_exact(&mut identifier).await?;
    Ok(identifier[0])
}

/// Counts a session as online for as long as it is alive.
struct SessionGuard<'a>(&'a World);

impl<'a> SessionGuard<'a> {
    fn open(world: &'a World) -> Self {
        world.session_opened();
        Self(world)
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.0.session_closed();
    }
}

/// Player game sessions.
pub struct GameProtocol {
    world: Arc<World>,
}

impl GameProtocol {
    pub fn new(world: Arc<World>) -> Self {
        Self { world }
    }
}

#[async_trait]
impl Protocol for GameProtocol {
    fn name(&self) -> &'static str {
        "game"
    }

    fn identifier(&self) -> u8 {
        0x00
    }

    fn server_sends_first(&self) -> bool {
        true
    }

    async fn handle(&self, mut stream: TcpStream, peer: SocketAddr) -> io::Result<()> {
        if let Some(notice) = unavailable_notice(self.world.game_state()) {
            return write_line(&mut stream, notice).await;
        }

        let _session = SessionGuard::open(&self.world);
        write_line(&mut stream, &format!("Welcome to {}", self.world.name())).await?;

        let mut buffer = [0u8; 1024];
        let mut received = 0usize;
        loop {
            let read = stream.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            received += read;
        }
        debug!(%peer, received, "game session closed");
        Ok(())
    }
}

/// Account login. Answers with where the game world can be reached.
pub struct LoginProtocol {
    world: Arc<World>,
    game_port: u16,
}

impl LoginProtocol {
    pub fn new(world: Arc<World>, game_port: u16) -> Self {
        Self { world, game_port }
    }
}

#[async_trait]
impl Protocol for LoginProtocol {
    fn name(&self) -> &'static str {
        "login"
    }

    fn identifier(&self) -> u8 {
        0x01
    }

    async fn handle(&self, mut stream: TcpStream, peer: SocketAddr) -> io::Result<()> {
        read_identifier(&mut stream).await?;

        let reply = match unavailable_notice(self.world.game_state()) {
            Some(notice) => json!({ "error": notice }),
            None => json!({
                "world": self.world.name(),
                "game_port": self.game_port,
            }),
        };
        debug!(%peer, "login request answered");
        write_line(&mut stream, &reply.to_string()).await
    }
}

/// Server status queries.
pub struct StatusProtocol {
    world: Arc<World>,
}

impl StatusProtocol {
    pub fn new(world: Arc<World>) -> Self {
        Self { world }
    }
}

#[async_trait]
impl Protocol for StatusProtocol {
    fn name(&self) -> &'static str {
        "status"
    }

    fn identifier(&self) -> u8 {
        0xFF
    }

    async fn handle(&self, mut stream: TcpStream, _peer: SocketAddr) -> io::Result<()> {
        read_identifier(&mut stream).await?;
        let status = serde_json::to_string(&self.world.status())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        write_line(&mut stream, &status).await
    }
}
