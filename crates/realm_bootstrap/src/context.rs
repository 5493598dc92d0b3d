//! Explicit server context.
//!
//! Everything the startup stages touch is reachable from [`ServerContext`],
//! which is built once in `main` and moved into the initialization task. Once
//! the pipeline finishes, the context travels back to the main thread through
//! the startup handshake.

use crate::config::Config;
use crate::services::ServiceManager;
use crate::startup::database::Database;
use crate::startup::keys::RsaKey;
use crate::worker::{SchedulerHandle, TaskHandle};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Coarse lifecycle of the game world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GameState {
    Startup,
    Init,
    Normal,
    Closing,
    Shutdown,
}

/// PvP rules of the world. Only the three listed spellings are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorldType {
    Pvp,
    NoPvp,
    PvpEnforced,
}

impl FromStr for WorldType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "pvp" => Ok(WorldType::Pvp),
            "no-pvp" => Ok(WorldType::NoPvp),
            "pvp-enforced" => Ok(WorldType::PvpEnforced),
            _ => Err(format!(
                "Unknown world type: {}, valid world types are: pvp, no-pvp and pvp-enforced",
                value
            )),
        }
    }
}

impl fmt::Display for WorldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WorldType::Pvp => "PVP",
            WorldType::NoPvp => "NO-PVP",
            WorldType::PvpEnforced => "PVP-ENFORCED",
        };
        f.write_str(label)
    }
}

/// How often house rent is collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RentPeriod {
    Daily,
    Weekly,
    Monthly,
    Yearly,
    #[default]
    Never,
}

impl RentPeriod {
    /// Resolves a configured value. Unrecognized values fall back to
    /// [`RentPeriod::Never`] rather than failing.
    pub fn resolve(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "yearly" => RentPeriod::Yearly,
            "weekly" => RentPeriod::Weekly,
            "monthly" => RentPeriod::Monthly,
            "daily" => RentPeriod::Daily,
            _ => RentPeriod::Never,
        }
    }
}

/// Shared world state, readable from protocol handlers while serving.
pub struct World {
    started_at: Instant,
    name: RwLock<String>,
    state: RwLock<GameState>,
    world_type: RwLock<Option<WorldType>>,
    rent_period: RwLock<RentPeriod>,
    players_online: AtomicUsize,
    saves: AtomicU64,
}

/// Snapshot served by the status protocol.
#[derive(Debug, Clone, Serialize)]
pub struct WorldStatus {
    pub name: String,
    pub state: GameState,
    pub world_type: Option<WorldType>,
    pub players_online: usize,
    pub uptime_secs: u64,
}

impl World {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            started_at: Instant::now(),
            name: RwLock::new(name.into()),
            state: RwLock::new(GameState::Startup),
            world_type: RwLock::new(None),
            rent_period: RwLock::new(RentPeriod::Never),
            players_online: AtomicUsize::new(0),
            saves: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.write() = name.into();
    }

    pub fn game_state(&self) -> GameState {
        *self.state.read()
    }

    pub fn set_game_state(&self, state: GameState) {
        *self.state.write() = state;
    }

    pub fn world_type(&self) -> Option<WorldType> {
        *self.world_type.read()
    }

    pub fn set_world_type(&self, world_type: WorldType) {
        *self.world_type.write() = Some(world_type);
    }

    pub fn rent_period(&self) -> RentPeriod {
        *self.rent_period.read()
    }

    pub fn set_rent_period(&self, period: RentPeriod) {
        *self.rent_period.write() = period;
    }

    pub fn players_online(&self) -> usize {
        self.players_online.load(Ordering::Relaxed)
    }

    pub fn session_opened(&self) {
        self.players_online.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.players_online.fetch_sub(1, Ordering::Relaxed);
    }

    /// Records a completed server save and returns the running total.
    pub fn record_save(&self) -> u64 {
        self.saves.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn saves(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> WorldStatus {
        WorldStatus {
            name: self.name(),
            state: self.game_state(),
            world_type: self.world_type(),
            players_online: self.players_online(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

/// Where the configuration comes from, plus command-line overrides applied
/// after it is loaded.
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    pub path: PathBuf,
    pub data_directory: Option<PathBuf>,
}

/// Submit-only handles to the process workers.
#[derive(Clone)]
pub struct WorkerHandles {
    pub dispatcher: TaskHandle,
    pub scheduler: SchedulerHandle,
    pub async_tasks: TaskHandle,
}

/// Everything the initialization stages read and write.
pub struct ServerContext {
    pub source: ConfigSource,
    pub config: Config,
    pub world: Arc<World>,
    pub services: ServiceManager,
    pub workers: WorkerHandles,
    /// Set by the database stage
    pub database: Option<Database>,
    pub rsa_key: Option<RsaKey>,
}

impl ServerContext {
    pub fn new(source: ConfigSource, workers: WorkerHandles) -> Self {
        let config = Config::default();
        Self {
            world: Arc::new(World::new(config.server.name.clone())),
            services: ServiceManager::new(),
            source,
            config,
            workers,
            database: None,
            rsa_key: None,
        }
    }

    /// Data directory after command-line overrides.
    pub fn data_directory(&self) -> PathBuf {
        self.source
            .data_directory
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.config.map.data_directory))
    }
}
