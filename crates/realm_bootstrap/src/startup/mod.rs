//! The standard startup sequence of a game world.
//!
//! Each stage is a plain function over the [`ServerContext`], so custom
//! pipelines can reuse any of them.

pub mod assets;
pub mod database;
pub mod keys;
pub mod notify;

use crate::config::load_config;
use crate::context::{GameState, RentPeriod, ServerContext, WorldType};
use crate::error::StageError;
use crate::pipeline::InitializationPipeline;
use crate::services::{GameProtocol, LoginProtocol, StatusProtocol};
use database::Database;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// The full production pipeline, in load order.
pub fn standard_pipeline() -> InitializationPipeline {
    let pipeline = InitializationPipeline::new()
        .mandatory("startup", announce_startup)
        .mandatory("config", load_configuration)
        .mandatory("rsa key", load_server_key);

    with_world_stages(with_database_stages(pipeline))
}

/// Appends the connection, schema check and table maintenance stages.
pub fn with_database_stages(pipeline: InitializationPipeline) -> InitializationPipeline {
    pipeline
        .mandatory("database", connect_database)
        .mandatory("database schema", check_database_schema)
        .best_effort("optimize tables", optimize_database_tables)
}

/// Appends everything from the data files up to the server save, plus the
/// ready hooks.
pub fn with_world_stages(mut pipeline: InitializationPipeline) -> InitializationPipeline {
    for asset in assets::MANIFEST {
        pipeline = pipeline.mandatory(asset.path, move |ctx: &mut ServerContext| {
            assets::load(&ctx.data_directory(), asset).map(|_| ())
        });
    }

    pipeline
        .mandatory("world type", apply_world_type)
        .mandatory("map", load_main_map)
        .mandatory("custom map", load_custom_map)
        .mandatory("game state", enter_init_state)
        .best_effort("game protocol", register_game_protocol)
        .best_effort("login protocol", register_login_protocol)
        .best_effort("status protocol", register_status_protocol)
        .best_effort("house rent", apply_rent_period)
        .best_effort("privilege check", check_privileges)
        .best_effort("server save", schedule_server_save)
        .on_ready(open_world)
        .on_ready(announce_online)
}

/// Prints the banner and puts the world in its startup state.
pub fn announce_startup(ctx: &mut ServerContext) -> Result<(), StageError> {
    let build = if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    };
    info!(
        "Realm server - version {} ({} build)",
        env!("CARGO_PKG_VERSION"),
        build
    );
    info!(
        "Compiled for {} on {}",
        std::env::consts::ARCH,
        std::env::consts::OS
    );
    ctx.world.set_game_state(GameState::Startup);
    Ok(())
}

/// Loads the configuration file and applies the values other stages rely on.
pub fn load_configuration(ctx: &mut ServerContext) -> Result<(), StageError> {
    let config = load_config(&ctx.source.path)?;
    let bind_ip = config.bind_ip().map_err(StageError::Configuration)?;

    ctx.world.set_name(config.server.name.clone());
    ctx.services.set_bind_ip(bind_ip);
    ctx.config = config;

    info!(
        "Configuration loaded from {} (data directory: {})",
        ctx.source.path.display(),
        ctx.data_directory().display()
    );
    Ok(())
}

/// Relative key paths are resolved against the configuration file's
/// directory.
fn key_path(ctx: &ServerContext) -> PathBuf {
    let configured = PathBuf::from(&ctx.config.server.rsa_key_file);
    match ctx.source.path.parent() {
        Some(dir) if configured.is_relative() => dir.join(configured),
        _ => configured,
    }
}

pub fn load_server_key(ctx: &mut ServerContext) -> Result<(), StageError> {
    let path = key_path(ctx);
    info!("Loading RSA key from {}", path.display());
    ctx.rsa_key = Some(keys::load_rsa_key(&path)?);
    Ok(())
}

pub fn connect_database(ctx: &mut ServerContext) -> Result<(), StageError> {
    info!("Establishing database connection...");
    let mut database = Database::connect(&ctx.config.database)?;
    info!("MySQL Version: {}", database.server_version()?);
    ctx.database = Some(database);
    Ok(())
}

fn connected(ctx: &mut ServerContext) -> Result<&mut Database, StageError> {
    ctx.database
        .as_mut()
        .ok_or_else(|| StageError::Database("not connected".to_string()))
}

/// An empty schema aborts startup.
pub fn check_database_schema(ctx: &mut ServerContext) -> Result<(), StageError> {
    info!("Running database manager...");
    if !connected(ctx)?.is_schema_present()? {
        return Err(StageError::Database(format!(
            "The database you have specified in {} is empty, please import the schema.sql to your database.",
            ctx.source.path.display()
        )));
    }
    Ok(())
}

/// Optimizes fragmented tables when enabled. Finding nothing to optimize is
/// reported as a failure so it shows up in the startup summary.
pub fn optimize_database_tables(ctx: &mut ServerContext) -> Result<(), StageError> {
    if !ctx.config.database.optimize_tables {
        return Ok(());
    }
    match connected(ctx)?.optimize_tables()? {
        0 => Err(StageError::Database("No tables were optimized".to_string())),
        count => {
            info!("{} table(s) optimized", count);
            Ok(())
        }
    }
}

/// An unknown world type aborts startup.
pub fn apply_world_type(ctx: &mut ServerContext) -> Result<(), StageError> {
    let world_type: WorldType = ctx
        .config
        .server
        .world_type
        .parse()
        .map_err(StageError::Configuration)?;
    ctx.world.set_world_type(world_type);
    info!("World type set as {}", world_type);
    Ok(())
}

pub fn load_main_map(ctx: &mut ServerContext) -> Result<(), StageError> {
    let path = assets::map_path(&ctx.data_directory(), &ctx.config.map.name);
    let size = assets::load_map(&path)?;
    info!("Map {} loaded ({} bytes)", path.display(), size);
    Ok(())
}

/// Loads the custom map when it is enabled; a no-op otherwise.
pub fn load_custom_map(ctx: &mut ServerContext) -> Result<(), StageError> {
    if !ctx.config.map.custom_map_enabled {
        return Ok(());
    }
    let path = assets::map_path(&ctx.data_directory(), &ctx.config.map.custom_map_name);
    let size = assets::load_map(&path)?;
    info!("Custom map {} loaded ({} bytes)", path.display(), size);
    Ok(())
}

pub fn enter_init_state(ctx: &mut ServerContext) -> Result<(), StageError> {
    info!("Initializing gamestate...");
    ctx.world.set_game_state(GameState::Init);
    Ok(())
}

pub fn register_game_protocol(ctx: &mut ServerContext) -> Result<(), StageError> {
    let protocol = Arc::new(GameProtocol::new(ctx.world.clone()));
    ctx.services.add(protocol, ctx.config.server.game_port)?;
    Ok(())
}

/// Registers the login protocol. Clients are sent to the game port that was
/// actually bound, falling back to the configured one.
pub fn register_login_protocol(ctx: &mut ServerContext) -> Result<(), StageError> {
    let game_port = ctx
        .services
        .services()
        .into_iter()
        .find(|(name, _)| *name == "game")
        .map(|(_, port)| port)
        .unwrap_or(ctx.config.server.game_port);
    let protocol = Arc::new(LoginProtocol::new(ctx.world.clone(), game_port));
    ctx.services.add(protocol, ctx.config.server.login_port)?;
    Ok(())
}

pub fn register_status_protocol(ctx: &mut ServerContext) -> Result<(), StageError> {
    let protocol = Arc::new(StatusProtocol::new(ctx.world.clone()));
    ctx.services.add(protocol, ctx.config.server.status_port)?;
    Ok(())
}

/// Unrecognized periods fall back to never collecting rent.
pub fn apply_rent_period(ctx: &mut ServerContext) -> Result<(), StageError> {
    let period = RentPeriod::resolve(&ctx.config.server.house_rent_period);
    ctx.world.set_rent_period(period);
    info!("House rent period: {:?}", period);
    Ok(())
}

/// Warns when running with root privileges.
pub fn check_privileges(_ctx: &mut ServerContext) -> Result<(), StageError> {
    #[cfg(unix)]
    {
        // SAFETY: geteuid has no preconditions and cannot fail.
        let euid = unsafe { libc::geteuid() };
        if euid == 0 {
            warn!("Running as root is not recommended.");
        }
    }
    Ok(())
}

/// Schedules the recurring server save. An interval of 0 disables it.
pub fn schedule_server_save(ctx: &mut ServerContext) -> Result<(), StageError> {
    let secs = ctx.config.server.server_save_interval_secs;
    if secs == 0 {
        info!("Scheduled server saves are disabled");
        return Ok(());
    }

    let world = ctx.world.clone();
    ctx.workers
        .scheduler
        .schedule_recurring(Duration::from_secs(secs), move || {
            let count = world.record_save();
            info!("Server save #{} complete", count);
        })?;
    info!("Server save scheduled every {}s", secs);
    Ok(())
}

/// Opens the world to players.
pub fn open_world(ctx: &mut ServerContext) {
    ctx.world.set_game_state(GameState::Normal);
    info!("Loaded all modules, server starting up...");
}

/// Queues the "server online" webhook on the async-task worker.
pub fn announce_online(ctx: &mut ServerContext) {
    let Some(url) = ctx.config.notifications.webhook_url.clone() else {
        return;
    };
    let message = format!("{} has successfully started.", ctx.world.name());

    let submitted = ctx.workers.async_tasks.submit(move || {
        if let Err(e) = notify::send_webhook(&url, "Server is now online", &message, notify::COLOR_ONLINE) {
            warn!("Failed to send startup webhook: {}", e);
        }
    });
    if let Err(e) = submitted {
        warn!("Could not queue startup webhook: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ConfigSource, WorkerHandles};
    use crate::worker::{Scheduler, SchedulerHandle, TaskHandle, TaskWorker};
    use tempfile::TempDir;

    fn context() -> ServerContext {
        let dispatcher = TaskHandle::new(Arc::new(TaskWorker::new("dispatcher")));
        let scheduler =
            SchedulerHandle::new(Arc::new(Scheduler::new("scheduler", dispatcher.clone())));
        let async_tasks = TaskHandle::new(Arc::new(TaskWorker::new("async-tasks")));
        ServerContext::new(
            ConfigSource::default(),
            WorkerHandles {
                dispatcher,
                scheduler,
                async_tasks,
            },
        )
    }

    #[test]
    fn test_standard_pipeline_order() {
        let pipeline = standard_pipeline();
        let names = pipeline.stage_names();
        let position = |name: &str| names.iter().position(|n| *n == name).unwrap();

        assert_eq!(
            names[..7],
            [
                "startup",
                "config",
                "rsa key",
                "database",
                "database schema",
                "optimize tables",
                "items/items.otb"
            ]
        );
        assert!(position("npclua") < position("world type"));
        assert!(position("world type") < position("map"));
        assert!(position("map") < position("game protocol"));
        assert!(position("game protocol") < position("login protocol"));
        assert_eq!(*names.last().unwrap(), "server save");
    }

    #[test]
    fn test_pipeline_without_database_keeps_world_order() {
        let pipeline = with_world_stages(InitializationPipeline::new());
        let names = pipeline.stage_names();
        assert_eq!(names[0], "items/items.otb");
        assert!(!names.contains(&"database"));
        assert_eq!(*names.last().unwrap(), "server save");
    }

    #[test]
    fn test_key_path_follows_config_directory() {
        let mut ctx = context();
        ctx.source.path = PathBuf::from("/etc/realm/config.toml");
        assert_eq!(key_path(&ctx), PathBuf::from("/etc/realm/key.pem"));

        ctx.config.server.rsa_key_file = "/keys/realm.pem".to_string();
        assert_eq!(key_path(&ctx), PathBuf::from("/keys/realm.pem"));
    }

    #[test]
    fn test_missing_server_key_is_reported() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context();
        ctx.source.path = dir.path().join("config.toml");
        assert!(matches!(
            load_server_key(&mut ctx),
            Err(StageError::ResourceLoad { .. })
        ));
        assert!(ctx.rsa_key.is_none());
    }

    #[test]
    fn test_database_stages_need_a_connection() {
        let mut ctx = context();
        assert!(matches!(
            check_database_schema(&mut ctx),
            Err(StageError::Database(_))
        ));
        assert!(optimize_database_tables(&mut ctx).is_err());

        ctx.config.database.optimize_tables = false;
        optimize_database_tables(&mut ctx).unwrap();
    }

    #[test]
    fn test_load_configuration_applies_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nname = \"Testland\"\nip = \"127.0.0.1\"\n").unwrap();

        let mut ctx = context();
        ctx.source.path = path;
        load_configuration(&mut ctx).unwrap();
        assert_eq!(ctx.world.name(), "Testland");
        assert_eq!(ctx.config.server.ip, "127.0.0.1");
    }

    #[test]
    fn test_world_type_is_strict() {
        let mut ctx = context();
        ctx.config.server.world_type = "No-PvP".to_string();
        apply_world_type(&mut ctx).unwrap();
        assert_eq!(ctx.world.world_type(), Some(WorldType::NoPvp));

        ctx.config.server.world_type = "invalid-mode".to_string();
        let err = apply_world_type(&mut ctx).unwrap_err();
        assert!(err.to_string().contains("Unknown world type: invalid-mode"));
    }

    #[test]
    fn test_rent_period_is_lenient() {
        let mut ctx = context();
        ctx.config.server.house_rent_period = "fortnightly".to_string();
        apply_rent_period(&mut ctx).unwrap();
        assert_eq!(ctx.world.rent_period(), RentPeriod::Never);

        ctx.config.server.house_rent_period = "Weekly".to_string();
        apply_rent_period(&mut ctx).unwrap();
        assert_eq!(ctx.world.rent_period(), RentPeriod::Weekly);
    }

    #[test]
    fn test_custom_map_skipped_unless_enabled() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context();
        ctx.source.data_directory = Some(dir.path().to_path_buf());

        load_custom_map(&mut ctx).unwrap();

        ctx.config.map.custom_map_enabled = true;
        assert!(matches!(
            load_custom_map(&mut ctx),
            Err(StageError::ResourceLoad { .. })
        ));
    }

    #[test]
    fn test_main_map_loads_from_data_directory() {
        let dir = TempDir::new().unwrap();
        assets::scaffold(dir.path(), "realm").unwrap();
        let mut ctx = context();
        ctx.source.data_directory = Some(dir.path().to_path_buf());
        load_main_map(&mut ctx).unwrap();
    }

    #[test]
    fn test_server_save_needs_running_scheduler() {
        let mut ctx = context();
        ctx.config.server.server_save_interval_secs = 0;
        schedule_server_save(&mut ctx).unwrap();

        ctx.config.server.server_save_interval_secs = 60;
        assert!(matches!(
            schedule_server_save(&mut ctx),
            Err(StageError::Worker(_))
        ));
    }

    #[test]
    fn test_open_world_sets_normal() {
        let mut ctx = context();
        enter_init_state(&mut ctx).unwrap();
        assert_eq!(ctx.world.game_state(), GameState::Init);
        open_world(&mut ctx);
        assert_eq!(ctx.world.game_state(), GameState::Normal);
    }
}
