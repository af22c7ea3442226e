mod commands;
mod config;
mod dig;
mod factory;
mod hooks_std;
mod motd;
mod session;

use chisel_hooks::HookRegistry;
use chisel_world::{FlatFileSerializer, Serializer, World};
use config::ServerConfig;
use factory::ServerFactory;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting chisel server...");

    let config = ServerConfig::load(Path::new("config/chisel.toml"))?;
    let world_name = config.default_world.clone();
    let world_config = config.world(&world_name);
    info!(
        "Config loaded: bind={}:{}, world={}",
        config.bind, config.port, world_name
    );

    let world_dir = PathBuf::from(&config.world_dir).join(&world_name);
    let serializer: Box<dyn Serializer> = match world_config.serializer.as_str() {
        "flatfile" => Box::new(FlatFileSerializer::new(&world_dir)?),
        other => {
            warn!("unknown serializer {:?}, falling back to flatfile", other);
            Box::new(FlatFileSerializer::new(&world_dir)?)
        }
    };
    let world = Arc::new(World::new(serializer));

    let mut registry = HookRegistry::new();
    hooks_std::register_defaults(&mut registry);
    commands::register_defaults(&mut registry);
    let factory = Arc::new(ServerFactory::new(world, Arc::new(registry)));

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                info!("New connection from {}", peer);
                let factory = factory.clone();
                let world_name = world_name.clone();
                let world_config = world_config.clone();
                tokio::spawn(async move {
                    session::handle_connection(socket, factory, world_name, world_config).await;
                });
            }
            Err(err) => {
                error!("Failed to accept connection: {}", err);
            }
        }
    }
}
