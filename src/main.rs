use log::{error, info};
use voxwatch_lib::{Engine, EngineConfig, EngineError};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = EngineConfig::from_env();
    let engine = Engine::new(config);

    match engine.start().await {
        Ok(()) => info!("Engine running; press Ctrl-C to stop"),
        Err(EngineError::AuthRequired) => {
            error!("No authenticated session. Log in through the dashboard first.");
            std::process::exit(1);
        }
        Err(e) => {
            error!("Engine failed to start: {}", e);
            std::process::exit(1);
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Signal handling failed: {}", e);
    }
    engine.shutdown();
    info!("Shut down");
}
