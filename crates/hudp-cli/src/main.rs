use hudp_log::HudpLogger;
use log::{error, info, logger, Level};
use std::time::Instant;

pub mod config;

#[tokio::main]
async fn main() {
    HudpLogger::init(Level::Info, 1024).expect("logger already initialized");

    let start_time = Instant::now();

    let config = match config::handle() {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {e}");
            logger().flush();
            std::process::exit(1);
        }
    };

    let (endpoint, mut received) =
        match hudp::Endpoint::bind(config.local_addr(), config.peer_addr(), config.endpoint_config())
            .await
        {
            Ok(pair) => pair,
            Err(e) => {
                error!("failed to bind endpoint: {e}");
                logger().flush();
                std::process::exit(1);
            }
        };

    info!(
        "hudp endpoint on {} ready in {:.3}s",
        config.network.local_address,
        start_time.elapsed().as_secs_f64()
    );
    logger().flush();

    if config.peer_addr().is_some() {
        match endpoint.register_peer().await {
            Ok(()) => info!("registered with {:?}", config.network.peer_address),
            Err(e) => error!("registration handshake failed: {e}"),
        }
        logger().flush();
    }

    loop {
        tokio::select! {
            received = received.recv() => {
                match received {
                    Some(msg) => info!(
                        "{:?} from {}: {} bytes",
                        msg.channel,
                        msg.peer,
                        msg.payload.len()
                    ),
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                if let Err(e) = endpoint.stop().await {
                    error!("deregister handshake failed: {e}");
                }
                break;
            }
        }
        logger().flush();
    }
}
