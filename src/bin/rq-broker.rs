//! Main executable, running either the HTTP introspection server or the scheduler.

use actix_web::{middleware::Logger, web, App, HttpServer};
use log::{debug, info};

use rqbroker::application::{split_queue_name, QueueFactory};
use rqbroker::config::{self, Command, Config};
use rqbroker::handlers;
use rqbroker::models::{ApplicationState, Duration};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let (config, command) = config::parse_config_from_cli_args();

    // RUST_LOG takes precedence over the configured level
    let env = env_logger::Env::default().default_filter_or(config.server.log_level.to_string());
    env_logger::Builder::from_env(env).init();

    let factory = match QueueFactory::from_config(&config) {
        Ok(factory) => factory,
        Err(err) => {
            eprintln!("Failed to initialise connections: {}", err);
            std::process::exit(1);
        }
    };

    match command {
        Command::Serve => serve(config, factory).await,
        Command::Scheduler { queue, interval } => {
            run_scheduler(&factory, &queue, interval.map(Duration::from_secs)).await;
            Ok(())
        }
    }
}

async fn serve(config: Config, factory: QueueFactory) -> std::io::Result<()> {
    let http_server_addr = config.server_addr();
    let max_body_size = config.server.max_body_size;
    if let Some(size) = max_body_size {
        debug!("Setting max body size to {} bytes", size);
    }

    let threads = config.server.threads;
    let state = web::Data::new(ApplicationState { factory, config });

    let mut http_server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .configure(|cfg| handlers::configure(cfg, max_body_size))
    });

    // set number of worker threads if configured, or default to number of logical CPUs
    if let Some(num_workers) = threads {
        debug!("Using {} HTTP worker threads", num_workers);
        http_server = http_server.workers(num_workers);
    }

    let http_server = match http_server.bind(&http_server_addr) {
        Ok(server) => server,
        Err(err) => {
            eprintln!("Failed to bind to {}: {}", &http_server_addr, err);
            std::process::exit(1);
        }
    };

    info!("Starting queue broker at: {}", &http_server_addr);
    http_server.run().await
}

async fn run_scheduler(factory: &QueueFactory, queue: &str, interval: Option<Duration>) {
    let (connection_name, queue_name) = split_queue_name(queue);
    let scheduler = match factory.get_scheduler(connection_name, queue_name, interval) {
        Ok(scheduler) => scheduler,
        Err(err) => {
            eprintln!("Failed to start scheduler: {}", err);
            std::process::exit(1);
        }
    };

    let shutdown = async {
        if actix_web::rt::signal::ctrl_c().await.is_err() {
            // no signal handler, so run until killed
            std::future::pending::<()>().await;
        }
    };

    if let Err(err) = scheduler.run_until(shutdown).await {
        eprintln!("Scheduler failed: {}", err);
        std::process::exit(1);
    }
}
