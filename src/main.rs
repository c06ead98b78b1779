use std::sync::Arc;

use clap::Parser;
use gatehouse::cli::{
    Args, apply_role_grants, build_config, init_logging, load_secrets, open_stores,
};
use gatehouse::run_server;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let Some((access_secret, refresh_secret)) = load_secrets(&args) else {
        std::process::exit(1);
    };

    let Some(stores) = open_stores(&args).await else {
        std::process::exit(1);
    };

    let config = build_config(&args, stores, access_secret, refresh_secret);

    if !args.grant_role.is_empty() {
        let service = config.auth_service(Arc::new(config.jwt_config()));
        if !apply_role_grants(&service, &args.grant_role).await {
            std::process::exit(1);
        }
    }

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    match listener.local_addr() {
        Ok(local_addr) => info!(address = %local_addr, "Listening"),
        Err(e) => error!(error = %e, "Failed to read local address"),
    }

    if let Err(e) = run_server(config, listener).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
