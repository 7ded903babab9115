extern crate jemallocator;

// The use of jemalloc (http://jemalloc.net/) as the global allocator is actually QUITE
// important here. The glibc standard allocator cannot handle concurrency nearly as well,
// especially with regard to heap fragmentation.
//
// In particular, post peak usage has been observed to be an issue when using glibc
// as the global allocator, when many computes are requested at the same time. jemalloc
// idles back down to a much smaller footprint once load subsides.
#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

use clap::Parser;
use compute_gateway::config::{Cli, Command, Env};
use compute_gateway::{auth, preset, proxy, routes};
use k8s::ContainerPlatform;
use log::{error, info};
use std::sync::Arc;
use term_colors::*;

#[tokio::main]
async fn main() {
    std::env::set_var("RUST_LOG_STYLE", "always");
    env_logger::init();

    let cli = Cli::parse();
    let Command::Serve(args) = cli.command;

    let env = match Env::from_environment() {
        Ok(env) => env,
        Err(err) => {
            error!("{:?}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = compute_gateway::probe_cluster_connectivity().await {
        error!("container platform is unreachable: {:?}", err);
        std::process::exit(2);
    }

    let pool = match sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&env.db_dsn)
        .await
    {
        Ok(pool) => pool,
        Err(err) => {
            error!("failed to connect to the auth store: {:?}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = sqlx::migrate!("./migrations").run(&pool).await {
        error!("failed to run database migrations: {:?}", err);
        std::process::exit(1);
    }

    let platform: Arc<dyn ContainerPlatform> = Arc::new(k8s::K8sPlatform);

    if let Err(err) = preset::initialize_defaults(&pool, platform.as_ref()).await {
        error!("failed to materialize default presets: {:?}", err);
        std::process::exit(1);
    }

    let factory = auth::TokenFactory::new(env.jwt_secret.clone(), args.issuer.clone());
    let proxy_config = proxy::http::ProxyConfig {
        preview_domain: args.preview_domain.clone(),
        ..Default::default()
    };

    let port = compute_gateway::parse_listen_port(&args.listen);
    let mut rocket_config = rocket::Config::default();
    // If you leave it to the default then it will choose 127.0.0.1, which is not reachable
    // when running in a container, so this is left to 0.0.0.0 intentionally.
    rocket_config.address = "0.0.0.0".parse().unwrap();
    rocket_config.port = port;

    info!(
        "compute-gateway listening on {}, preview domain {}",
        cyan(&format!("0.0.0.0:{}", port)),
        cyan(&args.preview_domain)
    );

    rocket::custom(rocket_config)
        .manage(pool)
        .manage(factory)
        .manage(proxy_config)
        .manage(args)
        .manage(platform)
        .mount("/", routes::all())
        .launch()
        .await
        .unwrap();
}
