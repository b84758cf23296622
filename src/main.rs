use clap::Parser;
use reqscope::middleware::{Audit, Cors, Pipeline};
use reqscope::{App, Config, Router, Server, demo};

#[tokio::main]
async fn main() -> Result<(), reqscope::Error> {
    let config = Config::parse();
    config.init_tracing();

    tracing::info!(
        addr = %config.listen_addr,
        item_delay_ms = config.item_delay_ms,
        "reqscope starting"
    );

    let router = Router::new().register(demo::routes(demo::Settings {
        item_delay: config.item_delay(),
    }));
    let app = App::new(router).with_pipeline(Pipeline::standard(
        Cors::new(config.cors_allow_origin.clone()),
        Audit::tracing(),
    ));

    Server::bind(&config.listen_addr)?.serve(app).await
}
