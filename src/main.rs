use actix_web::{middleware, web, App, HttpServer};
use actix_web_prom::PrometheusMetricsBuilder;
use kube::client::Client;
use log::{debug, info};
use prometheus::Registry;
use slug_controller::{errors, metrics, views, Config, EnvironmentConfig};

#[actix_rt::main]
async fn main() -> Result<(), errors::Error> {
    env_logger::init();

    let env_config: EnvironmentConfig = envy::from_env::<EnvironmentConfig>()?;
    debug!("Environment config: {:?}", &env_config);
    let config = Config::from_env_config(env_config)?;
    info!("Starting with config: {:?}", config);

    let bind_address = format!("{}:{}", &config.server_host, config.server_port);

    let client = Client::try_default().await?;

    let registry = Registry::new();
    metrics::custom_metrics(&registry).map_err(|err| errors::Error::Metrics(err.to_string()))?;
    let prometheus = PrometheusMetricsBuilder::new(metrics::METRICS_NAMESPACE)
        .registry(registry)
        .endpoint("/metrics")
        .build()
        .map_err(|err| errors::Error::Metrics(err.to_string()))?;

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(client.clone()))
            .wrap(prometheus.clone())
            .wrap(middleware::Logger::default().exclude("/health").exclude("/metrics"))
            .wrap(middleware::Compress::default())
            .service(web::resource("/health").to(views::health))
            .service(web::resource("/ready").to(views::ready))
    })
    .bind(&bind_address)?
    .run()
    .await?;
    info!("actix exited");
    Ok(())
}
