use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse};
use kube::Client;
use log::warn;

// Simple health check endpoint
pub async fn health(_req: HttpRequest) -> HttpResponse {
    HttpResponse::new(StatusCode::OK)
}

// Ready once the API server answers
pub async fn ready(client: web::Data<Client>, _req: HttpRequest) -> HttpResponse {
    match client.apiserver_version().await {
        Ok(_) => HttpResponse::new(StatusCode::OK),
        Err(err) => {
            warn!("API server is not reachable: {}", err);
            HttpResponse::new(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
