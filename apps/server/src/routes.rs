use actix_web::{HttpResponse, Responder, get, post, web};
use tracing::error;

use upwatch_service::Orchestrator;

use crate::AppState;

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health_route).service(trigger_cycle);
}

/// Health check route
/// This route returns no content, the response status is enough.
#[get("/")]
pub async fn health_route() -> impl Responder {
    HttpResponse::Ok()
}

/// On-demand trigger: run one complete check cycle and report its summary.
/// The external scheduler is expected not to overlap calls.
#[post("/cycle")]
pub async fn trigger_cycle(state: web::Data<AppState>) -> impl Responder {
    let orchestrator = match Orchestrator::new(
        state.config.clone(),
        state.store.clone(),
        state.location.clone(),
    ) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!("Failed to assemble cycle orchestrator: {e:#}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    match orchestrator.run_cycle().await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(e) => {
            error!("Cycle failed: {e:#}");
            HttpResponse::InternalServerError().finish()
        }
    }
}
