// Foreman API
//
// Thin HTTP boundary over the engine: workflow control, event streams,
// health and metrics. Route modules follow the `routes(state)` pattern;
// everything interesting happens in foreman-engine.

pub mod ops;
pub mod workflows;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use workflows::AppState;

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        workflows::create_workflow,
        workflows::list_workflows,
        workflows::get_workflow,
        workflows::start_workflow,
        workflows::pause_workflow,
        workflows::resume_workflow,
        workflows::cancel_workflow,
        workflows::archive_workflow,
        workflows::list_events,
        workflows::list_phases,
        ops::health,
        ops::metrics,
    ),
    components(schemas(
        workflows::CreateWorkflowRequest,
        workflows::CancelRequest,
        workflows::WorkflowDto,
        workflows::PhaseDto,
        workflows::EventDto,
    )),
    tags(
        (name = "workflows", description = "Workflow control endpoints"),
        (name = "ops", description = "Health and metrics endpoints")
    ),
    info(
        title = "Foreman API",
        version = "0.3.0",
        description = "Agentic developer workflow orchestrator",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

/// Build the full application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(ops::routes(state.clone()))
        .merge(workflows::routes(state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
