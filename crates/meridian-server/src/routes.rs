//! The HTTP command surface (spec §6): one route per `ProductCommand`
//! variant, grounded on `fraiseql-runtime::server::router::RuntimeRouter`'s
//! state-injected `Router::new().route(...).with_state(state)` shape.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post, put};
use axum::{Json, Router};
use meridian_cqrs::aggregate::{Activate, ChangePrice, CreateProduct, DeleteProduct, Discontinue, UpdateProduct};
use meridian_cqrs::{CommandEnvelope, CommandOutcome, ProductCommand};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::config::HttpConfig;
use crate::lifecycle::{liveness_handler, readiness_handler};
use crate::state::AppState;

const IDEMPOTENT_REPLAYED_HEADER: &str = "x-idempotent-replayed";

/// Build the full router: command routes plus health/ready probes at the
/// configured paths (spec §6 ambient addition: `GET /health/live` and
/// `GET /health/ready`, distinct per Kubernetes convention).
#[must_use]
pub fn build_router(state: AppState, http: &HttpConfig) -> Router {
    Router::new()
        .route("/products", post(create_product))
        .route("/products/:id", put(update_product))
        .route("/products/:id/price", patch(change_price))
        .route("/products/:id/activate", post(activate_product))
        .route("/products/:id/discontinue", post(discontinue_product))
        .route("/products/:id", delete(delete_product))
        .route(&http.health_path, get(liveness_handler))
        .route(&http.ready_path, get(readiness_handler))
        .with_state(state)
}

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers.get("idempotency-key").and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn outcome_response(outcome: CommandOutcome, on_success: impl FnOnce(Uuid, i64) -> Response) -> Response {
    match outcome {
        CommandOutcome::Success { aggregate_id, version, .. } => on_success(aggregate_id, version),
        CommandOutcome::AlreadyProcessed { result } => {
            let mut response = (StatusCode::OK, Json(result)).into_response();
            response
                .headers_mut()
                .insert(IDEMPOTENT_REPLAYED_HEADER, HeaderValue::from_static("true"));
            response
        },
    }
}

/// Request body for `POST /products`.
#[derive(Debug, Deserialize)]
pub struct CreateProductBody {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
}

async fn create_product(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateProductBody>,
) -> Response {
    let envelope = CommandEnvelope {
        idempotency_key: idempotency_key(&headers),
        command: ProductCommand::Create(CreateProduct {
            sku: body.sku,
            name: body.name,
            description: body.description,
            price_cents: body.price_cents,
        }),
    };

    match state.handler.handle(envelope).await {
        Ok(outcome) => outcome_response(outcome, |id, version| {
            let mut response = (
                StatusCode::CREATED,
                Json(json!({ "aggregateId": id, "version": version })),
            )
                .into_response();
            if let Ok(value) = HeaderValue::from_str(&format!("/products/{id}")) {
                response.headers_mut().insert(axum::http::header::LOCATION, value);
            }
            response
        }),
        Err(failure) => failure.into_response(),
    }
}

/// Request body for `PUT /products/{id}`.
#[derive(Debug, Deserialize)]
pub struct UpdateProductBody {
    pub expected_version: i64,
    pub name: String,
    pub description: Option<String>,
}

async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<UpdateProductBody>,
) -> Response {
    let envelope = CommandEnvelope {
        idempotency_key: idempotency_key(&headers),
        command: ProductCommand::Update {
            id,
            cmd: UpdateProduct {
                expected_version: body.expected_version,
                name: body.name,
                description: body.description,
            },
        },
    };

    match state.handler.handle(envelope).await {
        Ok(outcome) => outcome_response(outcome, |id, version| {
            (StatusCode::OK, Json(json!({ "aggregateId": id, "version": version }))).into_response()
        }),
        Err(failure) => failure.into_response(),
    }
}

/// Request body for `PATCH /products/{id}/price`.
#[derive(Debug, Deserialize)]
pub struct ChangePriceBody {
    pub expected_version: i64,
    pub price_cents: i64,
    #[serde(default)]
    pub confirm_large: bool,
}

async fn change_price(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<ChangePriceBody>,
) -> Response {
    let envelope = CommandEnvelope {
        idempotency_key: idempotency_key(&headers),
        command: ProductCommand::ChangePrice {
            id,
            cmd: ChangePrice {
                expected_version: body.expected_version,
                price_cents: body.price_cents,
                confirm_large: body.confirm_large,
            },
        },
    };

    match state.handler.handle(envelope).await {
        Ok(outcome) => outcome_response(outcome, |id, version| {
            (StatusCode::OK, Json(json!({ "aggregateId": id, "version": version }))).into_response()
        }),
        Err(failure) => failure.into_response(),
    }
}

/// Request body shared by `.../activate` and `.../discontinue`.
#[derive(Debug, Deserialize)]
pub struct TransitionBody {
    pub expected_version: i64,
    #[serde(default)]
    pub reason: Option<String>,
}

async fn activate_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<TransitionBody>,
) -> Response {
    let envelope = CommandEnvelope {
        idempotency_key: idempotency_key(&headers),
        command: ProductCommand::Activate {
            id,
            cmd: Activate { expected_version: body.expected_version },
        },
    };

    match state.handler.handle(envelope).await {
        Ok(outcome) => outcome_response(outcome, |id, version| {
            (StatusCode::OK, Json(json!({ "aggregateId": id, "version": version }))).into_response()
        }),
        Err(failure) => failure.into_response(),
    }
}

async fn discontinue_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<TransitionBody>,
) -> Response {
    let envelope = CommandEnvelope {
        idempotency_key: idempotency_key(&headers),
        command: ProductCommand::Discontinue {
            id,
            cmd: Discontinue {
                expected_version: body.expected_version,
                reason: body.reason,
            },
        },
    };

    match state.handler.handle(envelope).await {
        Ok(outcome) => outcome_response(outcome, |id, version| {
            (StatusCode::OK, Json(json!({ "aggregateId": id, "version": version }))).into_response()
        }),
        Err(failure) => failure.into_response(),
    }
}

/// Query parameters for `DELETE /products/{id}`.
#[derive(Debug, Deserialize)]
pub struct DeleteProductQuery {
    pub expected_version: i64,
    #[serde(default)]
    pub deleted_by: Option<String>,
}

async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<DeleteProductQuery>,
    headers: HeaderMap,
) -> Response {
    let envelope = CommandEnvelope {
        idempotency_key: idempotency_key(&headers),
        command: ProductCommand::Delete {
            id,
            cmd: DeleteProduct {
                expected_version: query.expected_version,
                deleted_by: query.deleted_by,
            },
        },
    };

    match state.handler.handle(envelope).await {
        Ok(outcome) => outcome_response(outcome, |_, _| StatusCode::NO_CONTENT.into_response()),
        Err(failure) => failure.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_is_read_case_insensitively() {
        let mut headers = HeaderMap::new();
        headers.insert("Idempotency-Key", HeaderValue::from_static("abc-123"));
        assert_eq!(idempotency_key(&headers), Some("abc-123".to_string()));
    }

    #[test]
    fn idempotency_key_is_absent_when_header_missing() {
        assert_eq!(idempotency_key(&HeaderMap::new()), None);
    }

    #[test]
    fn a_replayed_outcome_carries_the_replay_header() {
        let response = outcome_response(
            CommandOutcome::AlreadyProcessed { result: json!({ "aggregateId": Uuid::nil() }) },
            |_, _| unreachable!("on_success must not run for a replayed outcome"),
        );
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(IDEMPOTENT_REPLAYED_HEADER).unwrap(), "true");
    }
}
