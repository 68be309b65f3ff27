//! Thin handlers: decode the request, call into `Broker`, encode the result.
//! No scheduling logic lives here (spec §2 component 9 "thin mapping").

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::broker::{Broker, Mode, SubmitOutcome};
use crate::error::BrokerError;

use super::dto::*;

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, self.to_string()).into_response()
    }
}

pub async fn info(State(broker): State<Arc<Broker>>) -> Json<InfoResponse> {
    Json(broker.summary().into())
}

pub async fn generate_sync(
    State(broker): State<Arc<Broker>>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<Vec<String>>, BrokerError> {
    let servers = req.server_ids();
    let outcome = broker
        .submit_prompt(
            &req.api_key,
            req.prompt,
            req.models,
            req.params,
            servers,
            req.softprompts,
            Mode::Sync,
        )
        .await?;
    match outcome {
        SubmitOutcome::Completed(gens) => Ok(Json(gens)),
        SubmitOutcome::Accepted(_) => unreachable!("sync submit never returns Accepted"),
    }
}

pub async fn generate_async(
    State(broker): State<Arc<Broker>>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<AsyncAccepted>, BrokerError> {
    let servers = req.server_ids();
    let outcome = broker
        .submit_prompt(
            &req.api_key,
            req.prompt,
            req.models,
            req.params,
            servers,
            req.softprompts,
            Mode::Async,
        )
        .await?;
    match outcome {
        SubmitOutcome::Accepted(id) => Ok(Json(AsyncAccepted { id })),
        SubmitOutcome::Completed(_) => unreachable!("async submit never blocks to completion"),
    }
}

pub async fn prompt_status(
    State(broker): State<Arc<Broker>>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusResponse>, BrokerError> {
    Ok(Json(broker.query_status(id)?.into()))
}

pub async fn pop(
    State(broker): State<Arc<Broker>>,
    Json(req): Json<PopRequest>,
) -> Result<Json<PopResponse>, BrokerError> {
    let outcome = broker.poll_work(
        &req.api_key,
        &req.name,
        req.model,
        req.max_length,
        req.max_content_length,
        req.softprompts,
        req.info,
        req.priority_usernames,
    )?;
    Ok(Json(outcome.into()))
}

pub async fn submit(
    State(broker): State<Arc<Broker>>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, BrokerError> {
    let reward = broker.submit_result(&req.api_key, req.id, req.generation)?;
    Ok(Json(SubmitResponse { reward }))
}

pub async fn servers(State(broker): State<Arc<Broker>>) -> Json<Vec<WorkerCardResponse>> {
    Json(broker.list_workers().into_iter().map(WorkerCardResponse::from).collect())
}

pub async fn server_by_id(
    State(broker): State<Arc<Broker>>,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkerCardResponse>, BrokerError> {
    broker
        .get_worker(id)
        .map(|w| Json(WorkerCardResponse::from(w)))
        .ok_or(BrokerError::UnknownWorker { id })
}

pub async fn models(State(broker): State<Arc<Broker>>) -> Json<Vec<String>> {
    Json(broker.available_models().into_iter().collect())
}

pub async fn usage(State(broker): State<Arc<Broker>>) -> Json<std::collections::HashMap<String, u64>> {
    Json(broker.usage_map())
}

pub async fn contributions(
    State(broker): State<Arc<Broker>>,
) -> Json<std::collections::HashMap<String, u64>> {
    Json(broker.contributions_map())
}
