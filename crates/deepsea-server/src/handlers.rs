use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::de::DeserializeOwned;

use deepsea_api::{ApiError, DevicePayload, HealthResponse, Overview, ensure_name_matches};
use deepsea_core::{Device, Module, ResourceKind, Value};
use deepsea_storage::{DeviceBackend, DynBackend, PutOutcome, ResourceRegistry, ValueList};

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ResourceRegistry>,
    /// Receives sensor outputs written over HTTP
    pub backend: DynBackend,
    /// Websocket keep-alive period
    pub ping_interval: Duration,
}

type ApiResult<T> = Result<T, ApiError>;

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> ApiResult<T> {
    Ok(serde_json::from_slice(body)?)
}

fn put_status(outcome: PutOutcome) -> StatusCode {
    match outcome {
        PutOutcome::Created => StatusCode::CREATED,
        PutOutcome::Updated | PutOutcome::Unchanged => StatusCode::OK,
    }
}

fn device_or_404(state: &AppState, name: &str) -> ApiResult<Device> {
    state
        .registry
        .get_device(name)
        .ok_or_else(|| ApiError::not_found(format!("{}/{name}", ResourceKind::Device)))
}

pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let registry = &state.registry;
    Json(HealthResponse {
        status: "ok".into(),
        modules: registry.names(ResourceKind::Module).len(),
        devices: registry.names(ResourceKind::Device).len(),
        subscribers: registry.events().subscriber_count(),
    })
}

pub async fn overview(State(state): State<AppState>) -> Json<Overview> {
    Json(Overview {
        modules: state.registry.list_modules(),
        devices: state.registry.list_devices(),
    })
}

// ---- Modules ----

pub async fn list_modules(State(state): State<AppState>) -> Json<Vec<Module>> {
    Json(state.registry.list_modules())
}

pub async fn get_module(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Module>> {
    state
        .registry
        .get_module(&name)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("{}/{name}", ResourceKind::Module)))
}

pub async fn put_module(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult<Response> {
    let module: Module = parse_body(&body)?;
    ensure_name_matches(&name, &module.name)?;
    let outcome = state.registry.put_module(module.clone())?;
    tracing::debug!(module = %name, outcome = ?outcome, "PUT module");
    Ok((put_status(outcome), Json(module)).into_response())
}

pub async fn delete_module(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state.registry.delete(ResourceKind::Module, &name)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- Devices ----

pub async fn list_devices(State(state): State<AppState>) -> Json<Vec<Device>> {
    Json(state.registry.list_devices())
}

pub async fn get_device(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Device>> {
    device_or_404(&state, &name).map(Json)
}

pub async fn put_device(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult<Response> {
    let payload: DevicePayload = parse_body(&body)?;
    ensure_name_matches(&name, &payload.name)?;
    let outcome = state
        .registry
        .put_device(&name, payload.spec, payload.status)?;
    let device = device_or_404(&state, &name)?;
    Ok((put_status(outcome), Json(device)).into_response())
}

pub async fn delete_device(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state.registry.delete(ResourceKind::Device, &name)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- Single values ----

/// The observed input, or the desired one while it has not been applied yet.
pub async fn get_input(
    State(state): State<AppState>,
    Path((device, value)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let record = device_or_404(&state, &device)?;
    record
        .observed_input(&value)
        .or_else(|| record.input(&value))
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("{device}.{value}")))
}

pub async fn put_input(
    State(state): State<AppState>,
    Path((device, value)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    put_value(&state, &device, &value, ValueList::Inputs, &body)
}

pub async fn get_output(
    State(state): State<AppState>,
    Path((device, value)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let record = device_or_404(&state, &device)?;
    record
        .output(&value)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("{device}.{value}")))
}

/// Writes the backend and then the registry, so a sync pass between the two
/// writes never finds the registry ahead of the backend.
pub async fn put_output(
    State(state): State<AppState>,
    Path((device, value)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let requested: Value = parse_body(&body)?;
    ensure_name_matches(&value, &requested.name)?;
    let typed = state
        .registry
        .resolve_value(&device, ValueList::Outputs, &requested)?;

    match state.backend.set_output(&device, typed).await {
        Ok(_) => {}
        // Not registered yet; registration carries the registry's status.
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }
    put_value(&state, &device, &value, ValueList::Outputs, &body)
}

fn put_value(
    state: &AppState,
    device: &str,
    name: &str,
    list: ValueList,
    body: &Bytes,
) -> ApiResult<Json<Value>> {
    let value: Value = parse_body(body)?;
    ensure_name_matches(name, &value.name)?;
    state.registry.patch_values(device, list, &[value])?;

    let record = device_or_404(state, device)?;
    let stored = match list {
        ValueList::Outputs => record.output(name),
        _ => record.input(name),
    };
    stored
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::internal(format!("{device}.{name} missing after write")))
}
