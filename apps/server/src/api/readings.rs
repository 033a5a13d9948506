//! Reading endpoints.

use auth::{Caller, ReadingScope};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
};
use chrono::{DateTime, Utc};
use entities::{
    BloodPressureCategory, GlucoseUnit, Reading, ReadingValues,
    validation::{ReadingPayload, validate_reading},
};
use health_store::{ReadingFilter, queries};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{ServerError, ServerResult},
    extract::{ApiJson, ApiQuery, parse_id},
    services::dispatch_abnormal_alert,
    state::AppState,
};

/// Header carrying the number of matches before pagination.
pub static TOTAL_COUNT: HeaderName = HeaderName::from_static("x-total-count");

/// A reading with its derived values.
#[derive(Debug, Clone, Serialize)]
pub struct ReadingResponse {
    pub id: Uuid,
    pub user: Uuid,
    pub systolic: i32,
    pub diastolic: i32,
    pub glucose_level: f64,
    pub glucose_unit: GlucoseUnit,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub blood_pressure_category: BloodPressureCategory,
    pub glucose_mmol: f64,
    pub glucose_mg: f64,
}

impl From<&Reading> for ReadingResponse {
    fn from(reading: &Reading) -> Self {
        Self {
            id: reading.id,
            user: reading.user_id,
            systolic: reading.systolic,
            diastolic: reading.diastolic,
            glucose_level: reading.glucose_level,
            glucose_unit: reading.glucose_unit,
            notes: reading.notes.clone(),
            created_at: reading.created_at,
            updated_at: reading.updated_at,
            blood_pressure_category: reading.blood_pressure_category(),
            glucose_mmol: reading.glucose_mmol(),
            glucose_mg: reading.glucose_mg_dl(),
        }
    }
}

/// Pagination query parameters.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

fn to_responses(readings: &[Reading]) -> Json<Vec<ReadingResponse>> {
    Json(readings.iter().map(ReadingResponse::from).collect())
}

fn not_found() -> ServerError {
    ServerError::NotFound("Reading not found.".into())
}

async fn list_page(
    state: &AppState,
    scope: ReadingScope,
    query: ListQuery,
) -> ServerResult<(HeaderMap, Json<Vec<ReadingResponse>>)> {
    let filter = ReadingFilter::new(scope).page(query.limit, query.offset);
    let (readings, total) = state.store.list_readings(filter).await?;

    let mut headers = HeaderMap::new();
    headers.insert(TOTAL_COUNT.clone(), HeaderValue::from(total));
    Ok((headers, to_responses(&readings)))
}

async fn find_own(state: &AppState, caller: &Caller, raw_id: &str) -> ServerResult<Reading> {
    let id = parse_id(raw_id)?;
    state
        .store
        .get_reading(caller.own_scope(), id)
        .await?
        .ok_or_else(not_found)
}

/// Lists the caller's readings, newest first.
pub async fn list_readings(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ServerResult<(HeaderMap, Json<Vec<ReadingResponse>>)> {
    list_page(&state, caller.own_scope(), query).await
}

/// Records a reading for the caller.
pub async fn create_reading(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    ApiJson(payload): ApiJson<ReadingPayload>,
) -> ServerResult<(StatusCode, Json<ReadingResponse>)> {
    let values = validate_reading(&payload, None)?;
    let reading = state
        .store
        .create_reading(Reading::new(caller.user_id, values, state.clock.now()))
        .await?;

    tracing::info!(
        user_id = %caller.user_id,
        reading_id = %reading.id,
        abnormal = reading.is_abnormal(),
        "Recorded reading"
    );
    dispatch_abnormal_alert(state.store.clone(), state.notifier.clone(), reading.clone());

    Ok((StatusCode::CREATED, Json(ReadingResponse::from(&reading))))
}

/// Gets one of the caller's readings.
pub async fn get_reading(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> ServerResult<Json<ReadingResponse>> {
    let reading = find_own(&state, &caller, &id).await?;
    Ok(Json(ReadingResponse::from(&reading)))
}

/// Replaces every field of one of the caller's readings.
pub async fn replace_reading(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<ReadingPayload>,
) -> ServerResult<Json<ReadingResponse>> {
    let reading = find_own(&state, &caller, &id).await?;
    let values = validate_reading(&payload, None)?;
    save(&state, &caller, reading, values).await
}

/// Updates the given fields of one of the caller's readings.
pub async fn update_reading(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<ReadingPayload>,
) -> ServerResult<Json<ReadingResponse>> {
    let reading = find_own(&state, &caller, &id).await?;
    let values = validate_reading(&payload, Some(&reading.values()))?;
    save(&state, &caller, reading, values).await
}

async fn save(
    state: &AppState,
    caller: &Caller,
    mut reading: Reading,
    values: ReadingValues,
) -> ServerResult<Json<ReadingResponse>> {
    reading.apply(values, state.clock.now());
    let reading = state.store.update_reading(caller.user_id, reading).await?;

    tracing::info!(user_id = %caller.user_id, reading_id = %reading.id, "Updated reading");
    Ok(Json(ReadingResponse::from(&reading)))
}

/// Deletes one of the caller's readings.
pub async fn delete_reading(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> ServerResult<StatusCode> {
    let id = parse_id(&id)?;
    state.store.delete_reading(caller.user_id, id).await?;

    tracing::info!(user_id = %caller.user_id, reading_id = %id, "Deleted reading");
    Ok(StatusCode::NO_CONTENT)
}

/// Lists the caller's readings from the last seven days.
pub async fn recent_readings(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> ServerResult<Json<Vec<ReadingResponse>>> {
    let readings =
        queries::recent_readings(state.store.as_ref(), caller.user_id, state.clock.now()).await?;
    Ok(to_responses(&readings))
}

/// Lists the caller's abnormal readings.
pub async fn abnormal_readings(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> ServerResult<Json<Vec<ReadingResponse>>> {
    let readings = queries::abnormal_readings(state.store.as_ref(), caller.user_id).await?;
    Ok(to_responses(&readings))
}

/// Lists every user's readings for reviewers.
pub async fn review_readings(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ServerResult<(HeaderMap, Json<Vec<ReadingResponse>>)> {
    let scope = caller.review_scope()?;
    list_page(&state, scope, query).await
}

/// Gets any reading the caller may read.
pub async fn review_reading(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> ServerResult<Json<ReadingResponse>> {
    let id = parse_id(&id)?;
    let reading = state
        .store
        .get_reading(ReadingScope::All, id)
        .await?
        .filter(|reading| caller.can_read(reading.user_id))
        .ok_or_else(not_found)?;

    tracing::debug!(user_id = %caller.user_id, reading_id = %reading.id, "Reviewed reading");
    Ok(Json(ReadingResponse::from(&reading)))
}
