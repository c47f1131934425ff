// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP surface of the trust engine.
//!
//! Handlers are thin: parse identifiers, call one service, map the result.
//! Action verification always answers 200 because a denial is a normal,
//! informative result rather than a failed request.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::application::agent_registry::RegisterAgentRequest;
use crate::application::attestation_service::AttestationSubmission;
use crate::application::capability_enforcement::{ActionDecision, ActionRequest, CapabilityGrantRequest};
use crate::application::engine::TrustEngine;
use crate::domain::agent::{Agent, AgentId, AgentStatus, OrganizationId};
use crate::domain::attestation::{AttestationOutcome, McpServerConfidence, McpServerId};
use crate::domain::capability::{CapabilityGrant, Severity};
use crate::domain::drift::{DriftResult, MetricObservation};
use crate::domain::errors::EngineError;
use crate::domain::keys::{IssuedKeyPair, KeyState, RotationProof, VerificationKeySet};
use crate::domain::policy::{EnforcementAction, PolicyRule, PolicyScope, SecurityPolicy};
use crate::domain::signals::{OperationalSignals, SignalReport};
use crate::domain::trust::TrustScoreSnapshot;

pub struct AppState {
    pub engine: TrustEngine,
}

pub fn app(engine: TrustEngine) -> Router {
    let state = Arc::new(AppState { engine });

    Router::new()
        .route("/health", get(health))
        .route("/v1/agents", post(register_agent))
        .route("/v1/agents/{id}", get(get_agent))
        .route("/v1/agents/{id}/status", post(change_status))
        .route("/v1/agents/{id}/keys", post(generate_keys).get(verification_keys))
        .route("/v1/agents/{id}/keys/rotate", post(rotate_keys))
        .route("/v1/agents/{id}/compromise", post(mark_compromised))
        .route("/v1/agents/{id}/capabilities", post(grant_capability))
        .route("/v1/agents/{id}/capabilities/{capability}", delete(revoke_capability))
        .route("/v1/agents/{id}/trust", get(latest_trust))
        .route("/v1/agents/{id}/trust/recalculate", post(recalculate_trust))
        .route("/v1/agents/{id}/signals", post(report_signals))
        .route("/v1/agents/{id}/metrics", post(record_metric))
        .route("/v1/agents/{id}/drift", get(evaluate_drift))
        .route("/v1/actions/verify", post(verify_action))
        .route("/v1/attestations", post(submit_attestation))
        .route("/v1/mcp-servers/{id}/confidence", get(server_confidence))
        .route("/v1/policies", post(create_policy))
        .route("/v1/organizations/{id}/policies", get(list_policies))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn api_error(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: ErrorInfo {
                code: code.to_string(),
                message: message.into(),
            },
        }),
    )
}

fn bad_request(message: impl Into<String>) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, "invalid_request", message)
}

fn from_engine_error(err: EngineError) -> ApiError {
    let message = err.to_string();
    match err {
        EngineError::UnknownAgent(_) => api_error(StatusCode::NOT_FOUND, "unknown_agent", message),
        EngineError::KeyNotIssued(_) => api_error(StatusCode::NOT_FOUND, "key_not_issued", message),
        EngineError::AgentInactive { .. } => api_error(StatusCode::FORBIDDEN, "agent_inactive", message),
        EngineError::AgentCompromised(_) => api_error(StatusCode::FORBIDDEN, "agent_compromised", message),
        EngineError::KeyAlreadyIssued(_) => api_error(StatusCode::CONFLICT, "key_already_issued", message),
        EngineError::KeyRotationConflict(_) => api_error(StatusCode::CONFLICT, "key_rotation_conflict", message),
        EngineError::ConcurrentModification(_) => {
            api_error(StatusCode::CONFLICT, "concurrent_modification", message)
        }
        EngineError::InvalidSignature(_) | EngineError::ReplayedAttestation(_) | EngineError::ExpiredAttestation(_) => {
            api_error(StatusCode::UNAUTHORIZED, "invalid_signature", message)
        }
        EngineError::InvalidStateTransition { .. }
        | EngineError::CapabilityNotGranted { .. }
        | EngineError::MalformedAttestation(_)
        | EngineError::InvalidPolicy(_)
        | EngineError::InvalidInput(_) => bad_request(message),
        EngineError::Timeout(_) => api_error(StatusCode::SERVICE_UNAVAILABLE, "timeout", message),
        other => {
            error!(error = %other, "Request failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
        }
    }
}

fn parse_agent_id(raw: &str) -> Result<AgentId, ApiError> {
    AgentId::from_string(raw).map_err(|_| bad_request(format!("Invalid agent id '{raw}'")))
}

// ============================================================================
// Response views
// ============================================================================

/// Agent as exposed over HTTP. Key material is reduced to its public state.
#[derive(Debug, Serialize, Deserialize)]
pub struct AgentView {
    pub id: AgentId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub agent_type: String,
    pub status: AgentStatus,
    pub capabilities: Vec<CapabilityGrant>,
    pub trust_score: f64,
    pub key_state: KeyState,
    pub is_compromised: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentView {
    fn new(agent: Agent, now: DateTime<Utc>) -> Self {
        let key_state = match &agent.key_material {
            Some(material) => material.state(now),
            None => KeyState::NoKey,
        };
        Self {
            id: agent.id,
            organization_id: agent.organization_id,
            name: agent.name,
            agent_type: agent.agent_type,
            status: agent.status,
            capabilities: agent.capabilities,
            trust_score: agent.trust_score,
            key_state,
            is_compromised: agent.is_compromised,
            created_at: agent.created_at,
            updated_at: agent.updated_at,
        }
    }
}

// ============================================================================
// Agents
// ============================================================================

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "aegis-trust",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn register_agent(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterAgentRequest>,
) -> Result<(StatusCode, Json<AgentView>), ApiError> {
    let agent = state.engine.registry.register(&request).await.map_err(from_engine_error)?;
    let now = agent.created_at;
    Ok((StatusCode::CREATED, Json(AgentView::new(agent, now))))
}

async fn get_agent(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<AgentView> {
    let agent_id = parse_agent_id(&id)?;
    let agent = state.engine.registry.get(agent_id).await.map_err(from_engine_error)?;
    let now = state.engine.clock.now();
    Ok(Json(AgentView::new(agent, now)))
}

#[derive(Debug, Deserialize)]
pub struct StatusChangeRequest {
    pub status: AgentStatus,
}

async fn change_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<StatusChangeRequest>,
) -> ApiResult<AgentView> {
    let agent_id = parse_agent_id(&id)?;
    let agent = state
        .engine
        .registry
        .transition(agent_id, request.status)
        .await
        .map_err(from_engine_error)?;
    let now = agent.updated_at;
    Ok(Json(AgentView::new(agent, now)))
}

async fn mark_compromised(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<AgentView> {
    let agent_id = parse_agent_id(&id)?;
    let agent = state.engine.keys.mark_compromised(agent_id).await.map_err(from_engine_error)?;
    let now = agent.updated_at;
    Ok(Json(AgentView::new(agent, now)))
}

async fn report_signals(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(report): Json<SignalReport>,
) -> ApiResult<OperationalSignals> {
    let agent_id = parse_agent_id(&id)?;
    let signals = state
        .engine
        .registry
        .report_signals(agent_id, &report)
        .await
        .map_err(from_engine_error)?;
    Ok(Json(signals))
}

// ============================================================================
// Keys
// ============================================================================

async fn generate_keys(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<IssuedKeyPair>), ApiError> {
    let agent_id = parse_agent_id(&id)?;
    let issued = state.engine.keys.generate_key_pair(agent_id).await.map_err(from_engine_error)?;
    Ok((StatusCode::CREATED, Json(issued)))
}

async fn verification_keys(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<VerificationKeySet> {
    let agent_id = parse_agent_id(&id)?;
    let keys = state.engine.keys.get_verification_keys(agent_id).await.map_err(from_engine_error)?;
    Ok(Json(keys))
}

/// Rotation over HTTP is always agent-authenticated. Operator rotation is
/// only reachable through [`KeyLifecycleManager::rotate_key_pair`].
///
/// [`KeyLifecycleManager::rotate_key_pair`]: crate::application::KeyLifecycleManager::rotate_key_pair
#[derive(Debug, Default, Deserialize)]
pub struct RotateKeyRequest {
    #[serde(default)]
    pub proof: Option<RotationProof>,
}

async fn rotate_keys(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<RotateKeyRequest>,
) -> ApiResult<IssuedKeyPair> {
    let agent_id = parse_agent_id(&id)?;
    let proof = request.proof.ok_or_else(|| {
        api_error(
            StatusCode::UNAUTHORIZED,
            "rotation_proof_required",
            "key rotation requires a proof signed by a currently accepted key",
        )
    })?;
    let issued = state
        .engine
        .keys
        .rotate_with_proof(agent_id, &proof)
        .await
        .map_err(from_engine_error)?;
    Ok(Json(issued))
}

// ============================================================================
// Capabilities and actions
// ============================================================================

async fn grant_capability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<CapabilityGrantRequest>,
) -> ApiResult<serde_json::Value> {
    let agent_id = parse_agent_id(&id)?;
    let granted_at = state
        .engine
        .decisions
        .grant_capability(agent_id, &request)
        .await
        .map_err(from_engine_error)?;
    Ok(Json(json!({
        "capability_type": request.capability_type.trim(),
        "granted_at": granted_at,
    })))
}

async fn revoke_capability(
    State(state): State<Arc<AppState>>,
    Path((id, capability)): Path<(String, String)>,
) -> ApiResult<serde_json::Value> {
    let agent_id = parse_agent_id(&id)?;
    let revoked_at = state
        .engine
        .decisions
        .revoke_capability(agent_id, &capability)
        .await
        .map_err(from_engine_error)?;
    Ok(Json(json!({
        "capability_type": capability,
        "revoked_at": revoked_at,
    })))
}

async fn verify_action(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ActionRequest>,
) -> ApiResult<ActionDecision> {
    match state.engine.decisions.verify(&request).await {
        Ok(decision) => Ok(Json(decision)),
        Err(EngineError::UnknownAgent(agent_id)) => Ok(Json(ActionDecision {
            allowed: false,
            reason: format!("Unknown agent: {agent_id}"),
            trust_score_after: 0.0,
            violation_id: None,
            enforcement_action: None,
        })),
        Err(e) => Err(from_engine_error(e)),
    }
}

// ============================================================================
// Trust and drift
// ============================================================================

async fn latest_trust(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<TrustScoreSnapshot> {
    let agent_id = parse_agent_id(&id)?;
    let snapshot = state.engine.trust.latest(agent_id).await.map_err(from_engine_error)?;
    Ok(Json(snapshot))
}

async fn recalculate_trust(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<TrustScoreSnapshot> {
    let agent_id = parse_agent_id(&id)?;
    let snapshot = state
        .engine
        .trust
        .recalculate_or_last_known(agent_id)
        .await
        .map_err(from_engine_error)?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
pub struct MetricRequest {
    pub metric: String,
    pub value: f64,
}

async fn record_metric(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<MetricRequest>,
) -> Result<(StatusCode, Json<MetricObservation>), ApiError> {
    let agent_id = parse_agent_id(&id)?;
    let observation = state
        .engine
        .drift
        .update_baseline(agent_id, &request.metric, request.value)
        .await
        .map_err(from_engine_error)?;
    Ok((StatusCode::ACCEPTED, Json(observation)))
}

async fn evaluate_drift(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Vec<DriftResult>> {
    let agent_id = parse_agent_id(&id)?;
    let results = state.engine.drift.evaluate(agent_id).await.map_err(from_engine_error)?;
    Ok(Json(results))
}

// ============================================================================
// Attestations
// ============================================================================

async fn submit_attestation(
    State(state): State<Arc<AppState>>,
    Json(submission): Json<AttestationSubmission>,
) -> ApiResult<AttestationOutcome> {
    let outcome = state
        .engine
        .attestations
        .verify_attestation(&submission)
        .await
        .map_err(from_engine_error)?;
    Ok(Json(outcome))
}

async fn server_confidence(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<McpServerConfidence> {
    let mcp_server_id =
        McpServerId::from_string(&id).map_err(|_| bad_request(format!("Invalid MCP server id '{id}'")))?;
    let confidence = state
        .engine
        .attestations
        .server_confidence(mcp_server_id)
        .await
        .map_err(from_engine_error)?;
    Ok(Json(confidence))
}

// ============================================================================
// Policies
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreatePolicyRequest {
    pub organization_id: OrganizationId,
    pub name: String,
    pub rule: PolicyRule,
    pub enforcement_action: EnforcementAction,
    pub severity_threshold: Severity,
    #[serde(default = "default_scope")]
    pub scope: PolicyScope,
    #[serde(default)]
    pub priority: i32,
}

fn default_scope() -> PolicyScope {
    PolicyScope::AllAgents
}

async fn create_policy(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreatePolicyRequest>,
) -> Result<(StatusCode, Json<SecurityPolicy>), ApiError> {
    let policy = SecurityPolicy::new(
        request.organization_id,
        request.name,
        request.rule,
        request.enforcement_action,
        request.severity_threshold,
        request.scope,
        request.priority,
        state.engine.clock.now(),
    )
    .map_err(|e| bad_request(e.to_string()))?;
    state.engine.policies.save_policy(&policy).await.map_err(from_engine_error)?;
    Ok((StatusCode::CREATED, Json(policy)))
}

async fn list_policies(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Vec<SecurityPolicy>> {
    let organization_id =
        OrganizationId::from_string(&id).map_err(|_| bad_request(format!("Invalid organization id '{id}'")))?;
    let policies = state
        .engine
        .policies
        .list_policies(organization_id)
        .await
        .map_err(from_engine_error)?;
    Ok(Json(policies))
}
