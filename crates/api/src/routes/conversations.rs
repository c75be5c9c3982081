//! Conversation CRUD, audio retrieval, reprocess, and version activation
//! (§6, §7). Handlers share the `Path`/`Query`/`State` extractor shapes and
//! the `Result<Json<T>, (StatusCode, Json<ErrorResponse>)>` signature used
//! across this crate's routes; access control (`Principal::may_access`)
//! and the job-chain calls are specific to conversations owning a session
//! and a post-processing pipeline to guard.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json as ResponseJson, Response};
use domain::{ConversationId, DeletionReason, JobMeta, Queue, VersionId};
use scheduler::EnqueueRequest;
use services::jobs;
use tracing::info;
use uuid::Uuid;

use crate::middleware::Principal;
use crate::models::{
    ConversationDetail, ConversationListResponse, ConversationSummary, GetAudioQuery, ListConversationsQuery,
    ReprocessResponse, VersionsResponse,
};
use crate::routes::common::{error_response, repository_error_response};
use crate::AppState;

/// Fetches a conversation and enforces §7 access control in one place:
/// non-owners (and non-superusers) get the same 404 a missing conversation
/// would, so the response never leaks whether the resource exists.
async fn find_owned(
    state: &AppState,
    principal: &Principal,
    conversation_id: ConversationId,
) -> Result<domain::Conversation, Response> {
    let conversation = state
        .runtime
        .conversations
        .find_by_id(conversation_id)
        .await
        .map_err(repository_error_response)?
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "conversation not found"))?;

    if !principal.may_access(conversation.user_id) {
        return Err(error_response(StatusCode::NOT_FOUND, "conversation not found"));
    }
    Ok(conversation)
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<ListConversationsQuery>,
    principal: Principal,
) -> Result<ResponseJson<ConversationListResponse>, Response> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);

    let conversations = state
        .runtime
        .conversations
        .list_by_user(principal.user_id, limit, offset)
        .await
        .map_err(repository_error_response)?;
    let total = state
        .runtime
        .conversations
        .count_by_user(principal.user_id)
        .await
        .map_err(repository_error_response)?;

    Ok(ResponseJson(ConversationListResponse {
        conversations: conversations.iter().map(ConversationSummary::from).collect(),
        total,
        limit,
        offset,
    }))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    principal: Principal,
) -> Result<ResponseJson<ConversationDetail>, Response> {
    let conversation = find_owned(&state, &principal, conversation_id).await?;
    Ok(ResponseJson(ConversationDetail::from(&conversation)))
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    principal: Principal,
) -> Result<StatusCode, Response> {
    find_owned(&state, &principal, conversation_id).await?;
    state
        .runtime
        .conversations
        .soft_delete(conversation_id, DeletionReason::UserRequested)
        .await
        .map_err(repository_error_response)?;
    info!(%conversation_id, user_id = %principal.user_id, "conversation deleted by request");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_versions(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    principal: Principal,
) -> Result<ResponseJson<VersionsResponse>, Response> {
    let conversation = find_owned(&state, &principal, conversation_id).await?;
    Ok(ResponseJson(VersionsResponse::from(&conversation)))
}

pub async fn activate_transcript(
    State(state): State<AppState>,
    Path((conversation_id, version_id)): Path<(Uuid, VersionId)>,
    principal: Principal,
) -> Result<ResponseJson<ConversationDetail>, Response> {
    let conversation = find_owned(&state, &principal, conversation_id).await?;
    if !conversation.transcript_versions.iter().any(|v| v.version_id == version_id) {
        return Err(error_response(StatusCode::BAD_REQUEST, "unknown transcript version"));
    }
    let updated = state
        .runtime
        .conversations
        .set_active_transcript_version(conversation_id, version_id)
        .await
        .map_err(repository_error_response)?;
    Ok(ResponseJson(ConversationDetail::from(&updated)))
}

pub async fn activate_memory(
    State(state): State<AppState>,
    Path((conversation_id, version_id)): Path<(Uuid, VersionId)>,
    principal: Principal,
) -> Result<ResponseJson<ConversationDetail>, Response> {
    let conversation = find_owned(&state, &principal, conversation_id).await?;
    if !conversation.memory_versions.iter().any(|v| v.version_id == version_id) {
        return Err(error_response(StatusCode::BAD_REQUEST, "unknown memory version"));
    }
    let updated = state
        .runtime
        .conversations
        .set_active_memory_version(conversation_id, version_id)
        .await
        .map_err(repository_error_response)?;
    Ok(ResponseJson(ConversationDetail::from(&updated)))
}

/// Re-runs the full post-processing chain (`T -> S -> X -> {M, U}`) from
/// scratch, producing new versions rather than touching the existing ones
/// (§3 append-only versioning model). A soft-deleted conversation has no
/// audio worth re-transcribing, so this is rejected rather than silently
/// reviving it.
pub async fn reprocess_transcript(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    principal: Principal,
) -> Result<ResponseJson<ReprocessResponse>, Response> {
    let conversation = find_owned(&state, &principal, conversation_id).await?;
    if conversation.deleted {
        return Err(error_response(StatusCode::BAD_REQUEST, "conversation is deleted"));
    }
    let Some(audio_path) = conversation.audio_path.clone() else {
        return Err(error_response(StatusCode::BAD_REQUEST, "no audio file available to reprocess"));
    };

    let meta = JobMeta {
        audio_uuid: Some(conversation.audio_uuid),
        conversation_id: Some(conversation_id),
        client_id: Some(conversation.client_id.clone()),
        ..Default::default()
    };
    let chain = jobs::enqueue_post_processing_chain(&state.runtime, conversation_id, Some(audio_path), meta)
        .await
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(ResponseJson(ReprocessResponse {
        transcript_job_id: Some(chain.transcript_job_id),
        speaker_job_id: Some(chain.speaker_job_id),
        crop_job_id: chain.crop_job_id,
        memory_job_id: chain.memory_job_id,
        title_job_id: chain.title_job_id,
    }))
}

/// Re-runs only `M` against the conversation's active transcript — the
/// transcript itself is unaffected, so there is no reason to repeat `T`,
/// `S`, or `X` (unlike `reprocess_transcript`, which does).
pub async fn reprocess_memory(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    principal: Principal,
) -> Result<ResponseJson<ReprocessResponse>, Response> {
    let conversation = find_owned(&state, &principal, conversation_id).await?;
    if conversation.deleted {
        return Err(error_response(StatusCode::BAD_REQUEST, "conversation is deleted"));
    }
    if conversation.active_transcript().is_none() {
        return Err(error_response(StatusCode::BAD_REQUEST, "no active transcript to extract memory from"));
    }

    let meta = JobMeta {
        audio_uuid: Some(conversation.audio_uuid),
        conversation_id: Some(conversation_id),
        client_id: Some(conversation.client_id.clone()),
        ..Default::default()
    };
    let memory_job_id = state
        .runtime
        .scheduler
        .enqueue(EnqueueRequest {
            queue: Queue::Memory,
            function: jobs::EXTRACT_MEMORY.to_string(),
            args: serde_json::json!({"conversation_id": conversation_id}),
            timeout_secs: state.runtime.config.jobs.memory_secs,
            result_ttl_secs: state.runtime.config.jobs.result_ttl_secs,
            meta,
            ..Default::default()
        })
        .await
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(ResponseJson(ReprocessResponse {
        memory_job_id: Some(memory_job_id),
        ..Default::default()
    }))
}

pub async fn get_audio(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<GetAudioQuery>,
    principal: Principal,
) -> Result<Response, Response> {
    let conversation = find_owned(&state, &principal, conversation_id).await?;

    let relative_path = if query.cropped {
        conversation
            .cropped_audio_path
            .clone()
            .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "no cropped audio available"))?
    } else {
        conversation
            .audio_path
            .clone()
            .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "no audio available"))?
    };

    let full_path = std::path::Path::new(&state.runtime.config.storage.chunk_dir).join(&relative_path);
    let bytes = tokio::fs::read(&full_path)
        .await
        .map_err(|_| error_response(StatusCode::NOT_FOUND, "audio file not found on disk"))?;

    Ok(axum::response::Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, "audio/wav")
        .body(axum::body::Body::from(bytes))
        .unwrap()
        .into_response())
}

#[cfg(test)]
mod tests {
    use axum_test::TestServer;
    use domain::Conversation;
    use services::Runtime;

    use super::*;
    use crate::models::ErrorResponse;
    use crate::{routes::build_router, AppState};

    async fn server_with_conversation(owner: Uuid) -> (TestServer, Uuid) {
        let runtime = Runtime::for_tests();
        let conversation_id = Uuid::new_v4();
        let conversation = Conversation::new(conversation_id, conversation_id, owner, "test-device".to_string());
        runtime.conversations.insert(&conversation).await.unwrap();

        let server = TestServer::new(build_router(AppState::new(runtime))).unwrap();
        (server, conversation_id)
    }

    fn with_principal(server: &TestServer, path: &str, user_id: Uuid) -> axum_test::TestRequest {
        server
            .get(path)
            .add_header("x-chronicle-user-id", user_id.to_string())
            .add_header("x-chronicle-user-email", "owner@example.com")
    }

    #[tokio::test]
    async fn get_conversation_returns_owned_detail() {
        let owner = Uuid::new_v4();
        let (server, conversation_id) = server_with_conversation(owner).await;

        let response = with_principal(&server, &format!("/conversations/{conversation_id}"), owner).await;
        response.assert_status_ok();
        let body: ConversationDetail = response.json();
        assert_eq!(body.conversation_id, conversation_id);
    }

    #[tokio::test]
    async fn get_conversation_404s_for_non_owner_same_as_missing() {
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let (server, conversation_id) = server_with_conversation(owner).await;

        let owned_path = format!("/conversations/{conversation_id}");
        let missing_path = format!("/conversations/{}", Uuid::new_v4());

        let denied = with_principal(&server, &owned_path, stranger).await;
        let missing = with_principal(&server, &missing_path, stranger).await;

        denied.assert_status_not_found();
        missing.assert_status_not_found();
        assert_eq!(denied.json::<ErrorResponse>().error.message, missing.json::<ErrorResponse>().error.message);
    }

    #[tokio::test]
    async fn reprocess_transcript_rejects_deleted_conversation() {
        let owner = Uuid::new_v4();
        let (server, conversation_id) = server_with_conversation(owner).await;

        server
            .delete(&format!("/conversations/{conversation_id}"))
            .add_header("x-chronicle-user-id", owner.to_string())
            .add_header("x-chronicle-user-email", "owner@example.com")
            .await
            .assert_status(StatusCode::NO_CONTENT);

        let response = server
            .post(&format!("/conversations/{conversation_id}/reprocess/transcript"))
            .add_header("x-chronicle-user-id", owner.to_string())
            .add_header("x-chronicle-user-email", "owner@example.com")
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn reprocess_memory_requires_active_transcript() {
        let owner = Uuid::new_v4();
        let (server, conversation_id) = server_with_conversation(owner).await;

        let response = server
            .post(&format!("/conversations/{conversation_id}/reprocess/memory"))
            .add_header("x-chronicle-user-id", owner.to_string())
            .add_header("x-chronicle-user-email", "owner@example.com")
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn activate_transcript_rejects_unknown_version() {
        let owner = Uuid::new_v4();
        let (server, conversation_id) = server_with_conversation(owner).await;

        let response = server
            .post(&format!("/conversations/{conversation_id}/activate/transcript/{}", Uuid::new_v4()))
            .add_header("x-chronicle-user-id", owner.to_string())
            .add_header("x-chronicle-user-email", "owner@example.com")
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }
}
