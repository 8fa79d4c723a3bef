//! DBPS API server: `/healthz`, `/statusz`, `/auth`, `/encrypt`, `/decrypt`.
//!
//! Thin axum binding over [`crate::sequencer`] and [`crate::auth`]. Domain
//! errors never panic the handler; they are folded into structured JSON error
//! bodies with the appropriate HTTP status.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::auth::{AuthRequest, AuthResponse, ClientCredentialStore};
use crate::page::{DataType, Encoding};
use crate::schema::{encode_base64, DecryptJsonRequest, DecryptJsonResponse, EncryptJsonRequest, EncryptJsonResponse};
use crate::sequencer::{DataBatchEncryptionSequencer, SequencerParams};

pub struct AppState {
    pub credentials: ClientCredentialStore,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/statusz", get(statusz))
        .route("/auth", post(auth))
        .route("/encrypt", post(encrypt))
        .route("/decrypt", post(decrypt))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "OK"
}

async fn statusz(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({ "skip_credential_check": state.credentials.skip_credential_check() }))
}

async fn auth(State(state): State<Arc<AppState>>, Json(req): Json<AuthRequest>) -> impl IntoResponse {
    match state.credentials.mint_token(&req.client_id, &req.api_key) {
        Ok(token) => (
            StatusCode::OK,
            Json(AuthResponse {
                token,
                token_type: "Bearer",
                expires_in: crate::auth::TOKEN_TTL_SECONDS,
            }),
        )
            .into_response(),
        Err(e) => error_response(StatusCode::UNAUTHORIZED, &e.to_string()),
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (status, Json(ErrorBody { error: message.to_string() })).into_response()
}

fn require_bearer(state: &AppState, headers: &HeaderMap) -> Result<(), axum::response::Response> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    state
        .credentials
        .verify_for_endpoint(header)
        .map_err(|e| error_response(StatusCode::UNAUTHORIZED, &e.to_string()))
}

fn parse_datatype(name: &str) -> Result<DataType, String> {
    match name {
        "INT32" => Ok(DataType::Int32),
        "INT64" => Ok(DataType::Int64),
        "INT96" => Ok(DataType::Int96),
        "FLOAT" => Ok(DataType::Float),
        "DOUBLE" => Ok(DataType::Double),
        "BYTE_ARRAY" => Ok(DataType::ByteArray),
        "FIXED_LEN_BYTE_ARRAY" => Ok(DataType::FixedLenByteArray),
        "BOOLEAN" => Ok(DataType::Boolean),
        other => Err(format!("unrecognised datatype: {other}")),
    }
}

fn parse_codec(name: &str) -> crate::compression::CompressionCodec {
    crate::compression::CompressionCodec::from_name(name)
}

fn parse_format(name: Option<&str>) -> Encoding {
    match name {
        Some("PLAIN") => Encoding::Plain,
        Some("RLE_DICTIONARY") => Encoding::RleDictionary,
        _ => Encoding::Other,
    }
}

async fn encrypt(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<EncryptJsonRequest>,
) -> axum::response::Response {
    if let Err(resp) = require_bearer(&state, &headers) {
        return resp;
    }
    let plaintext = match req.plaintext_bytes() {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    let datatype = match parse_datatype(&req.data_batch.datatype_info.datatype) {
        Ok(d) => d,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
    };
    let params = SequencerParams {
        column_name: req.column_reference.name.clone(),
        datatype,
        datatype_length: req.data_batch.datatype_info.length,
        compression: parse_codec(&req.data_batch.value_format.compression),
        format: parse_format(req.data_batch.value_format.format.as_deref()),
        encoding_attributes: req
            .data_batch
            .value_format
            .encoding_attributes
            .clone()
            .unwrap_or_default(),
        encrypted_compression: parse_codec(&req.data_batch_encrypted.value_format.compression),
        key_id: req.encryption.key_id.clone(),
        user_id: req.access.user_id.clone(),
        application_context: req.application_context.clone(),
        encryption_metadata: HashMap::new(),
    };
    let mut sequencer = match DataBatchEncryptionSequencer::new(params) {
        Ok(s) => s,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    let ciphertext = match sequencer.convert_and_encrypt(&plaintext) {
        Ok(c) => c,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    Json(EncryptJsonResponse {
        data_batch_encrypted: crate::schema::DataBatchEncryptedResponse {
            value_format: req.data_batch_encrypted.value_format.clone(),
            value: encode_base64(&ciphertext),
        },
        access: req.access.clone(),
        debug: req.debug.clone(),
        encryption_metadata: Some(sequencer.encryption_metadata.clone()),
    })
    .into_response()
}

async fn decrypt(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<DecryptJsonRequest>,
) -> axum::response::Response {
    if let Err(resp) = require_bearer(&state, &headers) {
        return resp;
    }
    let ciphertext = match req.ciphertext_bytes() {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    let datatype = match parse_datatype(&req.data_batch.datatype_info.datatype) {
        Ok(d) => d,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
    };
    let params = SequencerParams {
        column_name: req.column_reference.name.clone(),
        datatype,
        datatype_length: req.data_batch.datatype_info.length,
        compression: parse_codec(&req.data_batch.value_format.compression),
        format: parse_format(req.data_batch.value_format.format.as_deref()),
        encoding_attributes: req
            .data_batch
            .value_format
            .encoding_attributes
            .clone()
            .unwrap_or_default(),
        encrypted_compression: parse_codec(&req.data_batch_encrypted.value_format.compression),
        key_id: req.encryption.key_id.clone(),
        user_id: req.access.user_id.clone(),
        application_context: req.application_context.clone(),
        encryption_metadata: req.encryption_metadata.clone().unwrap_or_default(),
    };
    let mut sequencer = match DataBatchEncryptionSequencer::new(params) {
        Ok(s) => s,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    let plaintext = match sequencer.convert_and_decrypt(&ciphertext) {
        Ok(p) => p,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    Json(DecryptJsonResponse {
        data_batch: crate::schema::DataBatch {
            datatype_info: req.data_batch.datatype_info.clone(),
            value: encode_base64(&plaintext),
            value_format: req.data_batch.value_format.clone(),
        },
        access: req.access.clone(),
        debug: req.debug.clone(),
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_datatype_recognises_all_variants() {
        assert_eq!(parse_datatype("BYTE_ARRAY").unwrap(), DataType::ByteArray);
        assert!(parse_datatype("NOT_A_TYPE").is_err());
    }

    #[test]
    fn parse_format_defaults_to_other() {
        assert_eq!(parse_format(None), Encoding::Other);
        assert_eq!(parse_format(Some("PLAIN")), Encoding::Plain);
    }
}
