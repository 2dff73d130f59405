use std::collections::BTreeMap;

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};

use crate::{
    dto::payments::{IpnResponse, PaymentMethodList, PaymentReturnResponse},
    error::AppResult,
    response::ApiResponse,
    services::{order_service, payment_service},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ipn", get(ipn))
        .route("/return", get(payment_return))
        .route("/methods", get(list_methods))
}

/// Asynchronous payment notification from the gateway. This is the source of
/// truth for settling gateway orders; the reply always carries a gateway
/// response code rather than an HTTP error, so the gateway knows whether to
/// redeliver.
#[utoipa::path(
    get,
    path = "/api/payments/ipn",
    responses(
        (status = 200, description = "Notification processed; outcome in RspCode", body = IpnResponse)
    ),
    tag = "Payments"
)]
pub async fn ipn(
    State(state): State<AppState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Json<IpnResponse> {
    match order_service::confirm_payment(&state, &params).await {
        Ok(resp) => Json(resp),
        Err(err) => {
            tracing::warn!(error = %err, "payment notification processing failed");
            Json(IpnResponse::unknown_error())
        }
    }
}

/// Browser redirect leg after the customer leaves the gateway. Verifies the
/// signature and reports the transaction outcome; order state is only ever
/// changed by the IPN.
#[utoipa::path(
    get,
    path = "/api/payments/return",
    responses(
        (status = 200, description = "Outcome of the redirect parameters", body = PaymentReturnResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_return(
    State(state): State<AppState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Json<PaymentReturnResponse> {
    let message = if !payment_service::verify_callback(&state.config.gateway, &params) {
        "Invalid signature"
    } else if params
        .get(payment_service::RESPONSE_CODE_FIELD)
        .map(String::as_str)
        == Some(payment_service::RESPONSE_CODE_SUCCESS)
    {
        "Transaction successful"
    } else {
        "Transaction failed"
    };

    Json(PaymentReturnResponse {
        message: message.to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/api/payments/methods",
    responses(
        (status = 200, description = "Available payment methods", body = ApiResponse<PaymentMethodList>)
    ),
    tag = "Payments"
)]
pub async fn list_methods(
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<PaymentMethodList>>> {
    let resp = payment_service::list_payment_methods(&state).await?;
    Ok(Json(resp))
}
