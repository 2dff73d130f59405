use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sea_orm::EntityTrait;
use sha2::Sha512;
use uuid::Uuid;

use crate::{
    config::GatewayConfig,
    dto::payments::PaymentMethodList,
    entity::payment_methods::Entity as PaymentMethods,
    error::{AppError, AppResult},
    models::{PaymentKind, PaymentMethod},
    response::{ApiResponse, Meta},
    state::AppState,
};

type HmacSha512 = Hmac<Sha512>;

pub const SIGNATURE_FIELD: &str = "signature";
pub const SIGNATURE_TYPE_FIELD: &str = "signature_type";
pub const RESPONSE_CODE_FIELD: &str = "response_code";
pub const TRANSACTION_REF_FIELD: &str = "transaction_ref";
pub const AMOUNT_FIELD: &str = "amount";

/// Gateway response code meaning the transaction went through.
pub const RESPONSE_CODE_SUCCESS: &str = "00";

const PROTOCOL_VERSION: &str = "2.1.0";
const PAY_COMMAND: &str = "pay";
const ORDER_TYPE: &str = "100000";
const SESSION_VALIDITY_MINUTES: i64 = 15;
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Build the signed redirect URL that sends a customer to the gateway.
///
/// The parameter set is canonicalized by sorting names lexicographically,
/// URL-encoding names and values, and joining `name=value` pairs with `&`;
/// parameters with empty values are skipped. The HMAC-SHA512 digest of the
/// canonical string (keyed by the merchant secret) is appended as the
/// `signature` parameter. Identical inputs always produce an identical URL.
pub fn build_payment_url(
    gateway: &GatewayConfig,
    order_id: Uuid,
    total_price: Decimal,
    order_info: &str,
    client_ip: &str,
    now: DateTime<Utc>,
) -> AppResult<String> {
    let amount = to_minor_units(total_price)?;
    let created_at = now.format(TIMESTAMP_FORMAT).to_string();
    let expires_at = (now + Duration::minutes(SESSION_VALIDITY_MINUTES))
        .format(TIMESTAMP_FORMAT)
        .to_string();

    let mut params: BTreeMap<&str, String> = BTreeMap::new();
    params.insert("version", PROTOCOL_VERSION.to_string());
    params.insert("command", PAY_COMMAND.to_string());
    params.insert("merchant_code", gateway.merchant_code.clone());
    params.insert("amount", amount.to_string());
    params.insert("currency", gateway.currency.clone());
    params.insert("transaction_ref", order_id.to_string());
    params.insert("order_info", order_info.to_string());
    params.insert("order_type", ORDER_TYPE.to_string());
    params.insert("locale", gateway.locale.clone());
    params.insert("return_url", gateway.return_url.clone());
    params.insert("client_ip", client_ip.to_string());
    params.insert("created_at", created_at);
    params.insert("expires_at", expires_at);

    let canonical = canonical_query(params.iter().map(|(k, v)| (*k, v.as_str())));
    let signature = hmac_sha512_hex(&gateway.hash_secret, &canonical);

    Ok(format!(
        "{}?{}&{}={}",
        gateway.base_url, canonical, SIGNATURE_FIELD, signature
    ))
}

/// Convert a price into integer minor units (amount × 100).
pub fn to_minor_units(total_price: Decimal) -> AppResult<i64> {
    (total_price * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| AppError::BadRequest("order total is out of range".to_string()))
}

/// Verify the signature on an inbound gateway callback.
///
/// The verification input is the sorted `name=value` concatenation of every
/// parameter except the signature fields, with *raw* values. The inbound
/// canonical form deliberately differs from the outbound one, which encodes.
/// Comparison is case-insensitive and constant-time; a mismatch invalidates
/// the whole callback regardless of its content.
pub fn verify_callback(gateway: &GatewayConfig, params: &BTreeMap<String, String>) -> bool {
    let Some(received) = params.get(SIGNATURE_FIELD) else {
        return false;
    };

    let data = raw_field_data(
        params
            .iter()
            .filter(|(name, _)| {
                name.as_str() != SIGNATURE_FIELD && name.as_str() != SIGNATURE_TYPE_FIELD
            })
            .map(|(name, value)| (name.as_str(), value.as_str())),
    );
    let expected = hmac_sha512_hex(&gateway.hash_secret, &data);

    constant_time_eq(&expected, &received.to_lowercase())
}

/// Sorted, URL-encoded `name=value` concatenation used for outbound signing
/// and as the redirect query string. Empty values are skipped.
pub fn canonical_query<'a, I>(params: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut fields: Vec<(&str, &str)> = params
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .collect();
    fields.sort_by_key(|(name, _)| *name);
    fields
        .into_iter()
        .map(|(name, value)| {
            format!("{}={}", urlencoding::encode(name), urlencoding::encode(value))
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Sorted raw `name=value` concatenation used to verify inbound callbacks.
fn raw_field_data<'a, I>(params: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut fields: Vec<(&str, &str)> = params
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .collect();
    fields.sort_by_key(|(name, _)| *name);
    fields
        .into_iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn hmac_sha512_hex(secret: &str, data: &str) -> String {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(data.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

pub async fn list_payment_methods(state: &AppState) -> AppResult<ApiResponse<PaymentMethodList>> {
    let items = PaymentMethods::find()
        .all(&state.orm)
        .await?
        .into_iter()
        .filter_map(|model| {
            let kind = PaymentKind::parse(&model.kind)?;
            Some(PaymentMethod {
                id: model.id,
                name: model.name,
                kind,
            })
        })
        .collect();

    Ok(ApiResponse::success(
        "Payment methods",
        PaymentMethodList { items },
        Some(Meta::empty()),
    ))
}
