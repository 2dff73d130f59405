use std::collections::BTreeMap;

use axum_storefront_api::config::GatewayConfig;
use axum_storefront_api::services::payment_service::{
    self, build_payment_url, hmac_sha512_hex, verify_callback,
};
use chrono::{TimeZone, Utc};
use rust_decimal_macros::dec;
use uuid::Uuid;

fn gateway() -> GatewayConfig {
    GatewayConfig {
        base_url: "https://sandbox.gateway.example/pay".to_string(),
        merchant_code: "MERCH01".to_string(),
        hash_secret: "topsecret".to_string(),
        return_url: "http://localhost:3000/api/payments/return".to_string(),
        currency: "VND".to_string(),
        locale: "vn".to_string(),
    }
}

/// Split a built URL's query into its raw (still URL-encoded) tokens, the
/// way the gateway would echo them back.
fn raw_query_params(url: &str) -> BTreeMap<String, String> {
    let (_, query) = url.split_once('?').expect("url has a query");
    query
        .split('&')
        .map(|pair| {
            let (name, value) = pair.split_once('=').expect("pair has a value");
            (name.to_string(), value.to_string())
        })
        .collect()
}

fn sign_raw(secret: &str, params: &BTreeMap<String, String>) -> String {
    let data = params
        .iter()
        .filter(|(name, value)| {
            name.as_str() != payment_service::SIGNATURE_FIELD && !value.is_empty()
        })
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&");
    hmac_sha512_hex(secret, &data)
}

#[test]
fn identical_inputs_build_identical_urls() {
    let gateway = gateway();
    let order_id = Uuid::parse_str("71f4b1a6-9a2e-4f87-a9b1-0f0d9e6b2c11").unwrap();
    let now = Utc.with_ymd_and_hms(2024, 5, 17, 9, 30, 0).unwrap();

    let a = build_payment_url(&gateway, order_id, dec!(25.00), "order payment", "10.0.0.7", now)
        .unwrap();
    let b = build_payment_url(&gateway, order_id, dec!(25.00), "order payment", "10.0.0.7", now)
        .unwrap();

    assert_eq!(a, b);
    assert!(a.starts_with("https://sandbox.gateway.example/pay?"));
    assert!(a.contains("signature="));
    assert!(a.contains("amount=2500"));
}

#[test]
fn built_url_verifies_with_matching_secret() {
    let gateway = gateway();
    let now = Utc.with_ymd_and_hms(2024, 5, 17, 9, 30, 0).unwrap();
    let url =
        build_payment_url(&gateway, Uuid::new_v4(), dec!(25.00), "order payment", "10.0.0.7", now)
            .unwrap();

    let params = raw_query_params(&url);
    assert!(verify_callback(&gateway, &params));
}

#[test]
fn built_url_fails_with_other_secret() {
    let gateway = gateway();
    let now = Utc.with_ymd_and_hms(2024, 5, 17, 9, 30, 0).unwrap();
    let url =
        build_payment_url(&gateway, Uuid::new_v4(), dec!(25.00), "order payment", "10.0.0.7", now)
            .unwrap();

    let params = raw_query_params(&url);
    let other = GatewayConfig {
        hash_secret: "not-the-secret".to_string(),
        ..gateway
    };
    assert!(!verify_callback(&other, &params));
}

#[test]
fn any_altered_parameter_invalidates_the_callback() {
    let gateway = gateway();
    let now = Utc.with_ymd_and_hms(2024, 5, 17, 9, 30, 0).unwrap();
    let url =
        build_payment_url(&gateway, Uuid::new_v4(), dec!(25.00), "order payment", "10.0.0.7", now)
            .unwrap();

    let baseline = raw_query_params(&url);
    for name in baseline.keys() {
        if name == payment_service::SIGNATURE_FIELD {
            continue;
        }
        let mut tampered = baseline.clone();
        tampered.insert(name.clone(), "2400".to_string());
        assert!(
            !verify_callback(&gateway, &tampered),
            "altering {name} should invalidate the signature"
        );
    }
}

#[test]
fn signature_comparison_is_case_insensitive() {
    let gateway = gateway();
    let mut params: BTreeMap<String, String> = BTreeMap::new();
    params.insert("amount".into(), "2500".into());
    params.insert("transaction_ref".into(), Uuid::new_v4().to_string());
    params.insert("response_code".into(), "00".into());

    let signature = sign_raw(&gateway.hash_secret, &params);
    params.insert(
        payment_service::SIGNATURE_FIELD.to_string(),
        signature.to_uppercase(),
    );

    assert!(verify_callback(&gateway, &params));
}

#[test]
fn missing_signature_is_invalid() {
    let gateway = gateway();
    let mut params: BTreeMap<String, String> = BTreeMap::new();
    params.insert("amount".into(), "2500".into());
    assert!(!verify_callback(&gateway, &params));
}

#[test]
fn empty_values_are_skipped_when_signing() {
    let gateway = gateway();
    let mut params: BTreeMap<String, String> = BTreeMap::new();
    params.insert("amount".into(), "2500".into());
    params.insert("response_code".into(), "00".into());
    let signature = sign_raw(&gateway.hash_secret, &params);

    // The gateway may append empty fields; they must not change the digest.
    params.insert("bank_code".into(), String::new());
    params.insert(payment_service::SIGNATURE_FIELD.to_string(), signature);
    assert!(verify_callback(&gateway, &params));
}

#[test]
fn signature_type_field_is_excluded_from_the_digest() {
    let gateway = gateway();
    let mut params: BTreeMap<String, String> = BTreeMap::new();
    params.insert("amount".into(), "2500".into());
    params.insert("response_code".into(), "00".into());
    let signature = sign_raw(&gateway.hash_secret, &params);

    params.insert("signature_type".into(), "HMACSHA512".into());
    params.insert(payment_service::SIGNATURE_FIELD.to_string(), signature);
    assert!(verify_callback(&gateway, &params));
}
