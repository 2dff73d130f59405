use std::collections::BTreeMap;
use std::sync::Arc;

use axum_storefront_api::{
    config::{AppConfig, GatewayConfig},
    db::{create_orm_conn, create_pool, run_migrations},
    dto::cart::AddToCartRequest,
    dto::orders::CheckoutRequest,
    entity::{
        invoices::{Column as InvoiceCol, Entity as Invoices},
        orders::Entity as Orders,
        products::{ActiveModel as ProductActive, Entity as Products},
        users::ActiveModel as UserActive,
    },
    error::AppError,
    kv::MemoryStore,
    middleware::auth::AuthUser,
    models::OrderStatus,
    notify::NoopMailer,
    recommend::RecommendationClient,
    services::{cart_service, order_service, payment_service},
    state::AppState,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

const GATEWAY_SECRET: &str = "integration-gateway-secret";

// A confirmation that loses the race for stock fails cleanly: the order stays
// in PENDING_PAYMENT, the counter is untouched and no invoice is written.
#[tokio::test]
async fn confirmation_without_stock_leaves_order_pending() -> anyhow::Result<()> {
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(());
        }
    };

    let state = setup_state(&database_url).await?;

    let user_id = create_user(&state, "starved-user@example.com").await?;
    let user = AuthUser {
        user_id,
        role: "user".into(),
    };
    let product = create_product(&state, "Scarce Widget", dec!(8.00), 2).await?;

    cart_service::add_to_cart(
        &state.pool,
        &user,
        AddToCartRequest {
            product_id: product,
            quantity: 2,
        },
    )
    .await?;
    let order = order_service::checkout(
        &state,
        &user,
        CheckoutRequest {
            address: "12 Crab Lane".into(),
            payment_method_id: 2,
        },
        "127.0.0.1",
    )
    .await?
    .data
    .unwrap();

    // Stock disappears while the customer is away at the gateway.
    set_stock(&state, product, 1).await?;

    let notification = signed_ipn_params(order.order.id, 1600, "00");
    let result = order_service::confirm_payment(&state, &notification).await;
    assert!(matches!(result, Err(AppError::Conflict(_))));

    let stored = Orders::find_by_id(order.order.id)
        .one(&state.orm)
        .await?
        .expect("order exists");
    assert_eq!(
        OrderStatus::parse(&stored.status),
        Some(OrderStatus::PendingPayment)
    );

    let product_row = Products::find_by_id(product)
        .one(&state.orm)
        .await?
        .expect("product exists");
    assert_eq!(product_row.stock, 1);

    let invoices = Invoices::find()
        .filter(InvoiceCol::OrderId.eq(order.order.id))
        .all(&state.orm)
        .await?;
    assert!(invoices.is_empty());

    Ok(())
}

fn test_config(database_url: &str) -> AppConfig {
    AppConfig {
        database_url: database_url.to_string(),
        redis_url: "redis://unused".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        jwt_secret: "integration-test-secret".to_string(),
        access_token_ttl_secs: 3 * 60 * 60,
        refresh_token_ttl_secs: 3 * 60 * 60,
        gateway: GatewayConfig {
            base_url: "https://sandbox.gateway.example/pay".to_string(),
            merchant_code: "MERCH01".to_string(),
            hash_secret: GATEWAY_SECRET.to_string(),
            return_url: "http://localhost:3000/api/payments/return".to_string(),
            currency: "VND".to_string(),
            locale: "vn".to_string(),
        },
        smtp: None,
        recommendation_url: None,
    }
}

async fn setup_state(database_url: &str) -> anyhow::Result<AppState> {
    let pool = create_pool(database_url).await?;
    let orm = create_orm_conn(database_url).await?;
    run_migrations(&orm).await?;

    Ok(AppState {
        pool,
        orm,
        kv: Arc::new(MemoryStore::new()),
        mailer: Arc::new(NoopMailer),
        recommend: RecommendationClient::new(None),
        config: Arc::new(test_config(database_url)),
    })
}

async fn create_user(state: &AppState, email: &str) -> anyhow::Result<Uuid> {
    let user = UserActive {
        id: Set(Uuid::new_v4()),
        email: Set(email.to_string()),
        password_hash: Set("dummy".into()),
        role: Set("user".to_string()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(user.id)
}

async fn create_product(
    state: &AppState,
    name: &str,
    price: Decimal,
    stock: i32,
) -> anyhow::Result<Uuid> {
    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        description: Set(Some("A product for testing".into())),
        price: Set(price),
        stock: Set(stock),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(product.id)
}

async fn set_stock(state: &AppState, product_id: Uuid, stock: i32) -> anyhow::Result<()> {
    let product = Products::find_by_id(product_id)
        .one(&state.orm)
        .await?
        .expect("product exists");
    let mut active: ProductActive = product.into();
    active.stock = Set(stock);
    active.update(&state.orm).await?;
    Ok(())
}

fn signed_ipn_params(
    order_id: Uuid,
    amount_minor: i64,
    response_code: &str,
) -> BTreeMap<String, String> {
    let mut params: BTreeMap<String, String> = BTreeMap::new();
    params.insert("version".into(), "2.1.0".into());
    params.insert("merchant_code".into(), "MERCH01".into());
    params.insert("amount".into(), amount_minor.to_string());
    params.insert("currency".into(), "VND".into());
    params.insert("transaction_ref".into(), order_id.to_string());
    params.insert("response_code".into(), response_code.to_string());
    let data = params
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&");
    params.insert(
        "signature".into(),
        payment_service::hmac_sha512_hex(GATEWAY_SECRET, &data),
    );
    params
}
