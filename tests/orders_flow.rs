use std::collections::BTreeMap;
use std::sync::Arc;

use axum_storefront_api::{
    config::{AppConfig, GatewayConfig},
    db::{create_orm_conn, create_pool, run_migrations},
    dto::cart::AddToCartRequest,
    dto::orders::CheckoutRequest,
    entity::{
        invoice_items::{Column as InvoiceItemCol, Entity as InvoiceItems},
        invoices::{Column as InvoiceCol, Entity as Invoices},
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
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set, Statement};
use uuid::Uuid;

const GATEWAY_SECRET: &str = "integration-gateway-secret";

// Full pipeline: COD checkout settles immediately; a gateway checkout parks
// the order until a verified notification confirms it; duplicates and
// tampered amounts are rejected without side effects.
#[tokio::test]
async fn checkout_payment_and_invoice_flow() -> anyhow::Result<()> {
    // Allow skipping when no DB is configured in the environment.
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

    let user_id = create_user(&state, "user", "flow-user@example.com").await?;
    let other_id = create_user(&state, "user", "flow-other@example.com").await?;
    let user = AuthUser {
        user_id,
        role: "user".into(),
    };
    let other = AuthUser {
        user_id: other_id,
        role: "user".into(),
    };

    let product_a = create_product(&state, "Widget A", dec!(10.00), 5).await?;
    let product_b = create_product(&state, "Widget B", dec!(5.00), 5).await?;

    // --- Cash on delivery: settles at checkout -------------------------------

    fill_cart(&state, &user, product_a, 2, product_b, 1).await?;

    let cod = order_service::checkout(
        &state,
        &user,
        CheckoutRequest {
            address: "12 Crab Lane".into(),
            payment_method_id: 1,
        },
        "127.0.0.1",
    )
    .await?
    .data
    .unwrap();

    assert_eq!(cod.order.status, OrderStatus::Placed);
    assert_eq!(cod.order.total_price, dec!(25.00));
    assert!(cod.payment_url.is_none());

    let line_sum: Decimal = cod
        .items
        .iter()
        .map(|item| item.price * Decimal::from(item.quantity))
        .sum();
    assert_eq!(line_sum, cod.order.total_price);

    assert_eq!(stock_of(&state, product_a).await?, 3);
    assert_eq!(stock_of(&state, product_b).await?, 4);

    let cod_invoice = Invoices::find()
        .filter(InvoiceCol::OrderId.eq(cod.order.id))
        .one(&state.orm)
        .await?
        .expect("COD order gets an invoice");
    assert_eq!(cod_invoice.total, dec!(25.00));
    let cod_lines = InvoiceItems::find()
        .filter(InvoiceItemCol::InvoiceId.eq(cod_invoice.id))
        .all(&state.orm)
        .await?;
    assert_eq!(cod_lines.len(), 2);
    let invoice_sum: Decimal = cod_lines.iter().map(|l| l.total).sum();
    assert_eq!(invoice_sum, dec!(25.00));

    // --- Gateway: order parks until the notification confirms it -------------

    fill_cart(&state, &user, product_a, 2, product_b, 1).await?;

    let pending = order_service::checkout(
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

    assert_eq!(pending.order.status, OrderStatus::PendingPayment);
    let url = pending.payment_url.expect("gateway order carries a payment URL");
    assert!(url.contains("signature="));

    // No stock movement yet.
    assert_eq!(stock_of(&state, product_a).await?, 3);
    assert_eq!(stock_of(&state, product_b).await?, 4);

    // Ownership: another user can see neither order.
    let foreign = order_service::get_order(&state, &other, pending.order.id, "127.0.0.1").await;
    assert!(matches!(foreign, Err(AppError::Forbidden)));

    // A bad checksum is rejected before anything else is looked at.
    let mut forged = ipn_params(pending.order.id, 2500, "00");
    forged.insert("signature".into(), "deadbeef".into());
    let resp = order_service::confirm_payment(&state, &forged).await?;
    assert_eq!(resp.rsp_code, "97");

    // A tampered amount carries a valid signature over the tampered payload,
    // so it passes verification and must die on the amount comparison.
    let tampered = signed_ipn_params(pending.order.id, 2400, "00");
    let resp = order_service::confirm_payment(&state, &tampered).await?;
    assert_eq!(resp.rsp_code, "04");
    assert_eq!(
        status_of(&state, pending.order.id).await?,
        OrderStatus::PendingPayment
    );

    // A notification for an unknown order is answered, not erred.
    let unknown = signed_ipn_params(Uuid::new_v4(), 2500, "00");
    let resp = order_service::confirm_payment(&state, &unknown).await?;
    assert_eq!(resp.rsp_code, "01");

    // Gateway-side failure leaves the order waiting.
    let failed = signed_ipn_params(pending.order.id, 2500, "07");
    let resp = order_service::confirm_payment(&state, &failed).await?;
    assert_eq!(resp.rsp_code, "24");
    assert_eq!(
        status_of(&state, pending.order.id).await?,
        OrderStatus::PendingPayment
    );

    // The genuine notification settles the order.
    let genuine = signed_ipn_params(pending.order.id, 2500, "00");
    let resp = order_service::confirm_payment(&state, &genuine).await?;
    assert_eq!(resp.rsp_code, "00");
    assert_eq!(status_of(&state, pending.order.id).await?, OrderStatus::Paid);
    assert_eq!(stock_of(&state, product_a).await?, 1);
    assert_eq!(stock_of(&state, product_b).await?, 3);

    let invoices = Invoices::find()
        .filter(InvoiceCol::OrderId.eq(pending.order.id))
        .all(&state.orm)
        .await?;
    assert_eq!(invoices.len(), 1);

    // A duplicate notification is answered idempotently: no stock change,
    // no second invoice.
    let duplicate = signed_ipn_params(pending.order.id, 2500, "00");
    let resp = order_service::confirm_payment(&state, &duplicate).await?;
    assert_eq!(resp.rsp_code, "02");
    assert_eq!(stock_of(&state, product_a).await?, 1);
    assert_eq!(stock_of(&state, product_b).await?, 3);
    let invoices = Invoices::find()
        .filter(InvoiceCol::OrderId.eq(pending.order.id))
        .all(&state.orm)
        .await?;
    assert_eq!(invoices.len(), 1);

    // --- Deletion gates ------------------------------------------------------

    let denied = order_service::delete_order(&state, &user, pending.order.id).await;
    assert!(matches!(denied, Err(AppError::Conflict(_))));

    fill_cart(&state, &user, product_a, 1, product_b, 1).await?;
    let deletable = order_service::checkout(
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
    order_service::delete_order(&state, &user, deletable.order.id).await?;
    let gone = order_service::get_order(&state, &user, deletable.order.id, "127.0.0.1").await;
    assert!(matches!(gone, Err(AppError::NotFound)));

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
    let state = setup_state_no_reset(database_url).await?;

    // Clean tables between runs; payment methods stay seeded.
    let backend = state.orm.get_database_backend();
    state
        .orm
        .execute(Statement::from_string(
            backend,
            "TRUNCATE TABLE invoice_items, invoices, order_items, orders, cart_items, audit_logs, products, users RESTART IDENTITY CASCADE",
        ))
        .await?;

    Ok(state)
}

async fn setup_state_no_reset(database_url: &str) -> anyhow::Result<AppState> {
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

async fn create_user(state: &AppState, role: &str, email: &str) -> anyhow::Result<Uuid> {
    let user = UserActive {
        id: Set(Uuid::new_v4()),
        email: Set(email.to_string()),
        password_hash: Set("dummy".into()),
        role: Set(role.to_string()),
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

async fn fill_cart(
    state: &AppState,
    user: &AuthUser,
    product_a: Uuid,
    qty_a: i32,
    product_b: Uuid,
    qty_b: i32,
) -> anyhow::Result<()> {
    cart_service::add_to_cart(
        &state.pool,
        user,
        AddToCartRequest {
            product_id: product_a,
            quantity: qty_a,
        },
    )
    .await?;
    cart_service::add_to_cart(
        &state.pool,
        user,
        AddToCartRequest {
            product_id: product_b,
            quantity: qty_b,
        },
    )
    .await?;
    Ok(())
}

async fn stock_of(state: &AppState, product_id: Uuid) -> anyhow::Result<i32> {
    let product = Products::find_by_id(product_id)
        .one(&state.orm)
        .await?
        .expect("product exists");
    Ok(product.stock)
}

async fn status_of(state: &AppState, order_id: Uuid) -> anyhow::Result<OrderStatus> {
    use axum_storefront_api::entity::orders::Entity as Orders;
    let order = Orders::find_by_id(order_id)
        .one(&state.orm)
        .await?
        .expect("order exists");
    Ok(OrderStatus::parse(&order.status).expect("known status"))
}

fn ipn_params(order_id: Uuid, amount_minor: i64, response_code: &str) -> BTreeMap<String, String> {
    let mut params: BTreeMap<String, String> = BTreeMap::new();
    params.insert("version".into(), "2.1.0".into());
    params.insert("merchant_code".into(), "MERCH01".into());
    params.insert("amount".into(), amount_minor.to_string());
    params.insert("currency".into(), "VND".into());
    params.insert("transaction_ref".into(), order_id.to_string());
    params.insert("response_code".into(), response_code.to_string());
    params
}

fn signed_ipn_params(
    order_id: Uuid,
    amount_minor: i64,
    response_code: &str,
) -> BTreeMap<String, String> {
    let mut params = ipn_params(order_id, amount_minor, response_code);
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
