use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, FromQueryResult, JoinType,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::orders::{CheckoutRequest, OrderList, OrderSummary, OrderWithItems},
    dto::payments::IpnResponse,
    entity::{
        cart_items::{Column as CartCol, Entity as CartItems},
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        payment_methods::Entity as PaymentMethods,
        products::{Column as ProdCol, Entity as Products},
    },
    error::{AppError, AppResult},
    inventory,
    middleware::auth::AuthUser,
    models::{Order, OrderItem, OrderStatus, PaymentKind, User},
    notify,
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::{invoice_service, payment_service},
    state::AppState,
};

#[derive(Debug, FromQueryResult)]
struct CartProductRow {
    product_id: Uuid,
    quantity: i32,
    price: Decimal,
    stock: i32,
    name: String,
}

/// Turn the user's cart into a priced order.
///
/// Unit prices are frozen at creation time and the initial status is chosen
/// solely by the payment method: cash on delivery settles immediately
/// (stock decremented in the same transaction, invoice issued after commit),
/// a gateway order is parked in `PENDING_PAYMENT` with stock untouched until
/// the payment notification arrives.
pub async fn checkout(
    state: &AppState,
    user: &AuthUser,
    payload: CheckoutRequest,
    client_ip: &str,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let address = payload.address.trim().to_string();
    if address.is_empty() {
        return Err(AppError::BadRequest(
            "Delivery address is required".to_string(),
        ));
    }

    let method = PaymentMethods::find_by_id(payload.payment_method_id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::BadRequest("Payment method not found".to_string()))?;
    let kind = PaymentKind::parse(&method.kind)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("unknown payment kind {}", method.kind)))?;

    let txn = state.orm.begin().await?;

    let rows = CartItems::find()
        .select_only()
        .column_as(CartCol::ProductId, "product_id")
        .column_as(CartCol::Quantity, "quantity")
        .column_as(ProdCol::Price, "price")
        .column_as(ProdCol::Stock, "stock")
        .column_as(ProdCol::Name, "name")
        .join(
            JoinType::InnerJoin,
            CartItems::belongs_to(Products)
                .from(CartCol::ProductId)
                .to(ProdCol::Id)
                .into(),
        )
        .filter(CartCol::UserId.eq(user.user_id))
        .lock(LockType::Update)
        .into_model::<CartProductRow>()
        .all(&txn)
        .await?;

    if rows.is_empty() {
        return Err(AppError::BadRequest("Cart is empty".into()));
    }

    let mut total_price = Decimal::ZERO;
    for row in &rows {
        if row.quantity <= 0 {
            return Err(AppError::BadRequest("Cart has invalid quantity".into()));
        }
        // Advisory read only; the conditional decrement is what actually
        // guards against oversell.
        if row.stock < row.quantity {
            return Err(AppError::Conflict(format!(
                "Product {} is out of stock",
                row.name
            )));
        }
        total_price += row.price * Decimal::from(row.quantity);
    }

    let status = match kind {
        PaymentKind::CashOnDelivery => OrderStatus::Placed,
        PaymentKind::Gateway => OrderStatus::PendingPayment,
    };

    let order_id = Uuid::new_v4();
    let order = OrderActive {
        id: Set(order_id),
        user_id: Set(user.user_id),
        payment_method_id: Set(method.id),
        status: Set(status.as_str().to_string()),
        total_price: Set(total_price),
        address: Set(address),
        created_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut order_items: Vec<OrderItem> = Vec::new();
    for row in &rows {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(row.product_id),
            quantity: Set(row.quantity),
            price: Set(row.price),
            created_at: NotSet,
        }
        .insert(&txn)
        .await?;
        order_items.push(order_item_from_entity(item));
    }

    if kind == PaymentKind::CashOnDelivery {
        let lines: Vec<(Uuid, i32)> = rows.iter().map(|r| (r.product_id, r.quantity)).collect();
        inventory::decrease_stock_for_lines(&txn, &lines).await?;
    }

    CartItems::delete_many()
        .filter(CartCol::UserId.eq(user.user_id))
        .exec(&txn)
        .await?;

    txn.commit().await?;

    if kind == PaymentKind::CashOnDelivery {
        // The order and its stock movement are already committed; a failed
        // invoice must not undo them, only become visible to operators.
        if let Err(err) =
            invoice_service::issue_for_order(&state.orm, user.user_id, order.id, method.id).await
        {
            tracing::error!(error = %err, order_id = %order.id, "invoice issuance failed after COD checkout");
            audit::record(
                &state.pool,
                Some(user.user_id),
                "invoice_issue_failed",
                Some("orders"),
                Some(serde_json::json!({ "order_id": order.id })),
            )
            .await;
        }
        send_order_confirmation(state, user.user_id, order.id).await;
    }

    let payment_url = match kind {
        PaymentKind::Gateway => Some(payment_service::build_payment_url(
            &state.config.gateway,
            order.id,
            total_price,
            &format!("Payment for order {}", order.id),
            client_ip,
            Utc::now(),
        )?),
        PaymentKind::CashOnDelivery => None,
    };

    audit::record(
        &state.pool,
        Some(user.user_id),
        "checkout",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id })),
    )
    .await;

    Ok(ApiResponse::success(
        "Checkout success",
        OrderWithItems {
            order: order_from_entity(order)?,
            items: order_items,
            payment_url,
        },
        Some(Meta::empty()),
    ))
}

/// Apply a verified payment notification to its order.
///
/// The caller has already checked the callback signature; this transition
/// re-checks everything the gateway asserts against our own records: the
/// order exists, the amount matches exactly, and the order is still waiting
/// for payment. Only the first notification to observe `PENDING_PAYMENT`
/// settles the order; later duplicates get the idempotent
/// "already confirmed" reply without touching stock or invoices.
pub async fn confirm_payment(
    state: &AppState,
    params: &BTreeMap<String, String>,
) -> AppResult<IpnResponse> {
    if !payment_service::verify_callback(&state.config.gateway, params) {
        return Ok(IpnResponse::invalid_checksum());
    }

    let Some(order_id) = params
        .get(payment_service::TRANSACTION_REF_FIELD)
        .and_then(|v| Uuid::parse_str(v).ok())
    else {
        return Ok(IpnResponse::new("03", "Invalid transaction reference"));
    };

    let Some(amount_minor) = params
        .get(payment_service::AMOUNT_FIELD)
        .and_then(|v| v.parse::<i64>().ok())
    else {
        return Ok(IpnResponse::invalid_amount());
    };
    let amount = Decimal::new(amount_minor, 2);

    let txn = state.orm.begin().await?;

    let Some(order) = Orders::find_by_id(order_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
    else {
        return Ok(IpnResponse::order_not_found());
    };

    // Exact decimal equality; the signature only proves the gateway sent
    // these numbers, not that they match the order.
    if order.total_price != amount {
        return Ok(IpnResponse::invalid_amount());
    }

    let status = OrderStatus::parse(&order.status)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("unknown order status {}", order.status)))?;
    if status != OrderStatus::PendingPayment {
        return Ok(IpnResponse::already_confirmed());
    }

    if params.get(payment_service::RESPONSE_CODE_FIELD).map(String::as_str)
        != Some(payment_service::RESPONSE_CODE_SUCCESS)
    {
        return Ok(IpnResponse::payment_failed());
    }

    let lines: Vec<(Uuid, i32)> = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&txn)
        .await?
        .into_iter()
        .map(|item| (item.product_id, item.quantity))
        .collect();
    if lines.is_empty() {
        return Err(AppError::Conflict("Order has no items".to_string()));
    }

    // A zero-row decrement aborts the whole confirmation; the transaction
    // rolls back and the order stays in PENDING_PAYMENT.
    inventory::decrease_stock_for_lines(&txn, &lines).await?;

    let user_id = order.user_id;
    let payment_method_id = order.payment_method_id;

    let mut active: OrderActive = order.into();
    active.status = Set(OrderStatus::Paid.as_str().to_string());
    let order = active.update(&txn).await?;

    invoice_service::issue_for_order(&txn, user_id, order.id, payment_method_id).await?;

    txn.commit().await?;

    send_order_confirmation(state, user_id, order.id).await;

    audit::record(
        &state.pool,
        Some(user_id),
        "payment_confirmed",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id })),
    )
    .await;

    Ok(IpnResponse::confirm_success())
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
    client_ip: &str,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(status.clone()));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    let gateway_methods = gateway_method_ids(state).await?;

    let mut items = Vec::with_capacity(orders.len());
    for model in orders {
        let order = order_from_entity(model)?;
        let payment_url = pending_payment_url(state, &order, &gateway_methods, client_ip);
        items.push(OrderSummary {
            id: order.id,
            status: order.status,
            total_price: order.total_price,
            created_at: order.created_at,
            payment_url,
        });
    }

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Ok", OrderList { items }, Some(meta)))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    client_ip: &str,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    if order.user_id != user.user_id {
        return Err(AppError::Forbidden);
    }

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();

    let order = order_from_entity(order)?;
    let gateway_methods = gateway_method_ids(state).await?;
    let payment_url = pending_payment_url(state, &order, &gateway_methods, client_ip);

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order,
            items,
            payment_url,
        },
        Some(Meta::empty()),
    ))
}

/// Remove an order that has not settled yet. Anything past
/// `PENDING`/`PENDING_PAYMENT` is immutable from the customer's side.
pub async fn delete_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    if order.user_id != user.user_id {
        return Err(AppError::Forbidden);
    }

    let status = OrderStatus::parse(&order.status)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("unknown order status {}", order.status)))?;
    if !status.is_deletable() {
        return Err(AppError::Conflict(
            "Order can no longer be deleted".to_string(),
        ));
    }

    // Explicit ordered cleanup, lines before parent.
    let txn = state.orm.begin().await?;
    OrderItems::delete_many()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .exec(&txn)
        .await?;
    Orders::delete_by_id(order.id).exec(&txn).await?;
    txn.commit().await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "order_deleted",
        Some("orders"),
        Some(serde_json::json!({ "order_id": id })),
    )
    .await;

    Ok(ApiResponse::message("Order deleted"))
}

async fn gateway_method_ids(state: &AppState) -> AppResult<HashMap<i32, PaymentKind>> {
    let methods = PaymentMethods::find().all(&state.orm).await?;
    Ok(methods
        .into_iter()
        .filter_map(|m| PaymentKind::parse(&m.kind).map(|kind| (m.id, kind)))
        .collect())
}

/// A gateway order still waiting for payment gets a freshly signed redirect
/// URL; everything else gets none. URL construction problems only cost the
/// link, never the listing.
fn pending_payment_url(
    state: &AppState,
    order: &Order,
    methods: &HashMap<i32, PaymentKind>,
    client_ip: &str,
) -> Option<String> {
    if order.status != OrderStatus::PendingPayment {
        return None;
    }
    if methods.get(&order.payment_method_id) != Some(&PaymentKind::Gateway) {
        return None;
    }
    payment_service::build_payment_url(
        &state.config.gateway,
        order.id,
        order.total_price,
        &format!("Payment for order {}", order.id),
        client_ip,
        Utc::now(),
    )
    .ok()
}

async fn send_order_confirmation(state: &AppState, user_id: Uuid, order_id: Uuid) {
    let user: Result<Option<User>, _> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await;
    let Ok(Some(user)) = user else {
        tracing::warn!(%user_id, "could not load user for order confirmation mail");
        return;
    };

    let body = format!(
        "Hi {}!\n\n\
         We've successfully received your order #{} and it's now on its way \
         to your doorstep.\n\n\
         Thanks for choosing us and placing your order!\n\n\
         Cheers,\nThe Shop Team",
        user.email, order_id
    );
    notify::send_in_background(
        state.mailer.clone(),
        user.email,
        "Order confirmation".to_string(),
        body,
    );
}

fn order_from_entity(model: OrderModel) -> AppResult<Order> {
    let status = OrderStatus::parse(&model.status)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("unknown order status {}", model.status)))?;
    Ok(Order {
        id: model.id,
        user_id: model.user_id,
        payment_method_id: model.payment_method_id,
        status,
        total_price: model.total_price,
        address: model.address,
        created_at: model.created_at.with_timezone(&Utc),
    })
}

fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        quantity: model.quantity,
        price: model.price,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
