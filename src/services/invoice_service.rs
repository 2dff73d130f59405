use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use uuid::Uuid;

use crate::{
    dto::invoices::{InvoiceList, InvoiceWithItems},
    entity::{
        invoice_items::{
            ActiveModel as InvoiceItemActive, Column as InvoiceItemCol, Entity as InvoiceItems,
            Model as InvoiceItemModel,
        },
        invoices::{ActiveModel as InvoiceActive, Column as InvoiceCol, Entity as Invoices, Model as InvoiceModel},
        order_items::{Column as OrderItemCol, Entity as OrderItems},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Invoice, InvoiceItem},
    response::{ApiResponse, Meta},
    state::AppState,
};

/// Materialize the settlement invoice for an order: one invoice line per
/// order line, each with `total = price × quantity`, summed into the invoice
/// total. Runs on the caller's connection so it joins whatever transaction
/// the settlement is part of.
///
/// An invoice is written exactly once per settled order; the calling
/// workflow is responsible for invoking this at most once per order.
pub async fn issue_for_order<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    order_id: Uuid,
    payment_method_id: i32,
) -> AppResult<Invoice> {
    let lines = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .all(conn)
        .await?;

    if lines.is_empty() {
        return Err(AppError::Conflict("Order has no items".to_string()));
    }

    let total: Decimal = lines
        .iter()
        .map(|line| line.price * Decimal::from(line.quantity))
        .sum();

    let invoice_id = Uuid::new_v4();
    let invoice = InvoiceActive {
        id: Set(invoice_id),
        user_id: Set(user_id),
        order_id: Set(order_id),
        payment_method_id: Set(payment_method_id),
        total: Set(total),
        created_at: NotSet,
    }
    .insert(conn)
    .await?;

    for line in &lines {
        InvoiceItemActive {
            id: Set(Uuid::new_v4()),
            invoice_id: Set(invoice_id),
            product_id: Set(line.product_id),
            quantity: Set(line.quantity),
            price: Set(line.price),
            total: Set(line.price * Decimal::from(line.quantity)),
        }
        .insert(conn)
        .await?;
    }

    Ok(invoice_from_entity(invoice))
}

pub async fn list_my_invoices(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<InvoiceList>> {
    let items = Invoices::find()
        .filter(InvoiceCol::UserId.eq(user.user_id))
        .order_by_desc(InvoiceCol::CreatedAt)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(invoice_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "Invoices",
        InvoiceList { items },
        Some(Meta::empty()),
    ))
}

pub async fn get_invoice(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<InvoiceWithItems>> {
    let invoice = Invoices::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    if invoice.user_id != user.user_id {
        return Err(AppError::Forbidden);
    }

    let items = InvoiceItems::find()
        .filter(InvoiceItemCol::InvoiceId.eq(invoice.id))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(invoice_item_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "Invoice",
        InvoiceWithItems {
            invoice: invoice_from_entity(invoice),
            items,
        },
        Some(Meta::empty()),
    ))
}

pub async fn delete_invoice(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let invoice = Invoices::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    if invoice.user_id != user.user_id {
        return Err(AppError::Forbidden);
    }

    // Explicit ordered cleanup, lines before parent.
    let txn = state.orm.begin().await?;
    InvoiceItems::delete_many()
        .filter(InvoiceItemCol::InvoiceId.eq(invoice.id))
        .exec(&txn)
        .await?;
    Invoices::delete_by_id(invoice.id).exec(&txn).await?;
    txn.commit().await?;

    Ok(ApiResponse::message("Invoice deleted"))
}

fn invoice_from_entity(model: InvoiceModel) -> Invoice {
    Invoice {
        id: model.id,
        user_id: model.user_id,
        order_id: model.order_id,
        payment_method_id: model.payment_method_id,
        total: model.total,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

fn invoice_item_from_entity(model: InvoiceItemModel) -> InvoiceItem {
    InvoiceItem {
        id: model.id,
        invoice_id: model.invoice_id,
        product_id: model.product_id,
        quantity: model.quantity,
        price: model.price,
        total: model.total,
    }
}
