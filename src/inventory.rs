use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::{
    entity::products::{Column as ProdCol, Entity as Products},
    error::{AppError, AppResult},
};

/// Atomically subtract `quantity` from a product's stock.
///
/// Issues a single conditional update (`... SET stock = stock - $q WHERE id =
/// $id AND stock >= $q`) and returns the number of rows it changed: 1 means
/// the decrement was applied, 0 means stock was insufficient at the moment of
/// the update and nothing changed. Callers must treat 0 as a signal to abort
/// the enclosing transaction. Reads of stock elsewhere are advisory only.
pub async fn decrease_stock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> AppResult<u64> {
    if quantity <= 0 {
        return Err(AppError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }

    let result = Products::update_many()
        .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).sub(quantity))
        .filter(ProdCol::Id.eq(product_id))
        .filter(ProdCol::Stock.gte(quantity))
        .exec(conn)
        .await?;

    Ok(result.rows_affected)
}

/// Decrement stock for a batch of `(product_id, quantity)` lines, failing the
/// whole batch on the first line that cannot be satisfied. The caller's
/// transaction is expected to roll back on error, undoing earlier decrements.
pub async fn decrease_stock_for_lines<C: ConnectionTrait>(
    conn: &C,
    lines: &[(Uuid, i32)],
) -> AppResult<()> {
    for (product_id, quantity) in lines {
        let affected = decrease_stock(conn, *product_id, *quantity).await?;
        if affected == 0 {
            return Err(AppError::Conflict(format!(
                "Insufficient stock for product {product_id}"
            )));
        }
    }
    Ok(())
}
