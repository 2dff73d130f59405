use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        auth, cart::CartList,
        invoices::{InvoiceList, InvoiceWithItems},
        orders::{OrderList, OrderSummary, OrderWithItems},
        payments::{IpnResponse, PaymentMethodList, PaymentReturnResponse},
        products,
    },
    models::{
        CartItem, Invoice, InvoiceItem, Order, OrderItem, OrderStatus, PaymentKind,
        PaymentMethod, Product, User,
    },
    response::{ApiResponse, Meta},
    routes::{
        admin, auth as auth_routes, cart, health, invoices, orders, params, payments,
        products as product_routes,
    },
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth_routes::login,
        auth_routes::register,
        auth_routes::refresh,
        auth_routes::logout,
        auth_routes::forgot_password,
        auth_routes::reset_password,
        cart::cart_list,
        cart::add_to_cart,
        cart::remove_from_cart,
        product_routes::list_products,
        product_routes::create_product,
        product_routes::get_product,
        product_routes::related_products,
        product_routes::update_product,
        product_routes::delete_product,
        orders::list_orders,
        orders::checkout,
        orders::get_order,
        orders::delete_order,
        payments::ipn,
        payments::payment_return,
        payments::list_methods,
        invoices::list_invoices,
        invoices::get_invoice,
        invoices::delete_invoice,
        admin::list_all_orders,
        admin::get_order_admin,
        admin::update_order_status,
        admin::list_low_stock,
        admin::adjust_inventory
    ),
    components(
        schemas(
            User,
            Product,
            CartItem,
            Order,
            OrderItem,
            OrderStatus,
            Invoice,
            InvoiceItem,
            PaymentMethod,
            PaymentKind,
            auth::TokenPair,
            auth::RegisterRequest,
            auth::LoginRequest,
            auth::RefreshRequest,
            auth::ForgotPasswordRequest,
            auth::ResetPasswordRequest,
            CartList,
            OrderList,
            OrderSummary,
            OrderWithItems,
            IpnResponse,
            PaymentReturnResponse,
            PaymentMethodList,
            InvoiceList,
            InvoiceWithItems,
            admin::ProductList,
            admin::UpdateOrderStatusRequest,
            admin::InventoryAdjustRequest,
            admin::LowStockQuery,
            params::Pagination,
            params::ProductQuery,
            params::OrderListQuery,
            products::ProductList,
            products::RelatedProducts,
            Meta,
            ApiResponse<Product>,
            ApiResponse<products::ProductList>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<InvoiceWithItems>,
            ApiResponse<admin::ProductList>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Authentication and token rotation"),
        (name = "Products", description = "Product catalog"),
        (name = "Cart", description = "Cart endpoints"),
        (name = "Orders", description = "Checkout and order lifecycle"),
        (name = "Payments", description = "Gateway redirect, return and notification"),
        (name = "Invoices", description = "Settlement invoices"),
        (name = "Admin", description = "Operator endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
