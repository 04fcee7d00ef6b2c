use axum::{routing::get, Router};

pub mod admin;
pub mod bids;
pub mod common;
pub mod contracts;
pub mod disbursements;
pub mod invoices;
pub mod offers;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/relationships", get(system::relationships))
        .route("/marketplace", get(bids::marketplace))
        .nest("/invoices", invoices::router())
        .nest("/offers", offers::router())
        .nest("/bids", bids::router())
        .nest("/disbursements", disbursements::router())
        .nest("/repayments", disbursements::repayments_router())
        .nest("/contracts", contracts::router())
        .nest("/admin", admin::router())
}
