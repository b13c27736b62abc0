//! # Merchant backend server
//! This crate hosts the HTTP server of the merchant backend. It is responsible for:
//! * Accepting orders from the merchant's frontend and handing signed contracts to wallets.
//! * Taking payments from wallets and forwarding the coins to the exchanges that issued them.
//! * Answering payment status requests, long-polling where the client asks for it.
//! * Granting refunds, tracking wire transfers and handing out tips.
//! * Administering merchant instances and their product inventory.
//!
//! All of the payment logic lives in `merchant_engine`. The handlers here only translate between HTTP and the
//! engine's APIs.
//!
//! ## Configuration
//! The server is configured via environment variables and a TOML merchant file. See [config](config/index.html) for
//! more information.
//!
//! ## Routes
//! Public routes are reachable both at the root (with an `instance` query argument) and below
//! `/instances/{instance}/`. Among others:
//! * `/health`: A health check route that returns a 200 OK response.
//! * `/config`: The currency and protocol version of the backend.
//! * `/orders`, `/orders/{order_id}/claim`: Order creation, listing and claiming.
//! * `/public/pay`, `/check-payment`, `/public/poll-payment`: Payments and payment status.
//! * `/refund`, `/track/transaction`, `/track/transfer`: Refunds and wire transfer tracking.
//! * `/tip-authorize`, `/tip-pickup`, `/tip-query`: Tips.
//! * `/instances`, `/instances/{id}/products`: Administration.

pub mod audit;
pub mod body;
pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod helpers;
pub mod routes;
pub mod server;

#[cfg(test)]
mod endpoint_tests;
