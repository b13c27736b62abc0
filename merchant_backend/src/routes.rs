//! Request handler definitions
//!
//! Define each route and its handler here. Handlers only translate between HTTP and the engine APIs: they pull the
//! instance, URLs and arguments out of the request, call one API method and turn the result into a reply. Anything
//! longer than that belongs in the engine.
//!
//! Every public route is registered twice by the server: once at the root, where the `instance` query argument picks
//! the instance, and once below `/instances/{instance}`. See [`INSTANCE_PREFIX`].
//!
//! A note about performance:
//! Each worker thread processes its requests sequentially, so handlers must never block. Long polls in particular are
//! futures that park on the engine's poll registries; the worker carries on serving other requests while they wait.
use actix_web::{get, http::StatusCode, web, HttpRequest, HttpResponse, Responder};
use log::*;
use merchant_engine::{
    api::{
        order_objects::{ClaimRequest, PostOrderRequest, StatusQuery},
        payment_objects::{PayRequest, RefundIncreaseRequest, TrackTransactionResult},
        tip_objects::{TipAuthorizeRequest, TipPickupRequest},
    },
    crypto::{HashCode, Nonce, WireTransferId},
    db_types::{InstanceId, InstancePatch, NewInstance, OrderId, Product, ProductPatch},
    exchange::ExchangeClient,
    settings::MerchantSettings,
    InstanceApi,
    MerchantDatabase,
    OrderApi,
    PaymentApi,
    RefundApi,
    StatusApi,
    TipApi,
    TrackingApi,
};

use crate::{
    body::JsonBody,
    data_objects::{
        order_list_query,
        status_request,
        ConfigResponse,
        InstanceList,
        ProductList,
        TriggerPay,
        PROTOCOL_VERSION,
    },
    errors::ServerError,
    helpers::{QueryArgs, RequestContext},
};

/// The scope under which every public route is available for a named instance.
pub const INSTANCE_PREFIX: &str = "/instances/{instance}";

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro.
// `new()` mounts a route at the root, `for_instance()` mounts it below `INSTANCE_PREFIX`.
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal) => {
        paste::paste! { pub struct [<$name:camel Route>] { prefix: &'static str } }
        paste::paste! {
            impl [<$name:camel Route>] {
                #[allow(clippy::new_without_default)]
                pub fn new() -> Self { Self { prefix: "" } }

                pub fn for_instance() -> Self { Self { prefix: $crate::routes::INSTANCE_PREFIX } }
            }
        }
        paste::paste! {
            impl actix_web::dev::HttpServiceFactory for [<$name:camel Route>] {
                fn register(self, config: &mut actix_web::dev::AppService) {
                    let res = actix_web::Resource::new(format!("{}{}", self.prefix, $path))
                        .name(&format!("{}{}", stringify!($name), self.prefix))
                        .guard(actix_web::guard::$method())
                        .to($name);
                    actix_web::dev::HttpServiceFactory::register(res, config);
                }
            }
        }
    };

    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            prefix: &'static str,
            _types: ( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ ),
        }}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self { prefix: "", _types: ($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+) }
            }

            pub fn for_instance() -> Self {
                Self {
                    prefix: $crate::routes::INSTANCE_PREFIX,
                    _types: ($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+),
                }
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new(format!("{}{}", self.prefix, $path))
                    .name(&format!("{}{}", stringify!($name), self.prefix))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

fn path_param(req: &HttpRequest, name: &str) -> Result<String, ServerError> {
    req.match_info().get(name).map(String::from).ok_or_else(|| ServerError::MissingParameter(name.to_string()))
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

route!(config => Get "/config");
pub async fn config(settings: web::Data<MerchantSettings>) -> HttpResponse {
    HttpResponse::Ok()
        .json(ConfigResponse { currency: settings.currency.clone(), version: PROTOCOL_VERSION.to_string() })
}

/// Anything that matches no route.
pub async fn unknown_endpoint(req: HttpRequest) -> Result<HttpResponse, ServerError> {
    debug!("💻️ No route for {} {}", req.method(), req.path());
    Err(ServerError::rejected(merchant_common::ErrorCode::EndpointUnknown, "There is no endpoint with this path")
        .with_detail("path", req.path()))
}

//----------------------------------------------   Orders  ----------------------------------------------------
route!(create_order => Post "/orders" impl MerchantDatabase);
pub async fn create_order<B: MerchantDatabase>(
    ctx: RequestContext,
    body: JsonBody<PostOrderRequest>,
    api: web::Data<OrderApi<B>>,
) -> Result<HttpResponse, ServerError> {
    debug!("💻️ POST order for {}", ctx.instance);
    let response = api.create_order(&ctx.instance, &ctx.urls, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(response))
}

// The pre-claim name of the order endpoint
route!(propose => Post "/proposal" impl MerchantDatabase);
pub async fn propose<B: MerchantDatabase>(
    ctx: RequestContext,
    body: JsonBody<PostOrderRequest>,
    api: web::Data<OrderApi<B>>,
) -> Result<HttpResponse, ServerError> {
    create_order(ctx, body, api).await
}

route!(list_orders => Get "/orders" impl MerchantDatabase);
pub async fn list_orders<B: MerchantDatabase>(
    ctx: RequestContext,
    args: QueryArgs,
    api: web::Data<OrderApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let (filter, timeout) = order_list_query(&args)?;
    trace!("💻️ Listing orders of {} with {filter:?}", ctx.instance);
    let orders = api.list_orders(&ctx.instance, filter, timeout).await?;
    Ok(HttpResponse::Ok().json(orders))
}

route!(claim_order => Post "/orders/{order_id}/claim" impl MerchantDatabase);
pub async fn claim_order<B: MerchantDatabase>(
    req: HttpRequest,
    ctx: RequestContext,
    body: JsonBody<ClaimRequest>,
    api: web::Data<OrderApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order_id = OrderId::from(path_param(&req, "order_id")?);
    debug!("💻️ Claim request for order [{order_id}]");
    let response = api.claim_order(&ctx.instance, &order_id, &body.nonce).await?;
    Ok(HttpResponse::Ok().json(response))
}

route!(fetch_proposal => Get "/public/proposal" impl MerchantDatabase);
pub async fn fetch_proposal<B: MerchantDatabase>(
    ctx: RequestContext,
    args: QueryArgs,
    api: web::Data<OrderApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order_id = OrderId::from(args.required("order_id")?);
    let nonce = args.parse_required::<Nonce>("nonce")?;
    let response = api.fetch_proposal(&ctx.instance, &order_id, &nonce).await?;
    Ok(HttpResponse::Ok().json(response))
}

//----------------------------------------------   Payments  ----------------------------------------------------
route!(pay => Post "/public/pay" impl MerchantDatabase, ExchangeClient);
pub async fn pay<B: MerchantDatabase, E: ExchangeClient>(
    ctx: RequestContext,
    body: JsonBody<PayRequest>,
    api: web::Data<PaymentApi<B, E>>,
) -> Result<HttpResponse, ServerError> {
    let request = body.into_inner();
    debug!("💻️ {} request for order [{}] with {} coin(s)", request.mode, request.order_id, request.coins.len());
    let result = api.pay(&ctx.instance, request).await?;
    Ok(HttpResponse::Ok().json(result))
}

route!(check_payment => Get "/check-payment" impl MerchantDatabase);
pub async fn check_payment<B: MerchantDatabase>(
    ctx: RequestContext,
    args: QueryArgs,
    api: web::Data<StatusApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let request = status_request(&args, StatusQuery::CheckPayment)?;
    let status = api.payment_status(&ctx.instance, &ctx.urls, request).await?;
    Ok(HttpResponse::Ok().json(status))
}

route!(poll_payment => Get "/public/poll-payment" impl MerchantDatabase);
pub async fn poll_payment<B: MerchantDatabase>(
    ctx: RequestContext,
    args: QueryArgs,
    api: web::Data<StatusApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let h_contract = args.parse_required::<HashCode>("h_contract")?;
    let request = status_request(&args, StatusQuery::PollPayment { h_contract })?;
    let status = api.payment_status(&ctx.instance, &ctx.urls, request).await?;
    Ok(HttpResponse::Ok().json(status))
}

route!(trigger_pay => Get "/public/trigger-pay");
pub async fn trigger_pay(args: QueryArgs) -> Result<HttpResponse, ServerError> {
    let trigger = TriggerPay::from_args(&args)?;
    trace!("💻️ Triggering payment for session {}", trigger.session_id);
    let mut reply = HttpResponse::build(StatusCode::PAYMENT_REQUIRED);
    reply
        .insert_header(("X-Taler-Session-Id", trigger.session_id.as_str()))
        .insert_header(("X-Taler-Contract-Url", trigger.contract_url.as_str()));
    if let Some(hash) = &trigger.h_contract_terms {
        reply.insert_header(("X-Taler-Contract-Hash", hash.to_string()));
    }
    if let Some(url) = &trigger.confirm_url {
        reply.insert_header(("X-Taler-Confirm-Url", url.as_str()));
    }
    if let Some(url) = trigger.resource_url.as_ref().or(trigger.confirm_url.as_ref()) {
        reply.insert_header(("X-Taler-Resource-Url", url.as_str()));
    }
    Ok(reply.content_type("text/html").body("Processing payment ...\n"))
}

//----------------------------------------------   Tracking  ----------------------------------------------------
route!(track_transaction => Get "/track/transaction" impl MerchantDatabase, ExchangeClient);
pub async fn track_transaction<B: MerchantDatabase, E: ExchangeClient>(
    ctx: RequestContext,
    args: QueryArgs,
    api: web::Data<TrackingApi<B, E>>,
) -> Result<HttpResponse, ServerError> {
    let order_id = OrderId::from(args.required("order_id")?);
    match api.track_transaction(&ctx.instance, &order_id).await? {
        TrackTransactionResult::Settled(response) => Ok(HttpResponse::Ok().json(response)),
        TrackTransactionResult::Pending { exchange_url, reply } => {
            debug!("💻️ {exchange_url} has not wired the money for [{order_id}] yet");
            Ok(HttpResponse::Accepted().json(reply))
        },
    }
}

route!(track_transfer => Get "/track/transfer" impl MerchantDatabase, ExchangeClient);
pub async fn track_transfer<B: MerchantDatabase, E: ExchangeClient>(
    ctx: RequestContext,
    args: QueryArgs,
    api: web::Data<TrackingApi<B, E>>,
) -> Result<HttpResponse, ServerError> {
    let exchange_url = args.required("exchange")?;
    let wtid = args.parse_required::<WireTransferId>("wtid")?;
    let report = api.track_transfer(&ctx.instance, exchange_url, &wtid).await?;
    Ok(HttpResponse::Ok().json(report))
}

//----------------------------------------------   Refunds  ----------------------------------------------------
route!(refund_increase => Post "/refund" impl MerchantDatabase, ExchangeClient);
pub async fn refund_increase<B: MerchantDatabase, E: ExchangeClient>(
    ctx: RequestContext,
    body: JsonBody<RefundIncreaseRequest>,
    api: web::Data<RefundApi<B, E>>,
) -> Result<HttpResponse, ServerError> {
    let request = body.into_inner();
    info!("💻️ Refund of {} requested for [{}]: {}", request.refund, request.order_id, request.reason);
    let response = api.increase(&ctx.instance, &ctx.urls, request).await?;
    Ok(HttpResponse::Ok().json(response))
}

route!(refund_lookup => Get "/refund" impl MerchantDatabase, ExchangeClient);
pub async fn refund_lookup<B: MerchantDatabase, E: ExchangeClient>(
    ctx: RequestContext,
    args: QueryArgs,
    api: web::Data<RefundApi<B, E>>,
) -> Result<HttpResponse, ServerError> {
    let order_id = OrderId::from(args.required("order_id")?);
    let response = api.lookup(&ctx.instance, &order_id).await?;
    Ok(HttpResponse::Ok().json(response))
}

//----------------------------------------------   Tips  ----------------------------------------------------
route!(tip_authorize => Post "/tip-authorize" impl MerchantDatabase, ExchangeClient);
pub async fn tip_authorize<B: MerchantDatabase, E: ExchangeClient>(
    ctx: RequestContext,
    body: JsonBody<TipAuthorizeRequest>,
    api: web::Data<TipApi<B, E>>,
) -> Result<HttpResponse, ServerError> {
    let request = body.into_inner();
    info!("💻️ Tip of {} requested for {}: {}", request.amount, ctx.instance, request.justification);
    let response = api.authorize(&ctx.instance, &ctx.urls, request).await?;
    Ok(HttpResponse::Ok().json(response))
}

route!(tip_pickup => Post "/tip-pickup" impl MerchantDatabase, ExchangeClient);
pub async fn tip_pickup<B: MerchantDatabase, E: ExchangeClient>(
    ctx: RequestContext,
    body: JsonBody<TipPickupRequest>,
    api: web::Data<TipApi<B, E>>,
) -> Result<HttpResponse, ServerError> {
    let request = body.into_inner();
    debug!("💻️ Pickup of tip {} with {} planchet(s)", request.tip_id, request.planchets.len());
    let response = api.pickup(&ctx.instance, request).await?;
    Ok(HttpResponse::Ok().json(response))
}

route!(tip_query => Get "/tip-query" impl MerchantDatabase, ExchangeClient);
pub async fn tip_query<B: MerchantDatabase, E: ExchangeClient>(
    ctx: RequestContext,
    api: web::Data<TipApi<B, E>>,
) -> Result<HttpResponse, ServerError> {
    let response = api.query(&ctx.instance).await?;
    Ok(HttpResponse::Ok().json(response))
}

route!(tip_info => Get "/public/tip-pickup" impl MerchantDatabase, ExchangeClient);
pub async fn tip_info<B: MerchantDatabase, E: ExchangeClient>(
    ctx: RequestContext,
    args: QueryArgs,
    api: web::Data<TipApi<B, E>>,
) -> Result<HttpResponse, ServerError> {
    let tip_id = args.parse_required::<HashCode>("tip_id")?;
    let response = api.tip_info(&ctx.instance, &tip_id).await?;
    Ok(HttpResponse::Ok().json(response))
}

//----------------------------------------------   Instances  ----------------------------------------------------
route!(instances => Get "/instances" impl MerchantDatabase);
pub async fn instances<B: MerchantDatabase>(api: web::Data<InstanceApi<B>>) -> Result<HttpResponse, ServerError> {
    let instances = api.instances().await?;
    Ok(HttpResponse::Ok().json(InstanceList { instances }))
}

route!(create_instance => Post "/instances" impl MerchantDatabase);
pub async fn create_instance<B: MerchantDatabase>(
    body: JsonBody<NewInstance>,
    api: web::Data<InstanceApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let instance = api.create_instance(body.into_inner()).await?;
    info!("💻️ Instance {} created", instance.id);
    Ok(HttpResponse::Ok().json(instance))
}

route!(instance => Get "/instances/{id}" impl MerchantDatabase);
pub async fn instance<B: MerchantDatabase>(
    req: HttpRequest,
    api: web::Data<InstanceApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = InstanceId::new(path_param(&req, "id")?);
    let instance = api.instance(&id).await?;
    Ok(HttpResponse::Ok().json(instance))
}

route!(update_instance => Patch "/instances/{id}" impl MerchantDatabase);
pub async fn update_instance<B: MerchantDatabase>(
    req: HttpRequest,
    body: JsonBody<InstancePatch>,
    api: web::Data<InstanceApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = InstanceId::new(path_param(&req, "id")?);
    let instance = api.update_instance(&id, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(instance))
}

route!(delete_instance => Delete "/instances/{id}" impl MerchantDatabase);
pub async fn delete_instance<B: MerchantDatabase>(
    req: HttpRequest,
    args: QueryArgs,
    api: web::Data<InstanceApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = InstanceId::new(path_param(&req, "id")?);
    let purge = matches!(args.optional("purge"), Some(v) if v.eq_ignore_ascii_case("yes"));
    api.delete_instance(&id, purge).await?;
    info!("💻️ Instance {id} deleted{}", if purge { " and purged" } else { "" });
    Ok(HttpResponse::NoContent().finish())
}

route!(products => Get "/instances/{id}/products" impl MerchantDatabase);
pub async fn products<B: MerchantDatabase>(
    req: HttpRequest,
    api: web::Data<InstanceApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = InstanceId::new(path_param(&req, "id")?);
    let products = api.products(&id).await?;
    Ok(HttpResponse::Ok().json(ProductList { products }))
}

route!(create_product => Post "/instances/{id}/products" impl MerchantDatabase);
pub async fn create_product<B: MerchantDatabase>(
    req: HttpRequest,
    body: JsonBody<Product>,
    api: web::Data<InstanceApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = InstanceId::new(path_param(&req, "id")?);
    let product = api.create_product(&id, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(product))
}

route!(product => Get "/instances/{id}/products/{product_id}" impl MerchantDatabase);
pub async fn product<B: MerchantDatabase>(
    req: HttpRequest,
    api: web::Data<InstanceApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = InstanceId::new(path_param(&req, "id")?);
    let product_id = path_param(&req, "product_id")?;
    let product = api.product(&id, &product_id).await?;
    Ok(HttpResponse::Ok().json(product))
}

route!(update_product => Patch "/instances/{id}/products/{product_id}" impl MerchantDatabase);
pub async fn update_product<B: MerchantDatabase>(
    req: HttpRequest,
    body: JsonBody<ProductPatch>,
    api: web::Data<InstanceApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = InstanceId::new(path_param(&req, "id")?);
    let product_id = path_param(&req, "product_id")?;
    let product = api.update_product(&id, &product_id, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(product))
}

route!(delete_product => Delete "/instances/{id}/products/{product_id}" impl MerchantDatabase);
pub async fn delete_product<B: MerchantDatabase>(
    req: HttpRequest,
    api: web::Data<InstanceApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = InstanceId::new(path_param(&req, "id")?);
    let product_id = path_param(&req, "product_id")?;
    api.delete_product(&id, &product_id).await?;
    Ok(HttpResponse::NoContent().finish())
}

