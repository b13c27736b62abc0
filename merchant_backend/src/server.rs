use std::{path::Path, sync::Arc, time::Duration};

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use log::*;
use merchant_engine::{
    api::InstanceApiError,
    db_types::NewInstance,
    events::EventProducers,
    exchange::{ExchangeClient, HttpExchangeClient},
    settings::MerchantSettings,
    InstanceApi,
    MerchantDatabase,
    OrderApi,
    PaymentApi,
    PollRegistries,
    RefundApi,
    SqliteDatabase,
    StatusApi,
    TipApi,
    TrackingApi,
};

use crate::{
    audit::create_audit_log_handlers,
    config::{MerchantFile, ServerConfig, ServerOptions},
    errors::ServerError,
    routes::{
        health,
        unknown_endpoint,
        CheckPaymentRoute,
        ClaimOrderRoute,
        ConfigRoute,
        CreateInstanceRoute,
        CreateOrderRoute,
        CreateProductRoute,
        DeleteInstanceRoute,
        DeleteProductRoute,
        FetchProposalRoute,
        InstanceRoute,
        InstancesRoute,
        ListOrdersRoute,
        PayRoute,
        PollPaymentRoute,
        ProductRoute,
        ProductsRoute,
        ProposeRoute,
        RefundIncreaseRoute,
        RefundLookupRoute,
        TipAuthorizeRoute,
        TipInfoRoute,
        TipPickupRoute,
        TipQueryRoute,
        TrackTransactionRoute,
        TrackTransferRoute,
        TriggerPayRoute,
        UpdateInstanceRoute,
        UpdateProductRoute,
    },
};

/// Everything the request handlers share. One copy of each API is built per worker from these.
pub struct MerchantContext<B, E> {
    pub db: B,
    pub exchange: Arc<E>,
    pub settings: Arc<MerchantSettings>,
    pub pollers: PollRegistries,
    pub producers: EventProducers,
    pub options: ServerOptions,
}

impl<B: Clone, E> Clone for MerchantContext<B, E> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            exchange: Arc::clone(&self.exchange),
            settings: Arc::clone(&self.settings),
            pollers: self.pollers.clone(),
            producers: self.producers.clone(),
            options: self.options,
        }
    }
}

impl<B, E> MerchantContext<B, E>
where
    B: MerchantDatabase + Clone + 'static,
    E: ExchangeClient + 'static,
{
    /// Registers the APIs as app data, and every route of the backend.
    pub fn configure(&self, cfg: &mut web::ServiceConfig) {
        let db = &self.db;
        let settings = &self.settings;
        cfg.app_data(web::Data::new(OrderApi::new(db.clone(), settings.clone(), self.pollers.clone())))
            .app_data(web::Data::new(PaymentApi::new(
                db.clone(),
                self.exchange.clone(),
                settings.clone(),
                self.pollers.clone(),
                self.producers.clone(),
            )))
            .app_data(web::Data::new(StatusApi::new(db.clone(), self.pollers.clone())))
            .app_data(web::Data::new(TrackingApi::new(db.clone(), self.exchange.clone(), settings.clone())))
            .app_data(web::Data::new(RefundApi::new(
                db.clone(),
                self.exchange.clone(),
                settings.clone(),
                self.pollers.clone(),
                self.producers.clone(),
            )))
            .app_data(web::Data::new(TipApi::new(db.clone(), self.exchange.clone(), settings.clone())))
            .app_data(web::Data::new(InstanceApi::new(db.clone(), settings.clone())))
            .app_data(web::Data::from(settings.clone()))
            .app_data(web::Data::new(self.options));
        cfg.service(health).service(ConfigRoute::new());
        // Admin routes go first. Their paths overlap with the instance-prefixed public routes.
        cfg.service(InstancesRoute::<B>::new())
            .service(CreateInstanceRoute::<B>::new())
            .service(InstanceRoute::<B>::new())
            .service(UpdateInstanceRoute::<B>::new())
            .service(DeleteInstanceRoute::<B>::new())
            .service(ProductsRoute::<B>::new())
            .service(CreateProductRoute::<B>::new())
            .service(ProductRoute::<B>::new())
            .service(UpdateProductRoute::<B>::new())
            .service(DeleteProductRoute::<B>::new());
        register_public_routes::<B, E>(cfg, false);
        register_public_routes::<B, E>(cfg, true);
    }
}

macro_rules! public_routes {
    ($cfg:expr, $ctor:ident, B = $b:ty, E = $e:ty) => {
        $cfg.service(CreateOrderRoute::<$b>::$ctor())
            .service(ProposeRoute::<$b>::$ctor())
            .service(ListOrdersRoute::<$b>::$ctor())
            .service(ClaimOrderRoute::<$b>::$ctor())
            .service(FetchProposalRoute::<$b>::$ctor())
            .service(PayRoute::<$b, $e>::$ctor())
            .service(CheckPaymentRoute::<$b>::$ctor())
            .service(PollPaymentRoute::<$b>::$ctor())
            .service(TriggerPayRoute::$ctor())
            .service(TrackTransactionRoute::<$b, $e>::$ctor())
            .service(TrackTransferRoute::<$b, $e>::$ctor())
            .service(RefundIncreaseRoute::<$b, $e>::$ctor())
            .service(RefundLookupRoute::<$b, $e>::$ctor())
            .service(TipAuthorizeRoute::<$b, $e>::$ctor())
            .service(TipPickupRoute::<$b, $e>::$ctor())
            .service(TipQueryRoute::<$b, $e>::$ctor())
            .service(TipInfoRoute::<$b, $e>::$ctor())
    };
}

fn register_public_routes<B, E>(cfg: &mut web::ServiceConfig, per_instance: bool)
where
    B: MerchantDatabase + 'static,
    E: ExchangeClient + 'static,
{
    if per_instance {
        public_routes!(cfg, for_instance, B = B, E = E);
    } else {
        public_routes!(cfg, new, B = B, E = E);
    }
}

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let merchant = MerchantFile::load(&config.config_file)?;
    let settings = Arc::new(merchant.settings(config.exchange_timeout)?);
    let instances = merchant.instances()?;
    prepare_database_dir(&config.database_url)?;
    let db = SqliteDatabase::new_with_url(&config.database_url, config.max_db_connections)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    db.migrate().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    provision_instances(&InstanceApi::new(db.clone(), settings.clone()), instances).await?;

    let handlers = create_audit_log_handlers();
    let producers = handlers.producers();
    handlers.start_handlers().await;

    let context = MerchantContext {
        db,
        exchange: Arc::new(HttpExchangeClient::new(config.exchange_timeout, config.keys_cache_ttl)),
        settings,
        pollers: PollRegistries::default(),
        producers,
        options: config.options(),
    };
    let pollers = context.pollers.clone();
    let srv = create_server_instance(&config, context)?;
    let result = srv.await;
    // Parked long polls would otherwise hold their workers until they time out
    pollers.cancel_all();
    result.map_err(ServerError::from)
}

pub fn create_server_instance<B, E>(config: &ServerConfig, context: MerchantContext<B, E>) -> Result<Server, ServerError>
where
    B: MerchantDatabase + Clone + Send + 'static,
    E: ExchangeClient + Send + Sync + 'static,
{
    let srv = HttpServer::new(move || {
        let context = context.clone();
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("merchant::access_log"))
            .configure(move |cfg| context.configure(cfg))
            .default_service(web::to(unknown_endpoint))
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    info!("💻️ Listening on {}:{}", config.host, config.port);
    Ok(srv)
}

/// Creates the instances named in the merchant file that the database does not know yet. Existing instances are
/// left exactly as they are, including ones that were deleted without purging.
pub async fn provision_instances<B: MerchantDatabase>(
    api: &InstanceApi<B>,
    instances: Vec<NewInstance>,
) -> Result<(), ServerError> {
    for instance in instances {
        let id = instance.id.clone();
        match api.instance(&id).await {
            Ok(_) => debug!("🪛️ Instance {id} already exists"),
            Err(InstanceApiError::UnknownInstance(_)) => {
                api.create_instance(instance)
                    .await
                    .map_err(|e| ServerError::ConfigurationError(format!("Could not create instance {id}. {e}")))?;
                info!("🪛️ Created instance {id}");
            },
            Err(e) => return Err(ServerError::InitializeError(e.to_string())),
        }
    }
    Ok(())
}

/// SQLite creates the database file on demand, but not the directory it lives in.
fn prepare_database_dir(url: &str) -> Result<(), ServerError> {
    let Some(path) = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:")) else {
        return Ok(());
    };
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path == ":memory:" {
        return Ok(());
    }
    match Path::new(path).parent() {
        Some(dir) if !dir.as_os_str().is_empty() && !dir.exists() => {
            info!("🗃️ Creating database directory {}", dir.display());
            std::fs::create_dir_all(dir)?;
            Ok(())
        },
        _ => Ok(()),
    }
}
