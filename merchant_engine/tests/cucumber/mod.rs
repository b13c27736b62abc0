pub mod fake_exchange;
pub mod merchant_world;
pub mod setups;
pub mod steps;

pub use merchant_world::MerchantWorld;
