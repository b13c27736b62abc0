mod helpers;
mod mocks;

mod instances;
mod misc;
mod orders;
mod payments;
mod refunds;
mod tips;
mod tracking;
