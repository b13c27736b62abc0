//! Audit logging of payment lifecycle events.
//!
//! Paid orders and refund increases are written to the `merchant::audit` log target, one line per event, so that
//! operators can route them to a separate sink with `RUST_LOG=merchant::audit=info`.
use log::*;
use merchant_engine::events::{EventHandlers, EventHooks, OrderPaidEvent, RefundIncreasedEvent};

pub const AUDIT_EVENT_BUFFER_SIZE: usize = 25;
const AUDIT_TARGET: &str = "merchant::audit";

pub fn order_paid_line(ev: &OrderPaidEvent) -> String {
    let session = ev.session_id.as_deref().unwrap_or("-");
    format!(
        "📬️ PAID instance={} order={} amount={} session={session} h_contract={}",
        ev.instance, ev.order_id, ev.amount, ev.h_contract_terms
    )
}

pub fn refund_increased_line(ev: &RefundIncreasedEvent) -> String {
    format!(
        "📬️ REFUND instance={} order={} total={} reason={:?} h_contract={}",
        ev.instance, ev.order_id, ev.refund_total, ev.reason, ev.h_contract_terms
    )
}

pub fn create_audit_log_handlers() -> EventHandlers {
    let mut hooks = EventHooks::default();
    hooks
        .on_order_paid(|ev| {
            Box::pin(async move {
                info!(target: AUDIT_TARGET, "{}", order_paid_line(&ev));
            })
        })
        .on_refund_increased(|ev| {
            Box::pin(async move {
                info!(target: AUDIT_TARGET, "{}", refund_increased_line(&ev));
            })
        });
    EventHandlers::new(AUDIT_EVENT_BUFFER_SIZE, hooks)
}
