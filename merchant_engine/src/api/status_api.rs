use std::fmt::Debug;

use log::*;
use merchant_common::Amount;

use crate::{
    api::{
        active_instance,
        order_objects::{PaidStatus, PaymentStatus, StatusQuery, StatusRequest, UnpaidStatus},
        PollRegistries,
        StatusApiError,
    },
    db_types::{ContractTermsRecord, Instance, InstanceId, OrderId},
    helpers::MerchantUrls,
    long_poll::{payment_resume_key, WakeReason},
    traits::{InstanceManagement, OrderManagement, PaymentManagement, RefundManagement},
};

/// The outcome of one evaluation of an order's status, and whether it satisfies the request.
struct Evaluation {
    status: PaymentStatus,
    settled: bool,
}

/// Answers whether an order has been paid, for the merchant's frontend (check-payment) and for wallets
/// (poll-payment). Both forms can long-poll: the request is parked until the payment handler or a refund increase
/// resumes the order, or until the timeout elapses, and the status is then evaluated once more.
pub struct StatusApi<B> {
    db: B,
    pollers: PollRegistries,
}

impl<B> Debug for StatusApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StatusApi")
    }
}

impl<B> StatusApi<B> {
    pub fn new(db: B, pollers: PollRegistries) -> Self {
        Self { db, pollers }
    }
}

impl<B> StatusApi<B>
where B: InstanceManagement + OrderManagement + PaymentManagement + RefundManagement
{
    pub async fn payment_status(
        &self,
        instance_id: &InstanceId,
        urls: &MerchantUrls,
        request: StatusRequest,
    ) -> Result<PaymentStatus, StatusApiError> {
        let instance = active_instance(&self.db, instance_id)
            .await?
            .ok_or_else(|| StatusApiError::UnknownInstance(instance_id.clone()))?;
        if let Some(min) = &request.min_refund {
            if !min.same_currency(&instance.default_max_deposit_fee) {
                return Err(StatusApiError::InvalidRefundAmount(min.to_string()));
            }
        }
        // Register before the first read so that a payment committing in between still wakes us up.
        let suspension = (!request.timeout.is_zero()).then(|| {
            let key = payment_resume_key(&request.order_id, &instance.merchant_pub);
            self.pollers.payments.suspend(key, request.timeout)
        });
        let first = self.evaluate(&instance, urls, &request).await?;
        let Some(suspension) = suspension else {
            return Ok(first.status);
        };
        if first.settled {
            return Ok(first.status);
        }
        trace!("⏳️ Waiting up to {:?} for order [{}]", request.timeout, request.order_id);
        let reason = suspension.wait().await;
        debug!("⏳️ Status request for [{}] woke up: {reason:?}", request.order_id);
        if reason == WakeReason::Cancelled {
            return Ok(first.status);
        }
        Ok(self.evaluate(&instance, urls, &request).await?.status)
    }

    async fn contract(
        &self,
        instance: &Instance,
        request: &StatusRequest,
    ) -> Result<Option<ContractTermsRecord>, StatusApiError> {
        match &request.query {
            StatusQuery::CheckPayment => Ok(self.db.fetch_contract_terms(&instance.id, &request.order_id).await?),
            StatusQuery::PollPayment { h_contract } => {
                let contract = self.db.fetch_contract_terms(&instance.id, &request.order_id).await?;
                match contract {
                    Some(c) if c.h_contract_terms == *h_contract => Ok(Some(c)),
                    Some(_) => Err(StatusApiError::ContractHashMismatch(request.order_id.clone())),
                    None => Ok(None),
                }
            },
        }
    }

    async fn evaluate(
        &self,
        instance: &Instance,
        urls: &MerchantUrls,
        request: &StatusRequest,
    ) -> Result<Evaluation, StatusApiError> {
        let order_id = &request.order_id;
        let session_id = request.session_id.as_deref();
        let unpaid = |already_paid_order_id: Option<OrderId>| UnpaidStatus {
            paid: false,
            taler_pay_uri: urls.pay_uri(order_id, session_id),
            contract_url: request.contract_url.clone().unwrap_or_else(|| urls.contract_url(order_id)),
            already_paid_order_id,
        };
        let Some(contract) = self.contract(instance, request).await? else {
            if self.db.fetch_order(&instance.id, order_id).await?.is_none() {
                return Err(StatusApiError::UnknownOrder(order_id.clone()));
            }
            trace!("⏳️ Order [{order_id}] has not been claimed yet");
            return Ok(Evaluation { status: PaymentStatus::Unpaid(unpaid(None)), settled: false });
        };

        let paid = match (contract.paid, session_id) {
            (false, _) => false,
            (true, None) => true,
            (true, Some(session)) => self.db.is_paid_in_session(&instance.id, session, order_id).await?,
        };
        if !paid {
            let already_paid_order_id = match session_id {
                Some(session) => self
                    .db
                    .fetch_session_payment(&instance.id, session, &contract.fulfillment_url)
                    .await?
                    .map(|p| p.order_id)
                    .filter(|other| other != order_id),
                None => None,
            };
            if let Some(other) = &already_paid_order_id {
                debug!("⏳️ Session already bought the resource of [{order_id}] with order [{other}]");
            }
            return Ok(Evaluation { status: PaymentStatus::Unpaid(unpaid(already_paid_order_id)), settled: false });
        }

        let currency = instance.default_max_deposit_fee.currency().to_string();
        let refunds = self.db.fetch_refunds(&contract.h_contract_terms).await?;
        let refund_total = Amount::sum(&currency, refunds.iter().map(|r| &r.refund_amount))
            .map_err(|e| StatusApiError::Internal(e.to_string()))?;
        let refunded = !refund_total.is_zero();
        let settled = match &request.min_refund {
            None => true,
            Some(min) => {
                refund_total.try_cmp(min).map_err(|e| StatusApiError::InvalidRefundAmount(e.to_string()))?.is_gt()
            },
        };
        let contract_terms = match request.query {
            StatusQuery::CheckPayment => {
                Some(contract.contract_terms().map_err(|e| StatusApiError::Internal(e.to_string()))?)
            },
            StatusQuery::PollPayment { .. } => None,
        };
        let status = PaidStatus { paid: true, refunded, refund_amount: refunded.then_some(refund_total), contract_terms };
        Ok(Evaluation { status: PaymentStatus::Paid(status), settled })
    }
}
