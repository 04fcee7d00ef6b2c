use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are opaque strings (e.g. "offer.create"). The wildcard `"*"`
/// grants everything and is reserved for the admin policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const WILDCARD: Permission = Permission::from_static("*");

    pub const INVOICE_READ: Permission = Permission::from_static("invoice.read");
    pub const INVOICE_UPLOAD: Permission = Permission::from_static("invoice.upload");
    pub const INVOICE_RESPOND: Permission = Permission::from_static("invoice.respond");
    pub const INVOICE_DISPUTE: Permission = Permission::from_static("invoice.dispute");
    pub const OFFER_CREATE: Permission = Permission::from_static("offer.create");
    pub const OFFER_RESPOND: Permission = Permission::from_static("offer.respond");
    pub const FUNDING_SELECT: Permission = Permission::from_static("offer.funding_type");
    pub const PAYMENT_AUTHORIZE: Permission = Permission::from_static("payment.authorize");
    pub const MARKETPLACE_READ: Permission = Permission::from_static("marketplace.read");
    pub const BID_PLACE: Permission = Permission::from_static("bid.place");
    pub const BID_ACCEPT: Permission = Permission::from_static("bid.accept");
    pub const DISBURSE: Permission = Permission::from_static("disbursement.create");
    pub const DISBURSEMENT_CONFIRM: Permission = Permission::from_static("disbursement.confirm");
    pub const REPAYMENT_SETTLE: Permission = Permission::from_static("repayment.settle");
    pub const REPAYMENT_DEFAULT: Permission = Permission::from_static("repayment.default");
    pub const CONTRACT_READ: Permission = Permission::from_static("contract.read");
    pub const OPERATIONS: Permission = Permission::from_static("ops.manage");

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
