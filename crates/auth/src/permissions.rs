use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are opaque strings (e.g. "documents.confirm"). The wildcard
/// `"*"` grants everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const WILDCARD: Permission = Permission(Cow::Borrowed("*"));

    /// Create/edit draft documents and their lines.
    pub const DOCUMENTS_WRITE: Permission = Permission(Cow::Borrowed("documents.write"));
    pub const DOCUMENTS_CONFIRM: Permission = Permission(Cow::Borrowed("documents.confirm"));
    pub const DOCUMENTS_CANCEL: Permission = Permission(Cow::Borrowed("documents.cancel"));
    pub const DOCUMENTS_READ: Permission = Permission(Cow::Borrowed("documents.read"));

    /// Start counts and record counted quantities.
    pub const COUNTS_WRITE: Permission = Permission(Cow::Borrowed("counts.write"));
    /// Complete, reopen or cancel counts (these move stock).
    pub const COUNTS_COMPLETE: Permission = Permission(Cow::Borrowed("counts.complete"));

    pub const STOCK_READ: Permission = Permission(Cow::Borrowed("stock.read"));
    pub const AUDIT_READ: Permission = Permission(Cow::Borrowed("audit.read"));

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
