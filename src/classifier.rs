//! Maps the inbound path suffix to the operation the gateway performs.

/// Base path for completion traffic; admin routes hang off it.
pub const COMPLETIONS_BASE: &str = "/v1/chat/completions";

/// Path of the synthesized model catalogue.
pub const MODELS_PATH: &str = "/ai-gateway/api/v1/models";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Completion,
    Admin(AdminOp),
    Catalogue,
    PassThrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminOp {
    TotalQuery,
    TotalRefresh,
    TotalDelta,
    UsedQuery,
    UsedRefresh,
    UsedDelta,
    StarQuery,
    StarSet,
}

impl AdminOp {
    /// Mutations read a form-encoded body; queries read the query string.
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            AdminOp::TotalRefresh
                | AdminOp::TotalDelta
                | AdminOp::UsedRefresh
                | AdminOp::UsedDelta
                | AdminOp::StarSet
        )
    }
}

/// Classify a request path. `admin_path` is the configured admin segment
/// (default `/quota`) appended to the completions base.
///
/// Longer suffixes are checked first so `…/used/refresh` can never be taken
/// for `…/used`.
pub fn classify(path: &str, admin_path: &str) -> RequestKind {
    let admin_base = format!("{COMPLETIONS_BASE}{admin_path}");

    let admin_suffixes: [(&str, AdminOp); 7] = [
        ("/star/set", AdminOp::StarSet),
        ("/star", AdminOp::StarQuery),
        ("/used/refresh", AdminOp::UsedRefresh),
        ("/used/delta", AdminOp::UsedDelta),
        ("/used", AdminOp::UsedQuery),
        ("/refresh", AdminOp::TotalRefresh),
        ("/delta", AdminOp::TotalDelta),
    ];
    for (suffix, op) in admin_suffixes {
        if path.ends_with(&format!("{admin_base}{suffix}")) {
            return RequestKind::Admin(op);
        }
    }
    if path.ends_with(&admin_base) {
        return RequestKind::Admin(AdminOp::TotalQuery);
    }
    if path.ends_with(COMPLETIONS_BASE) {
        return RequestKind::Completion;
    }
    if path.ends_with(MODELS_PATH) {
        return RequestKind::Catalogue;
    }
    RequestKind::PassThrough
}
