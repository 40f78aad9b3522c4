//! WeCom errcode helpers
//!
//! Purpose
//! - Map well-known global errcode values to categories and hints
//! - Tell the send path when the access_token should be refreshed
//!
//! Notes
//! - Program logic depends on `errcode`, never on `errmsg`.
//! - Unknown codes are `Unknown`: no retry advice, no refresh, generic hint.

/// High-level classification for an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// errcode = 0
    Success,
    /// System busy; safe to try again later
    TemporarySystem,
    /// Credential or token problems
    Auth,
    /// Malformed or out-of-range request fields
    InvalidParam,
    /// Recipients rejected by the provider
    Recipient,
    /// Frequency or quota limits
    Limit,
    Unknown,
}

/// Returns a friendly hint for a known errcode.
pub fn hint_for(code: i64) -> &'static str {
    match code {
        -1 => "System busy; retry later.",
        0 => "Success.",
        40001 => "Invalid secret; use the Secret of the sending app, not another app's.",
        40013 => "Invalid corpid; use the corpid from My Company (starts with 'ww').",
        40014 => "Invalid access_token; reacquire the token and resend.",
        40056 => "Invalid agentid; check the app's AgentId in the Admin Portal.",
        41001 => "Missing access_token; the request was sent without a token.",
        42001 => "access_token expired; reacquire the token and resend.",
        44004 => "Empty text content; message content must not be blank.",
        45002 => "Content too long; text messages are limited to 2048 bytes.",
        45009 => "API call frequency limit exceeded; back off before calling again.",
        60020 => "Caller IP not in the app's trusted IP list.",
        81013 => "All recipients invalid; check userids and that they are in the app's visible range.",
        82001 => "No recipients; touser, toparty and totag are all empty.",
        _ => "Unknown code; refer to the official error code reference.",
    }
}

/// Classify errcode into a category.
pub fn category_for(code: i64) -> ErrorCategory {
    match code {
        0 => ErrorCategory::Success,
        -1 => ErrorCategory::TemporarySystem,
        40001 | 40013 | 40014 | 41001 | 42001 | 60020 => ErrorCategory::Auth,
        40056 | 44004 | 45002 => ErrorCategory::InvalidParam,
        81013 | 82001 => ErrorCategory::Recipient,
        45009 => ErrorCategory::Limit,
        _ => ErrorCategory::Unknown,
    }
}

/// Whether the current access_token should be replaced before the next send.
pub fn should_refresh_token(code: i64) -> bool {
    matches!(code, 40014 | 41001 | 42001)
}

/// Return true if this error looks temporary.
pub fn is_temporary(code: i64) -> bool {
    matches!(category_for(code), ErrorCategory::TemporarySystem)
}

/// Concise explanation suitable for logs.
pub fn explain(errcode: i64, errmsg: &str) -> String {
    let mut parts = vec![
        format!("errcode={} ({:?})", errcode, category_for(errcode)),
        format!("hint: {}", hint_for(errcode)),
    ];
    if should_refresh_token(errcode) {
        parts.push("refresh_token: yes".to_string());
    }
    if contains_wrong_json_format(errmsg) {
        parts.push("detected: wrong json format in request body".to_string());
    }
    parts.join(" | ")
}

/// Detect "Warning: wrong json format." substring in errmsg (case-insensitive).
pub fn contains_wrong_json_format(errmsg: &str) -> bool {
    errmsg
        .to_ascii_lowercase()
        .contains("warning: wrong json format")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_codes_trigger_refresh() {
        assert!(should_refresh_token(40014));
        assert!(should_refresh_token(42001));
        assert!(!should_refresh_token(40001));
        assert!(!should_refresh_token(81013));
    }

    #[test]
    fn categories() {
        assert_eq!(category_for(0), ErrorCategory::Success);
        assert_eq!(category_for(40014), ErrorCategory::Auth);
        assert_eq!(category_for(81013), ErrorCategory::Recipient);
        assert_eq!(category_for(123456), ErrorCategory::Unknown);
        assert!(is_temporary(-1));
    }

    #[test]
    fn explain_mentions_refresh_and_json_warning() {
        let s = explain(40014, "invalid access_token, Warning: wrong json format.");
        assert!(s.contains("errcode=40014 (Auth)"));
        assert!(s.contains("refresh_token: yes"));
        assert!(s.contains("wrong json format"));
    }
}
