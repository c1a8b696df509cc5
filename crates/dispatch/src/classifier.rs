//! Response classification — the per-recipient outcome state machine.
//!
//! Pure functions from a provider reply to a disposition; the pipeline
//! applies the disposition (store mutations, retries) afterwards. Keeping
//! classification side-effect free makes every branch of the error table
//! directly testable.

use crate::provider::{DeliveryOutcome, ProviderResult};

/// Named provider error codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderErrorCode {
    Unavailable,
    NotRegistered,
    MissingRegistration,
    InvalidRegistration,
    MismatchSenderId,
    MessageTooBig,
    InvalidDataKey,
    InvalidTtl,
    InternalServerError,
    InvalidPackageName,
    DeviceMessageRateExceeded,
    Unrecognized(String),
}

impl ProviderErrorCode {
    pub fn parse(code: &str) -> Self {
        match code {
            "Unavailable" => Self::Unavailable,
            "NotRegistered" => Self::NotRegistered,
            "MissingRegistration" => Self::MissingRegistration,
            "InvalidRegistration" => Self::InvalidRegistration,
            "MismatchSenderId" => Self::MismatchSenderId,
            "MessageTooBig" => Self::MessageTooBig,
            "InvalidDataKey" => Self::InvalidDataKey,
            "InvalidTtl" => Self::InvalidTtl,
            "InternalServerError" => Self::InternalServerError,
            "InvalidPackageName" => Self::InvalidPackageName,
            "DeviceMessageRateExceeded" => Self::DeviceMessageRateExceeded,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    /// Codes that indicate a programming or configuration defect. These are
    /// never retried — resending the same payload cannot succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidRegistration
                | Self::MismatchSenderId
                | Self::MessageTooBig
                | Self::InvalidDataKey
                | Self::InvalidTtl
                | Self::InternalServerError
                | Self::InvalidPackageName
                | Self::DeviceMessageRateExceeded
        )
    }
}

impl std::fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unrecognized(code) => write!(f, "Unrecognized({code})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Terminal per-recipient outcome, correlated by position to the request's
/// recipient list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientDisposition {
    /// Delivered, identifier unchanged.
    Delivered,
    /// Delivered, but the provider rotated the identifier: replace the old
    /// one across all tag subscriptions.
    Rotated { new_id: String },
    /// Transient per-recipient failure: retry the whole request.
    RetryRequest,
    /// Identifier is gone: remove it from all tag subscriptions.
    Remove,
    /// Valid no-op (the provider was asked for an empty target set).
    Ignore,
    /// Configuration or programming defect: abort the request.
    Fatal(ProviderErrorCode),
}

/// Whole-request disposition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Clean 200 with zero failures and zero rotations.
    Done,
    /// Re-enqueue the same batch with increased delay.
    Retry(String),
    /// Abort the batch and surface a configuration error.
    Fatal(String),
    /// 200 with per-recipient work to reconcile.
    Reconcile(Vec<RecipientDisposition>),
}

/// Classify one send attempt's outcome.
pub fn classify(outcome: &DeliveryOutcome) -> Disposition {
    match outcome {
        DeliveryOutcome::TransportError(reason) => {
            Disposition::Retry(format!("transport failure: {reason}"))
        }
        DeliveryOutcome::Reply { status: 401, .. } => Disposition::Fatal(
            "authentication rejected (HTTP 401): check the configured provider API key".to_string(),
        ),
        DeliveryOutcome::Reply {
            status: 200,
            body: Some(body),
        } => {
            if body.failure == 0 && body.canonical_ids == 0 {
                Disposition::Done
            } else {
                Disposition::Reconcile(body.results.iter().map(classify_result).collect())
            }
        }
        DeliveryOutcome::Reply {
            status: 200,
            body: None,
        } => Disposition::Retry("HTTP 200 with missing or malformed body".to_string()),
        // 500, any other 5xx, and anything else non-2xx: conservative retry.
        DeliveryOutcome::Reply { status, .. } => {
            Disposition::Retry(format!("provider returned HTTP {status}"))
        }
    }
}

/// Classify one per-recipient result entry.
pub fn classify_result(result: &ProviderResult) -> RecipientDisposition {
    if result.message_id.is_some() {
        return match &result.registration_id {
            Some(new_id) => RecipientDisposition::Rotated {
                new_id: new_id.clone(),
            },
            None => RecipientDisposition::Delivered,
        };
    }

    let code = result
        .error
        .as_deref()
        .map(ProviderErrorCode::parse)
        // An entry with neither message_id nor error is off-contract;
        // treat it like an unrecognized code.
        .unwrap_or_else(|| ProviderErrorCode::Unrecognized("<missing>".to_string()));

    match code {
        ProviderErrorCode::Unavailable => RecipientDisposition::RetryRequest,
        ProviderErrorCode::NotRegistered => RecipientDisposition::Remove,
        ProviderErrorCode::MissingRegistration => RecipientDisposition::Ignore,
        code if code.is_fatal() => RecipientDisposition::Fatal(code),
        // Unrecognized codes are treated conservatively as NotRegistered.
        _ => RecipientDisposition::Remove,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderResponse;

    fn reply(status: u16, body: &str) -> DeliveryOutcome {
        DeliveryOutcome::Reply {
            status,
            body: serde_json::from_str::<ProviderResponse>(body).ok(),
        }
    }

    #[test]
    fn test_transport_failure_retries() {
        let outcome = DeliveryOutcome::TransportError("connection reset".to_string());
        assert!(matches!(classify(&outcome), Disposition::Retry(_)));
    }

    #[test]
    fn test_401_is_fatal() {
        assert!(matches!(
            classify(&reply(401, "{}")),
            Disposition::Fatal(_)
        ));
    }

    #[test]
    fn test_500_and_5xx_and_other_codes_retry() {
        for status in [500, 502, 503, 599, 404, 302] {
            assert!(
                matches!(classify(&reply(status, "{}")), Disposition::Retry(_)),
                "expected retry for HTTP {status}"
            );
        }
    }

    #[test]
    fn test_clean_200_is_done() {
        let outcome = reply(200, r#"{"failure": 0, "canonical_ids": 0, "results": []}"#);
        assert_eq!(classify(&outcome), Disposition::Done);
    }

    #[test]
    fn test_200_with_failures_reconciles_positionally() {
        let outcome = reply(
            200,
            r#"{
                "failure": 2,
                "canonical_ids": 1,
                "results": [
                    { "message_id": "1:ok" },
                    { "error": "NotRegistered" },
                    { "message_id": "1:rot", "registration_id": "fresh" },
                    { "error": "Unavailable" }
                ]
            }"#,
        );

        let Disposition::Reconcile(dispositions) = classify(&outcome) else {
            panic!("expected reconcile");
        };
        assert_eq!(
            dispositions,
            vec![
                RecipientDisposition::Delivered,
                RecipientDisposition::Remove,
                RecipientDisposition::Rotated {
                    new_id: "fresh".to_string()
                },
                RecipientDisposition::RetryRequest,
            ]
        );
    }

    #[test]
    fn test_200_without_body_retries() {
        let outcome = DeliveryOutcome::Reply {
            status: 200,
            body: None,
        };
        assert!(matches!(classify(&outcome), Disposition::Retry(_)));
    }

    #[test]
    fn test_missing_registration_is_ignored() {
        let result = ProviderResult {
            message_id: None,
            registration_id: None,
            error: Some("MissingRegistration".to_string()),
        };
        assert_eq!(classify_result(&result), RecipientDisposition::Ignore);
    }

    #[test]
    fn test_fatal_error_codes() {
        for code in [
            "InvalidRegistration",
            "MismatchSenderId",
            "MessageTooBig",
            "InvalidDataKey",
            "InvalidTtl",
            "InternalServerError",
            "InvalidPackageName",
            "DeviceMessageRateExceeded",
        ] {
            let result = ProviderResult {
                message_id: None,
                registration_id: None,
                error: Some(code.to_string()),
            };
            assert!(
                matches!(classify_result(&result), RecipientDisposition::Fatal(_)),
                "expected fatal for {code}"
            );
        }
    }

    #[test]
    fn test_unrecognized_error_code_removes_identifier() {
        let result = ProviderResult {
            message_id: None,
            registration_id: None,
            error: Some("SomeFutureCode".to_string()),
        };
        assert_eq!(classify_result(&result), RecipientDisposition::Remove);
    }

    #[test]
    fn test_entry_with_no_fields_removes_identifier() {
        let result = ProviderResult {
            message_id: None,
            registration_id: None,
            error: None,
        };
        assert_eq!(classify_result(&result), RecipientDisposition::Remove);
    }
}
