//! Response envelope and operation payloads for ColibriDB
//!
//! Every public engine operation returns `Envelope<T>`: the stable
//! `{success, data, error}` shape a transport adapter serializes as-is.
//! Payload field names follow the wire convention (camelCase).

use serde::Serialize;

use crate::error::ColibriError;
use crate::value::Document;

// Envelope

/// Error body carried inside a failed envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: u16,
}

/// Uniform operation result.
///
/// `data` and `error` can coexist: an empty `find` reports `success:false`
/// with code 404 while still carrying the empty result list.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub error: Option<ErrorBody>,
}

impl<T> Envelope<T> {
    /// Successful result carrying a payload.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failed result with no payload.
    pub fn fail(err: ColibriError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody {
                message: err.message().to_string(),
                code: err.code(),
            }),
        }
    }

    /// Failed result that still carries a payload (empty find results).
    pub fn fail_with(data: T, err: ColibriError) -> Self {
        Self {
            success: false,
            data: Some(data),
            error: Some(ErrorBody {
                message: err.message().to_string(),
                code: err.code(),
            }),
        }
    }

    /// Collapse a fallible computation into an envelope.
    pub fn from_result(result: crate::error::Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(err) => Self::fail(err),
        }
    }

    /// The error code, if any.
    pub fn code(&self) -> Option<u16> {
        self.error.as_ref().map(|e| e.code)
    }
}

impl<T> From<ColibriError> for Envelope<T> {
    fn from(err: ColibriError) -> Self {
        Envelope::fail(err)
    }
}

// Operation payloads

/// Receipt for `insert`.
///
/// When 20 or fewer documents were freshly inserted the full id list is
/// reported; above that only the first id, last id, and the shared prefix.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertReceipt {
    pub inserted_count: usize,
    pub updated_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inserted_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

/// Receipt for `update` and `updateById`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReceipt {
    pub updated_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents: Option<Vec<Document>>,
    pub truncated: bool,
}

/// Receipt for `delete` and `deleteById`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReceipt {
    pub deleted_count: usize,
}

/// Metadata block returned by `paginate`.
///
/// `start_index`/`end_index` are 1-based and inclusive; both are 0 when the
/// requested page is past the end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub page: u64,
    pub limit: u64,
    pub total_items: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
    pub next_page: Option<u64>,
    pub prev_page: Option<u64>,
    pub start_index: u64,
    pub end_index: u64,
}

/// One page of results plus its metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub data: Vec<Document>,
    pub pagination: PageInfo,
}

/// Diagnostic snapshot of one collection's state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStats {
    pub name: String,
    pub documents: usize,
    pub indexes: Vec<String>,
    pub dirty: bool,
    pub last_save: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_wire_shape() {
        let env = Envelope::ok(3u64);
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json, serde_json::json!({"success": true, "data": 3, "error": null}));
    }

    #[test]
    fn failed_envelope_carries_code_and_message() {
        let env: Envelope<u64> = Envelope::fail(ColibriError::NotFound("nothing".into()));
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "success": false,
                "error": {"message": "nothing", "code": 404}
            })
        );
    }

    #[test]
    fn empty_find_shape_keeps_data() {
        let env = Envelope::fail_with(
            Vec::<Document>::new(),
            ColibriError::NotFound("no matching documents".into()),
        );
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["success"], serde_json::json!(false));
        assert_eq!(json["data"], serde_json::json!([]));
        assert_eq!(json["error"]["code"], serde_json::json!(404));
    }

    #[test]
    fn receipt_field_names_are_camel_case() {
        let receipt = InsertReceipt {
            inserted_count: 1,
            updated_count: 0,
            inserted_ids: Some(vec!["a".into()]),
            first_id: None,
            last_id: None,
            prefix: None,
        };
        let json = serde_json::to_value(&receipt).unwrap();
        assert!(json.get("insertedCount").is_some());
        assert!(json.get("insertedIds").is_some());
        assert!(json.get("firstId").is_none());
    }
}
