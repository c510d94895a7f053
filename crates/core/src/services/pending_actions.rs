//! Pending group actions payload.
//!
//! A deletion request records, for every group the account creates, whether
//! ownership moves to another account or the group is deleted. The payload is
//! stored as text on the account and decoded only when the actions run.

use std::collections::HashSet;

use lapse_common::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Current payload version.
pub const PAYLOAD_VERSION: u32 = 1;

/// A single ownership decision for one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PendingGroupAction {
    /// Hand the group to another live account.
    #[serde(rename_all = "camelCase")]
    Transfer {
        group_id: String,
        recipient_id: String,
    },
    /// Delete the group together with its memberships.
    #[serde(rename_all = "camelCase")]
    Delete { group_id: String },
}

impl PendingGroupAction {
    /// Group the action targets.
    #[must_use]
    pub fn group_id(&self) -> &str {
        match self {
            Self::Transfer { group_id, .. } | Self::Delete { group_id } => group_id,
        }
    }
}

/// Versioned list of pending group actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingGroupActions {
    pub version: u32,
    pub actions: Vec<PendingGroupAction>,
}

impl Default for PendingGroupActions {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredPayload {
    Versioned {
        version: u32,
        actions: Vec<PendingGroupAction>,
    },
    Bare(Vec<PendingGroupAction>),
}

impl PendingGroupActions {
    /// Wrap actions in the current payload version.
    #[must_use]
    pub const fn new(actions: Vec<PendingGroupAction>) -> Self {
        Self {
            version: PAYLOAD_VERSION,
            actions,
        }
    }

    /// Decode a stored payload. Accepts the versioned object and a bare array.
    pub fn decode(raw: &str) -> AppResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AppError::Validation(
                "Pending group actions payload is empty".to_string(),
            ));
        }

        let stored: StoredPayload = serde_json::from_str(raw).map_err(|e| {
            AppError::Validation(format!("Invalid pending group actions payload: {e}"))
        })?;

        let decoded = match stored {
            StoredPayload::Versioned { version, actions } => Self { version, actions },
            StoredPayload::Bare(actions) => Self::new(actions),
        };

        if decoded.version == 0 || decoded.version > PAYLOAD_VERSION {
            return Err(AppError::Validation(format!(
                "Unsupported pending group actions version: {}",
                decoded.version
            )));
        }

        decoded.ensure_unique_groups()?;
        Ok(decoded)
    }

    /// Encode as the versioned object.
    pub fn encode(&self) -> AppResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Groups targeted by the actions, in order.
    pub fn group_ids(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().map(PendingGroupAction::group_id)
    }

    /// Each group may be targeted at most once.
    pub fn ensure_unique_groups(&self) -> AppResult<()> {
        let mut seen = HashSet::new();
        for group_id in self.group_ids() {
            if !seen.insert(group_id) {
                return Err(AppError::Validation(format!(
                    "Group {group_id} has more than one pending action"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_versioned_object() {
        let actions = PendingGroupActions::new(vec![
            PendingGroupAction::Transfer {
                group_id: "g1".to_string(),
                recipient_id: "a2".to_string(),
            },
            PendingGroupAction::Delete {
                group_id: "g2".to_string(),
            },
        ]);

        let encoded = actions.encode().unwrap();
        assert_eq!(
            encoded,
            r#"{"version":1,"actions":[{"type":"transfer","groupId":"g1","recipientId":"a2"},{"type":"delete","groupId":"g2"}]}"#
        );
        assert_eq!(PendingGroupActions::decode(&encoded).unwrap(), actions);
    }

    #[test]
    fn test_empty_request_is_not_blank() {
        let encoded = PendingGroupActions::default().encode().unwrap();
        assert!(!encoded.trim().is_empty());
        assert!(PendingGroupActions::decode(&encoded).unwrap().actions.is_empty());
    }

    #[test]
    fn test_decode_bare_array() {
        let decoded =
            PendingGroupActions::decode(r#"[{"type":"delete","groupId":"g1"}]"#).unwrap();

        assert_eq!(decoded.version, PAYLOAD_VERSION);
        assert_eq!(decoded.group_ids().collect::<Vec<_>>(), vec!["g1"]);
    }

    #[test]
    fn test_decode_rejects_blank_and_garbage() {
        for raw in ["", "   ", "not json", r#"{"actions":"nope"}"#] {
            let result = PendingGroupActions::decode(raw);
            assert!(matches!(result, Err(AppError::Validation(_))), "{raw:?}");
        }
    }

    #[test]
    fn test_decode_rejects_future_version() {
        let result = PendingGroupActions::decode(r#"{"version":2,"actions":[]}"#);
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_decode_rejects_duplicate_group() {
        let result = PendingGroupActions::decode(
            r#"[{"type":"delete","groupId":"g1"},{"type":"transfer","groupId":"g1","recipientId":"a2"}]"#,
        );
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
