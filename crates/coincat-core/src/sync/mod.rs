// Remote sync: the per-user keyed coin tree in a real-time store.
//
// Every local mutation is pushed per record; the live subscription delivers
// whole-tree snapshots that the application applies wholesale. Two devices
// editing concurrently overwrite each other (last write wins).

pub mod firebase;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::model::{Coin, CoinId};

pub use firebase::FirebaseStore;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("remote request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote store returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("remote store rejected the request: {0}")]
    Rejected(String),
}

/// Write side of the remote tree. Reads arrive through the subscription as
/// [`RemoteEvent`]s.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Set `coins/<id>` to `coin`.
    async fn put_coin(&self, coin: &Coin) -> Result<(), SyncError>;

    /// Remove `coins/<id>`.
    async fn remove_coin(&self, id: CoinId) -> Result<(), SyncError>;

    /// Write `coins` into the tree, keyed by id. Entries for other ids are
    /// left in place.
    async fn merge_all(&self, coins: &[Coin]) -> Result<(), SyncError>;
}

/// Notifications from the live subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    /// The remote tree changed. `None` when the tree is empty/null, which
    /// leaves local state untouched.
    Snapshot(Option<Vec<Coin>>),
    /// The server ended the subscription (`cancel`, `auth_revoked`) or the
    /// stream failed.
    Closed { reason: String },
}

/// The kind of remote write a [`SyncOutcome`] reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOp {
    Save,
    Delete,
    Upload,
}

impl SyncOp {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncOp::Save => "save",
            SyncOp::Delete => "delete",
            SyncOp::Upload => "upload",
        }
    }
}

/// Result of mirroring one mutation remotely. The local write has always
/// happened by the time this is produced.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Offline mode: nothing to push.
    LocalOnly,
    /// Pushed to the remote store.
    Synced,
    /// The push failed; the change exists locally only.
    Failed { op: SyncOp, reason: String },
}

impl SyncOutcome {
    /// User-facing notice, if any.
    pub fn notice(&self) -> Option<String> {
        match self {
            SyncOutcome::Failed { op, reason } => {
                let done = match op {
                    SyncOp::Delete => "deleted locally",
                    SyncOp::Save | SyncOp::Upload => "saved locally",
                };
                Some(format!("Sync error - {done} ({reason})"))
            }
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SyncOutcome::Failed { .. })
    }
}

/// Either a connected remote store or offline mode.
#[derive(Clone)]
pub enum SyncClient {
    Cloud(Arc<dyn RemoteStore>),
    Offline,
}

impl SyncClient {
    pub fn is_cloud(&self) -> bool {
        matches!(self, SyncClient::Cloud(_))
    }

    pub async fn push(&self, coin: &Coin) -> SyncOutcome {
        match self {
            SyncClient::Offline => SyncOutcome::LocalOnly,
            SyncClient::Cloud(store) => outcome(store.put_coin(coin).await, SyncOp::Save, coin.id),
        }
    }

    pub async fn delete(&self, id: CoinId) -> SyncOutcome {
        match self {
            SyncClient::Offline => SyncOutcome::LocalOnly,
            SyncClient::Cloud(store) => outcome(store.remove_coin(id).await, SyncOp::Delete, id),
        }
    }

    /// Merge the full local collection into the remote tree (used when
    /// cloud sync is enabled). Coins already stored remotely under other
    /// ids are kept. An empty collection is not uploaded.
    pub async fn upload(&self, coins: &[Coin]) -> SyncOutcome {
        match self {
            SyncClient::Offline => SyncOutcome::LocalOnly,
            SyncClient::Cloud(_) if coins.is_empty() => SyncOutcome::Synced,
            SyncClient::Cloud(store) => match store.merge_all(coins).await {
                Ok(()) => {
                    info!("uploaded {} coins to remote store", coins.len());
                    SyncOutcome::Synced
                }
                Err(e) => {
                    warn!("remote upload failed: {e}");
                    SyncOutcome::Failed {
                        op: SyncOp::Upload,
                        reason: e.to_string(),
                    }
                }
            },
        }
    }
}

fn outcome(result: Result<(), SyncError>, op: SyncOp, id: CoinId) -> SyncOutcome {
    match result {
        Ok(()) => SyncOutcome::Synced,
        Err(e) => {
            warn!("remote {} of coin {id} failed: {e}", op.as_str());
            SyncOutcome::Failed {
                op,
                reason: e.to_string(),
            }
        }
    }
}

/// Decode the remote coin tree. `null` means "no data"; objects keyed by id
/// and arrays (how some stores render dense integer keys) are both
/// accepted. Entries that don't decode as coins are skipped.
pub fn coins_from_tree(tree: &Value) -> Option<Vec<Coin>> {
    let entries: Vec<&Value> = match tree {
        Value::Null => return None,
        Value::Object(map) => map.values().collect(),
        Value::Array(items) => items.iter().filter(|v| !v.is_null()).collect(),
        other => {
            warn!("ignoring remote tree that is neither object nor array: {other}");
            return None;
        }
    };

    let coins = entries
        .into_iter()
        .filter_map(|v| match serde_json::from_value::<Coin>(v.clone()) {
            Ok(coin) => Some(coin),
            Err(e) => {
                warn!("skipping unreadable remote coin: {e}");
                None
            }
        })
        .collect();
    Some(coins)
}

/// Encode coins as a tree keyed by id.
pub fn tree_from_coins(coins: &[Coin]) -> Value {
    let map = coins
        .iter()
        .filter_map(|c| serde_json::to_value(c).ok().map(|v| (c.id.to_string(), v)))
        .collect();
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl RemoteStore for Recorder {
        async fn put_coin(&self, coin: &Coin) -> Result<(), SyncError> {
            self.calls.lock().unwrap().push(format!("put {}", coin.id));
            if self.fail {
                return Err(SyncError::Rejected("permission denied".into()));
            }
            Ok(())
        }

        async fn remove_coin(&self, id: CoinId) -> Result<(), SyncError> {
            self.calls.lock().unwrap().push(format!("remove {id}"));
            if self.fail {
                return Err(SyncError::Rejected("permission denied".into()));
            }
            Ok(())
        }

        async fn merge_all(&self, coins: &[Coin]) -> Result<(), SyncError> {
            self.calls.lock().unwrap().push(format!("merge {}", coins.len()));
            Ok(())
        }
    }

    fn coin(id: CoinId) -> Coin {
        serde_json::from_value(json!({ "id": id, "type": "Dime", "year": 1950 })).unwrap()
    }

    #[tokio::test]
    async fn offline_never_touches_a_store() {
        let client = SyncClient::Offline;
        assert!(!client.is_cloud());
        assert_eq!(client.push(&coin(1)).await, SyncOutcome::LocalOnly);
        assert_eq!(client.delete(1).await, SyncOutcome::LocalOnly);
        assert_eq!(client.upload(&[coin(1)]).await, SyncOutcome::LocalOnly);
    }

    #[tokio::test]
    async fn cloud_pushes_per_record() {
        let store = Arc::new(Recorder::default());
        let client = SyncClient::Cloud(store.clone());
        assert_eq!(client.push(&coin(1)).await, SyncOutcome::Synced);
        assert_eq!(client.delete(2).await, SyncOutcome::Synced);
        assert_eq!(client.upload(&[]).await, SyncOutcome::Synced);
        assert_eq!(client.upload(&[coin(1), coin(3)]).await, SyncOutcome::Synced);
        assert_eq!(
            *store.calls.lock().unwrap(),
            vec!["put 1", "remove 2", "merge 2"]
        );
    }

    #[tokio::test]
    async fn failures_become_notices() {
        let store = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let client = SyncClient::Cloud(store);
        let outcome = client.push(&coin(1)).await;
        assert!(outcome.is_failed());
        assert_eq!(
            outcome.notice().as_deref(),
            Some("Sync error - saved locally (remote store rejected the request: permission denied)")
        );

        let outcome = client.delete(1).await;
        assert_eq!(
            outcome,
            SyncOutcome::Failed {
                op: SyncOp::Delete,
                reason: "remote store rejected the request: permission denied".into(),
            }
        );
        assert!(outcome
            .notice()
            .unwrap()
            .starts_with("Sync error - deleted locally"));
        assert!(SyncOutcome::Synced.notice().is_none());
    }

    #[test]
    fn tree_decoding() {
        assert_eq!(coins_from_tree(&Value::Null), None);

        let tree = json!({
            "1": { "id": 1, "type": "Dime", "year": 1950 },
            "2": { "id": "bad" },
            "3": { "id": 3, "type": "Penny", "year": 1909 }
        });
        let mut ids: Vec<_> = coins_from_tree(&tree).unwrap().iter().map(|c| c.id).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 3]);

        let dense = json!([null, { "id": 1, "type": "Dime", "year": 1950 }]);
        assert_eq!(coins_from_tree(&dense).unwrap().len(), 1);
    }

    #[test]
    fn tree_is_keyed_by_id() {
        let tree = tree_from_coins(&[coin(10), coin(20)]);
        assert_eq!(tree["10"]["id"], 10);
        assert_eq!(tree["20"]["type"], "Dime");
    }
}
