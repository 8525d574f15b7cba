// Realtime Database REST client.
//
// Writes go through plain PUT/DELETE on `users/<uid>/coins[/<id>].json`. The
// live subscription is the streaming REST endpoint: a Server-Sent Events
// stream of `put`/`patch` deltas against the coin tree, which is mirrored
// locally and re-emitted as whole-tree `RemoteEvent::Snapshot`s.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest_eventsource::{retry, Event, RequestBuilderExt};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{coins_from_tree, tree_from_coins, RemoteEvent, RemoteStore, SyncError};
use crate::model::{Coin, CoinId};

/// One user's coin tree in a Realtime Database instance.
pub struct FirebaseStore {
    http: reqwest::Client,
    /// `<database_url>/users/<uid>/coins`
    tree_url: String,
    auth_token: Option<String>,
}

impl FirebaseStore {
    pub fn new(database_url: &str, user_id: &str, auth_token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            tree_url: format!(
                "{}/users/{}/coins",
                database_url.trim_end_matches('/'),
                user_id
            ),
            auth_token: auth_token.filter(|t| !t.is_empty()),
        }
    }

    fn url(&self, id: Option<CoinId>) -> String {
        let path = match id {
            Some(id) => format!("{}/{id}.json", self.tree_url),
            None => format!("{}.json", self.tree_url),
        };
        match &self.auth_token {
            Some(token) => format!("{path}?auth={token}"),
            None => path,
        }
    }

    /// Stream changes to the coin tree into `tx` until the server cancels,
    /// the stream fails, or the receiver is dropped. The first `put` carries
    /// the full tree, so the first event sent is always a snapshot.
    pub async fn subscribe(&self, tx: mpsc::Sender<RemoteEvent>) -> anyhow::Result<()> {
        let request = self.http.get(self.url(None));
        let mut es = match request.eventsource() {
            Ok(es) => es,
            Err(e) => {
                let _ = tx
                    .send(RemoteEvent::Closed {
                        reason: format!("failed to open subscription: {e}"),
                    })
                    .await;
                return Ok(());
            }
        };
        es.set_retry_policy(Box::new(retry::Never));

        let mut mirror = TreeMirror::default();

        while let Some(event) = es.next().await {
            match event {
                Ok(Event::Open) => debug!("remote subscription opened"),
                Ok(Event::Message(msg)) => match msg.event.as_str() {
                    "put" | "patch" => {
                        let Some(change) = parse_change(&msg.data) else {
                            warn!(event = %msg.event, "unreadable change payload");
                            continue;
                        };
                        if msg.event == "put" {
                            mirror.put(&change.path, change.data);
                        } else {
                            mirror.patch(&change.path, change.data);
                        }
                        let snapshot = RemoteEvent::Snapshot(coins_from_tree(mirror.tree()));
                        if tx.send(snapshot).await.is_err() {
                            es.close();
                            return Ok(());
                        }
                    }
                    "keep-alive" => {}
                    "cancel" | "auth_revoked" => {
                        info!(event = %msg.event, "remote subscription ended by server");
                        let _ = tx
                            .send(RemoteEvent::Closed {
                                reason: format!("{}: {}", msg.event, msg.data),
                            })
                            .await;
                        es.close();
                        return Ok(());
                    }
                    other => debug!(event = other, "ignoring stream event"),
                },
                Err(err) => {
                    warn!(?err, "remote subscription error");
                    let _ = tx
                        .send(RemoteEvent::Closed {
                            reason: describe_stream_error(&err),
                        })
                        .await;
                    es.close();
                    return Ok(());
                }
            }
        }

        let _ = tx
            .send(RemoteEvent::Closed {
                reason: "stream ended".to_string(),
            })
            .await;
        Ok(())
    }

    async fn check(response: reqwest::Response) -> Result<(), SyncError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        match response.json::<Value>().await {
            Ok(body) => match body.get("error").and_then(Value::as_str) {
                Some(msg) => Err(SyncError::Rejected(msg.to_string())),
                None => Err(SyncError::Status(status)),
            },
            Err(_) => Err(SyncError::Status(status)),
        }
    }
}

#[async_trait]
impl RemoteStore for FirebaseStore {
    async fn put_coin(&self, coin: &Coin) -> Result<(), SyncError> {
        let response = self.http.put(self.url(Some(coin.id))).json(coin).send().await?;
        Self::check(response).await
    }

    async fn remove_coin(&self, id: CoinId) -> Result<(), SyncError> {
        let response = self.http.delete(self.url(Some(id))).send().await?;
        Self::check(response).await
    }

    async fn merge_all(&self, coins: &[Coin]) -> Result<(), SyncError> {
        // PATCH only touches the ids present in the body.
        let response = self
            .http
            .patch(self.url(None))
            .json(&tree_from_coins(coins))
            .send()
            .await?;
        Self::check(response).await
    }
}

/// `data:` payload of a `put`/`patch` stream event.
#[derive(Debug, Deserialize)]
struct Change {
    path: String,
    data: Value,
}

fn parse_change(data: &str) -> Option<Change> {
    serde_json::from_str(data).ok()
}

fn describe_stream_error(err: &reqwest_eventsource::Error) -> String {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, _) => {
            format!("subscription rejected with status {status}")
        }
        reqwest_eventsource::Error::Transport(e) => format!("connection error: {e}"),
        other => format!("subscription error: {other}"),
    }
}

/// Local copy of the remote tree, kept current by applying stream deltas.
#[derive(Debug, Default)]
struct TreeMirror {
    root: Value,
}

impl TreeMirror {
    fn tree(&self) -> &Value {
        &self.root
    }

    /// Replace the value at `path`. `null` deletes it.
    fn put(&mut self, path: &str, data: Value) {
        let segments = segments(path);
        if segments.is_empty() {
            self.root = data;
            return;
        }
        set_at(&mut self.root, &segments, data);
        prune(&mut self.root);
    }

    /// Merge `data`'s children into the value at `path`.
    fn patch(&mut self, path: &str, data: Value) {
        let base = segments(path);
        let Value::Object(children) = data else {
            self.put(path, data);
            return;
        };
        for (key, value) in children {
            let mut full = base.clone();
            full.extend(segments(&key));
            set_at(&mut self.root, &full, value);
        }
        prune(&mut self.root);
    }
}

fn segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn set_at(node: &mut Value, path: &[String], data: Value) {
    let Some((head, rest)) = path.split_first() else {
        *node = data;
        return;
    };
    if !node.is_object() {
        if data.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else { return };
    if rest.is_empty() {
        if data.is_null() {
            map.remove(head);
        } else {
            map.insert(head.clone(), data);
        }
        return;
    }
    let child = map.entry(head.clone()).or_insert(Value::Null);
    set_at(child, rest, data);
}

/// Empty objects collapse to `null`, matching how the server reports a
/// tree whose last child was removed.
fn prune(node: &mut Value) {
    if let Value::Object(map) = node {
        for child in map.values_mut() {
            prune(child);
        }
        map.retain(|_, v| !v.is_null());
        if map.is_empty() {
            *node = Value::Null;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn urls_carry_user_path_and_auth() {
        let store = FirebaseStore::new("https://demo.firebaseio.com/", "u1", Some("tok".into()));
        assert_eq!(
            store.url(Some(5)),
            "https://demo.firebaseio.com/users/u1/coins/5.json?auth=tok"
        );
        let anon = FirebaseStore::new("https://demo.firebaseio.com", "u1", Some(String::new()));
        assert_eq!(anon.url(None), "https://demo.firebaseio.com/users/u1/coins.json");
    }

    #[test]
    fn change_payload_parses() {
        let change = parse_change(r#"{"path":"/12","data":{"id":12}}"#).unwrap();
        assert_eq!(change.path, "/12");
        assert_eq!(change.data["id"], 12);
        assert!(parse_change("null").is_none());
    }

    #[test]
    fn root_put_replaces_tree() {
        let mut mirror = TreeMirror::default();
        mirror.put("/", json!({ "1": { "id": 1 } }));
        assert_eq!(mirror.tree(), &json!({ "1": { "id": 1 } }));
        mirror.put("/", Value::Null);
        assert!(mirror.tree().is_null());
    }

    #[test]
    fn child_put_and_delete() {
        let mut mirror = TreeMirror::default();
        mirror.put("/1", json!({ "id": 1, "notes": "a" }));
        mirror.put("/2", json!({ "id": 2 }));
        mirror.put("/1/notes", json!("b"));
        assert_eq!(mirror.tree()["1"]["notes"], "b");

        mirror.put("/1", Value::Null);
        assert_eq!(mirror.tree(), &json!({ "2": { "id": 2 } }));
        mirror.put("/2", Value::Null);
        assert!(mirror.tree().is_null());
    }

    #[test]
    fn patch_merges_children() {
        let mut mirror = TreeMirror::default();
        mirror.put("/", json!({ "1": { "id": 1, "year": 1900 } }));
        mirror.patch("/1", json!({ "year": 1901, "notes": "x" }));
        assert_eq!(mirror.tree(), &json!({ "1": { "id": 1, "year": 1901, "notes": "x" } }));

        mirror.patch("/", json!({ "1": null, "3": { "id": 3 } }));
        assert_eq!(mirror.tree(), &json!({ "3": { "id": 3 } }));
    }

    #[test]
    fn mirrored_tree_decodes_to_coins() {
        let mut mirror = TreeMirror::default();
        mirror.put("/", json!({ "7": { "id": 7, "type": "Nickel", "year": 1938 } }));
        let coins = coins_from_tree(mirror.tree()).unwrap();
        assert_eq!(coins.len(), 1);
        assert_eq!(coins[0].display_name, "");
        assert_eq!(coins[0].year, 1938);
    }
}
