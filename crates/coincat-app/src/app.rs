// Application state and orchestration logic.
//
// `AppState` owns the collection, the edit session and sync state and hosts
// every user-facing operation. `run` is the event loop that multiplexes
// remote snapshots and user commands and pushes updates to the front end.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use coincat_core::collection::{Collection, CollectionStats, CsvExport};
use coincat_core::config::Config;
use coincat_core::db::{Database, SyncMode, Theme};
use coincat_core::model::{Coin, CoinId, Condition, Valuation};
use coincat_core::prices::{PriceCache, PriceFetcher};
use coincat_core::routes::{deep_link, Route};
use coincat_core::sync::{FirebaseStore, RemoteEvent, RemoteStore, SyncClient, SyncOutcome};
use coincat_core::valuation::{Strategy, ValuationEngine, ValuationError};

use crate::form::{CoinForm, EditSession, FormError, Side};
use crate::protocol::{UiUpdate, UserCommand};

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// Result of a successful save.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveOutcome {
    pub coin: Coin,
    /// Whether an existing record was replaced.
    pub updated: bool,
    pub sync: SyncOutcome,
}

impl SaveOutcome {
    pub fn message(&self) -> &'static str {
        if self.updated {
            "Coin updated"
        } else {
            "Coin saved"
        }
    }
}

/// What a deep link or fragment points at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RouteTarget<'a> {
    Coin(&'a Coin),
    /// A well-formed coin link whose record does not exist (any more).
    NotFound(CoinId),
    Add,
    View,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub collection: Collection,
    pub session: EditSession,
    pub engine: ValuationEngine,
    pub prices: Option<PriceCache>,
    pub fetcher: PriceFetcher,
    pub sync: SyncClient,
    pub theme: Theme,
    pub api_key: String,
}

impl AppState {
    /// Create the state with an empty collection; call [`AppState::load`]
    /// to read persisted state.
    pub fn new(config: Config, db: Database, sync: SyncClient) -> Self {
        let engine = ValuationEngine::new(config.lookup_delay());
        let fetcher = PriceFetcher::new(config.prices.source_url.clone());
        AppState {
            config,
            db,
            collection: Collection::default(),
            session: EditSession::default(),
            engine,
            prices: None,
            fetcher,
            sync,
            theme: Theme::default(),
            api_key: String::new(),
        }
    }

    /// Read the collection and preferences from local storage and give any
    /// coin without a deep-link code one. The codes are persisted only in
    /// offline mode; in cloud mode the next snapshot is authoritative.
    pub fn load(&mut self) -> anyhow::Result<()> {
        self.collection = Collection::new(self.db.load_coins()?);
        self.prices = self.db.metal_prices()?;
        self.theme = self.db.theme()?.unwrap_or_default();
        self.api_key = self.db.api_key()?;

        if self.collection.ensure_codes(&self.config.deep_link.base_url) && !self.sync.is_cloud()
        {
            self.db.save_coins(self.collection.coins())?;
        }
        info!(
            coins = self.collection.len(),
            cloud = self.sync.is_cloud(),
            "local state loaded"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Form and edit session
    // ------------------------------------------------------------------

    /// Open `id` for editing. Returns the pre-filled form.
    pub fn begin_edit(&mut self, id: CoinId) -> Result<CoinForm, FormError> {
        let coin = self.collection.get(id).ok_or(FormError::NotFound(id))?;
        self.session = EditSession::for_coin(coin);
        Ok(CoinForm::from_coin(coin))
    }

    pub fn reset_form(&mut self) {
        self.session.reset();
    }

    pub fn set_photo(&mut self, side: Side, data_url: String) {
        self.session.set_photo(side, data_url);
    }

    pub fn clear_photo(&mut self, side: Side) {
        self.session.clear_photo(side);
    }

    pub fn swap_photos(&mut self) {
        self.session.swap_photos();
    }

    /// Run `strategy` against the form and stage the result. On error the
    /// previously staged valuation is left as it was.
    pub async fn appraise(
        &mut self,
        strategy: Strategy,
        form: &CoinForm,
    ) -> Result<Valuation, ValuationError> {
        let valuation = self
            .engine
            .appraise(strategy, &form.valuation_input(), self.prices.as_ref())
            .await?;
        debug!(
            value = valuation.value,
            source = valuation.source.as_str(),
            "valuation staged"
        );
        self.session.stage(valuation.clone());
        Ok(valuation)
    }

    /// Validate the form and create or update the coin, then persist
    /// locally and mirror remotely. A staged valuation always wins over the
    /// manual value field. The form is reset afterwards.
    pub async fn save_coin(&mut self, form: &CoinForm) -> Result<SaveOutcome, FormError> {
        let year = form.validate()?;
        let now = Utc::now();

        let existing = self
            .session
            .editing
            .and_then(|id| self.collection.get(id))
            .cloned();
        let id = match self.session.editing {
            Some(id) => id,
            None => self.collection.next_id(now.timestamp_millis()),
        };

        let valuation = match &self.session.staged {
            Some(staged) => Some(Valuation {
                value: staged.value,
                source: staged.source,
                timestamp: now,
            }),
            None if form.manual_value > 0.0 && form.manual_value.is_finite() => Some(Valuation {
                value: form.manual_value,
                source: form.value_source,
                timestamp: now,
            }),
            None => None,
        };

        let custom_name = form.custom_name.trim().to_string();
        let coin = Coin {
            id,
            display_name: Coin::display_name_for(form.coin_type.as_ref(), &custom_name),
            coin_type: form.coin_type.clone(),
            custom_name,
            year,
            condition: Condition::new(form.condition),
            notes: form.notes.trim().to_string(),
            metallurgy: form.metallurgy.trim().to_string(),
            photo_front: self.session.photo_front.clone(),
            photo_back: self.session.photo_back.clone(),
            qr_code: existing
                .as_ref()
                .map(|c| c.qr_code.clone())
                .filter(|q| !q.is_empty())
                .unwrap_or_else(|| deep_link(&self.config.deep_link.base_url, id)),
            created_at: existing.as_ref().map(|c| c.created_at).unwrap_or(now),
            last_updated: now,
            valuation,
        };

        let updated = self.collection.upsert(coin.clone());
        self.db.save_coins(self.collection.coins())?;
        let sync = self.sync.push(&coin).await;
        info!(id, updated, value = coin.current_value(), "coin saved");

        self.reset_form();
        Ok(SaveOutcome {
            coin,
            updated,
            sync,
        })
    }

    /// Remove a coin. Returns `None` (and does nothing) when `id` is not in
    /// the collection.
    pub async fn delete_coin(&mut self, id: CoinId) -> anyhow::Result<Option<SyncOutcome>> {
        if self.collection.remove(id).is_none() {
            debug!(id, "delete of unknown coin ignored");
            return Ok(None);
        }
        self.db.save_coins(self.collection.coins())?;
        if self.session.editing == Some(id) {
            self.reset_form();
        }
        let outcome = self.sync.delete(id).await;
        info!(id, "coin deleted");
        Ok(Some(outcome))
    }

    /// Overwrite the collection with a remote snapshot. `None` (an empty
    /// remote tree) is ignored. Returns whether anything was applied.
    pub fn apply_remote_snapshot(&mut self, snapshot: Option<Vec<Coin>>) -> anyhow::Result<bool> {
        let Some(coins) = snapshot else {
            debug!("empty remote snapshot ignored");
            return Ok(false);
        };
        self.collection.replace_all(coins);
        self.collection.ensure_codes(&self.config.deep_link.base_url);
        self.db.save_coins(self.collection.coins())?;
        info!(coins = self.collection.len(), "remote snapshot applied");
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    pub fn filtered(&self, search: &str) -> Vec<&Coin> {
        self.collection.filtered(search)
    }

    pub fn stats(&self) -> CollectionStats {
        self.collection.stats()
    }

    /// CSV of the filtered view, dated today. `None` when nothing matches.
    pub fn export_csv(&self, search: &str) -> anyhow::Result<Option<CsvExport>> {
        self.export_csv_on(search, Utc::now().date_naive())
    }

    pub fn export_csv_on(&self, search: &str, today: NaiveDate) -> anyhow::Result<Option<CsvExport>> {
        self.collection.export_csv(search, today)
    }

    /// Resolve a fragment or full deep link. `None` for unrecognised input.
    pub fn resolve_route(&self, input: &str) -> Option<RouteTarget<'_>> {
        let target = match Route::parse(input)? {
            Route::Coin(id) => match self.collection.get(id) {
                Some(coin) => RouteTarget::Coin(coin),
                None => RouteTarget::NotFound(id),
            },
            Route::Add => RouteTarget::Add,
            Route::View => RouteTarget::View,
        };
        Some(target)
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    pub fn toggle_theme(&mut self) -> anyhow::Result<Theme> {
        self.set_theme(self.theme.toggled())
    }

    pub fn set_theme(&mut self, theme: Theme) -> anyhow::Result<Theme> {
        self.db.set_theme(theme)?;
        self.theme = theme;
        Ok(theme)
    }

    pub fn set_api_key(&mut self, key: &str) -> anyhow::Result<()> {
        self.db.set_api_key(key)?;
        self.api_key = self.db.api_key()?;
        Ok(())
    }

    /// Fetch spot prices (falling back to the constant table) and cache them.
    pub async fn refresh_prices(&mut self) -> anyhow::Result<&PriceCache> {
        let cache = self.fetcher.refresh().await;
        self.db.set_metal_prices(&cache)?;
        Ok(&*self.prices.insert(cache))
    }

    pub fn prices_age_label(&self) -> Option<String> {
        self.prices.as_ref().map(|p| p.age_label(Utc::now()))
    }

    /// Switch to cloud sync for `user_id` and merge the current collection
    /// into the remote tree. Coins another device already stored there are
    /// kept; the next snapshot brings them into this collection.
    pub async fn enable_cloud(
        &mut self,
        store: Arc<dyn RemoteStore>,
        user_id: &str,
    ) -> anyhow::Result<SyncOutcome> {
        self.db.set_user_id(user_id)?;
        self.db.set_sync_mode(SyncMode::Cloud)?;
        self.sync = SyncClient::Cloud(store);
        info!(user_id, "cloud sync enabled");
        Ok(self.sync.upload(self.collection.coins()).await)
    }

    pub fn go_offline(&mut self) -> anyhow::Result<()> {
        self.db.set_sync_mode(SyncMode::Offline)?;
        self.sync = SyncClient::Offline;
        info!("switched to offline mode");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Remote store construction
// ---------------------------------------------------------------------------

/// The remote store for the persisted sync settings, or `None` when the
/// app should run offline.
pub fn remote_store(config: &Config, db: &Database) -> anyhow::Result<Option<Arc<FirebaseStore>>> {
    if db.sync_mode()? != SyncMode::Cloud {
        return Ok(None);
    }
    if !config.sync_available() {
        warn!("cloud sync selected but no sync.database_url configured, staying offline");
        return Ok(None);
    }
    let Some(user_id) = db.user_id()? else {
        warn!("cloud sync selected but no user id stored, staying offline");
        return Ok(None);
    };
    Ok(Some(Arc::new(FirebaseStore::new(
        &config.sync.database_url,
        &user_id,
        config.credentials.sync_auth_token.clone(),
    ))))
}

pub fn sync_client(store: Option<Arc<FirebaseStore>>) -> SyncClient {
    match store {
        Some(store) => SyncClient::Cloud(store),
        None => SyncClient::Offline,
    }
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

/// Run the application event loop until `Quit` or the command channel
/// closes. Remote snapshots are applied as they arrive; every change is
/// reported through `ui_tx`.
pub async fn run(
    mut remote_rx: mpsc::Receiver<RemoteEvent>,
    mut cmd_rx: mpsc::Receiver<UserCommand>,
    ui_tx: mpsc::Sender<UiUpdate>,
    mut state: AppState,
) -> anyhow::Result<()> {
    info!("Application event loop started");

    // Stop polling the remote channel once it closes so select! never spins.
    let mut remote_open = true;

    loop {
        tokio::select! {
            event = remote_rx.recv(), if remote_open => {
                match event {
                    Some(RemoteEvent::Snapshot(snapshot)) => {
                        handle_snapshot(&mut state, snapshot, &ui_tx).await;
                    }
                    Some(RemoteEvent::Closed { reason }) => {
                        warn!("remote subscription closed: {reason}");
                        let _ = ui_tx.send(UiUpdate::SyncEnded { reason }).await;
                    }
                    None => {
                        info!("Remote channel closed");
                        remote_open = false;
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UserCommand::Quit) => {
                        info!("Quit command received, shutting down");
                        break;
                    }
                    Some(cmd) => {
                        handle_user_command(&mut state, cmd, &ui_tx).await;
                    }
                    None => {
                        info!("Command channel closed, shutting down");
                        break;
                    }
                }
            }
        }
    }

    info!("Application event loop exiting");
    Ok(())
}

async fn handle_snapshot(
    state: &mut AppState,
    snapshot: Option<Vec<Coin>>,
    ui_tx: &mpsc::Sender<UiUpdate>,
) {
    match state.apply_remote_snapshot(snapshot) {
        Ok(true) => {
            let _ = ui_tx.send(UiUpdate::CollectionChanged(state.stats())).await;
        }
        Ok(false) => {}
        Err(e) => {
            warn!("failed to persist remote snapshot: {e:#}");
            let _ = ui_tx
                .send(UiUpdate::error(format!("Failed to store synced coins: {e}")))
                .await;
        }
    }
}

async fn handle_user_command(
    state: &mut AppState,
    cmd: UserCommand,
    ui_tx: &mpsc::Sender<UiUpdate>,
) {
    let updates = match cmd {
        UserCommand::Edit(id) => match state.begin_edit(id) {
            Ok(form) => vec![UiUpdate::FormLoaded(Box::new(form))],
            Err(e) => vec![UiUpdate::error(e.to_string())],
        },
        UserCommand::Appraise { strategy, form } => match state.appraise(strategy, &form).await {
            Ok(v) => vec![UiUpdate::success(format!(
                "Estimated ${:.2} ({})",
                v.value, v.source
            ))],
            Err(e) => vec![UiUpdate::error(e.to_string())],
        },
        UserCommand::SetPhoto { side, data_url } => {
            state.set_photo(side, data_url);
            vec![]
        }
        UserCommand::ClearPhoto(side) => {
            state.clear_photo(side);
            vec![UiUpdate::info("Photo cleared.")]
        }
        UserCommand::SwapPhotos => {
            state.swap_photos();
            vec![UiUpdate::info("Photos swapped.")]
        }
        UserCommand::Save(form) => match state.save_coin(&form).await {
            Ok(outcome) => {
                let mut updates = vec![UiUpdate::success(outcome.message())];
                if let Some(notice) = outcome.sync.notice() {
                    updates.push(UiUpdate::error(notice));
                }
                updates.push(UiUpdate::CollectionChanged(state.stats()));
                updates
            }
            Err(e) => vec![UiUpdate::error(e.to_string())],
        },
        UserCommand::Delete(id) => match state.delete_coin(id).await {
            Ok(Some(outcome)) => {
                let mut updates = vec![UiUpdate::success("Coin deleted")];
                if let Some(notice) = outcome.notice() {
                    updates.push(UiUpdate::error(notice));
                }
                updates.push(UiUpdate::CollectionChanged(state.stats()));
                updates
            }
            Ok(None) => vec![],
            Err(e) => vec![UiUpdate::error(format!("Failed to delete coin: {e}"))],
        },
        UserCommand::ResetForm => {
            state.reset_form();
            vec![]
        }
        UserCommand::RefreshPrices => match state.refresh_prices().await {
            Ok(cache) if cache.is_fallback() => {
                vec![UiUpdate::error("Using fallback metal prices")]
            }
            Ok(_) => vec![UiUpdate::success("Metal prices updated")],
            Err(e) => vec![UiUpdate::error(format!("Failed to store prices: {e}"))],
        },
        UserCommand::ToggleTheme => match state.toggle_theme() {
            Ok(theme) => vec![UiUpdate::ThemeChanged(theme)],
            Err(e) => vec![UiUpdate::error(format!("Failed to store theme: {e}"))],
        },
        UserCommand::Stats => vec![UiUpdate::CollectionChanged(state.stats())],
        UserCommand::Quit => vec![],
    };

    for update in updates {
        if ui_tx.send(update).await.is_err() {
            debug!("UI channel closed, dropping update");
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
