// Command-line front end: argument definitions and the handlers that drive
// `AppState` for each subcommand.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info};

use coincat_core::db::Theme;
use coincat_core::model::{Coin, CoinId, CoinType, ValuationSource};
use coincat_core::prices::{valuation_prices, Metal};
use coincat_core::sync::{FirebaseStore, RemoteEvent, SyncOutcome};
use coincat_core::valuation::Strategy;

use crate::app::{self, AppState, RouteTarget};
use crate::form::{CoinForm, Side};
use crate::protocol::{NoticeKind, UiUpdate, UserCommand};

/// Personal coin collection tracker.
#[derive(Parser, Debug)]
#[command(name = "coincat", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List coins, newest first
    List {
        /// Case-insensitive text filter
        #[arg(long, default_value = "")]
        search: String,
    },
    /// Show one coin in detail
    Show { id: CoinId },
    /// Add a coin
    Add(CoinArgs),
    /// Edit a coin; omitted fields keep their current values
    Edit {
        id: CoinId,
        #[command(flatten)]
        fields: CoinArgs,
    },
    /// Delete a coin
    Delete { id: CoinId },
    /// Preview a valuation without saving
    Value {
        /// manual, condition, metal or numista
        strategy: Strategy,
        #[command(flatten)]
        fields: CoinArgs,
    },
    /// Collection totals
    Stats,
    /// Export the (filtered) collection as CSV
    Export {
        #[arg(long, default_value = "")]
        search: String,
        /// Output file; defaults to the dated file name in the current directory
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Metal spot prices
    Prices {
        #[command(subcommand)]
        action: PricesAction,
    },
    /// Resolve a deep link or fragment such as `#/coin/1700000000000`
    Open { link: String },
    /// Show or change the theme
    Theme { mode: Option<ThemeChoice> },
    /// Store the catalogue API key
    ApiKey { key: String },
    /// Switch between cloud sync and offline mode
    Sync {
        #[command(subcommand)]
        mode: SyncAction,
    },
    /// Follow the remote collection and accept commands on stdin
    Watch,
}

#[derive(Subcommand, Debug)]
pub enum PricesAction {
    /// Fetch fresh prices (falls back to constants on failure)
    Refresh,
    /// Show the cached prices
    Show,
}

#[derive(Subcommand, Debug)]
pub enum SyncAction {
    /// Sync with the configured remote database as `user_id`
    Cloud {
        #[arg(long)]
        user_id: String,
    },
    /// Keep the collection on this device only
    Offline,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThemeChoice {
    Toggle,
    Light,
    Dark,
}

/// Coin form fields as command-line flags.
#[derive(Args, Debug, Clone, Default)]
pub struct CoinArgs {
    /// Coin type, e.g. "Half Dollar" or "Custom Coin"
    #[arg(long = "type")]
    pub coin_type: Option<String>,
    #[arg(long)]
    pub custom_name: Option<String>,
    #[arg(long)]
    pub year: Option<i32>,
    /// Grade from 1 (Poor) to 10 (Mint)
    #[arg(long)]
    pub condition: Option<i64>,
    #[arg(long)]
    pub notes: Option<String>,
    /// e.g. "90% silver, 26.73g"
    #[arg(long)]
    pub metallurgy: Option<String>,
    /// Manual value
    #[arg(long)]
    pub value: Option<f64>,
    /// Source tag for the manual value
    #[arg(long)]
    pub source: Option<ValuationSource>,
    /// Stage a valuation strategy before saving
    #[arg(long)]
    pub valuation: Option<Strategy>,
    /// Front photo as a data URL
    #[arg(long)]
    pub photo_front: Option<String>,
    /// Back photo as a data URL
    #[arg(long)]
    pub photo_back: Option<String>,
    #[arg(long)]
    pub swap_photos: bool,
    #[arg(long)]
    pub clear_front: bool,
    #[arg(long)]
    pub clear_back: bool,
}

impl CoinArgs {
    /// Overwrite the form fields that were given on the command line.
    pub fn apply(&self, form: &mut CoinForm) {
        if let Some(t) = &self.coin_type {
            let t = t.trim();
            form.coin_type = (!t.is_empty()).then(|| CoinType::from_label(t));
        }
        if let Some(name) = &self.custom_name {
            form.custom_name = name.clone();
        }
        if let Some(year) = self.year {
            form.year = Some(year);
        }
        if let Some(condition) = self.condition {
            form.condition = condition;
        }
        if let Some(notes) = &self.notes {
            form.notes = notes.clone();
        }
        if let Some(metallurgy) = &self.metallurgy {
            form.metallurgy = metallurgy.clone();
        }
        if let Some(value) = self.value {
            form.manual_value = value;
        }
        if let Some(source) = self.source {
            form.value_source = source;
        }
    }

    fn apply_photos(&self, state: &mut AppState) {
        if let Some(front) = &self.photo_front {
            state.set_photo(Side::Front, front.clone());
        }
        if let Some(back) = &self.photo_back {
            state.set_photo(Side::Back, back.clone());
        }
        if self.clear_front {
            state.clear_photo(Side::Front);
        }
        if self.clear_back {
            state.clear_photo(Side::Back);
        }
        if self.swap_photos {
            state.swap_photos();
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Run `command`. `store` is the remote store for the persisted sync
/// settings, used by `watch`.
pub async fn execute(
    command: Command,
    mut state: AppState,
    store: Option<Arc<FirebaseStore>>,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match command {
        Command::Watch => {
            let Some(store) = store else {
                bail!("cloud sync is not enabled; run `coincat sync cloud --user-id <uid>` first");
            };
            watch(state, store).await
        }
        other => dispatch(other, &mut state, out).await,
    }
}

/// Run a one-shot subcommand against `state`, writing user-facing output to
/// `out`.
pub async fn dispatch(
    command: Command,
    state: &mut AppState,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match command {
        Command::List { search } => {
            let coins = state.filtered(&search);
            if coins.is_empty() {
                writeln!(out, "No coins found.")?;
            }
            for coin in coins {
                writeln!(out, "{}", coin_line(coin))?;
            }
        }
        Command::Show { id } => match state.collection.get(id) {
            Some(coin) => write_details(out, coin)?,
            None => bail!("coin {id} not found"),
        },
        Command::Add(fields) => {
            let mut form = CoinForm::default();
            fields.apply(&mut form);
            fields.apply_photos(state);
            save(state, &form, fields.valuation, out).await?;
        }
        Command::Edit { id, fields } => {
            let mut form = state.begin_edit(id)?;
            fields.apply(&mut form);
            fields.apply_photos(state);
            save(state, &form, fields.valuation, out).await?;
        }
        Command::Delete { id } => match state.delete_coin(id).await? {
            Some(outcome) => {
                writeln!(out, "Coin deleted")?;
                write_sync_notice(out, &outcome)?;
            }
            None => writeln!(out, "No coin with id {id}")?,
        },
        Command::Value { strategy, fields } => {
            let mut form = CoinForm::default();
            fields.apply(&mut form);
            let valuation = state.appraise(strategy, &form).await?;
            writeln!(out, "${:.2} ({})", valuation.value, valuation.source)?;
        }
        Command::Stats => {
            let stats = state.stats();
            writeln!(out, "Coins:       {}", stats.coin_count)?;
            writeln!(out, "Total value: ${:.2}", stats.total_value)?;
            writeln!(out, "Average:     ${:.2}", stats.avg_value)?;
        }
        Command::Export { search, out: path } => match state.export_csv(&search)? {
            Some(export) => {
                let path = path.unwrap_or_else(|| PathBuf::from(&export.file_name));
                std::fs::write(&path, &export.contents)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                writeln!(out, "Exported {} coins to {}", export.rows, path.display())?;
            }
            None => writeln!(out, "No coins to export")?,
        },
        Command::Prices { action } => {
            if let PricesAction::Refresh = action {
                let cache = state.refresh_prices().await?;
                if let Some(err) = &cache.error {
                    writeln!(out, "Price fetch failed ({err}); using fallback prices")?;
                }
            }
            write_prices(out, state)?;
        }
        Command::Open { link } => match state.resolve_route(&link) {
            Some(RouteTarget::Coin(coin)) => write_details(out, coin)?,
            Some(RouteTarget::NotFound(id)) => writeln!(out, "Coin {id} not found")?,
            Some(RouteTarget::Add) => writeln!(out, "Add a coin with `coincat add`")?,
            Some(RouteTarget::View) => {
                for coin in state.filtered("") {
                    writeln!(out, "{}", coin_line(coin))?;
                }
            }
            None => bail!("unrecognised link `{link}`"),
        },
        Command::Theme { mode } => {
            let theme = match mode {
                None => state.theme,
                Some(ThemeChoice::Toggle) => state.toggle_theme()?,
                Some(ThemeChoice::Light) => state.set_theme(Theme::Light)?,
                Some(ThemeChoice::Dark) => state.set_theme(Theme::Dark)?,
            };
            writeln!(out, "Theme: {theme}")?;
        }
        Command::ApiKey { key } => {
            state.set_api_key(&key)?;
            writeln!(out, "API key saved")?;
        }
        Command::Sync { mode } => match mode {
            SyncAction::Cloud { user_id } => {
                if !state.config.sync_available() {
                    bail!("set sync.database_url in config/coincat.toml to enable cloud sync");
                }
                let store = Arc::new(FirebaseStore::new(
                    &state.config.sync.database_url,
                    &user_id,
                    state.config.credentials.sync_auth_token.clone(),
                ));
                let outcome = state.enable_cloud(store, &user_id).await?;
                writeln!(out, "Cloud sync enabled for {user_id}")?;
                write_sync_notice(out, &outcome)?;
            }
            SyncAction::Offline => {
                state.go_offline()?;
                writeln!(out, "Offline mode")?;
            }
        },
        Command::Watch => bail!("`watch` runs the event loop and cannot be dispatched"),
    }
    Ok(())
}

async fn save(
    state: &mut AppState,
    form: &CoinForm,
    strategy: Option<Strategy>,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    if let Some(strategy) = strategy {
        let valuation = state.appraise(strategy, form).await?;
        writeln!(out, "Estimated ${:.2} ({})", valuation.value, valuation.source)?;
    }
    let outcome = state.save_coin(form).await?;
    writeln!(out, "{} ({})", outcome.message(), outcome.coin.id)?;
    write_sync_notice(out, &outcome.sync)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Watch mode
// ---------------------------------------------------------------------------

/// Follow the remote tree and accept line commands on stdin until `quit`
/// or end of input.
async fn watch(state: AppState, store: Arc<FirebaseStore>) -> anyhow::Result<()> {
    let (remote_tx, remote_rx) = mpsc::channel::<RemoteEvent>(64);
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (ui_tx, mut ui_rx) = mpsc::channel(256);

    let subscription = tokio::spawn(async move {
        if let Err(e) = store.subscribe(remote_tx).await {
            error!("remote subscription error: {e:#}");
        }
    });

    let input = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match parse_watch_line(&line) {
                Some(cmd) => {
                    let quit = cmd == UserCommand::Quit;
                    if cmd_tx.send(cmd).await.is_err() || quit {
                        break;
                    }
                }
                None => eprintln!("commands: stats, delete <id>, refresh, theme, quit"),
            }
        }
    });

    let printer = tokio::spawn(async move {
        while let Some(update) = ui_rx.recv().await {
            println!("{}", render_update(&update));
        }
    });

    let result = app::run(remote_rx, cmd_rx, ui_tx, state).await;

    subscription.abort();
    input.abort();
    let _ = printer.await;
    info!("watch mode finished");
    result
}

/// Parse one line typed in watch mode.
pub fn parse_watch_line(line: &str) -> Option<UserCommand> {
    let mut words = line.split_whitespace();
    let cmd = match (words.next()?, words.next()) {
        ("stats", None) => UserCommand::Stats,
        ("delete", Some(id)) => UserCommand::Delete(id.parse().ok()?),
        ("refresh", None) => UserCommand::RefreshPrices,
        ("theme", None) => UserCommand::ToggleTheme,
        ("quit" | "exit", None) => UserCommand::Quit,
        _ => return None,
    };
    words.next().is_none().then_some(cmd)
}

pub fn render_update(update: &UiUpdate) -> String {
    match update {
        UiUpdate::Notice { message, kind } => match kind {
            NoticeKind::Error => format!("! {message}"),
            NoticeKind::Info | NoticeKind::Success => message.clone(),
        },
        UiUpdate::CollectionChanged(stats) => format!(
            "{} coins, total ${:.2}, average ${:.2}",
            stats.coin_count, stats.total_value, stats.avg_value
        ),
        UiUpdate::FormLoaded(form) => format!("editing {form:?}"),
        UiUpdate::ThemeChanged(theme) => format!("Theme: {theme}"),
        UiUpdate::SyncEnded { reason } => format!("! sync stopped: {reason}"),
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

pub fn coin_line(coin: &Coin) -> String {
    let value = match &coin.valuation {
        Some(v) => format!("${:.2} ({})", v.value, v.source),
        None => "-".to_string(),
    };
    format!(
        "{:>13}  {:<20} {:>4}  {:<24} {}",
        coin.id,
        coin.display_name,
        coin.year_label(),
        coin.condition.label(),
        value
    )
}

fn write_details(out: &mut impl Write, coin: &Coin) -> anyhow::Result<()> {
    writeln!(out, "{}", coin.display_name)?;
    writeln!(out, "  id:          {}", coin.id)?;
    writeln!(out, "  type:        {}", coin.type_label())?;
    if !coin.custom_name.is_empty() {
        writeln!(out, "  custom name: {}", coin.custom_name)?;
    }
    if coin.year != 0 {
        writeln!(out, "  year:        {}", coin.year)?;
    }
    writeln!(out, "  condition:   {}", coin.condition.label())?;
    if !coin.metallurgy.is_empty() {
        writeln!(out, "  metallurgy:  {}", coin.metallurgy)?;
    }
    if let Some(v) = &coin.valuation {
        writeln!(
            out,
            "  value:       ${:.2} ({}, {})",
            v.value,
            v.source,
            v.timestamp.format("%Y-%m-%d")
        )?;
    }
    if !coin.notes.is_empty() {
        writeln!(out, "  notes:       {}", coin.notes)?;
    }
    let photos = [
        ("front", coin.photo_front.is_some()),
        ("back", coin.photo_back.is_some()),
    ]
    .iter()
    .filter(|(_, present)| *present)
    .map(|(side, _)| *side)
    .collect::<Vec<_>>();
    if !photos.is_empty() {
        writeln!(out, "  photos:      {}", photos.join(", "))?;
    }
    writeln!(out, "  link:        {}", coin.qr_code)?;
    Ok(())
}

fn write_prices(out: &mut impl Write, state: &AppState) -> anyhow::Result<()> {
    let table = match &state.prices {
        Some(cache) => {
            writeln!(out, "Updated {}", cache.age_label(Utc::now()))?;
            cache.per_ounce()
        }
        None => {
            writeln!(out, "No cached prices; using estimates")?;
            valuation_prices(None)
        }
    };
    for metal in Metal::ALL {
        writeln!(out, "  {:<9} ${:.4}/oz", metal.as_str(), table.get(metal))?;
    }
    Ok(())
}

fn write_sync_notice(out: &mut impl Write, outcome: &SyncOutcome) -> anyhow::Result<()> {
    if let Some(notice) = outcome.notice() {
        writeln!(out, "{notice}")?;
    }
    Ok(())
}
