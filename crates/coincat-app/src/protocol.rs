// Messages exchanged between the front end and the application event loop.

use coincat_core::collection::CollectionStats;
use coincat_core::db::Theme;
use coincat_core::model::CoinId;
use coincat_core::valuation::Strategy;

use crate::form::{CoinForm, Side};

/// Commands sent from the front end to the event loop.
#[derive(Debug, Clone, PartialEq)]
pub enum UserCommand {
    /// Open an existing coin in the form.
    Edit(CoinId),
    /// Run a valuation strategy against the form and stage the result.
    Appraise { strategy: Strategy, form: Box<CoinForm> },
    SetPhoto { side: Side, data_url: String },
    ClearPhoto(Side),
    SwapPhotos,
    Save(Box<CoinForm>),
    Delete(CoinId),
    ResetForm,
    RefreshPrices,
    ToggleTheme,
    Stats,
    Quit,
}

/// Updates pushed from the event loop to the front end.
#[derive(Debug, Clone, PartialEq)]
pub enum UiUpdate {
    /// Toast-style message.
    Notice { message: String, kind: NoticeKind },
    /// The collection changed (local mutation or remote snapshot).
    CollectionChanged(CollectionStats),
    /// The form was loaded for editing.
    FormLoaded(Box<CoinForm>),
    ThemeChanged(Theme),
    /// The remote subscription ended.
    SyncEnded { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Success,
    Error,
}

impl UiUpdate {
    pub fn info(message: impl Into<String>) -> Self {
        UiUpdate::Notice {
            message: message.into(),
            kind: NoticeKind::Info,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        UiUpdate::Notice {
            message: message.into(),
            kind: NoticeKind::Success,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        UiUpdate::Notice {
            message: message.into(),
            kind: NoticeKind::Error,
        }
    }
}
