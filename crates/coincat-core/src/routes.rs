// Deep links: every coin carries a URL ending in `#/coin/<id>`, and the
// fragment router maps fragments back to views.

use crate::model::CoinId;

/// Build the deep-link code stored on a coin.
pub fn deep_link(base_url: &str, id: CoinId) -> String {
    format!("{}/#/coin/{id}", base_url.trim_end_matches('/'))
}

/// A resolved URL fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// `#/coin/<id>`
    Coin(CoinId),
    /// `#/add`
    Add,
    /// `#/view` or no fragment.
    View,
}

impl Route {
    /// Parse a fragment such as `#/coin/1700000000000`. Accepts a full URL
    /// too; everything before the first `#` is ignored. Returns `None` for
    /// unrecognised fragments, including `#/coin/` with a non-numeric id.
    pub fn parse(input: &str) -> Option<Route> {
        let fragment = match input.find('#') {
            Some(idx) => &input[idx..],
            None if input.is_empty() => "",
            None => return None,
        };

        if let Some(rest) = fragment.strip_prefix("#/coin/") {
            let digits: &str = rest.split('/').next().unwrap_or("");
            return digits.parse().ok().map(Route::Coin);
        }

        match fragment {
            "#/add" => Some(Route::Add),
            "#/view" | "" | "#" => Some(Route::View),
            _ => None,
        }
    }

    pub fn fragment(&self) -> String {
        match self {
            Route::Coin(id) => format!("#/coin/{id}"),
            Route::Add => "#/add".to_string(),
            Route::View => "#/view".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_link_format() {
        assert_eq!(
            deep_link("https://coins.example/app/", 42),
            "https://coins.example/app/#/coin/42"
        );
    }

    #[test]
    fn parses_coin_fragments_and_urls() {
        assert_eq!(Route::parse("#/coin/1700000000000"), Some(Route::Coin(1700000000000)));
        assert_eq!(
            Route::parse("https://coins.example/#/coin/7"),
            Some(Route::Coin(7))
        );
        assert_eq!(Route::parse("#/coin/abc"), None);
        assert_eq!(Route::parse("#/coin/"), None);
    }

    #[test]
    fn parses_section_fragments() {
        assert_eq!(Route::parse("#/add"), Some(Route::Add));
        assert_eq!(Route::parse("#/view"), Some(Route::View));
        assert_eq!(Route::parse(""), Some(Route::View));
        assert_eq!(Route::parse("#/settings"), None);
        assert_eq!(Route::parse("coin/7"), None);
    }

    #[test]
    fn fragment_round_trips() {
        for route in [Route::Coin(99), Route::Add, Route::View] {
            assert_eq!(Route::parse(&route.fragment()), Some(route));
        }
    }
}
