// Router module
//
// Maps method + path to one of the server's routes. First match wins:
// health, metrics, blob-storage media, then the legacy compact encoding.

use std::collections::BTreeMap;

const MEDIA_PREFIX: &str = "/media/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Health,
    Metrics,
    /// `/media/{blob}/{image_path...}`
    Media { blob: String, image_path: String },
    /// Anything else under GET; decoded with the legacy grammar
    Legacy,
    NotFound,
}

impl Route {
    /// Label used for per-route metrics
    pub fn label(&self) -> &'static str {
        match self {
            Route::Health => "health",
            Route::Metrics => "metrics",
            Route::Media { .. } => "media",
            Route::Legacy => "legacy",
            Route::NotFound => "not_found",
        }
    }
}

pub fn route(method: &str, path: &str) -> Route {
    if method != "GET" {
        return Route::NotFound;
    }

    match path {
        "/health" => return Route::Health,
        "/metrics" => return Route::Metrics,
        _ => {}
    }

    if let Some(rest) = path.strip_prefix(MEDIA_PREFIX) {
        return match rest.split_once('/') {
            Some((blob, image_path)) if !blob.is_empty() && !image_path.is_empty() => {
                Route::Media {
                    blob: blob.to_string(),
                    image_path: image_path.to_string(),
                }
            }
            _ => Route::NotFound,
        };
    }

    Route::Legacy
}

/// Parse a raw query string into an ordered mapping.
///
/// Keys and values are percent-decoded (`+` is a space). A key without `=`
/// maps to an empty value; on duplicate keys the last one wins.
pub fn parse_query(query: Option<&str>) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    let Some(query) = query else {
        return params;
    };

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_component(key);
        if key.is_empty() {
            continue;
        }
        params.insert(key, decode_component(value));
    }
    params
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .unwrap_or(spaced)
}
