use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use url::Url;

static VERSION_TRIPLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+\.\d+\.\d+").expect("static pattern"));

/// Derive the websocket endpoint from the charger base URL.
///
/// `http://host/` becomes `ws://host/ws`, `https` becomes `wss`.
pub(crate) fn websocket_uri(base: &Url) -> Result<Url, url::ParseError> {
    let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
    Url::parse(&format!("{scheme}://{}/ws", base.authority()))
}

/// Extract the first `MAJOR.MINOR.PATCH` triple from a firmware string.
///
/// Charger firmware reports strings like `4.1.2`, `4.1.2.dev3` or vendor
/// builds with a leading tag; only the numeric triple is comparable.
pub(crate) fn filter_version(raw: &str) -> Option<&str> {
    VERSION_TRIPLE.find(raw).map(|found| found.as_str())
}

/// Truthiness of a JSON value, matching the charger's loose flag fields
/// which may arrive as booleans, 0/1 numbers or strings.
pub(crate) fn value_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|number| number != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(entries) => !entries.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    mod websocket_uri_tests {
        use super::*;

        #[test]
        fn test_plain_http_host() {
            let base = Url::parse("http://openevse.local/").unwrap();
            let uri = websocket_uri(&base).unwrap();
            assert_eq!(uri.as_str(), "ws://openevse.local/ws");
        }

        #[test]
        fn test_https_upgrades_to_wss() {
            let base = Url::parse("https://charger.example.com/").unwrap();
            let uri = websocket_uri(&base).unwrap();
            assert_eq!(uri.as_str(), "wss://charger.example.com/ws");
        }

        #[test]
        fn test_port_is_preserved() {
            let base = Url::parse("http://192.168.1.4:8080/").unwrap();
            let uri = websocket_uri(&base).unwrap();
            assert_eq!(uri.as_str(), "ws://192.168.1.4:8080/ws");
        }
    }

    mod filter_version_tests {
        use super::*;

        #[test]
        fn test_plain_release() {
            assert_eq!(filter_version("4.1.2"), Some("4.1.2"));
        }

        #[test]
        fn test_dev_build_suffix() {
            assert_eq!(filter_version("4.1.2.dev3"), Some("4.1.2"));
        }

        #[test]
        fn test_vendor_prefix() {
            assert_eq!(filter_version("openevse-5.0.1-rc1"), Some("5.0.1"));
        }

        #[test]
        fn test_no_triple() {
            assert_eq!(filter_version("master"), None);
            assert_eq!(filter_version(""), None);
        }
    }

    mod value_truthy_tests {
        use super::*;

        #[test]
        fn test_booleans_pass_through() {
            assert!(value_truthy(&json!(true)));
            assert!(!value_truthy(&json!(false)));
        }

        #[test]
        fn test_numeric_flags() {
            assert!(value_truthy(&json!(1)));
            assert!(!value_truthy(&json!(0)));
            assert!(!value_truthy(&json!(0.0)));
        }

        #[test]
        fn test_null_and_empty_string() {
            assert!(!value_truthy(&json!(null)));
            assert!(!value_truthy(&json!("")));
            assert!(value_truthy(&json!("enabled")));
        }
    }
}
