//! Header handling shared by both sides of the bridge.
//!
//! Content-type negotiation, the filters that separate application metadata
//! from transport headers, call path parsing, and the `grpc-timeout` format.

use std::time::Duration;

use http::header::{self, HeaderMap, HeaderName, HeaderValue};

/// `grpc-timeout` request header.
pub const GRPC_TIMEOUT: HeaderName = HeaderName::from_static("grpc-timeout");

/// `grpc-encoding` header naming the message compression in use.
pub const GRPC_ENCODING: HeaderName = HeaderName::from_static("grpc-encoding");

/// `grpc-accept-encoding` header listing compressions the peer accepts.
pub const GRPC_ACCEPT_ENCODING: HeaderName = HeaderName::from_static("grpc-accept-encoding");

/// Marker header sent by gRPC-Web client libraries.
pub const X_GRPC_WEB: HeaderName = HeaderName::from_static("x-grpc-web");

/// User agent header sent by gRPC-Web client libraries.
pub const X_USER_AGENT: HeaderName = HeaderName::from_static("x-user-agent");

/// Transport-level request headers that never reach a handler.
static REQUEST_TRANSPORT_HEADERS: [HeaderName; 18] = [
    header::CONNECTION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::HOST,
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::ACCEPT,
    header::ACCEPT_ENCODING,
    header::ORIGIN,
    header::REFERER,
    header::ACCESS_CONTROL_REQUEST_METHOD,
    header::ACCESS_CONTROL_REQUEST_HEADERS,
    X_GRPC_WEB,
    GRPC_TIMEOUT,
];

/// Transport-level response headers that are not relayed to the browser.
static RESPONSE_TRANSPORT_HEADERS: [HeaderName; 8] = [
    header::CONNECTION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_ENCODING,
];

/// Legacy hop-by-hop names that have no `http` constant.
const LEGACY_HOP_BY_HOP: &[&str] = &["keep-alive", "proxy-connection"];

/// Body encoding of a gRPC-Web call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    /// Raw frames (`application/grpc-web`).
    Binary,
    /// Base64-encoded frames (`application/grpc-web-text`).
    Text,
}

/// A parsed gRPC-Web content type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentType {
    encoding: Encoding,
    subtype: Option<String>,
}

impl ContentType {
    /// Binary gRPC-Web with an optional message subtype such as `proto`.
    #[must_use]
    pub const fn binary(subtype: Option<String>) -> Self {
        Self {
            encoding: Encoding::Binary,
            subtype,
        }
    }

    /// Text gRPC-Web with an optional message subtype.
    #[must_use]
    pub const fn text(subtype: Option<String>) -> Self {
        Self {
            encoding: Encoding::Text,
            subtype,
        }
    }

    /// Parse a `content-type` header value. Returns `None` for anything that
    /// is not a gRPC-Web content type.
    #[must_use]
    pub fn parse(value: &HeaderValue) -> Option<Self> {
        let value = value.to_str().ok()?;
        let essence = value.split(';').next()?.trim().to_ascii_lowercase();

        let (encoding, rest) = if let Some(rest) = essence.strip_prefix("application/grpc-web-text")
        {
            (Encoding::Text, rest)
        } else if let Some(rest) = essence.strip_prefix("application/grpc-web") {
            (Encoding::Binary, rest)
        } else {
            return None;
        };

        let subtype = match rest {
            "" => None,
            rest => {
                let subtype = rest.strip_prefix('+')?;
                if subtype.is_empty() || !subtype.chars().all(is_token_char) {
                    return None;
                }
                Some(subtype.to_string())
            }
        };

        Some(Self { encoding, subtype })
    }

    /// Body encoding of the call.
    #[must_use]
    pub const fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Message subtype (`proto`, `json`, ...), if the client named one.
    #[must_use]
    pub fn subtype(&self) -> Option<&str> {
        self.subtype.as_deref()
    }

    /// The content type to answer the browser with.
    #[must_use]
    pub fn header_value(&self) -> HeaderValue {
        let base = match self.encoding {
            Encoding::Binary => "application/grpc-web",
            Encoding::Text => "application/grpc-web-text",
        };
        with_subtype(base, self.subtype.as_deref())
    }

    /// The content type a native gRPC backend expects for the same call.
    #[must_use]
    pub fn upstream_header_value(&self) -> HeaderValue {
        upstream_content_type(self.subtype.as_deref())
    }
}

/// The native gRPC content type for a message subtype.
#[must_use]
pub fn upstream_content_type(subtype: Option<&str>) -> HeaderValue {
    with_subtype("application/grpc", subtype)
}

/// Returns `true` if a response content type names native gRPC.
#[must_use]
pub fn is_grpc_content_type(value: &HeaderValue) -> bool {
    value.to_str().is_ok_and(|value| {
        let essence = value.split(';').next().unwrap_or_default().trim();
        essence.eq_ignore_ascii_case("application/grpc")
            || essence
                .get(.."application/grpc+".len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case("application/grpc+"))
    })
}

fn with_subtype(base: &'static str, subtype: Option<&str>) -> HeaderValue {
    subtype
        .and_then(|subtype| HeaderValue::try_from(format!("{base}+{subtype}")).ok())
        .unwrap_or_else(|| HeaderValue::from_static(base))
}

const fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_')
}

/// Split a call path `/package.Service/Method` into service and method.
#[must_use]
pub fn parse_path(path: &str) -> Option<(&str, &str)> {
    let (service, method) = path.strip_prefix('/')?.split_once('/')?;

    if service.is_empty() || method.is_empty() || method.contains('/') {
        return None;
    }

    Some((service, method))
}

/// Application metadata of a browser request, with transport and
/// browser-only headers removed.
#[must_use]
pub fn request_metadata(headers: &HeaderMap) -> HeaderMap {
    filter(headers, &REQUEST_TRANSPORT_HEADERS)
}

/// Application metadata of an upstream response, with transport headers and
/// status headers removed.
#[must_use]
pub fn response_metadata(headers: &HeaderMap) -> HeaderMap {
    let mut metadata = filter(headers, &RESPONSE_TRANSPORT_HEADERS);
    metadata.remove(crate::GRPC_STATUS);
    metadata.remove(crate::GRPC_MESSAGE);
    metadata
}

fn filter(headers: &HeaderMap, transport: &[HeaderName]) -> HeaderMap {
    // Headers named by `Connection` are hop-by-hop as well
    let connection_listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    let mut metadata = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name_str = name.as_str();
        if transport.contains(name)
            || LEGACY_HOP_BY_HOP.contains(&name_str)
            || connection_listed.iter().any(|listed| listed == name_str)
        {
            continue;
        }
        metadata.append(name.clone(), value.clone());
    }

    metadata
}

/// Parse a `grpc-timeout` value such as `100m` or `5S`.
#[must_use]
pub fn parse_grpc_timeout(value: &HeaderValue) -> Option<Duration> {
    let value = value.to_str().ok()?;
    if value.len() < 2 || value.len() > 9 {
        return None;
    }

    let (digits, unit) = value.split_at(value.len() - 1);
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;

    let duration = match unit {
        "H" => Duration::from_secs(amount.checked_mul(3600)?),
        "M" => Duration::from_secs(amount.checked_mul(60)?),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };

    Some(duration)
}

/// Encode a duration as a `grpc-timeout` value, using the finest unit that
/// fits the eight digit limit.
#[must_use]
pub fn encode_grpc_timeout(timeout: Duration) -> HeaderValue {
    const MAX_DIGITS_VALUE: u128 = 99_999_999;

    let nanos = timeout.as_nanos();
    let units: [(u128, char); 6] = [
        (1, 'n'),
        (1_000, 'u'),
        (1_000_000, 'm'),
        (1_000_000_000, 'S'),
        (60_000_000_000, 'M'),
        (3_600_000_000_000, 'H'),
    ];

    let (amount, unit) = units
        .iter()
        .map(|(per_unit, unit)| (nanos / per_unit, *unit))
        .find(|(amount, _)| *amount <= MAX_DIGITS_VALUE)
        .unwrap_or((MAX_DIGITS_VALUE, 'H'));

    HeaderValue::try_from(format!("{amount}{unit}"))
        .unwrap_or_else(|_| HeaderValue::from_static("99999999H"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_types() {
        let parse = |value: &'static str| ContentType::parse(&HeaderValue::from_static(value));

        assert_eq!(parse("application/grpc-web"), Some(ContentType::binary(None)));
        assert_eq!(
            parse("application/grpc-web+proto"),
            Some(ContentType::binary(Some("proto".to_string())))
        );
        assert_eq!(
            parse("Application/GRPC-Web-Text+proto; charset=utf-8"),
            Some(ContentType::text(Some("proto".to_string())))
        );
        assert_eq!(parse("application/grpc-web-text"), Some(ContentType::text(None)));
        assert_eq!(parse("application/grpc"), None);
        assert_eq!(parse("application/grpc-webx"), None);
        assert_eq!(parse("application/json"), None);
    }

    #[test]
    fn test_content_type_rewrite() {
        let content_type = ContentType::text(Some("proto".to_string()));

        assert_eq!(content_type.header_value(), "application/grpc-web-text+proto");
        assert_eq!(content_type.upstream_header_value(), "application/grpc+proto");
        assert_eq!(
            ContentType::binary(None).upstream_header_value(),
            "application/grpc"
        );
    }

    #[test]
    fn test_is_grpc_content_type() {
        assert!(is_grpc_content_type(&HeaderValue::from_static("application/grpc")));
        assert!(is_grpc_content_type(&HeaderValue::from_static(
            "application/grpc+proto"
        )));
        assert!(!is_grpc_content_type(&HeaderValue::from_static("text/html")));
        assert!(!is_grpc_content_type(&HeaderValue::from_static(
            "application/grpc-web"
        )));
    }

    #[test]
    fn test_parse_path() {
        assert_eq!(
            parse_path("/demo.Weather/Get"),
            Some(("demo.Weather", "Get"))
        );
        assert_eq!(parse_path("Foo/Bar"), None);
        assert_eq!(parse_path("/Foo"), None);
        assert_eq!(parse_path("/Foo/"), None);
        assert_eq!(parse_path("/Foo/Bar/Baz"), None);
    }

    #[test]
    fn test_request_metadata_filter() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("example.com"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/grpc-web"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-hop"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-hop", HeaderValue::from_static("1"));
        headers.insert(X_GRPC_WEB, HeaderValue::from_static("1"));
        headers.insert(GRPC_TIMEOUT, HeaderValue::from_static("1S"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer t"));
        headers.insert("x-tenant", HeaderValue::from_static("acme"));
        headers.insert(X_USER_AGENT, HeaderValue::from_static("grpc-web-javascript/0.1"));
        headers.insert(GRPC_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert(GRPC_ACCEPT_ENCODING, HeaderValue::from_static("gzip,identity"));

        let metadata = request_metadata(&headers);

        assert_eq!(metadata.len(), 5);
        assert_eq!(metadata[header::AUTHORIZATION], "Bearer t");
        assert_eq!(metadata["x-tenant"], "acme");
        assert!(metadata.contains_key(X_USER_AGENT));
        assert_eq!(metadata[GRPC_ENCODING], "gzip");
        assert_eq!(metadata[GRPC_ACCEPT_ENCODING], "gzip,identity");
    }

    #[test]
    fn test_response_metadata_filter() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/grpc"));
        headers.insert(crate::GRPC_STATUS, HeaderValue::from_static("0"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));
        headers.insert("x-served-by", HeaderValue::from_static("node-1"));
        headers.insert(GRPC_ENCODING, HeaderValue::from_static("gzip"));

        let metadata = response_metadata(&headers);

        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata["x-served-by"], "node-1");
        assert_eq!(metadata[GRPC_ENCODING], "gzip");
    }

    #[test]
    fn test_grpc_timeout_parsing() {
        let parse = |value: &'static str| parse_grpc_timeout(&HeaderValue::from_static(value));

        assert_eq!(parse("100m"), Some(Duration::from_millis(100)));
        assert_eq!(parse("2H"), Some(Duration::from_secs(7200)));
        assert_eq!(parse("5S"), Some(Duration::from_secs(5)));
        assert_eq!(parse("7n"), Some(Duration::from_nanos(7)));
        assert_eq!(parse("123456789S"), None);
        assert_eq!(parse("10x"), None);
        assert_eq!(parse("S"), None);
        assert_eq!(parse("-1S"), None);
    }

    #[test]
    fn test_grpc_timeout_encoding() {
        assert_eq!(encode_grpc_timeout(Duration::from_nanos(500)), "500n");
        assert_eq!(encode_grpc_timeout(Duration::from_millis(250)), "250000u");
        assert_eq!(encode_grpc_timeout(Duration::from_secs(30)), "30000000u");
        assert_eq!(encode_grpc_timeout(Duration::from_secs(86_400 * 365)), "31536000S");

        let round_trip = parse_grpc_timeout(&encode_grpc_timeout(Duration::from_secs(42)));
        assert_eq!(round_trip, Some(Duration::from_secs(42)));
    }
}
