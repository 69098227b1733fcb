use std::sync::LazyLock;

use regex::Regex;

static MARKERS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("wp-content", r"(?i)/wp-content/"),
        ("wp-includes", r"(?i)/wp-includes/"),
        ("wp-json", r"(?i)wp-json"),
        ("wp-embed", r"(?i)wp-embed"),
        ("wp_enqueue_script", r"(?i)wp_enqueue_script"),
        ("generator", r"(?i)<meta[^>]+(?:generator[^>]+wordpress|wordpress[^>]+generator)"),
        ("powered-by", r"(?i)powered by\s+(<[^>]+>\s*)?wordpress"),
    ]
    .into_iter()
    .map(|(name, pat)| (name, Regex::new(pat).unwrap()))
    .collect()
});
static GENERATOR_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<meta\b[^>]*\bgenerator\b[^>]*>").unwrap());
static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)WordPress\s*(\d+(?:\.\d+)*)").unwrap());
static THEME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/wp-content/themes/([A-Za-z0-9_.-]+)/").unwrap());

/// What a fetched page says about WordPress.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Evidence {
    pub markers: Vec<&'static str>,
    pub version: Option<String>,
    pub theme: Option<String>,
}

impl Evidence {
    pub fn is_wordpress(&self) -> bool {
        !self.markers.is_empty()
    }
}

/// Scan a page body, and its `Link` header if any.
pub fn inspect(body: &str, link_header: Option<&str>) -> Evidence {
    let mut markers: Vec<&'static str> = MARKERS
        .iter()
        .filter(|(_, re)| re.is_match(body))
        .map(|(name, _)| *name)
        .collect();
    if link_header.is_some_and(|l| l.contains("api.w.org")) {
        markers.push("rest-link");
    }

    let version = GENERATOR_TAG_RE
        .find_iter(body)
        .find_map(|tag| VERSION_RE.captures(tag.as_str()))
        .map(|c| c[1].to_string());
    let theme = THEME_RE.captures(body).map(|c| c[1].to_string());

    Evidence {
        markers,
        version,
        theme,
    }
}

/// True for a WordPress REST API index (`/wp-json/`).
pub fn looks_like_rest_root(content_type: Option<&str>, body: &str) -> bool {
    let json = content_type.is_some_and(|ct| ct.starts_with("application/json"));
    let body = body.trim_start();
    json && (body.starts_with('{') || body.starts_with('['))
        && (body.contains("\"namespaces\"") || body.contains("wp/v2"))
}
