// gatewarden/src/normalize.rs
//
// Path normalization — collapse raw URL paths into route templates so the
// Markov chain sees "/product/{id}" once instead of "/product/1..100" as a
// hundred nodes. Pure, deterministic, idempotent.

const STATIC_EXTENSIONS: &[&str] = &[
    "css", "js", "mjs", "map", "png", "jpg", "jpeg", "gif", "webp", "svg",
    "ico", "woff", "woff2", "ttf", "otf", "eot", "mp4", "webm", "mp3", "wav",
];

pub const TEMPLATE_STATIC: &str = "{static}";

/// Normalize a raw request path into a route template.
pub fn normalize(raw: &str) -> String {
    if raw == TEMPLATE_STATIC {
        return TEMPLATE_STATIC.to_string();
    }

    // Strip query and fragment.
    let path = raw.split(['?', '#']).next().unwrap_or("");
    let path = if path.is_empty() { "/" } else { path };

    // Strip trailing slash unless the path is "/".
    let path = if path.len() > 1 { path.trim_end_matches('/') } else { path };
    let path = if path.is_empty() { "/" } else { path };

    if is_static_asset(path) {
        return TEMPLATE_STATIC.to_string();
    }

    // Lowercase before segment analysis so the pass is idempotent: a
    // mixed-case slug must collapse the same way its lowercased form does.
    let path = path.to_lowercase();

    let mut out = String::with_capacity(path.len());
    for segment in path.split('/') {
        if segment.is_empty() {
            continue;
        }
        out.push('/');
        out.push_str(&normalize_segment(segment));
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Coarse route bucket used for cohort keys and auth/admin gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteBucket {
    Static,
    Api,
    Search,
    Auth,
    Admin,
    Detail,
    Meta,
    Home,
    Page,
}

impl std::fmt::Display for RouteBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static => write!(f, "static"),
            Self::Api    => write!(f, "api"),
            Self::Search => write!(f, "search"),
            Self::Auth   => write!(f, "auth"),
            Self::Admin  => write!(f, "admin"),
            Self::Detail => write!(f, "detail"),
            Self::Meta   => write!(f, "meta"),
            Self::Home   => write!(f, "home"),
            Self::Page   => write!(f, "page"),
        }
    }
}

/// Classify a normalized template into its route bucket.
pub fn classify(template: &str) -> RouteBucket {
    if template == TEMPLATE_STATIC {
        return RouteBucket::Static;
    }
    if template == "/" {
        return RouteBucket::Home;
    }
    if template == "/robots.txt"
        || template.starts_with("/sitemap")
        || template == "/favicon.ico"
        || template.starts_with("/.well-known")
    {
        return RouteBucket::Meta;
    }
    if template.starts_with("/api/") || template.starts_with("/_") {
        return RouteBucket::Api;
    }
    for kw in ["search", "find", "query", "lookup"] {
        if template.contains(kw) {
            return RouteBucket::Search;
        }
    }
    for kw in ["login", "logout", "signin", "sign-in", "signup", "sign-up",
               "register", "password", "auth", "oauth", "token", "session"] {
        if template.contains(kw) {
            return RouteBucket::Auth;
        }
    }
    for kw in ["admin", "dashboard", "manage", "console", "wp-admin"] {
        if template.contains(kw) {
            return RouteBucket::Admin;
        }
    }
    if template.contains("{id}") || template.contains("{guid}") || template.contains("{slug}") {
        return RouteBucket::Detail;
    }
    RouteBucket::Page
}

fn is_static_asset(path: &str) -> bool {
    let last = path.rsplit('/').next().unwrap_or("");
    match last.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            STATIC_EXTENSIONS.contains(&ext.to_lowercase().as_str())
        }
        _ => false,
    }
}

fn normalize_segment(segment: &str) -> String {
    if segment.starts_with('{') && segment.ends_with('}') {
        // Already a template placeholder — idempotence.
        return segment.to_string();
    }
    if is_guid(segment) {
        return "{guid}".to_string();
    }
    if is_long_hex(segment) {
        return "{hash}".to_string();
    }
    if is_version(segment) {
        return "v{v}".to_string();
    }
    if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
        return "{id}".to_string();
    }
    if is_slug(segment) {
        return "{slug}".to_string();
    }
    if is_base64_like(segment) {
        return "{token}".to_string();
    }
    segment.to_string()
}

fn is_guid(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() != 36 {
        return false;
    }
    for (i, &b) in bytes.iter().enumerate() {
        match i {
            8 | 13 | 18 | 23 => {
                if b != b'-' { return false; }
            }
            _ => {
                if !b.is_ascii_hexdigit() { return false; }
            }
        }
    }
    true
}

fn is_long_hex(s: &str) -> bool {
    s.len() >= 32 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// vN or vN.M
fn is_version(s: &str) -> bool {
    let Some(rest) = s.strip_prefix('v').or_else(|| s.strip_prefix('V')) else {
        return false;
    };
    if rest.is_empty() {
        return false;
    }
    let mut parts = rest.splitn(2, '.');
    let major_ok = parts
        .next()
        .map(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false);
    let minor_ok = match parts.next() {
        Some(p) => !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()),
        None => true,
    };
    major_ok && minor_ok
}

/// ≥4 lowercase-alnum groups joined by '-', total length > 20.
fn is_slug(s: &str) -> bool {
    if s.len() <= 20 {
        return false;
    }
    let groups: Vec<&str> = s.split('-').collect();
    groups.len() >= 4
        && groups.iter().all(|g| {
            !g.is_empty() && g.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        })
}

fn is_base64_like(s: &str) -> bool {
    s.len() >= 20
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=' || b == b'-' || b == b'_'
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_query_fragment_and_trailing_slash() {
        assert_eq!(normalize("/product/7?ref=mail#top"), "/product/{id}");
        assert_eq!(normalize("/about/"), "/about");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize(""), "/");
    }

    #[test]
    fn collapses_variable_segments() {
        assert_eq!(normalize("/product/1"), "/product/{id}");
        assert_eq!(normalize("/product/100"), "/product/{id}");
        assert_eq!(
            normalize("/order/3f2504e0-4f89-11d3-9a0c-0305e82c3301"),
            "/order/{guid}"
        );
        assert_eq!(
            normalize("/blob/0123456789abcdef0123456789abcdef"),
            "/blob/{hash}"
        );
        assert_eq!(normalize("/api/v2/users"), "/api/v{v}/users");
        assert_eq!(normalize("/api/v2.1/users"), "/api/v{v}/users");
        assert_eq!(
            normalize("/post/how-to-train-your-markov-model-in-rust"),
            "/post/{slug}"
        );
        assert_eq!(
            normalize("/cb/aGVsbG8gd29ybGQgdGhpcyBpcyBsb25n"),
            "/cb/{token}"
        );
    }

    #[test]
    fn static_assets_collapse_to_one_template() {
        assert_eq!(normalize("/assets/app.17a3.js"), "{static}");
        assert_eq!(normalize("/fonts/Inter.woff2"), "{static}");
        assert_eq!(normalize("/img/logo.svg?v=3"), "{static}");
    }

    #[test]
    fn is_idempotent() {
        for raw in [
            "/product/42",
            "/assets/app.js",
            "/Post/How-To-Do-A-Thing-With-Stuff-Longer",
            "/api/v3/search?q=x",
            "/",
        ] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once, "not idempotent for {raw}");
        }
    }

    #[test]
    fn classification_buckets() {
        assert_eq!(classify("{static}"), RouteBucket::Static);
        assert_eq!(classify("/"), RouteBucket::Home);
        assert_eq!(classify("/robots.txt"), RouteBucket::Meta);
        assert_eq!(classify("/api/v{v}/users"), RouteBucket::Api);
        assert_eq!(classify("/_next/data"), RouteBucket::Api);
        assert_eq!(classify("/search"), RouteBucket::Search);
        assert_eq!(classify("/account/login"), RouteBucket::Auth);
        assert_eq!(classify("/admin/users"), RouteBucket::Admin);
        assert_eq!(classify("/product/{id}"), RouteBucket::Detail);
        assert_eq!(classify("/about"), RouteBucket::Page);
    }
}
