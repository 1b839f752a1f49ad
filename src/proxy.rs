/// How one URL path pattern is handled by the reverse proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// ACME HTTP-01 challenge files served from `webroot`. Exempt from
    /// every other rule, including the HTTPS redirect.
    AcmeChallenge { webroot: String },
    /// Static files under `prefix`, falling back to `fallback`
    /// (usually the front controller).
    Static { prefix: String, fallback: String },
    /// Long-lived caching for static assets with these extensions.
    Assets {
        extensions: Vec<String>,
        max_age: String,
    },
    /// Requests matching `pattern` forwarded to a FastCGI upstream.
    FastCgi { pattern: String, upstream: String },
    /// Requests under `prefix` forwarded to an HTTP upstream.
    Proxy { prefix: String, upstream: String },
    /// Requests matching `pattern` refused.
    Deny { pattern: String },
}

/// Certificate and key paths as seen from inside the proxy container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsCertificate {
    pub certificate: String,
    pub key: String,
}

impl TlsCertificate {
    /// Paths certbot uses for `domain` under `/etc/letsencrypt`.
    #[must_use]
    pub fn letsencrypt(domain: &str) -> Self {
        Self {
            certificate: format!("/etc/letsencrypt/live/{domain}/fullchain.pem"),
            key: format!("/etc/letsencrypt/live/{domain}/privkey.pem"),
        }
    }
}

/// Configuration for the nginx reverse proxy container.
///
/// # Example
///
/// ```
/// use stackwright::proxy::{ReverseProxy, Route};
///
/// let proxy = ReverseProxy::new("example.com")
///     .worker_processes(2)
///     .route(Route::Proxy {
///         prefix: "/admin/".into(),
///         upstream: "http://admin:80/".into(),
///     })
///     .gzip();
///
/// assert_eq!(proxy.worker_processes, 2);
/// assert!(proxy.gzip);
/// assert!(proxy.tls.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseProxy {
    pub server_name: String,
    pub worker_processes: u32,
    pub worker_connections: u32,
    pub max_body_size_bytes: u64,
    pub document_root: String,
    pub index: Vec<String>,
    pub gzip: bool,
    pub security_headers: bool,
    pub routes: Vec<Route>,
    pub tls: Option<TlsCertificate>,
}

impl ReverseProxy {
    #[must_use]
    pub fn new(server_name: &str) -> Self {
        Self {
            server_name: server_name.to_string(),
            worker_processes: 1,
            worker_connections: 1024,
            max_body_size_bytes: 1024 * 1024,
            document_root: "/var/www/html".to_string(),
            index: vec!["index.php".to_string(), "index.html".to_string()],
            gzip: false,
            security_headers: false,
            routes: Vec::new(),
            tls: None,
        }
    }

    #[must_use]
    pub const fn worker_processes(mut self, n: u32) -> Self {
        self.worker_processes = n;
        self
    }

    #[must_use]
    pub const fn worker_connections(mut self, n: u32) -> Self {
        self.worker_connections = n;
        self
    }

    #[must_use]
    pub const fn max_body_size(mut self, bytes: u64) -> Self {
        self.max_body_size_bytes = bytes;
        self
    }

    #[must_use]
    pub fn document_root(mut self, root: &str) -> Self {
        self.document_root = root.to_string();
        self
    }

    #[must_use]
    pub const fn gzip(mut self) -> Self {
        self.gzip = true;
        self
    }

    #[must_use]
    pub const fn security_headers(mut self) -> Self {
        self.security_headers = true;
        self
    }

    #[must_use]
    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    #[must_use]
    pub fn tls(mut self, cert: TlsCertificate) -> Self {
        self.tls = Some(cert);
        self
    }
}
