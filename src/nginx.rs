//! Typed nginx configuration and its serializer.
//!
//! Descriptors are built as a tree of [`Directive`]s and [`Block`]s and
//! written out by [`format`], which owns all quoting. Nothing else in the
//! crate produces nginx syntax by string concatenation.

use crate::proxy::{ReverseProxy, Route};

/// A simple directive, `name arg1 arg2;`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub name: String,
    pub args: Vec<String>,
}

/// A block directive, `name args { ... }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub name: String,
    pub args: Vec<String>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Directive(Directive),
    Block(Block),
}

impl Block {
    #[must_use]
    pub fn new(name: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
            children: Vec::new(),
        }
    }

    /// Append `name args;`.
    #[must_use]
    pub fn directive(mut self, name: &str, args: &[&str]) -> Self {
        self.children.push(Node::Directive(Directive {
            name: name.to_string(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        }));
        self
    }

    #[must_use]
    pub fn block(mut self, block: Self) -> Self {
        self.children.push(Node::Block(block));
        self
    }

    /// Names of direct child directives and blocks, in order.
    #[must_use]
    pub fn child_names(&self) -> Vec<&str> {
        self.children
            .iter()
            .map(|n| match n {
                Node::Directive(d) => d.name.as_str(),
                Node::Block(b) => b.name.as_str(),
            })
            .collect()
    }
}

/// A whole configuration file: leading comments and top-level nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conf {
    pub comments: Vec<String>,
    pub nodes: Vec<Node>,
}

impl Conf {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn comment(mut self, line: &str) -> Self {
        self.comments.push(line.to_string());
        self
    }

    #[must_use]
    pub fn directive(mut self, name: &str, args: &[&str]) -> Self {
        self.nodes.push(Node::Directive(Directive {
            name: name.to_string(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        }));
        self
    }

    #[must_use]
    pub fn block(mut self, block: Block) -> Self {
        self.nodes.push(Node::Block(block));
        self
    }

    /// Top-level blocks named `name`.
    #[must_use]
    pub fn blocks(&self, name: &str) -> Vec<&Block> {
        self.nodes
            .iter()
            .filter_map(|n| match n {
                Node::Block(b) if b.name == name => Some(b),
                _ => None,
            })
            .collect()
    }
}

/// Serialize a configuration with four-space indentation.
#[must_use]
pub fn format(conf: &Conf) -> String {
    let mut out = String::new();
    for line in &conf.comments {
        out.push_str("# ");
        out.push_str(line);
        out.push('\n');
    }
    if !conf.comments.is_empty() && !conf.nodes.is_empty() {
        out.push('\n');
    }
    write_nodes(&mut out, &conf.nodes, 0);
    out
}

fn write_nodes(out: &mut String, nodes: &[Node], depth: usize) {
    let indent = "    ".repeat(depth);
    for (i, node) in nodes.iter().enumerate() {
        match node {
            Node::Directive(d) => {
                out.push_str(&indent);
                write_head(out, &d.name, &d.args);
                out.push_str(";\n");
            }
            Node::Block(b) => {
                if i > 0 {
                    out.push('\n');
                }
                out.push_str(&indent);
                write_head(out, &b.name, &b.args);
                out.push_str(" {\n");
                write_nodes(out, &b.children, depth + 1);
                out.push_str(&indent);
                out.push_str("}\n");
            }
        }
    }
}

fn write_head(out: &mut String, name: &str, args: &[String]) {
    out.push_str(name);
    for arg in args {
        out.push(' ');
        out.push_str(&quote(arg));
    }
}

/// Quote an argument when nginx would otherwise split or misparse it.
fn quote(arg: &str) -> String {
    let needs_quotes = arg.is_empty()
        || arg
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ';' | '{' | '}' | '"' | '\'' | '#'));
    if !needs_quotes {
        return arg.to_string();
    }
    let escaped = arg.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Express a byte count the way nginx size directives expect it.
#[must_use]
pub fn size(bytes: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    const KIB: u64 = 1024;
    if bytes > 0 && bytes % MIB == 0 {
        format!("{}m", bytes / MIB)
    } else if bytes > 0 && bytes % KIB == 0 {
        format!("{}k", bytes / KIB)
    } else {
        bytes.to_string()
    }
}

/// Build the main `nginx.conf` for `proxy`.
#[must_use]
pub fn main_conf(proxy: &ReverseProxy) -> Conf {
    let workers = proxy.worker_processes.to_string();
    let connections = proxy.worker_connections.to_string();
    let body = size(proxy.max_body_size_bytes);

    let events = Block::new("events", &[])
        .directive("worker_connections", &[connections.as_str()])
        .directive("multi_accept", &["on"]);

    let mut http = Block::new("http", &[])
        .directive("include", &["/etc/nginx/mime.types"])
        .directive("default_type", &["application/octet-stream"])
        .directive("access_log", &["/var/log/nginx/access.log"])
        .directive("sendfile", &["on"])
        .directive("tcp_nopush", &["on"])
        .directive("tcp_nodelay", &["on"])
        .directive("keepalive_timeout", &["65"])
        .directive("server_tokens", &["off"])
        .directive("client_max_body_size", &[body.as_str()]);

    if proxy.gzip {
        http = http
            .directive("gzip", &["on"])
            .directive("gzip_vary", &["on"])
            .directive("gzip_proxied", &["any"])
            .directive("gzip_comp_level", &["5"])
            .directive(
                "gzip_types",
                &[
                    "text/plain",
                    "text/css",
                    "text/xml",
                    "application/json",
                    "application/javascript",
                    "application/xml",
                    "image/svg+xml",
                ],
            );
    }

    http = http.directive("include", &["/etc/nginx/conf.d/*.conf"]);

    Conf::new()
        .directive("user", &["nginx"])
        .directive("worker_processes", &[workers.as_str()])
        .directive("pid", &["/var/run/nginx.pid"])
        .directive("error_log", &["/var/log/nginx/error.log", "warn"])
        .block(events)
        .block(http)
}

/// Build the site descriptor for `proxy`.
///
/// Without TLS this is a single port-80 server carrying every route.
/// With TLS the port-80 server keeps only the ACME challenge exception
/// and redirects everything else; a port-443 server carries the rest.
#[must_use]
pub fn site_conf(proxy: &ReverseProxy) -> Conf {
    let (acme, routes): (Vec<&Route>, Vec<&Route>) = proxy
        .routes
        .iter()
        .partition(|r| matches!(r, Route::AcmeChallenge { .. }));

    let http_server = Block::new("server", &[])
        .directive("listen", &["80"])
        .directive("listen", &["[::]:80"])
        .directive("server_name", &[proxy.server_name.as_str()]);

    let Some(cert) = &proxy.tls else {
        let server = content(proxy, http_server, acme.iter().chain(routes.iter()).copied());
        return Conf::new().block(server);
    };

    let redirect = acme.iter().fold(http_server, |server, r| server.block(location(r))).block(
        Block::new("location", &["/"]).directive("return", &["301", "https://$host$request_uri"]),
    );

    let tls_server = Block::new("server", &[])
        .directive("listen", &["443", "ssl"])
        .directive("listen", &["[::]:443", "ssl"])
        .directive("http2", &["on"])
        .directive("server_name", &[proxy.server_name.as_str()])
        .directive("ssl_certificate", &[cert.certificate.as_str()])
        .directive("ssl_certificate_key", &[cert.key.as_str()])
        .directive("ssl_protocols", &["TLSv1.2", "TLSv1.3"])
        .directive("ssl_prefer_server_ciphers", &["off"])
        .directive("ssl_session_cache", &["shared:SSL:10m"])
        .directive("ssl_session_timeout", &["1d"])
        .directive(
            "add_header",
            &["Strict-Transport-Security", "max-age=63072000", "always"],
        );
    let tls_server = content(proxy, tls_server, routes.iter().copied());

    Conf::new().block(redirect).block(tls_server)
}

/// Render the main `nginx.conf` for `proxy`.
#[must_use]
pub fn render_main(proxy: &ReverseProxy) -> String {
    format(&main_conf(proxy))
}

/// Render the site descriptor for `proxy`.
#[must_use]
pub fn render_site(proxy: &ReverseProxy) -> String {
    format(&site_conf(proxy))
}

fn content<'a>(
    proxy: &ReverseProxy,
    server: Block,
    routes: impl Iterator<Item = &'a Route>,
) -> Block {
    let index: Vec<&str> = proxy.index.iter().map(String::as_str).collect();
    let mut server = server
        .directive("root", &[proxy.document_root.as_str()])
        .directive("index", &index);

    if proxy.security_headers {
        server = server
            .directive("add_header", &["X-Frame-Options", "SAMEORIGIN", "always"])
            .directive("add_header", &["X-Content-Type-Options", "nosniff", "always"])
            .directive("add_header", &["X-XSS-Protection", "1; mode=block", "always"])
            .directive(
                "add_header",
                &["Referrer-Policy", "strict-origin-when-cross-origin", "always"],
            );
    }

    routes.fold(server, |server, r| server.block(location(r)))
}

fn location(route: &Route) -> Block {
    match route {
        Route::AcmeChallenge { webroot } => {
            Block::new("location", &["^~", "/.well-known/acme-challenge/"])
                .directive("root", &[webroot.as_str()])
                .directive("default_type", &["text/plain"])
                .directive("try_files", &["$uri", "=404"])
        }
        Route::Static { prefix, fallback } => {
            Block::new("location", &[prefix.as_str()]).directive("try_files", &["$uri", "$uri/", fallback.as_str()])
        }
        Route::Assets {
            extensions,
            max_age,
        } => {
            let pattern = format!("\\.({})$", extensions.join("|"));
            Block::new("location", &["~*", pattern.as_str()])
                .directive("expires", &[max_age.as_str()])
                .directive("access_log", &["off"])
                .directive("try_files", &["$uri", "=404"])
        }
        Route::FastCgi { pattern, upstream } => Block::new("location", &["~", pattern.as_str()])
            .directive("try_files", &["$uri", "=404"])
            .directive("fastcgi_split_path_info", &["^(.+\\.php)(/.+)$"])
            .directive("fastcgi_pass", &[upstream.as_str()])
            .directive("fastcgi_index", &["index.php"])
            .directive("include", &["fastcgi_params"])
            .directive(
                "fastcgi_param",
                &["SCRIPT_FILENAME", "$document_root$fastcgi_script_name"],
            )
            .directive("fastcgi_param", &["PATH_INFO", "$fastcgi_path_info"])
            .directive("fastcgi_read_timeout", &["300"]),
        Route::Proxy { prefix, upstream } => Block::new("location", &["^~", prefix.as_str()])
            .directive("proxy_pass", &[upstream.as_str()])
            .directive("proxy_set_header", &["Host", "$host"])
            .directive("proxy_set_header", &["X-Real-IP", "$remote_addr"])
            .directive(
                "proxy_set_header",
                &["X-Forwarded-For", "$proxy_add_x_forwarded_for"],
            )
            .directive("proxy_set_header", &["X-Forwarded-Proto", "$scheme"]),
        Route::Deny { pattern } => Block::new("location", &["~", pattern.as_str()])
            .directive("deny", &["all"])
            .directive("access_log", &["off"])
            .directive("log_not_found", &["off"]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting() {
        assert_eq!(quote("plain"), "plain");
        assert_eq!(quote("1; mode=block"), "\"1; mode=block\"");
        assert_eq!(quote("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(quote(""), "\"\"");
        assert_eq!(quote("\\.php$"), "\\.php$");
    }

    #[test]
    fn sizes() {
        assert_eq!(size(32 * 1024 * 1024), "32m");
        assert_eq!(size(512 * 1024), "512k");
        assert_eq!(size(1000), "1000");
        assert_eq!(size(0), "0");
    }

    #[test]
    fn nested_formatting() {
        let conf = Conf::new()
            .comment("header")
            .directive("worker_processes", &["2"])
            .block(Block::new("events", &[]).directive("worker_connections", &["512"]));

        assert_eq!(
            format(&conf),
            "\
# header

worker_processes 2;

events {
    worker_connections 512;
}
"
        );
    }

    #[test]
    fn injected_semicolon_stays_inside_quotes() {
        let proxy = ReverseProxy::new("evil.com; include /etc/passwd");
        let out = render_site(&proxy);

        assert!(out.contains("server_name \"evil.com; include /etc/passwd\";"));
    }
}
