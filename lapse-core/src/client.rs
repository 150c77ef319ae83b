use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{
    blocking::{Client, ClientBuilder, Request},
    header::{ACCEPT, CONTENT_TYPE},
    Url,
};
use thiserror::Error;
use tracing::trace;

use crate::sequencer::{RenderError, RenderResponse};

/// What to render, independent of the time window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    /// Dashboard UID, optionally followed by its slug (`uid/slug`).
    pub dashboard: String,
    /// Renders a single panel instead of the whole dashboard.
    pub panel:     Option<u32>,
    pub width:     u32,
    pub height:    u32,
    pub timeout:   Option<Duration>,
}

impl Default for RenderRequest {
    #[inline]
    fn default() -> Self {
        Self {
            dashboard: String::new(),
            panel:     None,
            width:     1920,
            height:    1080,
            timeout:   Some(Duration::from_secs(60)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Auth {
    None,
    Bearer(String),
    Basic { username: String, password: String },
}

impl Auth {
    fn parse(credentials: &str) -> Self {
        if let Some((username, password)) = credentials.split_once(':') {
            Auth::Basic {
                username: username.to_owned(),
                password: password.to_owned(),
            }
        } else if credentials.is_empty() {
            Auth::None
        } else {
            Auth::Bearer(credentials.to_owned())
        }
    }
}

/// Blocking client for Grafana's image renderer.
///
/// Cheap to share between threads; one instance serves every worker of a
/// sequence.
#[derive(Debug, Clone)]
pub struct GrafanaClient {
    base_url: Url,
    auth:     Auth,
    http:     Client,
}

impl GrafanaClient {
    /// `credentials` is either an API key or `user:password` for basic auth.
    #[inline]
    pub fn new(api_url: &str, credentials: &str) -> Result<Self, ClientError> {
        let http = http_client_builder().build().map_err(ClientError::Http)?;
        Self::with_http_client(api_url, credentials, http)
    }

    #[inline]
    pub fn with_http_client(
        api_url: &str,
        credentials: &str,
        http: Client,
    ) -> Result<Self, ClientError> {
        let base_url = Url::parse(api_url).map_err(|err| ClientError::InvalidUrl {
            url:    api_url.to_owned(),
            reason: err.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::NotABase(api_url.to_owned()));
        }

        Ok(Self {
            base_url,
            auth: Auth::parse(credentials),
            http,
        })
    }

    /// URL of the render endpoint for the window `from..to`.
    #[inline]
    pub fn render_url(
        &self,
        request: &RenderRequest,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Url, ClientError> {
        let kind = if request.panel.is_some() { "d-solo" } else { "d" };
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ClientError::NotABase(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["render", kind])
            .extend(request.dashboard.split('/').filter(|segment| !segment.is_empty()));

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("from", &from.timestamp_millis().to_string());
            query.append_pair("height", &request.height.to_string());
            if let Some(panel) = request.panel {
                query.append_pair("panelId", &panel.to_string());
            }
            if let Some(timeout) = request.timeout {
                query.append_pair("timeout", &timeout.as_secs().to_string());
            }
            query.append_pair("to", &to.timestamp_millis().to_string());
            query.append_pair("width", &request.width.to_string());
        }

        Ok(url)
    }

    fn build(
        &self,
        request: &RenderRequest,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Request, ClientError> {
        let mut builder = self
            .http
            .get(self.render_url(request, from, to)?)
            .header(ACCEPT, "*/*")
            .header(CONTENT_TYPE, "application/json");
        builder = match &self.auth {
            Auth::None => builder,
            Auth::Bearer(token) => builder.bearer_auth(token),
            Auth::Basic {
                username,
                password,
            } => builder.basic_auth(username, Some(password)),
        };
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(builder.build()?)
    }

    /// Renders the window `from..to`.
    ///
    /// Responses are returned whatever their status; only transport failures
    /// are errors.
    #[inline]
    pub fn render(
        &self,
        request: &RenderRequest,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<RenderResponse, ClientError> {
        let http_request = self.build(request, from, to)?;
        trace!("GET {}", http_request.url());

        let response = self.http.execute(http_request)?;
        let status = response.status().as_u16();
        let bytes = response.bytes()?.to_vec();

        Ok(RenderResponse {
            bytes,
            status,
        })
    }
}

/// HTTP client settings shared by every [`GrafanaClient`].
///
/// Timeouts are set per render request, so the client-wide one is disabled.
#[inline]
pub fn http_client_builder() -> ClientBuilder {
    Client::builder().timeout(None::<Duration>)
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid API URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("API URL {0} cannot be used as a base for render requests")]
    NotABase(String),
    #[error("failed to create HTTP client: {0}")]
    Http(#[source] reqwest::Error),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

impl From<ClientError> for RenderError {
    #[inline]
    fn from(err: ClientError) -> Self {
        RenderError::transport(err)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{BufRead, BufReader, Write},
        net::TcpListener,
        thread,
    };

    use chrono::{TimeDelta, TimeZone};
    use reqwest::header::AUTHORIZATION;

    use super::*;

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let from = Utc.timestamp_millis_opt(1_615_723_200_000).unwrap();
        (from, from + TimeDelta::minutes(5))
    }

    fn request(panel: Option<u32>) -> RenderRequest {
        RenderRequest {
            dashboard: "abc123/node-exporter".to_owned(),
            panel,
            ..Default::default()
        }
    }

    fn serve_once(status: &'static str, body: &'static [u8]) -> (String, thread::JoinHandle<String>) {
        serve_after(Duration::ZERO, status, body)
    }

    /// Serves a single HTTP request, answering with `status` and `body` after
    /// `delay`. The request line is handed back through the join handle.
    fn serve_after(
        delay: Duration,
        status: &'static str,
        body: &'static [u8],
    ) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
            }
            thread::sleep(delay);
            // The client may have given up already.
            let _ = write!(
                stream,
                "HTTP/1.1 {}\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: \
                 close\r\n\r\n",
                status,
                body.len()
            )
            .and_then(|()| stream.write_all(body));
            request_line.trim_end().to_owned()
        });
        (address, handle)
    }

    fn local_client(address: &str) -> GrafanaClient {
        let http = http_client_builder().no_proxy().build().unwrap();
        GrafanaClient::with_http_client(address, "key", http).unwrap()
    }

    #[test]
    fn dashboard_url_has_no_panel() {
        let client = GrafanaClient::new("https://grafana.example.com", "key").unwrap();
        let (from, to) = window();

        let url = client.render_url(&request(None), from, to).unwrap();

        assert_eq!(
            url.as_str(),
            "https://grafana.example.com/render/d/abc123/node-exporter?from=1615723200000&\
             height=1080&timeout=60&to=1615723500000&width=1920"
        );
    }

    #[test]
    fn panel_url_uses_solo_route() {
        let client = GrafanaClient::new("https://grafana.example.com/", "key").unwrap();
        let (from, to) = window();

        let url = client
            .render_url(
                &RenderRequest {
                    timeout: None,
                    ..request(Some(4))
                },
                from,
                to,
            )
            .unwrap();

        assert_eq!(url.path(), "/render/d-solo/abc123/node-exporter");
        assert_eq!(
            url.query(),
            Some("from=1615723200000&height=1080&panelId=4&to=1615723500000&width=1920")
        );
    }

    #[test]
    fn base_path_is_preserved() {
        let client = GrafanaClient::new("https://example.com/grafana/", "key").unwrap();
        let (from, to) = window();

        let url = client.render_url(&request(None), from, to).unwrap();

        assert_eq!(url.path(), "/grafana/render/d/abc123/node-exporter");
    }

    #[test]
    fn api_key_is_sent_as_bearer_token() {
        let client = GrafanaClient::new("https://grafana.example.com", "eyJrIjoi").unwrap();
        let (from, to) = window();

        let built = client.build(&request(None), from, to).unwrap();

        assert_eq!(built.headers()[AUTHORIZATION], "Bearer eyJrIjoi");
        assert_eq!(built.headers()[ACCEPT], "*/*");
        assert_eq!(built.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(built.timeout(), Some(&Duration::from_secs(60)));
    }

    #[test]
    fn user_and_password_use_basic_auth() {
        let client = GrafanaClient::new("https://grafana.example.com", "user:pass").unwrap();
        let (from, to) = window();

        let built = client.build(&request(None), from, to).unwrap();

        assert_eq!(built.headers()[AUTHORIZATION], "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn empty_credentials_send_no_authorization() {
        let client = GrafanaClient::new("https://grafana.example.com", "").unwrap();
        let (from, to) = window();

        let built = client.build(&request(None), from, to).unwrap();

        assert!(built.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn invalid_urls_are_rejected() {
        assert!(matches!(
            GrafanaClient::new("not a url", "key"),
            Err(ClientError::InvalidUrl { .. })
        ));
        assert!(matches!(
            GrafanaClient::new("mailto:admin@example.com", "key"),
            Err(ClientError::NotABase(_))
        ));
    }

    #[test]
    fn render_returns_body_and_status() {
        let (address, server) = serve_once("200 OK", b"\x89PNG");
        let client = local_client(&address);
        let (from, to) = window();

        let response = client.render(&request(Some(2)), from, to).unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.bytes, b"\x89PNG");
        assert!(server
            .join()
            .unwrap()
            .starts_with("GET /render/d-solo/abc123/node-exporter?from=1615723200000"));
    }

    #[test]
    fn unsuccessful_status_is_not_an_error() {
        let (address, server) = serve_once("500 Internal Server Error", b"Rendering failed");
        let client = local_client(&address);
        let (from, to) = window();

        let response = client.render(&request(None), from, to).unwrap();

        assert_eq!(response.status, 500);
        assert!(!response.is_success());
        server.join().unwrap();
    }

    #[test]
    fn disabled_timeout_is_left_off_the_request() {
        let client = GrafanaClient::new("https://grafana.example.com", "key").unwrap();
        let (from, to) = window();

        let built = client
            .build(
                &RenderRequest {
                    timeout: None,
                    ..request(None)
                },
                from,
                to,
            )
            .unwrap();

        assert_eq!(built.timeout(), None);
        assert!(!built.url().query().unwrap().contains("timeout"));
    }

    #[test]
    fn request_timeout_aborts_slow_renders() {
        let (address, _server) = serve_after(Duration::from_secs(3), "200 OK", b"\x89PNG");
        let client = local_client(&address);
        let (from, to) = window();

        let result = client.render(
            &RenderRequest {
                timeout: Some(Duration::from_millis(200)),
                ..request(None)
            },
            from,
            to,
        );

        assert!(matches!(result, Err(ClientError::Request(_))));
    }

    #[test]
    #[ignore = "waits 35 seconds, past reqwest's default client timeout"]
    fn disabled_timeout_waits_for_slow_renders() {
        let (address, server) = serve_after(Duration::from_secs(35), "200 OK", b"\x89PNG");
        let client = local_client(&address);
        let (from, to) = window();

        let response = client
            .render(
                &RenderRequest {
                    timeout: None,
                    ..request(None)
                },
                from,
                to,
            )
            .unwrap();

        assert_eq!(response.status, 200);
        server.join().unwrap();
    }
}
