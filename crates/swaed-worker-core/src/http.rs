//! Request and response values exchanged between the page, the worker and
//! the network.
//!
//! These mirror the subset of the Fetch API the worker cares about: method,
//! URL, request mode and destination on the way in; status, headers and body
//! on the way out.

use std::collections::BTreeMap;
use std::fmt;

use reqwest::Url;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::Result;

/// Base used to resolve relative request URLs when only the path matters.
const RELATIVE_BASE: &str = "http://worker.invalid/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Method::Get),
            "HEAD" => Some(Method::Head),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "PATCH" => Some(Method::Patch),
            "DELETE" => Some(Method::Delete),
            "OPTIONS" => Some(Method::Options),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the page issued the request. Only `Navigate` changes strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    Navigate,
    SameOrigin,
    NoCors,
    #[default]
    Cors,
}

/// What the response will be used for, as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
    Document,
    Script,
    Style,
    Image,
    Font,
    Manifest,
    #[default]
    Empty,
}

impl Destination {
    /// Destinations whose successful responses are cached on the way through.
    pub fn is_static_asset(&self) -> bool {
        matches!(self, Destination::Script | Destination::Style | Destination::Image)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "document" => Some(Destination::Document),
            "script" => Some(Destination::Script),
            "style" => Some(Destination::Style),
            "image" => Some(Destination::Image),
            "font" => Some(Destination::Font),
            "manifest" => Some(Destination::Manifest),
            "" | "empty" => Some(Destination::Empty),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub mode: RequestMode,
    pub destination: Destination,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            mode: RequestMode::default(),
            destination: Destination::default(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// A top-level page navigation.
    pub fn navigate(url: impl Into<String>) -> Self {
        Self::get(url)
            .with_mode(RequestMode::Navigate)
            .with_destination(Destination::Document)
    }

    /// A POST carrying a JSON body.
    pub fn post_json<T: Serialize>(url: impl Into<String>, body: &T) -> Result<Self> {
        let bytes = serde_json::to_vec(body)?;
        Ok(Self {
            method: Method::Post,
            body: Some(bytes),
            ..Self::get(url)
        }
        .with_header("content-type", "application/json"))
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Path component of the URL, whether the URL is absolute or relative.
    pub fn path(&self) -> String {
        resolve(&self.url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|| self.url.clone())
    }

    /// Key under which this request's response is stored in a bucket.
    /// Fragments never reach the network, so they are not part of the key.
    pub fn cache_key(&self) -> String {
        cache_key_for(&self.url)
    }
}

/// Cache key for a bare URL, matching [`Request::cache_key`].
pub fn cache_key_for(url: &str) -> String {
    match url.split_once('#') {
        Some((before, _)) => before.to_string(),
        None => url.to_string(),
    }
}

fn resolve(url: &str) -> Option<Url> {
    match Url::parse(url) {
        Ok(u) => Some(u),
        Err(_) => Url::parse(RELATIVE_BASE).ok()?.join(url).ok(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(with = "hex_body", default)]
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            status_text: reason_phrase(status).to_string(),
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn json<T: Serialize>(status: u16, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(status, body).with_header("content-type", "application/json"))
    }

    pub fn html(status: u16, body: impl Into<String>) -> Self {
        Self::new(status, body.into().into_bytes())
            .with_header("content-type", "text/html; charset=utf-8")
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Exactly HTTP 200, the only status the caching strategies store.
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn reason_phrase(status: u16) -> &'static str {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
}

/// Bodies are stored hex-encoded so cached JSON files stay valid text.
mod hex_body {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
