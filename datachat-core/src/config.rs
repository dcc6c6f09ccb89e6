use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ApiCfg {
    /// Backend origin, without a trailing slash.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_upload_path")]
    pub upload_path: String,
    #[serde(default = "default_chat_path")]
    pub chat_path: String,
}

impl Default for ApiCfg {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            upload_path: default_upload_path(),
            chat_path: default_chat_path(),
        }
    }
}

impl ApiCfg {
    pub fn upload_url(&self) -> String {
        join_url(&self.base_url, &self.upload_path)
    }

    pub fn chat_url(&self) -> String {
        join_url(&self.base_url, &self.chat_path)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim().trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn default_base_url() -> String {
    "https://zingapi.agino.tech".to_string()
}
fn default_upload_path() -> String {
    "/upload".to_string()
}
fn default_chat_path() -> String {
    "/chat".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds, including the streamed body (default 300000ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    300_000
}

/// What to do when the chat stream closes before the completion marker.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MissingMarkerPolicy {
    /// End with a failure.
    #[default]
    Fail,
    /// Treat the accumulated text as the final answer.
    Fallback,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StreamCfg {
    /// Framing prefix stripped from every decoded chunk (with trailing whitespace).
    #[serde(default = "default_framing_token")]
    pub framing_token: String,
    /// Literal separating streamed prose from the trailing JSON payload.
    #[serde(default = "default_marker")]
    pub marker: String,
    /// Replace newlines with single spaces before accumulating.
    #[serde(default)]
    pub collapse_newlines: bool,
    #[serde(default)]
    pub on_missing_marker: MissingMarkerPolicy,
}

impl Default for StreamCfg {
    fn default() -> Self {
        Self {
            framing_token: default_framing_token(),
            marker: default_marker(),
            collapse_newlines: false,
            on_missing_marker: MissingMarkerPolicy::default(),
        }
    }
}

fn default_framing_token() -> String {
    "data:".to_string()
}
fn default_marker() -> String {
    "FINAL_ANSWER".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SessionCfg {
    /// Where the CLI keeps the dataset key between runs.
    #[serde(default = "default_key_file")]
    pub key_file: String,
}

impl Default for SessionCfg {
    fn default() -> Self {
        Self {
            key_file: default_key_file(),
        }
    }
}

fn default_key_file() -> String {
    ".datachat/key.json".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiCfg,
    /// HTTP client configuration (timeouts, pooling). Missing → defaults.
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(default)]
    pub stream: StreamCfg,
    #[serde(default)]
    pub session: SessionCfg,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::error::CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(crate::error::DataChatError::from)?;
        let s = std::str::from_utf8(&bytes)
            .map_err(|e| crate::error::DataChatError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::DataChatError::Other(e.into()))?,
            Some("toml") => toml::from_str::<Self>(s)
                .map_err(|e| crate::error::DataChatError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::DataChatError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s)
                        .map_err(|e| crate::error::DataChatError::Other(e.into()))
                })?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the stream reassembler cannot work with.
    pub fn validate(&self) -> crate::error::CoreResult<()> {
        if self.stream.marker.is_empty() {
            return Err(crate::error::DataChatError::Validation(
                "stream.marker must not be empty".into(),
            ));
        }
        if self.stream.framing_token.is_empty() {
            return Err(crate::error::DataChatError::Validation(
                "stream.framing_token must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn load_from_json() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("datachat.json");
        let json = r#"{
          "api": {"base_url":"http://localhost:8000/"},
          "stream": {"collapse_newlines": true, "on_missing_marker": "fallback"},
          "session": {"key_file": "/tmp/k.json"}
        }"#;
        fs::write(&file, json).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.api.chat_url(), "http://localhost:8000/chat");
        assert_eq!(cfg.api.upload_url(), "http://localhost:8000/upload");
        assert!(cfg.stream.collapse_newlines);
        assert_eq!(cfg.stream.on_missing_marker, MissingMarkerPolicy::Fallback);
        assert_eq!(cfg.stream.marker, "FINAL_ANSWER");
        assert_eq!(cfg.session.key_file, "/tmp/k.json");
        assert_eq!(cfg.http.connect_timeout_ms, 5_000);
        assert_eq!(cfg.http.pool_max_idle_per_host, None);
    }

    #[test]
    fn missing_file_returns_io_error() {
        let missing = std::path::PathBuf::from("/definitely/not/here/datachat-missing.json");
        let err = Config::from_path(&missing).unwrap_err();
        match err {
            crate::error::DataChatError::Io(_) => {}
            other => panic!("expected Io error, got: {:?}", other),
        }
    }

    #[test]
    fn bad_utf8_returns_other_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.bin");
        fs::write(&file, vec![0xff, 0xfe, 0xfd, 0x00, 0x80]).unwrap();
        let err = Config::from_path(&file).unwrap_err();
        match err {
            crate::error::DataChatError::Other(_) => {}
            other => panic!("expected Other(utf8) error, got: {:?}", other),
        }
    }

    #[test]
    fn bad_json_returns_other_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.json");
        let json = r#"{ "api": { "base_url": 123 }"#;
        fs::write(&file, json).unwrap();
        let err = Config::from_path(&file).unwrap_err();
        match err {
            crate::error::DataChatError::Other(_) => {}
            other => panic!("expected Other(json parse) error, got: {:?}", other),
        }
    }

    #[test]
    fn load_from_toml() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("datachat.toml");
        let toml = r#"
[api]
base_url = "http://127.0.0.1:9000"
chat_path = "v2/chat"

[http]
request_timeout_ms = 1000

[stream]
framing_token = "event:"
marker = "DONE"
"#;
        fs::write(&file, toml).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.api.chat_url(), "http://127.0.0.1:9000/v2/chat");
        assert_eq!(cfg.http.request_timeout_ms, 1000);
        assert_eq!(cfg.http.connect_timeout_ms, 5_000);
        assert_eq!(cfg.stream.framing_token, "event:");
        assert_eq!(cfg.stream.marker, "DONE");
        assert_eq!(cfg.stream.on_missing_marker, MissingMarkerPolicy::Fail);
    }

    #[test]
    fn unknown_extension_falls_back_to_json_then_toml() {
        let dir = tempdir().unwrap();
        let json_path = dir.path().join("a.conf");
        fs::write(&json_path, r#"{"stream":{"marker":"END"}}"#).unwrap();
        let cfg = Config::from_path(&json_path).unwrap();
        assert_eq!(cfg.stream.marker, "END");

        let toml_path = dir.path().join("b.conf");
        fs::write(&toml_path, "[session]\nkey_file = \"k.json\"\n").unwrap();
        let cfg = Config::from_path(&toml_path).unwrap();
        assert_eq!(cfg.session.key_file, "k.json");
        assert_eq!(cfg.api, ApiCfg::default());
    }

    #[test]
    fn empty_marker_is_rejected() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("c.json");
        fs::write(&file, r#"{"stream":{"marker":""}}"#).unwrap();
        let err = Config::from_path(&file).unwrap_err();
        assert!(matches!(err, crate::error::DataChatError::Validation(_)));
    }
}
