//! Speech synthesis: voice engine selection and the built-in backends.
//!
//! [`VoiceEngine`] is a closed enum. Each variant carries its own settings
//! and maps to exactly one [`Synthesizer`] implementation:
//!
//! | Variant       | Id        | Backend                               | Output |
//! |---------------|-----------|---------------------------------------|--------|
//! | `CloudTts`    | `gtts`    | Google Translate TTS endpoint         | MP3    |
//! | `SystemTts`   | `pyttsx3` | local `espeak-ng` process (`--stdout`)| WAV    |
//! | `PremiumApi`  | `openai`  | OpenAI `/v1/audio/speech`             | MP3    |
//!
//! Callers that need something else (tests, caching middleware) implement
//! [`Synthesizer`] themselves and pass it through
//! [`crate::config::PipelineConfigBuilder::synthesizer`].

use crate::error::{Pdf2AudioError, SynthesisError};
use crate::storage::AudioFormat;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Turns one chunk of text into encoded audio bytes.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text`. Blank text yields [`SynthesisError::EmptyText`].
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError>;

    /// Container format of the returned bytes.
    fn audio_format(&self) -> AudioFormat;

    /// Engine id used in logs and error messages.
    fn name(&self) -> &str;
}

// ── Settings ─────────────────────────────────────────────────────────────

pub const OPENAI_VOICES: [&str; 6] = ["alloy", "echo", "fable", "onyx", "nova", "shimmer"];
pub const OPENAI_MODELS: [&str; 2] = ["tts-1", "tts-1-hd"];

/// Languages offered for the cloud engine, as `(code, name)`.
pub const CLOUD_LANGUAGES: [(&str, &str); 10] = [
    ("en", "English"),
    ("es", "Spanish"),
    ("fr", "French"),
    ("de", "German"),
    ("it", "Italian"),
    ("pt", "Portuguese"),
    ("ru", "Russian"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
    ("zh", "Chinese"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudTtsSettings {
    /// Two-letter language code passed to the endpoint. Default: `en`.
    pub language: String,
    /// Slower delivery. Default: false.
    pub slow: bool,
}

impl Default for CloudTtsSettings {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            slow: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemTtsSettings {
    /// espeak-ng voice name. Default: `en`.
    #[serde(alias = "voice_id")]
    pub voice: String,
    /// Words per minute, 100–300. Default: 200.
    pub rate: u32,
    /// 0.0–1.0. Default: 0.9.
    pub volume: f32,
}

impl Default for SystemTtsSettings {
    fn default() -> Self {
        Self {
            voice: "en".to_string(),
            rate: 200,
            volume: 0.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PremiumApiSettings {
    /// One of [`OPENAI_VOICES`]. Default: `alloy`.
    #[serde(alias = "voice_id")]
    pub voice: String,
    /// One of [`OPENAI_MODELS`]. Default: `tts-1`.
    pub model: String,
    /// 0.25–4.0. Default: 1.0.
    pub speed: f32,
}

impl Default for PremiumApiSettings {
    fn default() -> Self {
        Self {
            voice: "alloy".to_string(),
            model: "tts-1".to_string(),
            speed: 1.0,
        }
    }
}

/// The voice engine for a job, with its settings.
///
/// Serialised as `{"engine": "<id>", "settings": {...}}`. The system engine
/// also accepts the id `system`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "engine", content = "settings")]
pub enum VoiceEngine {
    #[serde(rename = "gtts")]
    CloudTts(CloudTtsSettings),
    #[serde(rename = "pyttsx3", alias = "system")]
    SystemTts(SystemTtsSettings),
    #[serde(rename = "openai")]
    PremiumApi(PremiumApiSettings),
}

impl Default for VoiceEngine {
    fn default() -> Self {
        VoiceEngine::CloudTts(CloudTtsSettings::default())
    }
}

impl VoiceEngine {
    /// Build an engine from its id and a loose settings object.
    ///
    /// `settings` may be `null` or omit any field; defaults fill the gaps.
    pub fn from_parts(id: &str, settings: serde_json::Value) -> Result<Self, Pdf2AudioError> {
        let settings = match settings {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other,
        };
        let tagged = serde_json::json!({
            "engine": id.trim().to_lowercase(),
            "settings": settings,
        });
        let engine: VoiceEngine = serde_json::from_value(tagged).map_err(|e| {
            Pdf2AudioError::InvalidInput(format!("voice engine '{id}': {e}"))
        })?;
        engine.validate()?;
        Ok(engine)
    }

    pub fn id(&self) -> &'static str {
        match self {
            VoiceEngine::CloudTts(_) => "gtts",
            VoiceEngine::SystemTts(_) => "pyttsx3",
            VoiceEngine::PremiumApi(_) => "openai",
        }
    }

    pub fn audio_format(&self) -> AudioFormat {
        match self {
            VoiceEngine::CloudTts(_) | VoiceEngine::PremiumApi(_) => AudioFormat::Mp3,
            VoiceEngine::SystemTts(_) => AudioFormat::Wav,
        }
    }

    /// Check the settings against the ranges each engine accepts.
    pub fn validate(&self) -> Result<(), Pdf2AudioError> {
        let bad = |msg: String| Err(Pdf2AudioError::InvalidInput(msg));
        match self {
            VoiceEngine::CloudTts(s) => {
                if s.language.trim().is_empty() {
                    return bad("gtts language must not be empty".into());
                }
            }
            VoiceEngine::SystemTts(s) => {
                if !(100..=300).contains(&s.rate) {
                    return bad(format!("rate must be 100–300, got {}", s.rate));
                }
                if !(0.0..=1.0).contains(&s.volume) {
                    return bad(format!("volume must be 0.0–1.0, got {}", s.volume));
                }
            }
            VoiceEngine::PremiumApi(s) => {
                if !OPENAI_VOICES.contains(&s.voice.as_str()) {
                    return bad(format!("unknown openai voice '{}'", s.voice));
                }
                if !OPENAI_MODELS.contains(&s.model.as_str()) {
                    return bad(format!("unknown openai model '{}'", s.model));
                }
                if !(0.25..=4.0).contains(&s.speed) {
                    return bad(format!("speed must be 0.25–4.0, got {}", s.speed));
                }
            }
        }
        Ok(())
    }

    /// Construct the built-in backend for this engine.
    pub fn synthesizer(&self, timeout_secs: u64) -> Arc<dyn Synthesizer> {
        match self {
            VoiceEngine::CloudTts(s) => Arc::new(CloudTtsSynthesizer::new(s.clone(), timeout_secs)),
            VoiceEngine::SystemTts(s) => Arc::new(SystemTtsSynthesizer::new(s.clone())),
            VoiceEngine::PremiumApi(s) => {
                Arc::new(PremiumApiSynthesizer::from_env(s.clone(), timeout_secs))
            }
        }
    }

    /// Every engine and the options it recognises.
    pub fn catalog() -> EngineCatalog {
        EngineCatalog {
            engines: vec![
                EngineInfo {
                    id: "gtts",
                    name: "Google Text-to-Speech",
                    description: "High-quality cloud-based TTS",
                    available: true,
                    voices: Vec::new(),
                    options: vec!["language", "slow"],
                    format: AudioFormat::Mp3,
                },
                EngineInfo {
                    id: "pyttsx3",
                    name: "System Text-to-Speech",
                    description: "Local system voices (espeak-ng)",
                    available: true,
                    voices: Vec::new(),
                    options: vec!["voice_id", "rate", "volume"],
                    format: AudioFormat::Wav,
                },
                EngineInfo {
                    id: "openai",
                    name: "OpenAI TTS",
                    description: "Premium AI voices (requires API key)",
                    available: std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()),
                    voices: OPENAI_VOICES
                        .iter()
                        .map(|v| VoiceOption {
                            id: v.to_string(),
                            name: capitalise(v),
                        })
                        .collect(),
                    options: vec!["voice_id", "model", "speed"],
                    format: AudioFormat::Mp3,
                },
            ],
            gtts_languages: CLOUD_LANGUAGES
                .iter()
                .map(|(code, name)| LanguageOption {
                    code: code.to_string(),
                    name: name.to_string(),
                })
                .collect(),
        }
    }
}

fn capitalise(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Engine list served by `voices()`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineCatalog {
    pub engines: Vec<EngineInfo>,
    pub gtts_languages: Vec<LanguageOption>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub available: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub voices: Vec<VoiceOption>,
    pub options: Vec<&'static str>,
    pub format: AudioFormat,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoiceOption {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LanguageOption {
    pub code: String,
    pub name: String,
}

// ── CloudTts ─────────────────────────────────────────────────────────────

const CLOUD_TTS_URL: &str = "https://translate.google.com/translate_tts";
const CLOUD_PIECE_LIMIT: usize = 100;

/// Google Translate TTS. The endpoint rejects long inputs, so text goes out
/// in word-bounded pieces and the MP3 frames are concatenated.
pub struct CloudTtsSynthesizer {
    client: reqwest::Client,
    settings: CloudTtsSettings,
    endpoint: String,
}

impl CloudTtsSynthesizer {
    pub fn new(settings: CloudTtsSettings, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .user_agent("Mozilla/5.0 (compatible; pdf2audio)")
            .build()
            .unwrap_or_default();
        Self {
            client,
            settings,
            endpoint: CLOUD_TTS_URL.to_string(),
        }
    }

    /// Point at a different endpoint (local test servers).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn backend(&self, detail: impl Into<String>) -> SynthesisError {
        SynthesisError::Backend {
            engine: "gtts".into(),
            detail: detail.into(),
        }
    }
}

#[async_trait]
impl Synthesizer for CloudTtsSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError> {
        let pieces = split_for_cloud(text, CLOUD_PIECE_LIMIT);
        if pieces.is_empty() {
            return Err(SynthesisError::EmptyText);
        }
        let speed = if self.settings.slow { "0.24" } else { "1" };
        let total = pieces.len().to_string();

        let mut audio = Vec::new();
        for (idx, piece) in pieces.iter().enumerate() {
            let idx = idx.to_string();
            let resp = self
                .client
                .get(&self.endpoint)
                .query(&[
                    ("ie", "UTF-8"),
                    ("client", "tw-ob"),
                    ("tl", self.settings.language.as_str()),
                    ("ttsspeed", speed),
                    ("total", total.as_str()),
                    ("idx", idx.as_str()),
                    ("q", piece.as_str()),
                ])
                .send()
                .await
                .map_err(|e| self.backend(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(self.backend(format!("HTTP {}", resp.status())));
            }
            let bytes = resp.bytes().await.map_err(|e| self.backend(e.to_string()))?;
            audio.extend_from_slice(&bytes);
        }
        debug!("gtts synthesized {} pieces, {} bytes", pieces.len(), audio.len());
        Ok(audio)
    }

    fn audio_format(&self) -> AudioFormat {
        AudioFormat::Mp3
    }

    fn name(&self) -> &str {
        "gtts"
    }
}

/// Split `text` into pieces of at most `limit` characters on word
/// boundaries. A single word longer than `limit` is cut by characters.
pub fn split_for_cloud(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if word_len > limit {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            for part in chars.chunks(limit) {
                pieces.push(part.iter().collect());
            }
            continue;
        }
        let extra = if current.is_empty() { word_len } else { word_len + 1 };
        if current_len + extra > limit {
            pieces.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

// ── SystemTts ────────────────────────────────────────────────────────────

/// Local `espeak-ng` process writing WAV to stdout.
pub struct SystemTtsSynthesizer {
    settings: SystemTtsSettings,
    program: String,
}

impl SystemTtsSynthesizer {
    pub fn new(settings: SystemTtsSettings) -> Self {
        Self {
            settings,
            program: "espeak-ng".to_string(),
        }
    }

    /// Use a different executable with the same command-line interface.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// espeak-ng amplitude runs 0–200 with 100 as normal.
    fn amplitude(&self) -> u32 {
        (self.settings.volume.clamp(0.0, 1.0) * 200.0).round() as u32
    }
}

#[async_trait]
impl Synthesizer for SystemTtsSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError> {
        if text.trim().is_empty() {
            return Err(SynthesisError::EmptyText);
        }

        let mut child = tokio::process::Command::new(&self.program)
            .arg("-v")
            .arg(&self.settings.voice)
            .arg("-s")
            .arg(self.settings.rate.to_string())
            .arg("-a")
            .arg(self.amplitude().to_string())
            .arg("--stdin")
            .arg("--stdout")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => SynthesisError::EngineUnavailable {
                    engine: "pyttsx3".into(),
                    hint: format!("'{}' is not installed or not on PATH", self.program),
                },
                _ => SynthesisError::Backend {
                    engine: "pyttsx3".into(),
                    detail: format!("failed to start '{}': {e}", self.program),
                },
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .await
                .map_err(|e| SynthesisError::Backend {
                    engine: "pyttsx3".into(),
                    detail: format!("writing text to '{}': {e}", self.program),
                })?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| SynthesisError::Backend {
                engine: "pyttsx3".into(),
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(SynthesisError::Backend {
                engine: "pyttsx3".into(),
                detail: format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        if output.stdout.is_empty() {
            return Err(SynthesisError::Backend {
                engine: "pyttsx3".into(),
                detail: "no audio produced".into(),
            });
        }
        Ok(output.stdout)
    }

    fn audio_format(&self) -> AudioFormat {
        AudioFormat::Wav
    }

    fn name(&self) -> &str {
        "pyttsx3"
    }
}

// ── PremiumApi ───────────────────────────────────────────────────────────

const OPENAI_SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
    response_format: &'a str,
}

/// OpenAI text-to-speech. The key comes from `OPENAI_API_KEY`; a missing
/// key surfaces per chunk as [`SynthesisError::EngineUnavailable`].
pub struct PremiumApiSynthesizer {
    client: reqwest::Client,
    settings: PremiumApiSettings,
    api_key: Option<String>,
    endpoint: String,
}

impl PremiumApiSynthesizer {
    pub fn new(settings: PremiumApiSettings, api_key: Option<String>, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .unwrap_or_default();
        Self {
            client,
            settings,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            endpoint: OPENAI_SPEECH_URL.to_string(),
        }
    }

    pub fn from_env(settings: PremiumApiSettings, timeout_secs: u64) -> Self {
        Self::new(settings, std::env::var("OPENAI_API_KEY").ok(), timeout_secs)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl Synthesizer for PremiumApiSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError> {
        if text.trim().is_empty() {
            return Err(SynthesisError::EmptyText);
        }
        let Some(key) = self.api_key.as_deref() else {
            return Err(SynthesisError::EngineUnavailable {
                engine: "openai".into(),
                hint: "OPENAI_API_KEY is not set".into(),
            });
        };

        let body = SpeechRequest {
            model: &self.settings.model,
            input: text,
            voice: &self.settings.voice,
            speed: self.settings.speed,
            response_format: "mp3",
        };
        let backend = |detail: String| SynthesisError::Backend {
            engine: "openai".into(),
            detail,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|e| backend(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(backend(format!("HTTP {status}: {}", text.trim())));
        }
        let bytes = resp.bytes().await.map_err(|e| backend(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn audio_format(&self) -> AudioFormat {
        AudioFormat::Mp3
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_from_parts_fills_defaults() {
        let e = VoiceEngine::from_parts("gtts", serde_json::Value::Null).unwrap();
        assert_eq!(e, VoiceEngine::CloudTts(CloudTtsSettings::default()));

        let e = VoiceEngine::from_parts("pyttsx3", serde_json::json!({ "rate": 150 })).unwrap();
        match e {
            VoiceEngine::SystemTts(s) => {
                assert_eq!(s.rate, 150);
                assert_eq!(s.voice, "en");
                assert!((s.volume - 0.9).abs() < f32::EPSILON);
            }
            other => panic!("unexpected engine {other:?}"),
        }
    }

    #[test]
    fn system_alias_and_voice_id_are_accepted() {
        let e = VoiceEngine::from_parts("system", serde_json::json!({ "voice_id": "en-us" }))
            .unwrap();
        assert_eq!(e.id(), "pyttsx3");
        assert_eq!(e.audio_format(), AudioFormat::Wav);
    }

    #[test]
    fn unknown_engine_is_invalid_input() {
        let err = VoiceEngine::from_parts("festival", serde_json::Value::Null).unwrap_err();
        assert!(matches!(err, Pdf2AudioError::InvalidInput(_)));
    }

    #[test]
    fn out_of_range_settings_are_rejected() {
        assert!(VoiceEngine::from_parts("pyttsx3", serde_json::json!({ "rate": 50 })).is_err());
        assert!(VoiceEngine::from_parts("pyttsx3", serde_json::json!({ "volume": 1.5 })).is_err());
        assert!(VoiceEngine::from_parts("openai", serde_json::json!({ "voice": "bob" })).is_err());
        assert!(VoiceEngine::from_parts("openai", serde_json::json!({ "speed": 9.0 })).is_err());
        let hd = serde_json::json!({ "model": "tts-1-hd" });
        assert!(VoiceEngine::from_parts("openai", hd).is_ok());
    }

    #[test]
    fn engine_serialises_tagged_by_id() {
        let v = serde_json::to_value(VoiceEngine::default()).unwrap();
        assert_eq!(v["engine"], "gtts");
        assert_eq!(v["settings"]["language"], "en");
    }

    #[test]
    fn catalog_lists_all_three_engines() {
        let cat = VoiceEngine::catalog();
        let ids: Vec<&str> = cat.engines.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["gtts", "pyttsx3", "openai"]);
        let openai = &cat.engines[2];
        assert_eq!(openai.voices.len(), 6);
        assert_eq!(openai.voices[0].name, "Alloy");
        assert_eq!(cat.gtts_languages.len(), 10);
    }

    #[test]
    fn cloud_pieces_stay_under_limit_and_keep_words() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(10);
        let pieces = split_for_cloud(&text, 100);
        assert!(pieces.len() > 1);
        for p in &pieces {
            assert!(p.chars().count() <= 100, "piece too long: {p}");
            assert!(!p.starts_with(' ') && !p.ends_with(' '));
        }
        let rejoined = pieces.join(" ");
        assert_eq!(rejoined, text.split_whitespace().collect::<Vec<_>>().join(" "));
    }

    #[test]
    fn cloud_split_cuts_overlong_words() {
        let word = "x".repeat(250);
        let pieces = split_for_cloud(&format!("a {word} b"), 100);
        let expected = vec![
            "a".to_string(),
            "x".repeat(100),
            "x".repeat(100),
            "x".repeat(50),
            "b".to_string(),
        ];
        assert_eq!(pieces, expected);
        assert!(split_for_cloud("   ", 100).is_empty());
    }

    #[tokio::test]
    async fn premium_without_key_is_unavailable() {
        let s = PremiumApiSynthesizer::new(PremiumApiSettings::default(), None, 5);
        let err = s.synthesize("hello").await.unwrap_err();
        assert!(matches!(err, SynthesisError::EngineUnavailable { .. }));
        assert!(matches!(s.synthesize("  ").await, Err(SynthesisError::EmptyText)));
    }

    async fn serve(app: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn cloud_pieces_are_fetched_in_order_and_concatenated() {
        use axum::extract::Query;
        use std::collections::HashMap;

        let app = axum::Router::new().route(
            "/tts",
            axum::routing::get(|Query(q): Query<HashMap<String, String>>| async move {
                assert_eq!(q.get("tl").map(String::as_str), Some("fr"));
                assert_eq!(q.get("ttsspeed").map(String::as_str), Some("0.24"));
                format!("[{}]", q.get("idx").cloned().unwrap_or_default())
            }),
        );
        let base = serve(app).await;
        let settings = CloudTtsSettings {
            language: "fr".into(),
            slow: true,
        };
        let synth = CloudTtsSynthesizer::new(settings, 5).with_endpoint(format!("{base}/tts"));
        let text = "mot ".repeat(60);
        let pieces = split_for_cloud(&text, CLOUD_PIECE_LIMIT).len();
        assert!(pieces > 1);

        let audio = synth.synthesize(&text).await.unwrap();
        let expected: String = (0..pieces).map(|i| format!("[{i}]")).collect();
        assert_eq!(String::from_utf8(audio).unwrap(), expected);
    }

    #[tokio::test]
    async fn cloud_http_error_is_backend_failure() {
        let app = axum::Router::new().route(
            "/tts",
            axum::routing::get(|| async {
                (axum::http::StatusCode::TOO_MANY_REQUESTS, "slow down")
            }),
        );
        let base = serve(app).await;
        let synth = CloudTtsSynthesizer::new(CloudTtsSettings::default(), 5)
            .with_endpoint(format!("{base}/tts"));
        let err = synth.synthesize("hello").await.unwrap_err();
        assert!(
            matches!(err, SynthesisError::Backend { ref engine, .. } if engine == "gtts"),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn premium_posts_bearer_json_and_returns_body() {
        use axum::http::{HeaderMap, StatusCode};
        use axum::Json;

        async fn speech(
            headers: HeaderMap,
            Json(body): Json<serde_json::Value>,
        ) -> (StatusCode, Vec<u8>) {
            let auth = headers.get("authorization").and_then(|v| v.to_str().ok());
            if auth != Some("Bearer sk-test") {
                return (StatusCode::UNAUTHORIZED, Vec::new());
            }
            assert_eq!(body["model"], "tts-1");
            assert_eq!(body["voice"], "nova");
            assert_eq!(body["response_format"], "mp3");
            assert_eq!(body["input"], "Read this aloud.");
            (StatusCode::OK, b"ID3fake".to_vec())
        }

        let app = axum::Router::new().route("/speech", axum::routing::post(speech));
        let base = serve(app).await;
        let settings = PremiumApiSettings {
            voice: "nova".into(),
            ..PremiumApiSettings::default()
        };

        let ok = PremiumApiSynthesizer::new(settings.clone(), Some("sk-test".into()), 5)
            .with_endpoint(format!("{base}/speech"));
        assert_eq!(ok.synthesize("Read this aloud.").await.unwrap(), b"ID3fake".to_vec());

        let bad = PremiumApiSynthesizer::new(settings, Some("sk-wrong".into()), 5)
            .with_endpoint(format!("{base}/speech"));
        match bad.synthesize("Read this aloud.").await {
            Err(SynthesisError::Backend { detail, .. }) => {
                assert!(detail.contains("401"), "{detail}")
            }
            other => panic!("expected backend error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_system_binary_is_unavailable() {
        let s = SystemTtsSynthesizer::new(SystemTtsSettings::default())
            .with_program("definitely-not-an-installed-tts-binary");
        let err = s.synthesize("hello").await.unwrap_err();
        assert!(matches!(err, SynthesisError::EngineUnavailable { .. }), "got {err:?}");
    }

    #[test]
    fn system_amplitude_scales_volume() {
        let s = SystemTtsSynthesizer::new(SystemTtsSettings::default());
        assert_eq!(s.amplitude(), 180);
    }
}
