//! Voice session units
//!
//! Outbound: `{ media: { data, mimeType } }` realtime input and
//! `{ parts: [{ text }] }` context notes. Inbound: `{ parts: [{ inlineData: { data } }] }`.

use serde::{Deserialize, Serialize};

use crate::{encode_pcm_chunk, pcm_mime_type};

/// Base64 media payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    pub data: String,
    pub mime_type: String,
}

/// One captured frame sent to the voice session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeInput {
    pub media: MediaBlob,
}

impl RealtimeInput {
    /// Encode float capture samples as PCM16 at `sample_rate`
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Self {
        Self {
            media: MediaBlob {
                data: encode_pcm_chunk(samples),
                mime_type: pcm_mime_type(sample_rate),
            },
        }
    }
}

/// Inline media in a response part
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// One part of a content unit
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            inline_data: None,
            text: Some(text.into()),
        }
    }

    pub fn audio(data: impl Into<String>) -> Self {
        Self {
            inline_data: Some(InlineData {
                data: data.into(),
                mime_type: None,
            }),
            text: None,
        }
    }
}

/// Content unit in either direction
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContentUnit {
    #[serde(default)]
    pub parts: Vec<ContentPart>,
}

impl ContentUnit {
    /// Text-only unit
    pub fn note(text: impl Into<String>) -> Self {
        Self {
            parts: vec![ContentPart::text(text)],
        }
    }

    /// Base64 audio payloads in part order
    pub fn audio_payloads(&self) -> impl Iterator<Item = &str> {
        self.parts
            .iter()
            .filter_map(|part| part.inline_data.as_ref())
            .map(|inline| inline.data.as_str())
    }
}

/// Everything the engine sends to the voice session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum VoiceUplink {
    Realtime(RealtimeInput),
    Content(ContentUnit),
}
