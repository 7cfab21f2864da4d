//! Signed-cookie chat session state.
//!
//! The whole conversation lives client-side in one cookie: a base64url
//! JSON payload plus an HMAC-SHA256 tag over it. No server-side session
//! table. Tampered or malformed cookies decode to a fresh empty state
//! rather than an error, so a bad cookie can never lock a browser out.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Cookie carrying the serialized session.
pub const SESSION_COOKIE: &str = "docchat_session";

/// Sentinel value meaning "search every document".
pub const ALL_SOURCES: &str = "__all__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    /// Chunk ids backing an assistant turn. `None` means the source
    /// lookup failed for that answer; user turns never carry sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
}

/// Per-browser state: chat history, the selected source filter, and
/// one-shot flash messages drained on the next page render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub messages: Vec<ChatTurn>,
    #[serde(default = "default_selected_source")]
    pub selected_source: String,
    #[serde(default)]
    pub flash: Vec<String>,
}

fn default_selected_source() -> String {
    ALL_SOURCES.to_string()
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            selected_source: default_selected_source(),
            flash: Vec::new(),
        }
    }
}

impl SessionState {
    /// Append the user's question.
    pub fn record_question(&mut self, question: &str) {
        self.messages.push(ChatTurn {
            role: Role::User,
            content: question.to_string(),
            sources: None,
        });
    }

    /// Append the assistant's answer with its attribution.
    pub fn record_answer(&mut self, answer: &str, sources: Option<Vec<String>>) {
        self.messages.push(ChatTurn {
            role: Role::Assistant,
            content: answer.to_string(),
            sources,
        });
    }

    /// Drop the conversation, keeping the selected source filter.
    pub fn clear_history(&mut self) {
        self.messages.clear();
    }

    pub fn push_flash(&mut self, message: impl Into<String>) {
        self.flash.push(message.into());
    }

    /// Drain pending flash messages for rendering.
    pub fn take_flash(&mut self) -> Vec<String> {
        std::mem::take(&mut self.flash)
    }

    /// The filter to pass to retrieval: `None` for the all-sources
    /// sentinel, otherwise the selected file name.
    pub fn source_filter(&self) -> Option<&str> {
        if self.selected_source == ALL_SOURCES {
            None
        } else {
            Some(self.selected_source.as_str())
        }
    }
}

/// Encodes and verifies session cookies with a keyed MAC.
#[derive(Clone)]
pub struct Signer {
    key: Vec<u8>,
}

impl Signer {
    pub fn new(secret: &str) -> Self {
        Self {
            key: secret.as_bytes().to_vec(),
        }
    }

    /// Cookie value: `base64url(json) + "." + hex(hmac)`.
    pub fn encode(&self, state: &SessionState) -> String {
        // SessionState serialization cannot fail: no maps, no non-string keys
        let json = serde_json::to_vec(state).unwrap_or_default();
        let payload = URL_SAFE_NO_PAD.encode(&json);
        let tag = self.sign(payload.as_bytes());
        format!("{}.{}", payload, tag)
    }

    /// Verify and decode a cookie value. Anything that does not check
    /// out, a missing tag, a bad MAC, invalid JSON, yields an empty
    /// session.
    pub fn decode(&self, cookie: &str) -> SessionState {
        let Some((payload, tag)) = cookie.split_once('.') else {
            return SessionState::default();
        };
        if !self.verify(payload.as_bytes(), tag) {
            tracing::warn!("session cookie failed MAC verification");
            return SessionState::default();
        }
        let Ok(json) = URL_SAFE_NO_PAD.decode(payload) else {
            return SessionState::default();
        };
        serde_json::from_slice(&json).unwrap_or_default()
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length
        HmacSha256::new_from_slice(&self.key).expect("HMAC key")
    }

    fn sign(&self, payload: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    fn verify(&self, payload: &[u8], tag: &str) -> bool {
        let Ok(expected) = hex::decode(tag) else {
            return false;
        };
        let mut mac = self.mac();
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> Signer {
        Signer::new("0123456789abcdef0123456789abcdef")
    }

    #[test]
    fn roundtrip_preserves_state() {
        let mut state = SessionState::default();
        state.record_question("How do I win?");
        state.record_answer(
            "Buy everything.",
            Some(vec!["monopoly.pdf:6:2".to_string()]),
        );
        state.selected_source = "monopoly.pdf".to_string();
        state.push_flash("Uploaded and indexed: monopoly.pdf");

        let cookie = signer().encode(&state);
        let decoded = signer().decode(&cookie);
        assert_eq!(decoded, state);
    }

    #[test]
    fn tampered_payload_rejected() {
        let mut state = SessionState::default();
        state.record_question("hello");
        let cookie = signer().encode(&state);

        let (payload, tag) = cookie.split_once('.').unwrap();
        let mut altered = payload.to_string();
        altered.push('A');
        let forged = format!("{}.{}", altered, tag);

        assert_eq!(signer().decode(&forged), SessionState::default());
    }

    #[test]
    fn wrong_key_rejected() {
        let cookie = signer().encode(&SessionState::default());
        let other = Signer::new("ffffffffffffffffffffffffffffffff");
        assert_eq!(other.decode(&cookie), SessionState::default());
    }

    #[test]
    fn malformed_cookie_yields_empty_session() {
        assert_eq!(signer().decode(""), SessionState::default());
        assert_eq!(signer().decode("no-dot-here"), SessionState::default());
        assert_eq!(signer().decode("a.b.c"), SessionState::default());
        assert_eq!(signer().decode("!!!.nothex"), SessionState::default());
    }

    #[test]
    fn ask_appends_user_then_assistant() {
        let mut state = SessionState::default();
        state.record_question("q1");
        state.record_answer("a1", None);

        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[0].role, Role::User);
        assert_eq!(state.messages[1].role, Role::Assistant);
        assert_eq!(state.messages[1].sources, None);
    }

    #[test]
    fn clear_is_idempotent_and_keeps_filter() {
        let mut state = SessionState::default();
        state.selected_source = "a.pdf".to_string();
        state.record_question("q");
        state.clear_history();
        state.clear_history();

        assert!(state.messages.is_empty());
        assert_eq!(state.selected_source, "a.pdf");
    }

    #[test]
    fn flash_drains_once() {
        let mut state = SessionState::default();
        state.push_flash("one");
        state.push_flash("two");

        assert_eq!(state.take_flash(), vec!["one", "two"]);
        assert!(state.take_flash().is_empty());
    }

    #[test]
    fn source_filter_maps_sentinel_to_none() {
        let mut state = SessionState::default();
        assert_eq!(state.source_filter(), None);
        state.selected_source = "rules.pdf".to_string();
        assert_eq!(state.source_filter(), Some("rules.pdf"));
    }
}
