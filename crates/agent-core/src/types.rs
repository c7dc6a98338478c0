//! Shared data model: messages, tool calls, session items.
//!
//! This is the foundation both `agent-store` (persistence) and `agent-runtime`
//! (the loop that mutates it) build on, so it lives below both in the
//! dependency graph rather than inside either.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Session identifier — cheaply cloneable, used as a map key throughout.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(Arc<str>);

impl SessionKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SessionKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Message role. `Tool` carries a `tool_call_id` pairing it to an earlier
/// assistant `ToolCall`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// `{ID, Type="function", Function:{Name, Arguments}}` — matches the shape
/// providers speak on the wire, so the adapter layer does no renaming.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "ToolCall::default_type")]
    pub kind: String,
    pub function: FunctionCall,
}

impl ToolCall {
    fn default_type() -> String {
        "function".to_string()
    }

    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: Self::default_type(),
            function: FunctionCall { name: name.into(), arguments: arguments.into() },
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object. Kept as a string (not `serde_json::Value`)
    /// because providers stream it incrementally as partial JSON text before
    /// it parses — see `PartialToolCall` in the model adapter.
    pub arguments: String,
}

/// A reference to non-text content: image or file, by one of four addressing
/// schemes. The model adapter resolves each to the provider's native format.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "source", content = "value", rename_all = "snake_case")]
pub enum MediaRef {
    LocalPath(String),
    DataUrl(String),
    HttpUrl(String),
    ProviderFileId(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentPart {
    Image(MediaRef),
    File(MediaRef),
}

/// A single message in a session. `agent_name`/`agent_filename` may be empty
/// for user/system-originated messages.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub agent_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub agent_filename: String,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::plain(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::plain(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, text)
    }

    fn plain(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            parts: Vec::new(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: None,
            agent_name: String::new(),
            agent_filename: String::new(),
        }
    }

    pub fn assistant_with_tool_calls(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut m = Self::plain(Role::Assistant, text);
        m.tool_calls = tool_calls;
        m
    }

    pub fn tool_result(tool_call_id: impl Into<String>, text: impl Into<String>, is_error: bool) -> Self {
        let mut m = Self::plain(Role::Tool, text);
        m.tool_call_id = Some(tool_call_id.into());
        m.is_error = Some(is_error);
        m
    }

    pub fn with_agent(mut self, name: impl Into<String>, filename: impl Into<String>) -> Self {
        self.agent_name = name.into();
        self.agent_filename = filename.into();
        self
    }
}

/// A session log entry: either a plain message or a nested child session
/// spawned by `transfer_task`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "item_type")]
pub enum Item {
    Message(Message),
    SubSession(Box<Session>),
}

impl Item {
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Item::Message(m) => Some(m),
            Item::SubSession(_) => None,
        }
    }
}

/// The persistent, ordered log of a conversation, including nested
/// sub-sessions. Mutated only by the runtime loop; the API boundary creates
/// it, the loop appends to it, the store persists it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<SessionKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub tools_approved: bool,
    #[serde(default = "default_true")]
    pub send_user_message: bool,
    #[serde(default)]
    pub max_iterations: u32,
    #[serde(default)]
    pub thinking: bool,
    #[serde(default)]
    pub working_dir: String,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cost: f64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

fn default_true() -> bool {
    true
}

impl Session {
    pub fn new(id: SessionKey, working_dir: impl Into<String>) -> Self {
        Self {
            id,
            parent_id: None,
            user_id: None,
            title: String::new(),
            items: Vec::new(),
            tools_approved: false,
            send_user_message: true,
            max_iterations: 0,
            thinking: false,
            working_dir: working_dir.into(),
            input_tokens: 0,
            output_tokens: 0,
            cost: 0.0,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn child(parent: &Session, id: SessionKey) -> Self {
        let mut s = Self::new(id, parent.working_dir.clone());
        s.parent_id = Some(parent.id.clone());
        s.user_id = parent.user_id.clone();
        s.max_iterations = parent.max_iterations;
        s.tools_approved = parent.tools_approved;
        s
    }

    pub fn is_sub_session(&self) -> bool {
        self.parent_id.is_some()
    }

    pub fn push_message(&mut self, message: Message) {
        self.items.push(Item::Message(message));
    }

    pub fn push_sub_session(&mut self, sub: Session) {
        self.items.push(Item::SubSession(Box::new(sub)));
    }

    /// Direct (non-recursive) messages — excludes nested sub-session contents,
    /// matching the pairing/attribution invariants tested in §8.5.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.items.iter().filter_map(Item::as_message)
    }

    /// Validate the hard invariants from §3: non-empty ID, and every tool-role
    /// message paired to an earlier assistant tool-call by ID.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.as_str().is_empty() {
            return Err("session id must be non-empty".to_string());
        }
        let mut open_calls: std::collections::HashSet<&str> = std::collections::HashSet::new();
        for message in self.messages() {
            match message.role {
                Role::Assistant => {
                    for tc in &message.tool_calls {
                        open_calls.insert(tc.id.as_str());
                    }
                }
                Role::Tool => {
                    let id = message.tool_call_id.as_deref().unwrap_or("");
                    if !open_calls.remove(id) {
                        return Err(format!("orphan tool-role message for call id {id}"));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Gateway configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub bind: BindMode,
    #[serde(default)]
    pub auth: AuthConfig,
}

fn default_port() -> u16 {
    8089
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { port: default_port(), bind: BindMode::default(), auth: AuthConfig::default() }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    Loopback,
    #[default]
    Lan,
}

impl BindMode {
    pub fn to_addr(&self) -> &str {
        match self {
            BindMode::Loopback => "127.0.0.1",
            BindMode::Lan => "0.0.0.0",
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    pub token: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    Token,
    None,
}
