// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! On-disk session persistence: `<config>/sessions/<id>.json`, one JSON
//! document per session, with forgiving deserialisation (unknown fields are
//! ignored; malformed tool-call arguments survive as `{"_raw_json": ...}`).

use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use orca_model::{ContentItem, FunctionCall, FunctionResult, Message, Role};

use crate::conversation::Conversation;

const TITLE_MAX_CHARS: usize = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub workdir: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fork_point_message_index: Option<usize>,
    #[serde(default)]
    pub messages: Vec<MessageRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<ToolResultRecord>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub call_id: String,
    pub name: String,
    /// Arguments as a JSON string, exactly as sent to the tool.
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultRecord {
    pub call_id: String,
    #[serde(default)]
    pub name: String,
    pub result: String,
}

/// Serialises and reads conversations; supports forking with a parent
/// pointer and an indented ancestry listing.
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_of(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    fn new_id(&self) -> String {
        loop {
            let id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
            if !self.path_of(&id).exists() {
                return id;
            }
        }
    }

    /// Persist a conversation.  A fresh id is allocated unless
    /// `existing_id` names a session to overwrite (its creation time is
    /// preserved).  Returns the session id.
    pub fn save(
        &self,
        convo: &Conversation,
        title: Option<&str>,
        existing_id: Option<&str>,
        workdir: &str,
        model: &str,
    ) -> anyhow::Result<String> {
        let (id, created_at) = match existing_id {
            Some(id) => {
                let created = self
                    .read_record(id)
                    .map(|r| r.created_at)
                    .unwrap_or_else(|_| Utc::now());
                (id.to_string(), created)
            }
            None => (self.new_id(), Utc::now()),
        };

        let title = title
            .map(str::to_string)
            .or_else(|| convo.first_user_text().map(|t| derive_title(&t)))
            .unwrap_or_else(|| "untitled".into());

        let record = SessionRecord {
            id: id.clone(),
            title,
            created_at,
            updated_at: Utc::now(),
            workdir: workdir.to_string(),
            model: model.to_string(),
            system_prompt: convo.system_prompt.clone(),
            parent_session_id: None,
            fork_point_message_index: None,
            messages: convo.messages.iter().map(message_to_record).collect(),
        };
        self.write_record(&record)?;
        Ok(id)
    }

    /// Read a session and rebuild its conversation.
    pub fn load(
        &self,
        id: &str,
        chars_per_token: f32,
    ) -> anyhow::Result<(Conversation, SessionRecord)> {
        let record = self.read_record(id)?;
        let mut convo = Conversation::new(chars_per_token);
        convo.system_prompt = record.system_prompt.clone();
        convo.messages = record.messages.iter().map(record_to_message).collect();
        Ok((convo, record))
    }

    /// All sessions, newest-first by update time.
    pub fn list(&self) -> Vec<SessionRecord> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut sessions: Vec<SessionRecord> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "json"))
            .filter_map(|e| {
                let text = std::fs::read_to_string(e.path()).ok()?;
                match serde_json::from_str(&text) {
                    Ok(r) => Some(r),
                    Err(err) => {
                        warn!(path = %e.path().display(), error = %err, "unreadable session file");
                        None
                    }
                }
            })
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions
    }

    /// Write the first `index` messages of `convo` as a new session that
    /// points back at its parent.  Returns the new id.
    pub fn fork(
        &self,
        convo: &Conversation,
        title: Option<&str>,
        parent_id: &str,
        index: usize,
    ) -> anyhow::Result<String> {
        let id = self.new_id();
        let index = index.min(convo.messages.len());
        let now = Utc::now();
        let title = title
            .map(str::to_string)
            .or_else(|| convo.first_user_text().map(|t| derive_title(&t)))
            .unwrap_or_else(|| "untitled".into());
        let record = SessionRecord {
            id: id.clone(),
            title,
            created_at: now,
            updated_at: now,
            workdir: String::new(),
            model: String::new(),
            system_prompt: convo.system_prompt.clone(),
            parent_session_id: Some(parent_id.to_string()),
            fork_point_message_index: Some(index),
            messages: convo.messages[..index].iter().map(message_to_record).collect(),
        };
        self.write_record(&record)?;
        debug!(id = %id, parent = parent_id, index, "session forked");
        Ok(id)
    }

    pub fn delete(&self, id: &str) -> anyhow::Result<()> {
        std::fs::remove_file(self.path_of(id))
            .with_context(|| format!("deleting session {id}"))
    }

    /// Indented ancestry listing: roots first, children under their parent.
    pub fn tree(&self) -> String {
        let sessions = self.list();
        let mut out = String::new();
        let roots: Vec<&SessionRecord> = sessions
            .iter()
            .filter(|s| {
                s.parent_session_id
                    .as_ref()
                    .map(|p| !sessions.iter().any(|o| &o.id == p))
                    .unwrap_or(true)
            })
            .collect();
        for root in roots {
            self.append_subtree(&sessions, root, 0, &mut out);
        }
        out
    }

    fn append_subtree(
        &self,
        all: &[SessionRecord],
        node: &SessionRecord,
        depth: usize,
        out: &mut String,
    ) {
        out.push_str(&format!(
            "{}{}  {}  ({} messages)\n",
            "  ".repeat(depth),
            node.id,
            node.title,
            node.messages.len()
        ));
        for child in all
            .iter()
            .filter(|s| s.parent_session_id.as_deref() == Some(node.id.as_str()))
        {
            self.append_subtree(all, child, depth + 1, out);
        }
    }

    fn read_record(&self, id: &str) -> anyhow::Result<SessionRecord> {
        let path = self.path_of(id);
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading session {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing session {id}"))
    }

    fn write_record(&self, record: &SessionRecord) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("creating {}", self.root.display()))?;
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(self.path_of(&record.id), json)
            .with_context(|| format!("writing session {}", record.id))
    }
}

fn derive_title(first_user_text: &str) -> String {
    let line = first_user_text.lines().next().unwrap_or("").trim();
    if line.chars().count() <= TITLE_MAX_CHARS {
        line.to_string()
    } else {
        let truncated: String = line.chars().take(TITLE_MAX_CHARS).collect();
        format!("{truncated}…")
    }
}

// ─── Message ↔ record conversion ──────────────────────────────────────────────

fn message_to_record(m: &Message) -> MessageRecord {
    let role = match m.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    let text = m.text();
    let calls: Vec<ToolCallRecord> = m
        .calls()
        .map(|c| ToolCallRecord {
            call_id: c.call_id.clone(),
            name: c.name.clone(),
            arguments: c.args_json(),
        })
        .collect();
    let results: Vec<ToolResultRecord> = m
        .results()
        .map(|r| ToolResultRecord {
            call_id: r.call_id.clone(),
            name: r.name.clone(),
            result: r.result.clone(),
        })
        .collect();
    MessageRecord {
        role: role.into(),
        text: (!text.is_empty()).then_some(text),
        tool_calls: (!calls.is_empty()).then_some(calls),
        tool_results: (!results.is_empty()).then_some(results),
    }
}

fn record_to_message(r: &MessageRecord) -> Message {
    let role = match r.role.as_str() {
        "system" => Role::System,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        _ => Role::User,
    };
    let mut items = Vec::new();
    if let Some(text) = &r.text {
        if !text.is_empty() {
            items.push(ContentItem::Text { text: text.clone() });
        }
    }
    for c in r.tool_calls.iter().flatten() {
        items.push(ContentItem::Call(FunctionCall {
            call_id: c.call_id.clone(),
            name: c.name.clone(),
            args: parse_arguments(&c.arguments),
        }));
    }
    for res in r.tool_results.iter().flatten() {
        items.push(ContentItem::Result(FunctionResult {
            call_id: res.call_id.clone(),
            name: res.name.clone(),
            result: res.result.clone(),
        }));
    }
    Message { role, items }
}

/// Parse a stored arguments blob.  Anything that is not a JSON object is
/// preserved under `_raw_json` rather than dropped.
fn parse_arguments(raw: &str) -> serde_json::Map<String, Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        _ => {
            let mut map = serde_json::Map::new();
            map.insert("_raw_json".into(), Value::String(raw.to_string()));
            map
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("sessions"));
        (dir, store)
    }

    fn sample_conversation() -> Conversation {
        let mut c = Conversation::with_system(3.5, "be helpful");
        c.push(Message::user("Delete temp.txt"));
        c.push(Message::assistant_with_calls(
            "on it",
            vec![FunctionCall {
                call_id: "c1".into(),
                name: "delete_file".into(),
                args: json!({"path": "/tmp/temp.txt"}).as_object().unwrap().clone(),
            }],
        ));
        c.push(Message::tool_result("c1", "delete_file", "Deleted: /tmp/temp.txt"));
        c.push(Message::assistant("Done."));
        c
    }

    #[test]
    fn save_load_round_trips_content() {
        let (_dir, store) = store();
        let convo = sample_conversation();
        let id = store.save(&convo, None, None, "/work", "m1").unwrap();
        assert_eq!(id.len(), 8);

        let (loaded, record) = store.load(&id, 3.5).unwrap();
        assert_eq!(record.model, "m1");
        assert_eq!(loaded.system_prompt.as_deref(), Some("be helpful"));
        assert_eq!(loaded.messages, convo.messages);
    }

    #[test]
    fn malformed_arguments_survive_as_raw_json() {
        let (_dir, store) = store();
        let id = store.new_id();
        let record = SessionRecord {
            id: id.clone(),
            title: "t".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            workdir: String::new(),
            model: String::new(),
            system_prompt: None,
            parent_session_id: None,
            fork_point_message_index: None,
            messages: vec![MessageRecord {
                role: "assistant".into(),
                text: None,
                tool_calls: Some(vec![ToolCallRecord {
                    call_id: "c1".into(),
                    name: "bash".into(),
                    arguments: "{not valid json".into(),
                }]),
                tool_results: None,
            }],
        };
        store.write_record(&record).unwrap();

        let (loaded, _) = store.load(&id, 3.5).unwrap();
        let call = loaded.messages[0].calls().next().unwrap().clone();
        assert_eq!(call.args["_raw_json"], "{not valid json");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let (_dir, store) = store();
        std::fs::create_dir_all(&store.root).unwrap();
        std::fs::write(
            store.path_of("abcd1234"),
            r#"{"id":"abcd1234","title":"t","createdAt":"2026-01-01T00:00:00Z",
               "updatedAt":"2026-01-01T00:00:00Z","futureField":42,"messages":[]}"#,
        )
        .unwrap();
        assert!(store.load("abcd1234", 3.5).is_ok());
    }

    #[test]
    fn list_is_newest_first() {
        let (_dir, store) = store();
        let mut c = Conversation::new(3.5);
        c.push(Message::user("older"));
        let id1 = store.save(&c, None, None, "", "").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let mut c2 = Conversation::new(3.5);
        c2.push(Message::user("newer"));
        let id2 = store.save(&c2, None, None, "", "").unwrap();

        let listed = store.list();
        assert_eq!(listed[0].id, id2);
        assert_eq!(listed[1].id, id1);
    }

    #[test]
    fn titles_derive_from_first_user_message() {
        let (_dir, store) = store();
        let mut c = Conversation::new(3.5);
        c.push(Message::user("Fix the flaky test in ci.rs"));
        let id = store.save(&c, None, None, "", "").unwrap();
        let (_, record) = store.load(&id, 3.5).unwrap();
        assert_eq!(record.title, "Fix the flaky test in ci.rs");
    }

    #[test]
    fn fork_copies_prefix_with_parent_pointer() {
        let (_dir, store) = store();
        let convo = sample_conversation(); // 4 messages
        let parent = store.save(&convo, None, None, "", "").unwrap();
        let child = store.fork(&convo, Some("alt"), &parent, 2).unwrap();
        assert_ne!(child, parent);

        let (loaded, record) = store.load(&child, 3.5).unwrap();
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.messages, convo.messages[..2].to_vec());
        assert_eq!(record.parent_session_id.as_deref(), Some(parent.as_str()));
        assert_eq!(record.fork_point_message_index, Some(2));
        assert_eq!(record.title, "alt");
    }

    #[test]
    fn tree_indents_children_under_parent() {
        let (_dir, store) = store();
        let convo = sample_conversation();
        let parent = store.save(&convo, Some("root session"), None, "", "").unwrap();
        let child = store.fork(&convo, Some("branch"), &parent, 2).unwrap();

        let tree = store.tree();
        let parent_line = tree.lines().position(|l| l.contains(&parent)).unwrap();
        let child_line = tree.lines().position(|l| l.contains(&child)).unwrap();
        assert!(child_line > parent_line);
        assert!(tree.lines().nth(child_line).unwrap().starts_with("  "));
    }

    #[test]
    fn delete_removes_session() {
        let (_dir, store) = store();
        let mut c = Conversation::new(3.5);
        c.push(Message::user("x"));
        let id = store.save(&c, None, None, "", "").unwrap();
        store.delete(&id).unwrap();
        assert!(store.load(&id, 3.5).is_err());
        assert!(store.delete(&id).is_err());
    }

    #[test]
    fn save_with_existing_id_preserves_creation_time() {
        let (_dir, store) = store();
        let mut c = Conversation::new(3.5);
        c.push(Message::user("first"));
        let id = store.save(&c, None, None, "", "").unwrap();
        let created = store.load(&id, 3.5).unwrap().1.created_at;

        std::thread::sleep(std::time::Duration::from_millis(10));
        c.push(Message::assistant("more"));
        let id2 = store.save(&c, None, Some(&id), "", "").unwrap();
        assert_eq!(id2, id);
        let record = store.load(&id, 3.5).unwrap().1;
        assert_eq!(record.created_at, created);
        assert!(record.updated_at > record.created_at);
    }
}
