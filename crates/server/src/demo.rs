//! A small notes service served by the `mcpforge` binary.
//!
//! It declares every kind of endpoint: tools that mutate the store,
//! resources addressed by `notes://` URIs and a prompt built from a note.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use mcpforge_core::schema::{json_schema_object, json_schema_string};
use mcpforge_core::{
    CallArgs, ParameterBinding, PromptArgument, PromptDeclaration, ResourceDeclaration, ServerDeclaration,
    ServerDefinition, ToolDeclaration,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct NewNote {
    title: String,
    #[serde(default)]
    body: String,
}

#[derive(Default)]
pub struct NotesService {
    notes: RwLock<BTreeMap<String, Note>>,
    next_id: AtomicU64,
}

impl NotesService {
    pub async fn add(&self, title: String, body: String) -> Note {
        let id = (self.next_id.fetch_add(1, Ordering::SeqCst) + 1).to_string();
        let note = Note {
            id: id.clone(),
            title,
            body,
            created_at: Utc::now(),
        };
        self.notes.write().await.insert(id, note.clone());
        tracing::debug!(note_id = %note.id, "Note added");
        note
    }

    pub async fn get(&self, id: &str) -> Option<Note> {
        self.notes.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<Note> {
        self.notes.read().await.values().cloned().collect()
    }

    pub async fn remove(&self, id: &str) -> Option<Note> {
        self.notes.write().await.remove(id)
    }

    pub async fn search(&self, query: &str) -> Vec<Note> {
        let query = query.to_lowercase();
        self.notes
            .read()
            .await
            .values()
            .filter(|n| n.title.to_lowercase().contains(&query) || n.body.to_lowercase().contains(&query))
            .cloned()
            .collect()
    }
}

fn resource_contents(uri: String, value: &impl Serialize) -> Result<Value> {
    Ok(json!({
        "contents": [{
            "uri": uri,
            "mimeType": "application/json",
            "text": serde_json::to_string(value)?,
        }]
    }))
}

fn note_id(input: &Value) -> Result<String> {
    match &input["id"] {
        Value::String(id) => Ok(id.clone()),
        Value::Number(id) => Ok(id.to_string()),
        _ => Err(anyhow!("Missing note id")),
    }
}

/// Declarations and handlers for the notes service.
pub fn notes_definition() -> ServerDefinition<NotesService> {
    ServerDefinition::builder()
        .server(
            ServerDeclaration::new("notes", env!("CARGO_PKG_VERSION"))
                .with_description("In-memory notes exposed over MCP"),
        )
        .tool(
            ToolDeclaration::new("add_note", "Create a note").input_schema(json_schema_object(
                json!({
                    "title": json_schema_string("Note title"),
                    "body": json_schema_string("Note text"),
                }),
                vec!["title"],
            )),
            |this: Arc<NotesService>, args: CallArgs| async move {
                let input: NewNote = args.parse(0)?;
                let note = this.add(input.title, input.body).await;
                Ok(serde_json::to_value(note)?)
            },
        )
        .param(ParameterBinding::whole_input("add_note", 0))
        .tool(
            ToolDeclaration::new("delete_note", "Delete a note by id").input_schema(json_schema_object(
                json!({"id": json_schema_string("Note id")}),
                vec!["id"],
            )),
            |this: Arc<NotesService>, args: CallArgs| async move {
                let id = note_id(args.get(0).unwrap_or(&Value::Null))?;
                match this.remove(&id).await {
                    Some(note) => Ok(json!(format!("Deleted note {}: {}", note.id, note.title))),
                    None => Err(anyhow!("Note not found: {}", id)),
                }
            },
        )
        .tool(
            ToolDeclaration::new("search_notes", "Find notes containing a phrase").input_schema(json_schema_object(
                json!({"query": json_schema_string("Case-insensitive phrase")}),
                vec!["query"],
            )),
            |this: Arc<NotesService>, args: CallArgs| async move {
                let query = args.get(0).and_then(|v| v["query"].as_str()).unwrap_or_default().to_string();
                Ok(serde_json::to_value(this.search(&query).await)?)
            },
        )
        .tool(
            ToolDeclaration::new("count_notes", "Number of stored notes"),
            |this: Arc<NotesService>, _| async move { Ok(json!(this.list().await.len())) },
        )
        .resource(
            ResourceDeclaration::new("notes://index", "index").description("Every note"),
            |this: Arc<NotesService>, _| async move {
                resource_contents("notes://index".to_string(), &this.list().await)
            },
        )
        .resource(
            ResourceDeclaration::new("notes://{id}", "note").description("A single note"),
            |this: Arc<NotesService>, args: CallArgs| async move {
                let id = args.str(0).unwrap_or_default().to_string();
                let note = this
                    .get(&id)
                    .await
                    .ok_or_else(|| anyhow!("Note not found: {}", id))?;
                resource_contents(format!("notes://{}", id), &note)
            },
        )
        .param(ParameterBinding::uri_param("note", 0, "id"))
        .prompt(
            PromptDeclaration::new("summarize_note", "Ask for a summary of one note")
                .argument(PromptArgument::new("id").description("Note id").required())
                .argument(PromptArgument::new("style").description("Tone of the summary")),
            |this: Arc<NotesService>, args: CallArgs| async move {
                let id = args.str(0).ok_or_else(|| anyhow!("Missing note id"))?.to_string();
                let style = args.str(1).unwrap_or("concise");
                let note = this
                    .get(&id)
                    .await
                    .ok_or_else(|| anyhow!("Note not found: {}", id))?;
                Ok(json!({
                    "description": format!("Summary of note {}", id),
                    "messages": [{
                        "role": "user",
                        "content": {
                            "type": "text",
                            "text": format!(
                                "Write a {} summary of the note \"{}\":\n\n{}",
                                style, note.title, note.body
                            ),
                        }
                    }]
                }))
            },
        )
        .param(ParameterBinding::prompt_arg("summarize_note", 0, "id"))
        .param(ParameterBinding::prompt_arg("summarize_note", 1, "style"))
        .build()
}
