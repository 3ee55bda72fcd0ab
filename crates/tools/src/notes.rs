//! Note-taking tools backed by the conversation store

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use voice_gateway_persistence::{ConversationStore, DEFAULT_NOTE_LIMIT};

use crate::schema::{required_str, InputSchema, PropertySchema, Tool, ToolSchema};
use crate::ToolError;

pub struct TakeNoteTool {
    store: Arc<dyn ConversationStore>,
}

impl TakeNoteTool {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for TakeNoteTool {
    fn name(&self) -> &str {
        "take_note"
    }

    fn description(&self) -> &str {
        "Save a note with a title and content. Notes persist across conversations and can be searched later."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: InputSchema::object()
                .property("title", PropertySchema::string("Short title for the note"), true)
                .property("content", PropertySchema::string("The note content"), true)
                .build(),
        }
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let title = required_str(&input, "title")?;
        let content = required_str(&input, "content")?;

        self.store.save_note(title, content, None).await?;
        Ok(format!("Note saved: {}", title))
    }

    fn timeout_secs(&self) -> u64 {
        10
    }
}

pub struct SearchNotesTool {
    store: Arc<dyn ConversationStore>,
}

impl SearchNotesTool {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SearchNotesTool {
    fn name(&self) -> &str {
        "search_notes"
    }

    fn description(&self) -> &str {
        "Search saved notes by keyword. Returns matching notes with titles and content."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: InputSchema::object()
                .property("query", PropertySchema::string("Search keyword or phrase"), true)
                .build(),
        }
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let query = required_str(&input, "query")?;

        let notes = self.store.search_notes(query, DEFAULT_NOTE_LIMIT).await?;
        if notes.is_empty() {
            return Ok(format!("No notes found matching '{}'", query));
        }

        Ok(notes
            .iter()
            .map(|n| format!("- {}: {}", n.title, n.content))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    fn timeout_secs(&self) -> u64 {
        10
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use voice_gateway_persistence::InMemoryConversationStore;

    #[tokio::test]
    async fn test_take_then_search() {
        let store: Arc<dyn ConversationStore> = Arc::new(InMemoryConversationStore::default());
        let take = TakeNoteTool::new(store.clone());
        let search = SearchNotesTool::new(store);

        let saved = take
            .execute(json!({"title": "Roof", "content": "Leak over the garage"}))
            .await
            .unwrap();
        assert_eq!(saved, "Note saved: Roof");

        let found = search.execute(json!({"query": "garage"})).await.unwrap();
        assert_eq!(found, "- Roof: Leak over the garage");

        let none = search.execute(json!({"query": "boiler"})).await.unwrap();
        assert_eq!(none, "No notes found matching 'boiler'");
    }
}
