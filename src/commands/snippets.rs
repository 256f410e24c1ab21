//! Snippet commands

use super::CommandResult;
use crate::app::AppState;
use crate::config::{Snippet, SnippetDraft};

pub fn list_snippets(state: &AppState) -> Vec<Snippet> {
    state.snippets.list()
}

pub fn add_snippet(state: &AppState, draft: SnippetDraft) -> CommandResult<Snippet> {
    Ok(state.snippets.add(draft)?)
}

pub fn update_snippet(state: &AppState, snippet: Snippet) -> CommandResult<Snippet> {
    Ok(state.snippets.update(snippet)?)
}

pub fn delete_snippet(state: &AppState, id: &str) -> CommandResult<bool> {
    Ok(state.snippets.remove(id)?)
}
