//! Blocks appended to the guild system prompt before each completion.

use crate::domain::types::{Mention, MentionKind, TextAttachment};

pub fn current_author(name: &str, id: &str) -> String {
    format!(
        "\n[SYSTEM: CURRENT AUTHOR]\nThe user speaking to you now is: {name} (ID: {id})\nAddress them by their name: {name}\n"
    )
}

/// How a stored user turn is presented to the model.
pub fn attributed(author: &str, content: &str) -> String {
    format!("[{author}]: {content}")
}

/// Appended when history from several channels is merged.
pub const SHARED_CONTEXT_NOTE: &str =
    "\n[SYSTEM: SHARED CHAT]\nThe conversation below spans several channels of this server.\n";

/// Message text with each attached file inlined after it.
pub fn with_attachments(content: &str, attachments: &[TextAttachment]) -> String {
    let mut text = content.to_string();
    for file in attachments {
        text.push_str(&format!(
            "\n\n[Attached File '{}']:\n```\n{}\n```",
            file.filename, file.text
        ));
    }
    text
}

/// Names and mention syntax of every entity referenced in the message.
pub fn entity_context(mentions: &[Mention]) -> String {
    let mut block = String::from("\n[SYSTEM: ENTITY CONTEXT]\n");
    for (kind, heading) in [
        (MentionKind::User, "Users:\n"),
        (MentionKind::Role, "Roles:\n"),
        (MentionKind::Channel, "Channels:\n"),
    ] {
        let mut entries = mentions.iter().filter(|m| m.kind == kind).peekable();
        if entries.peek().is_none() {
            continue;
        }
        block.push_str(heading);
        for m in entries {
            let line = match kind {
                MentionKind::User => format!("- @{}: <@{}>\n", m.name, m.id),
                MentionKind::Role => format!("- @{}: <@&{}>\n", m.name, m.id),
                MentionKind::Channel => format!("- #{}: <#{}>\n", m.name, m.id),
            };
            block.push_str(&line);
        }
    }
    block
}

pub fn replying_to(author: &str, content: &str) -> String {
    format!(
        "\n[SYSTEM: USER REPLYING TO]\nUser is replying to message by @{author}:\n\"{}\"\n",
        content.replace('\n', " ")
    )
}
