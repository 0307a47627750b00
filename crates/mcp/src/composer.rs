// Assembles tool-call content, attaching a linked widget when the tool has one

use crate::protocol::{EmbeddedResource, ToolContent};
use fastnow_core::ResourceRegistry;
use serde_json::Value;

/// Build the content array for a successful tool call.
///
/// The first block is always the upstream result as pretty-printed JSON. If
/// `linked_uri` names a widget in `resources`, a second block carries the
/// widget document with `structuredContent` set to the result's `data` field,
/// or to the whole result when there is no `data` field.
pub fn compose(
    result: &Value,
    linked_uri: Option<&str>,
    resources: &ResourceRegistry,
) -> Vec<ToolContent> {
    let text = serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string());
    let mut content = vec![ToolContent::text(text)];

    let widget = linked_uri
        .and_then(|uri| resources.get(uri))
        .and_then(|entry| entry.static_text().map(|html| (entry, html)));

    if let Some((entry, html)) = widget {
        let structured = result.get("data").cloned().unwrap_or_else(|| result.clone());
        content.push(ToolContent::Resource {
            resource: EmbeddedResource {
                uri: entry.uri.clone(),
                mime_type: entry.mime_type.clone(),
                text: html.to_string(),
            },
            structured_content: Some(structured),
        });
    }

    content
}
