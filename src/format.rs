use crate::deliver::OutboundMessage;
use crate::types::{Item, SourceBinding, BODY_MAX, TITLE_MAX};
use crate::text;

/// Builds the outbound message for one item. Title and body arrive capped
/// from the data model, but translated text is re-capped here since the
/// translation can be longer than the original.
pub fn build_message(
    item: &Item,
    binding: &SourceBinding,
    title: String,
    body: Option<String>,
) -> OutboundMessage {
    OutboundMessage {
        title: text::truncate(&title, TITLE_MAX),
        body: body.map(|b| text::truncate(&b, BODY_MAX)),
        url: item.url.clone(),
        source_label: binding.name.clone(),
        image_url: item.image_url.clone(),
        published_at: item.published_at,
    }
}
