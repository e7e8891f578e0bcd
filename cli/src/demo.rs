//! Restores names over a synthetic chat page built from the inputs.

use chat_dom::{Element, MemoryDocument, MemoryElement, NameRestorer, RestorerOptions};
use name_resolver::{NameSource, ResolveKey, ResolverService};

const CONTAINER_ID: &str = "chat";

fn chat_row(key: &ResolveKey) -> (MemoryElement, MemoryElement) {
    let label = MemoryElement::new("span").with_attr("id", "author-name");
    let row = MemoryElement::new("div");
    match key {
        ResolveKey::Handle(handle) => {
            let label = label.with_text(handle);
            row.append_child(&label);
            (row, label)
        }
        ResolveKey::ChannelId(id) => {
            let label = label.with_text(&format!("@{id}"));
            let link = MemoryElement::new("a")
                .with_attr("href", &format!("/channel/{id}"))
                .with_child(label.clone());
            row.append_child(&link);
            (row, label)
        }
    }
}

pub async fn run<S: NameSource>(resolver: ResolverService<S>, keys: &[ResolveKey]) {
    let doc = MemoryDocument::new();
    let chat = MemoryElement::new("div").with_attr("id", CONTAINER_ID);
    let labels: Vec<_> = keys
        .iter()
        .map(|key| {
            let (row, label) = chat_row(key);
            chat.append_child(&row);
            label
        })
        .collect();
    doc.root().append_child(&chat);

    let mut restorer = NameRestorer::new(resolver, RestorerOptions::default());
    restorer.check_container(doc.get_element_by_id(CONTAINER_ID));
    restorer.settle().await;

    for label in &labels {
        let before = label
            .attribute("title")
            .unwrap_or_else(|| label.text_content());
        println!("{before}\t{}", label.text_content());
    }
    tracing::info!(stats = ?restorer.stats(), "Demo page restored");
}
