use crate::prompt::truncate_chars;
use crate::types::{ImageRef, MediaRefs, RetrievedItem, SourceRef, VideoRef};

pub const MAX_VIDEOS: usize = 5;
pub const MAX_IMAGES: usize = 5;

const LABEL_FALLBACK_CHARS: usize = 80;

/// `(collection, url template, source type)`. `{id}` and `{slug}` are
/// substituted; `{slug}` falls back to the id.
const URL_TEMPLATES: &[(&str, &str, &str)] = &[
    ("techniques", "/techniques/{slug}", "technique"),
    ("videos", "/videos/{id}", "video"),
    ("articles", "/articles/{slug}", "article"),
    ("faqs", "/faq#{id}", "faq"),
    ("events", "/events/{slug}", "event"),
    ("curriculum", "/curriculum/{slug}", "curriculum"),
];

/// Citations for every item, in retrieval order.
pub fn project_sources(items: &[RetrievedItem]) -> Vec<SourceRef> {
    items.iter().map(source_for).collect()
}

pub fn source_for(item: &RetrievedItem) -> SourceRef {
    let collection = item.origin_collection.as_str();
    let slug = item.payload.slug.as_deref().unwrap_or(&item.id);

    let (url, source_type) = match URL_TEMPLATES.iter().find(|(name, _, _)| *name == collection) {
        Some((_, template, source_type)) => (
            template.replace("{slug}", slug).replace("{id}", &item.id),
            source_type.to_string(),
        ),
        None => (format!("/{}/{}", collection, item.id), "resource".to_string()),
    };

    SourceRef {
        title: label_for(item),
        url,
        source_type,
    }
}

/// Up to five videos and five images, first-seen order, duplicates dropped.
pub fn project_media(items: &[RetrievedItem]) -> MediaRefs {
    let mut media = MediaRefs::default();

    for item in items {
        if let Some(id) = &item.payload.video_ref {
            if media.videos.len() < MAX_VIDEOS && !media.videos.iter().any(|v| &v.id == id) {
                media.videos.push(VideoRef {
                    id: id.clone(),
                    title: label_for(item),
                });
            }
        }
        if let Some(url) = &item.payload.image_ref {
            if media.images.len() < MAX_IMAGES && !media.images.iter().any(|i| &i.url == url) {
                media.images.push(ImageRef {
                    url: url.clone(),
                    alt: label_for(item),
                });
            }
        }
    }

    media
}

/// Title, else a short prefix of the body, else the bare id.
fn label_for(item: &RetrievedItem) -> String {
    if !item.payload.title.is_empty() {
        item.payload.title.clone()
    } else if !item.payload.body.trim().is_empty() {
        truncate_chars(&item.payload.body, LABEL_FALLBACK_CHARS)
    } else {
        item.id.clone()
    }
}
