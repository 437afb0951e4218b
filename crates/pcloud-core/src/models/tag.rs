//! Tag model

use serde::{Deserialize, Serialize};

use super::annotation::split_annotation_url;

/// Assignment of a tag to a page or an annotation
///
/// Locally a tag has no row of its own: it exists as long as it is assigned
/// to something. The cloud keeps tags as separate records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagAssignment {
    /// Tag name
    pub name: String,
    /// Normalized page URL, or an annotation URL
    pub url: String,
}

/// What a tag assignment points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagAssignmentTarget<'a> {
    Page { url: &'a str },
    Annotation { url: &'a str, page_url: &'a str },
}

impl TagAssignment {
    #[must_use]
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }

    #[must_use]
    pub fn target(&self) -> TagAssignmentTarget<'_> {
        match split_annotation_url(&self.url) {
            Some((page_url, _)) => TagAssignmentTarget::Annotation {
                url: &self.url,
                page_url,
            },
            None => TagAssignmentTarget::Page { url: &self.url },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_detects_annotation_urls() {
        let tag = TagAssignment::new("foo", "getmemexed.com/test/#1");
        assert_eq!(
            tag.target(),
            TagAssignmentTarget::Annotation {
                url: "getmemexed.com/test/#1",
                page_url: "getmemexed.com/test",
            }
        );
        let tag = TagAssignment::new("foo", "getmemexed.com/test");
        assert_eq!(
            tag.target(),
            TagAssignmentTarget::Page {
                url: "getmemexed.com/test"
            }
        );
    }
}
