//! Natural-key lookups over the remote dataset
//!
//! Remote ids are assigned independently of local keys, so relationships are
//! always resolved through the normalized URL stored on content locators.

use crate::models::{split_annotation_url, RemoteId, UserId};
use crate::remote::{Annotation, ContentLocator, LocationScheme, Record, RemoteDataset};

/// Locator and metadata ids of one piece of content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct ContentRef {
    pub locator: RemoteId,
    pub metadata: RemoteId,
}

pub(super) fn find_content(
    dataset: &RemoteDataset,
    user: &UserId,
    normalized_url: &str,
) -> Option<ContentRef> {
    dataset
        .find::<ContentLocator>(user, |locator| {
            locator.location_scheme == LocationScheme::NormalizedUrlV1
                && locator.location == normalized_url
        })
        .map(|locator| ContentRef {
            locator: locator.id(),
            metadata: locator.data.personal_content_metadata,
        })
}

/// Normalized-URL locator of the given content metadata
pub(super) fn normalized_locator<'a>(
    dataset: &'a RemoteDataset,
    user: &UserId,
    metadata: RemoteId,
) -> Option<&'a Record<ContentLocator>> {
    dataset.find::<ContentLocator>(user, |locator| {
        locator.personal_content_metadata == metadata
            && locator.location_scheme == LocationScheme::NormalizedUrlV1
    })
}

pub(super) fn normalized_url(
    dataset: &RemoteDataset,
    user: &UserId,
    metadata: RemoteId,
) -> Option<String> {
    normalized_locator(dataset, user, metadata).map(|locator| locator.data.location.clone())
}

/// Remote annotation behind a local annotation URL
pub(super) fn find_annotation<'a>(
    dataset: &'a RemoteDataset,
    user: &UserId,
    annotation_url: &str,
) -> Option<&'a Record<Annotation>> {
    let (page_url, local_id) = split_annotation_url(annotation_url)?;
    let content = find_content(dataset, user, page_url)?;
    dataset.find::<Annotation>(user, |annotation| {
        annotation.personal_content_metadata == content.metadata && annotation.local_id == local_id
    })
}

/// Local URL of a remote annotation
pub(super) fn annotation_url(
    dataset: &RemoteDataset,
    user: &UserId,
    annotation: &Annotation,
) -> Option<String> {
    let page_url = normalized_url(dataset, user, annotation.personal_content_metadata)?;
    Some(format!("{page_url}/#{}", annotation.local_id))
}
