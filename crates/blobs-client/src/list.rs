//! Listing and pagination
//!
//! The server answers one page per call. This module turns that into:
//! - accumulate mode: fetch every page in order and concatenate them
//! - manual mode: fetch exactly the page at an explicit cursor
//! - lazy mode: a stream issuing one request per pulled page
//!
//! Page fetches are strictly sequential. Pages are concatenated in fetch
//! order without sorting or deduplication, and each blob entry is projected
//! down to `{etag, key}`.

use crate::client::{BlobRequest, Client};
use blobs_common::{Error, ListResponse, ListResult, Result, Store};
use futures::stream::{self, Stream};
use http::{Method, StatusCode};
use std::sync::Arc;
use tracing::debug;

/// Options for a list call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Only return keys starting with this prefix
    pub prefix: Option<String>,
    /// Resume from this cursor and fetch a single page
    pub cursor: Option<String>,
    /// Group keys below the next `/` into directories
    pub directories: bool,
}

impl ListOptions {
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    #[must_use]
    pub const fn directories(mut self, directories: bool) -> Self {
        self.directories = directories;
        self
    }
}

/// Fetch one raw page; `None` when the store does not exist
pub async fn fetch_page(
    client: &Client,
    store: &Store,
    options: &ListOptions,
    cursor: Option<&str>,
) -> Result<Option<ListResponse>> {
    let mut request = BlobRequest::new(Method::GET, store);
    if let Some(prefix) = &options.prefix {
        request = request.parameter("prefix", prefix.clone());
    }
    if let Some(cursor) = cursor {
        request = request.parameter("cursor", cursor);
    }
    if options.directories {
        request = request.parameter("directories", "true");
    }

    let response = client.send(request).await?;
    if response.status == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !response.status.is_success() {
        return Err(Error::upstream("list", response.status.as_u16()));
    }

    let mut page: ListResponse = serde_json::from_slice(&response.body)?;
    // An empty cursor ends the scan like a missing one
    page.next_cursor = page.next_cursor.filter(|cursor| !cursor.is_empty());
    debug!(
        "list page for {}: {} blobs, cursor {:?}",
        store,
        page.blobs.len(),
        page.next_cursor
    );
    Ok(Some(page))
}

/// List a store
///
/// With an explicit cursor exactly one page is fetched and returned with
/// its `next_cursor`; otherwise every page is fetched and concatenated.
pub async fn list(client: &Client, store: &Store, options: &ListOptions) -> Result<ListResult> {
    if let Some(cursor) = options.cursor.as_deref() {
        let page = fetch_page(client, store, options, Some(cursor)).await?;
        return Ok(page.map(ListResult::from).unwrap_or_default());
    }

    let mut result = ListResult::default();
    let mut cursor: Option<String> = None;
    loop {
        let Some(page) = fetch_page(client, store, options, cursor.as_deref()).await? else {
            break;
        };
        result.extend_from_page(page);
        match result.next_cursor.take() {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(result)
}

enum PageState {
    Next { cursor: Option<String>, first: bool },
    Done,
}

/// Lazily list a store, one request per pulled page
///
/// Dropping the stream stops the scan; nothing needs releasing server-side.
pub fn list_pages(
    client: Arc<Client>,
    store: Store,
    options: ListOptions,
) -> impl Stream<Item = Result<ListResult>> + Send + 'static {
    let start = PageState::Next {
        cursor: options.cursor.clone(),
        first: true,
    };

    stream::try_unfold(start, move |state| {
        let client = client.clone();
        let store = store.clone();
        let options = options.clone();
        async move { next_page(&client, &store, &options, state).await }
    })
}

async fn next_page(
    client: &Client,
    store: &Store,
    options: &ListOptions,
    state: PageState,
) -> Result<Option<(ListResult, PageState)>> {
    let PageState::Next { cursor, first } = state else {
        return Ok(None);
    };

    match fetch_page(client, store, options, cursor.as_deref()).await? {
        Some(page) => {
            let result = ListResult::from(page);
            let next = match &result.next_cursor {
                Some(cursor) => PageState::Next {
                    cursor: Some(cursor.clone()),
                    first: false,
                },
                None => PageState::Done,
            };
            Ok(Some((result, next)))
        }
        // A missing store reads as one empty terminal page
        None if first => Ok(Some((ListResult::default(), PageState::Done))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{HttpRequest, HttpResponse, Transport};
    use async_trait::async_trait;
    use blobs_common::{ClientConfig, ListBlobEntry, RetryConfig};
    use futures::{StreamExt, TryStreamExt};
    use reqwest::Url;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves a fixed key set split into pages of the given sizes
    struct PagedTransport {
        pages: Vec<Vec<&'static str>>,
        calls: AtomicUsize,
        cursors: Mutex<Vec<Option<String>>>,
    }

    impl PagedTransport {
        fn new(keys: &[&'static str], sizes: &[usize]) -> Arc<Self> {
            let mut pages = Vec::new();
            let mut rest = keys;
            for size in sizes {
                let (page, tail) = rest.split_at(*size);
                pages.push(page.to_vec());
                rest = tail;
            }
            assert!(rest.is_empty());
            Arc::new(Self {
                pages,
                calls: AtomicUsize::new(0),
                cursors: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for PagedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let url = Url::parse(&request.url).unwrap();
            let query: HashMap<_, _> = url.query_pairs().into_owned().collect();
            let cursor = query.get("cursor").cloned();
            self.cursors.lock().unwrap().push(cursor.clone());

            let index = cursor.map_or(0, |c| c.trim_start_matches("page-").parse().unwrap());
            let page = ListResponse {
                blobs: self.pages[index]
                    .iter()
                    .map(|key| ListBlobEntry {
                        etag: format!("\"{key}\""),
                        key: (*key).to_string(),
                        size: Some(1),
                        last_modified: None,
                    })
                    .collect(),
                directories: None,
                next_cursor: (index + 1 < self.pages.len()).then(|| format!("page-{}", index + 1)),
            };
            Ok(HttpResponse::new(
                StatusCode::OK,
                serde_json::to_vec(&page).unwrap(),
            ))
        }
    }

    struct NotFoundTransport;

    #[async_trait]
    impl Transport for NotFoundTransport {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse> {
            Ok(HttpResponse::new(StatusCode::NOT_FOUND, ""))
        }
    }

    const KEYS: [&str; 7] = ["a", "b/1", "b/2", "c", "d", "e/f/g", "h"];

    fn client(transport: impl Transport + 'static) -> Arc<Client> {
        let config = ClientConfig::new("site", "token", "http://api.local")
            .with_edge_url("http://edge.local")
            .with_retry(RetryConfig::fast());
        Arc::new(Client::with_transport(config, transport).unwrap())
    }

    fn keys(result: &ListResult) -> Vec<&str> {
        result.blobs.iter().map(|b| b.key.as_str()).collect()
    }

    #[tokio::test]
    async fn test_accumulate_and_lazy_agree() {
        let store = Store::named("music").unwrap();

        let cases: [&[usize]; 4] = [&[7], &[1, 6], &[3, 0, 4], &[1; 7]];
        for sizes in cases {
            let transport = PagedTransport::new(&KEYS, sizes);
            let accumulated = list(&client(transport.clone()), &store, &ListOptions::default())
                .await
                .unwrap();
            assert_eq!(keys(&accumulated), KEYS);
            assert_eq!(accumulated.next_cursor, None);
            assert_eq!(transport.calls(), sizes.len());

            let transport = PagedTransport::new(&KEYS, sizes);
            let pages: Vec<ListResult> =
                list_pages(client(transport.clone()), store.clone(), ListOptions::default())
                    .try_collect()
                    .await
                    .unwrap();
            assert_eq!(pages.len(), sizes.len());
            let lazy: Vec<&str> = pages.iter().flat_map(keys).collect();
            assert_eq!(lazy, KEYS);
        }
    }

    #[tokio::test]
    async fn test_accumulate_threads_cursors() {
        let store = Store::named("music").unwrap();
        let transport = PagedTransport::new(&KEYS, &[2, 2, 3]);
        list(&client(transport.clone()), &store, &ListOptions::default())
            .await
            .unwrap();

        assert_eq!(
            *transport.cursors.lock().unwrap(),
            vec![None, Some("page-1".to_string()), Some("page-2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_manual_mode_fetches_one_page() {
        let store = Store::named("music").unwrap();
        let transport = PagedTransport::new(&KEYS, &[2, 2, 3]);
        let page = list(
            &client(transport.clone()),
            &store,
            &ListOptions::default().cursor("page-1"),
        )
        .await
        .unwrap();

        assert_eq!(keys(&page), vec!["b/2", "c"]);
        assert_eq!(page.next_cursor.as_deref(), Some("page-2"));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_lazy_mode_is_pull_driven() {
        let store = Store::named("music").unwrap();
        let transport = PagedTransport::new(&KEYS, &[2, 2, 3]);
        let mut pages = Box::pin(list_pages(
            client(transport.clone()),
            store,
            ListOptions::default(),
        ));

        assert_eq!(transport.calls(), 0);
        let first = pages.next().await.unwrap().unwrap();
        assert_eq!(keys(&first), vec!["a", "b/1"]);
        assert_eq!(transport.calls(), 1);
        drop(pages);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_store() {
        let store = Store::named("missing").unwrap();

        let result = list(&client(NotFoundTransport), &store, &ListOptions::default())
            .await
            .unwrap();
        assert_eq!(result, ListResult::default());

        let pages: Vec<ListResult> =
            list_pages(client(NotFoundTransport), store, ListOptions::default())
                .try_collect()
                .await
                .unwrap();
        assert_eq!(pages, vec![ListResult::default()]);
    }

    /// Answers every request with the same page and an empty cursor
    struct EmptyCursorTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for EmptyCursorTransport {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let body = br#"{"blobs":[{"etag":"\"1\"","key":"only"}],"next_cursor":""}"#;
            Ok(HttpResponse::new(StatusCode::OK, body.to_vec()))
        }
    }

    #[tokio::test]
    async fn test_empty_cursor_ends_scan() {
        let transport = Arc::new(EmptyCursorTransport {
            calls: AtomicUsize::new(0),
        });
        let client = client(transport.clone());
        let store = Store::named("music").unwrap();

        let result = list(&client, &store, &ListOptions::default()).await.unwrap();
        assert_eq!(keys(&result), vec!["only"]);
        assert_eq!(result.next_cursor, None);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

        let pages: Vec<_> = list_pages(client, store, ListOptions::default())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }
}
