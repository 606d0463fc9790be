//! ListSpider (spec §4.7): paginates a list API, classifies each page's outcome, and indexes
//! stored pages for downstream detail crawling.
//!
//! Grounded directly on the original `PaginationGetter`/`ListSpider.start`/`single_request`
//! pagination state machine: locate the `{0}` page token, substitute it per page, classify the
//! response (duplicate body / new body / consecutive failure), and stop accordingly.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::Context;
use crate::document_store::DocumentStoreClient;
use crate::error::SpiderError;
use crate::extract;
use crate::http_fetcher::{Fetcher, FetchRequest};
use crate::models::{CrawlStatistic, ListIndexEntry, RequestParams, Task};
use crate::object_store::ObjectStoreClient;

use super::Spider;

const RESULTS_BUCKET: &str = "spider-results";
const LIST_COLLECTION: &str = "list";
const PAGE_TOKEN: &str = "{0}";
const PAGE_DELAY: Duration = Duration::from_secs(5);
const DEDUP_CAP: usize = 10_000;

pub struct ListSpider;

#[async_trait]
impl Spider for ListSpider {
    async fn start(&self, task: Task, ctx: &Context) -> Result<(), SpiderError> {
        run(
            &task,
            ctx.http_fetcher.as_ref(),
            ctx.document_store.as_ref(),
            ctx.object_store.as_ref(),
            PAGE_DELAY,
        )
        .await
    }
}

/// Where the `{0}` page token lives in a datasource's request params.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PageField {
    Url,
    Postdata(String),
}

fn locate_page_field(rp: &RequestParams) -> Result<PageField, SpiderError> {
    if rp.api_url.contains(PAGE_TOKEN) {
        return Ok(PageField::Url);
    }
    for (key, value) in &rp.postdata {
        if value.contains(PAGE_TOKEN) {
            return Ok(PageField::Postdata(key.clone()));
        }
    }
    Err(SpiderError::NoPageVariable)
}

/// Caps duplicate-URL tracking at [`DEDUP_CAP`] entries; once full it degrades open (stops
/// flagging anything as a duplicate) rather than rejecting further items.
struct DedupSet {
    seen: HashSet<String>,
    cap: usize,
}

impl DedupSet {
    fn new(cap: usize) -> Self {
        DedupSet {
            seen: HashSet::new(),
            cap,
        }
    }

    fn is_dup(&mut self, key: &str) -> bool {
        if self.seen.len() >= self.cap {
            return false;
        }
        !self.seen.insert(key.to_string())
    }
}

struct PageRequest {
    url: String,
    postdata: HashMap<String, String>,
}

fn build_page_request(rp: &RequestParams, field: &PageField, cur: i64) -> PageRequest {
    let mut url = rp.api_url.clone();
    let mut postdata = rp.postdata.clone();
    match field {
        PageField::Url => url = url.replace(PAGE_TOKEN, &cur.to_string()),
        PageField::Postdata(key) => {
            if let Some(v) = postdata.get_mut(key) {
                *v = v.replace(PAGE_TOKEN, &cur.to_string());
            }
        }
    }
    PageRequest { url, postdata }
}

async fn run(
    task: &Task,
    fetcher: &dyn Fetcher,
    document_store: &dyn DocumentStoreClient,
    object_store: &dyn ObjectStoreClient,
    page_delay: Duration,
) -> Result<(), SpiderError> {
    let rp = &task.config.request_params;
    let field = locate_page_field(rp)?;
    let [start, step] = task.config.pagination;

    let mut stat = CrawlStatistic::new();
    let mut dedup = DedupSet::new(DEDUP_CAP);
    let mut cur = start;

    loop {
        let use_index_override = cur == start
            && (!rp.additional.index_api_url.is_empty() || !rp.additional.index_postdata.is_empty());
        let (url, postdata) = if use_index_override {
            (
                rp.additional.index_api_url.clone(),
                rp.additional.index_postdata.clone(),
            )
        } else {
            let page = build_page_request(rp, &field, cur);
            (page.url, page.postdata)
        };

        let method = if postdata.is_empty() {
            Method::GET
        } else {
            Method::POST
        };

        let mut req = FetchRequest::get(&url);
        req.method = method.clone();
        req.headers = rp.headers.clone();
        if method == Method::POST {
            req.body = Some(serde_urlencoded::to_string(&postdata).unwrap_or_default().into_bytes());
        }

        let resp = fetcher.fetch(req).await?;
        stat.total += 1;

        if resp.status == 200 {
            let body_text = String::from_utf8_lossy(&resp.body).to_string();
            if stat.last_resp_body.as_deref() == Some(body_text.as_str()) {
                stat.stop_reason = format!("duplicate body at page {cur}");
                break;
            }

            let body_json: Value = serde_json::from_slice(&resp.body)
                .map_err(|e| SpiderError::BadSchema(format!("response is not JSON: {e}")))?;
            let items = extract::extract_items(
                &body_json,
                &task.config.parse_rule.list_page.list_data,
                &task.config.parse_rule.list_page.url_rule,
            )?;

            stat.success += 1;
            stat.last_resp_body = Some(body_text);

            let key = object_key(&task.id, &resp.body);
            object_store
                .put_bytes(RESULTS_BUCKET, &key, resp.body.clone())
                .await?;

            let entry = ListIndexEntry {
                id: Uuid::new_v4().to_string(),
                path: key,
                datasource_id: task.id.clone(),
                round: task.config.round,
                page_cursor: cur,
                fetched_at: Utc::now(),
            };
            document_store
                .insert_one(LIST_COLLECTION, serde_json::to_value(&entry).unwrap())
                .await?;

            let mut new_items = 0u64;
            for item in &items {
                if let Some(url) = item.get("url").and_then(Value::as_str) {
                    if !dedup.is_dup(url) {
                        new_items += 1;
                    }
                }
            }
            info!(id = %task.id, cur, new_items, total_items = items.len(), "page stored");

            if !items.is_empty() && new_items == 0 {
                stat.stop_reason = "duplicate URLs".to_string();
                warn!(id = %task.id, cur, "all extracted URLs already seen, stopping");
                break;
            }
        } else {
            stat.fail.push(cur);
            if stat.last_fail + step == cur {
                stat.stop_reason = format!("consecutive failures, last = {cur}");
                stat.last_fail = cur;
                warn!(id = %task.id, cur, "consecutive page failures, stopping");
                break;
            }
            stat.last_fail = cur;
            warn!(id = %task.id, cur, status = resp.status, "page fetch returned non-200");
        }

        cur += step;
        if !page_delay.is_zero() {
            tokio::time::sleep(page_delay).await;
        }
    }

    info!(
        id = %task.id,
        total = stat.total,
        success = stat.success,
        failures = stat.fail.len(),
        stop_reason = %stat.stop_reason,
        "list spider finished"
    );
    Ok(())
}

fn object_key(task_id: &str, body: &[u8]) -> String {
    let now = Utc::now();
    let digest = md5::compute(body);
    format!(
        "{}/{}_{:x}.txt",
        now.format("%Y/%m/%d"),
        task_id,
        digest
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_store::{Filter, Update, UpdateOutcome};
    use crate::error::{DocumentStoreError, FetchError, ObjectStoreError};
    use crate::models::{AdditionalParams, DatasourceConfig, ListPageRule, ParseRule, UrlRule};
    use std::sync::Mutex;

    struct ScriptedFetcher {
        responses: Mutex<Vec<(u16, Vec<u8>)>>,
        requests: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, req: FetchRequest) -> Result<crate::http_fetcher::FetchResponse, FetchError> {
            self.requests.lock().unwrap().push(req.url.clone());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(FetchError::HttpTransport("no more scripted responses".into()));
            }
            let (status, body) = responses.remove(0);
            Ok(crate::http_fetcher::FetchResponse {
                status,
                body,
                elapsed_ms: 1,
                attempts: 1,
            })
        }
    }

    struct RecordingStore {
        inserted: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl DocumentStoreClient for RecordingStore {
        async fn find(&self, _: &str, _: Filter, _: Option<i64>, _: Option<Value>) -> Result<Vec<Value>, DocumentStoreError> {
            Ok(Vec::new())
        }
        async fn find_one(&self, _: &str, _: Filter) -> Result<Option<Value>, DocumentStoreError> {
            Ok(None)
        }
        async fn insert_one(&self, collection: &str, doc: Value) -> Result<(), DocumentStoreError> {
            self.inserted.lock().unwrap().push((collection.to_string(), doc));
            Ok(())
        }
        async fn insert_many(&self, _: &str, _: Vec<Value>) -> Result<(), DocumentStoreError> {
            Ok(())
        }
        async fn update_one(&self, _: &str, _: Filter, _: Update) -> Result<UpdateOutcome, DocumentStoreError> {
            Ok(UpdateOutcome::default())
        }
        async fn update_many(&self, _: &str, _: Filter, _: Update) -> Result<UpdateOutcome, DocumentStoreError> {
            Ok(UpdateOutcome::default())
        }
        async fn drop(&self, _: &str) -> Result<(), DocumentStoreError> {
            Ok(())
        }
    }

    struct RecordingObjectStore {
        puts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ObjectStoreClient for RecordingObjectStore {
        async fn put_bytes(&self, _bucket: &str, key: &str, _bytes: Vec<u8>) -> Result<(), ObjectStoreError> {
            self.puts.lock().unwrap().push(key.to_string());
            Ok(())
        }
        async fn get_bytes(&self, _: &str, _: &str) -> Result<Vec<u8>, ObjectStoreError> {
            Ok(Vec::new())
        }
        async fn ensure_bucket(&self, _: &str) -> Result<(), ObjectStoreError> {
            Ok(())
        }
    }

    fn sample_task() -> Task {
        let config = DatasourceConfig {
            id: "ds-1".to_string(),
            state: crate::models::ConfigState::Dispatched,
            priority: 5,
            social_index_url: String::new(),
            need_headers: false,
            request_params: RequestParams {
                api_url: "https://example.test/api?page={0}".to_string(),
                headers: HashMap::new(),
                cookies: HashMap::new(),
                postdata: HashMap::new(),
                additional: AdditionalParams::default(),
            },
            pagination: [1, 1],
            parse_rule: ParseRule {
                list_page: ListPageRule {
                    list_data: "result.list".to_string(),
                    url_rule: UrlRule {
                        url_path: "https://example.test/detail".to_string(),
                        params: [("code".to_string(), "code".to_string())].into(),
                        postdata: HashMap::new(),
                    },
                },
            },
            schedule: Default::default(),
            distributed_at: None,
            insert_time: None,
            update_time: None,
            round: 0,
        };
        Task::from_config(config, Utc::now())
    }

    #[test]
    fn missing_page_token_is_no_page_variable() {
        let mut task = sample_task();
        task.config.request_params.api_url = "https://example.test/api".to_string();
        let err = locate_page_field(&task.config.request_params).unwrap_err();
        assert!(matches!(err, SpiderError::NoPageVariable));
    }

    #[test]
    fn page_token_found_in_postdata() {
        let mut task = sample_task();
        task.config.request_params.api_url = "https://example.test/api".to_string();
        task.config
            .request_params
            .postdata
            .insert("page".to_string(), "{0}".to_string());
        let field = locate_page_field(&task.config.request_params).unwrap();
        assert_eq!(field, PageField::Postdata("page".to_string()));
    }

    #[tokio::test]
    async fn scenario_s1_stops_on_duplicate_body() {
        let task = sample_task();
        let body = br#"{"result":{"list":[{"code":"I1"}]}}"#.to_vec();
        let fetcher = ScriptedFetcher {
            responses: Mutex::new(vec![(200, body.clone()), (200, body.clone())]),
            requests: Mutex::new(Vec::new()),
        };
        let store = RecordingStore { inserted: Mutex::new(Vec::new()) };
        let objects = RecordingObjectStore { puts: Mutex::new(Vec::new()) };

        run(&task, &fetcher, &store, &objects, Duration::ZERO).await.unwrap();

        // First page stored, second page duplicate -> stop before a third request.
        assert_eq!(fetcher.requests.lock().unwrap().len(), 2);
        assert_eq!(store.inserted.lock().unwrap().len(), 1);
        assert_eq!(objects.puts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn scenario_s2_continues_across_new_pages() {
        let task = sample_task();
        let body1 = br#"{"result":{"list":[{"code":"I1"}]}}"#.to_vec();
        let body2 = br#"{"result":{"list":[{"code":"I2"}]}}"#.to_vec();
        let fetcher = ScriptedFetcher {
            responses: Mutex::new(vec![(200, body1), (200, body2)]),
            requests: Mutex::new(Vec::new()),
        };
        let store = RecordingStore { inserted: Mutex::new(Vec::new()) };
        let objects = RecordingObjectStore { puts: Mutex::new(Vec::new()) };

        // Third fetch errors (no scripted response left), ending the run with an error rather
        // than an infinite loop, which is expected since no STOP condition ever fired.
        let result = run(&task, &fetcher, &store, &objects, Duration::ZERO).await;
        assert!(result.is_err());
        assert_eq!(store.inserted.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn scenario_s3_stops_on_consecutive_failures() {
        let task = sample_task();
        let fetcher = ScriptedFetcher {
            responses: Mutex::new(vec![(500, Vec::new()), (500, Vec::new())]),
            requests: Mutex::new(Vec::new()),
        };
        let store = RecordingStore { inserted: Mutex::new(Vec::new()) };
        let objects = RecordingObjectStore { puts: Mutex::new(Vec::new()) };

        run(&task, &fetcher, &store, &objects, Duration::ZERO).await.unwrap();

        // last_fail starts at -1; page 1 fails (-1 + 1 != 1, not consecutive), page 2 fails
        // (1 + 1 == 2, consecutive) -> stop after exactly two fetches.
        assert_eq!(fetcher.requests.lock().unwrap().len(), 2);
        assert!(store.inserted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn scenario_s4_first_failure_never_satisfies_consecutive_check() {
        let mut task = sample_task();
        task.config.pagination = [1, 1];
        let fetcher = ScriptedFetcher {
            responses: Mutex::new(vec![(500, Vec::new())]),
            requests: Mutex::new(Vec::new()),
        };
        let store = RecordingStore { inserted: Mutex::new(Vec::new()) };
        let objects = RecordingObjectStore { puts: Mutex::new(Vec::new()) };

        // Only one scripted response; if the first failure were (incorrectly) treated as
        // consecutive, the loop would stop after exactly one fetch. It should instead advance
        // and attempt a second fetch, which errors because no response is left.
        let result = run(&task, &fetcher, &store, &objects, Duration::ZERO).await;
        assert!(result.is_err());
        assert_eq!(fetcher.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn stops_when_every_extracted_url_was_already_seen() {
        let task = sample_task();
        // Same item ("code":"I1") on both pages, but the surrounding body differs so the
        // duplicate-body check (which would otherwise fire first) does not short-circuit this.
        let body1 = br#"{"result":{"list":[{"code":"I1"}]}}"#.to_vec();
        let body2 = br#"{"result":{"list":[{"code":"I1"}],"page":2}}"#.to_vec();
        let fetcher = ScriptedFetcher {
            responses: Mutex::new(vec![(200, body1), (200, body2)]),
            requests: Mutex::new(Vec::new()),
        };
        let store = RecordingStore { inserted: Mutex::new(Vec::new()) };
        let objects = RecordingObjectStore { puts: Mutex::new(Vec::new()) };

        run(&task, &fetcher, &store, &objects, Duration::ZERO).await.unwrap();

        // Both pages are stored (persistence happens before the duplicate-URL check), then the
        // loop stops instead of issuing a third request.
        assert_eq!(fetcher.requests.lock().unwrap().len(), 2);
        assert_eq!(store.inserted.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn index_api_url_override_used_for_first_page_only() {
        let mut task = sample_task();
        task.config.request_params.additional = AdditionalParams {
            index_api_url: "https://example.test/index".to_string(),
            index_postdata: HashMap::new(),
        };
        let body = br#"{"result":{"list":[]}}"#.to_vec();
        let fetcher = ScriptedFetcher {
            responses: Mutex::new(vec![(200, body.clone()), (200, body)]),
            requests: Mutex::new(Vec::new()),
        };
        let store = RecordingStore { inserted: Mutex::new(Vec::new()) };
        let objects = RecordingObjectStore { puts: Mutex::new(Vec::new()) };

        run(&task, &fetcher, &store, &objects, Duration::ZERO).await.unwrap();

        let requests = fetcher.requests.lock().unwrap();
        assert_eq!(requests[0], "https://example.test/index");
        assert_eq!(requests[1], "https://example.test/api?page=2");
    }
}
