//! Extractor (spec §4.7 "Extraction"): pluggable response-to-URL-list extractor.
//! `JsonPathExtractor` is the only concrete strategy the spec names.

use serde_json::Value;

use crate::error::SpiderError;
use crate::models::UrlRule;

/// Walks `data` along `path` (dot-separated object keys). Fails with `BAD_SCHEMA` if a
/// segment is missing, mirroring the original `list_items = list_items.get(p)` walk but
/// making the missing-segment case an explicit error instead of silently producing `null`.
pub fn extract_path<'a>(data: &'a Value, path: &str) -> Result<&'a Value, SpiderError> {
    let mut current = data;
    for segment in path.split('.') {
        current = current
            .get(segment)
            .ok_or_else(|| SpiderError::BadSchema(path.to_string()))?;
    }
    Ok(current)
}

/// Extracts the list of items at `list_data` and, for each item, builds the derived detail
/// URL per `url_rule`, writing it back into the item as `item.url` (spec §4.7).
pub fn extract_items(body: &Value, list_data: &str, url_rule: &UrlRule) -> Result<Vec<Value>, SpiderError> {
    let items = extract_path(body, list_data)?;
    let items = items
        .as_array()
        .ok_or_else(|| SpiderError::BadSchema(format!("{list_data} is not an array")))?;

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let mut item = item.clone();
        let url = build_url(&item, url_rule);
        if let Value::Object(map) = &mut item {
            map.insert("url".to_string(), Value::String(url));
        }
        out.push(item);
    }
    Ok(out)
}

fn build_url(item: &Value, url_rule: &UrlRule) -> String {
    if url_rule.postdata.is_empty() {
        let mut url = url_rule.url_path.clone();
        url.push('?');
        let mut pairs = Vec::new();
        for (item_key, url_key) in &url_rule.params {
            let value = item_value_as_str(item, item_key);
            pairs.push(format!(
                "{}={}",
                url_key,
                urlencoding::encode(&value)
            ));
        }
        url.push_str(&pairs.join("&"));
        url
    } else {
        url_rule.url_path.clone()
    }
}

/// Builds the POST body for items whose `url_rule.postdata` is non-empty.
pub fn build_postdata(item: &Value, url_rule: &UrlRule) -> std::collections::HashMap<String, String> {
    url_rule
        .postdata
        .iter()
        .map(|(item_key, body_key)| (body_key.clone(), item_value_as_str(item, item_key)))
        .collect()
}

fn item_value_as_str(item: &Value, key: &str) -> String {
    match item.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_urls_with_get_rule() {
        // Scenario S4.
        let body = json!({"result": {"list": [{"code": "I1"}, {"code": "I2"}]}});
        let url_rule = UrlRule {
            url_path: "https://y/d".to_string(),
            params: [("code".to_string(), "code".to_string())].into(),
            postdata: Default::default(),
        };

        let items = extract_items(&body, "result.list", &url_rule).unwrap();

        assert_eq!(items[0]["url"], "https://y/d?code=I1");
        assert_eq!(items[1]["url"], "https://y/d?code=I2");
    }

    #[test]
    fn missing_path_segment_is_bad_schema() {
        let body = json!({"result": {}});
        let url_rule = UrlRule::default();
        let err = extract_items(&body, "result.list", &url_rule).unwrap_err();
        assert!(matches!(err, SpiderError::BadSchema(_)));
    }

    #[test]
    fn postdata_rule_uses_fixed_url_path() {
        let body = json!({"items": [{"id": "42"}]});
        let url_rule = UrlRule {
            url_path: "https://y/detail".to_string(),
            params: Default::default(),
            postdata: [("id".to_string(), "item_id".to_string())].into(),
        };

        let items = extract_items(&body, "items", &url_rule).unwrap();
        assert_eq!(items[0]["url"], "https://y/detail");

        let posted = build_postdata(&items[0], &url_rule);
        assert_eq!(posted.get("item_id"), Some(&"42".to_string()));
    }
}
