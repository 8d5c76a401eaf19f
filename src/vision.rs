//! 识图接口封装：上传图片（或图片地址），从返回结果中猜出一个商品名

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// 超过这个长度的候选名基本是无意义的描述
pub const MAX_NAME_CHARS: usize = 120;

const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const DEFAULT_FILENAME: &str = "upload.jpg";

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("Provide either image bytes or an image url")]
    MissingImage,

    #[error("cannot build http client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageQuery {
    Upload {
        bytes: Vec<u8>,
        filename: Option<String>,
    },
    Url(String),
}

impl ImageQuery {
    /// 两者都给出时优先上传图片；空内容视为未提供
    pub fn from_parts(
        upload: Option<(Vec<u8>, Option<String>)>,
        url: Option<String>,
    ) -> Result<Self, VisionError> {
        match (upload, url) {
            (Some((bytes, filename)), _) if !bytes.is_empty() => {
                Ok(ImageQuery::Upload { bytes, filename })
            }
            (_, Some(url)) if !url.trim().is_empty() => Ok(ImageQuery::Url(url)),
            _ => Err(VisionError::MissingImage),
        }
    }

    fn into_form(self) -> Option<Form> {
        match self {
            ImageQuery::Upload { bytes, filename } => {
                let part = Part::bytes(bytes)
                    .file_name(filename.unwrap_or_else(|| DEFAULT_FILENAME.to_string()))
                    .mime_str("application/octet-stream");
                match part {
                    Ok(part) => Some(Form::new().part("image", part)),
                    Err(e) => {
                        warn!(error = %e, "cannot build image part");
                        None
                    }
                }
            }
            ImageQuery::Url(url) => {
                let request = json!({ "imageInfo": { "url": url } });
                Some(Form::new().text("knowledgeRequest", request.to_string()))
            }
        }
    }
}

pub struct ImageProductSearch {
    http: Client,
    endpoint: String,
    subscription_key: String,
    market: String,
}

impl ImageProductSearch {
    pub fn new(
        endpoint: &str,
        subscription_key: &str,
        market: &str,
        timeout: Duration,
    ) -> Result<Self, VisionError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            subscription_key: subscription_key.to_string(),
            market: market.to_string(),
        })
    }

    /// 返回一个商品名；请求失败或没有合适的候选都返回 None
    pub async fn extract_product_name(&self, query: ImageQuery) -> Option<String> {
        let form = query.into_form()?;
        let response = self
            .http
            .post(&self.endpoint)
            .header(KEY_HEADER, &self.subscription_key)
            .query(&[("mkt", self.market.as_str())])
            .multipart(form)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "visual search request failed");
                return None;
            }
        };

        let payload: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "visual search returned a non-json body");
                return None;
            }
        };

        best_product_name(&payload)
    }
}

/// 先找商品类 action，找不到再用标签名
pub fn best_product_name(payload: &Value) -> Option<String> {
    parse_product_name(payload).or_else(|| parse_tag_name(payload))
}

fn tags(payload: &Value) -> &[Value] {
    match payload.get("tags") {
        Some(Value::Array(tags)) => tags.as_slice(),
        None | Some(Value::Null) => &[],
        Some(other) => {
            debug!(kind = kind(other), "tags is not an array");
            &[]
        }
    }
}

fn actions(tag: &Value) -> &[Value] {
    match tag.get("actions") {
        Some(Value::Array(actions)) => actions.as_slice(),
        None | Some(Value::Null) => &[],
        Some(other) => {
            debug!(kind = kind(other), "actions is not an array");
            &[]
        }
    }
}

fn values(action: &Value) -> &[Value] {
    match action.get("data").and_then(|d| d.get("value")) {
        Some(Value::Array(values)) => values.as_slice(),
        None | Some(Value::Null) => &[],
        Some(other) => {
            debug!(kind = kind(other), "data.value is not an array");
            &[]
        }
    }
}

fn action_type(action: &Value) -> &str {
    action
        .get("actionType")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// 非空字符串且不超过长度上限
fn plausible(candidate: Option<&Value>) -> Option<String> {
    match candidate {
        Some(Value::String(s)) if !s.is_empty() && s.chars().count() <= MAX_NAME_CHARS => {
            Some(s.clone())
        }
        _ => None,
    }
}

fn truthy(v: &Value) -> bool {
    !crate::dispatch::is_empty_payload(v)
}

pub fn parse_product_name(payload: &Value) -> Option<String> {
    for tag in tags(payload) {
        for act in actions(tag) {
            let t = action_type(act);
            if !(t.contains("Product") || t.contains("Shopping") || t.contains("VisualSearch")) {
                continue;
            }
            for v in values(act) {
                // name 为空时才看 displayName
                let candidate = v
                    .get("name")
                    .filter(|n| truthy(n))
                    .or_else(|| v.get("displayName"));
                if let Some(name) = plausible(candidate) {
                    return Some(name);
                }
            }
        }
    }
    None
}

pub fn parse_tag_name(payload: &Value) -> Option<String> {
    for tag in tags(payload) {
        if let Some(name) = plausible(tag.get("displayName")) {
            return Some(name);
        }
        for act in actions(tag) {
            if !matches!(action_type(act), "ImageTags" | "VisualSearch") {
                continue;
            }
            for v in values(act) {
                if let Some(name) = plausible(v.get("displayName")) {
                    return Some(name);
                }
            }
        }
    }
    None
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const PATH: &str = "/v7.0/images/visualsearch";

    fn search(server: &mockito::ServerGuard) -> ImageProductSearch {
        ImageProductSearch::new(
            &format!("{}{}/", server.url(), PATH),
            "secret",
            "en-US",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn upload() -> ImageQuery {
        ImageQuery::from_parts(Some((b"fake-jpeg".to_vec(), Some("shoe.jpg".into()))), None)
            .unwrap()
    }

    #[test]
    fn product_action_beats_tag_names() {
        let payload = json!({
            "tags": [
                { "displayName": "Red Sneakers", "actions": [] },
                { "actions": [
                    { "actionType": "ProductVisualSearch",
                      "data": { "value": [ { "name": "Air Max 90" }, { "name": "Air Max 95" } ] } }
                ] }
            ]
        });
        assert_eq!(best_product_name(&payload).as_deref(), Some("Air Max 90"));
    }

    #[test]
    fn tag_display_name_when_no_product_action() {
        let payload = json!({ "tags": [ { "displayName": "Red Sneakers" } ] });
        assert_eq!(parse_product_name(&payload), None);
        assert_eq!(best_product_name(&payload).as_deref(), Some("Red Sneakers"));
    }

    #[test]
    fn overlong_candidates_are_skipped() {
        let long = "x".repeat(130);
        let payload = json!({
            "tags": [ { "actions": [
                { "actionType": "ShoppingSources",
                  "data": { "value": [ { "name": long }, { "displayName": "Court Vision" } ] } }
            ] } ]
        });
        assert_eq!(best_product_name(&payload).as_deref(), Some("Court Vision"));

        let payload = json!({ "tags": [ { "displayName": "y".repeat(130) } ] });
        assert_eq!(best_product_name(&payload), None);
    }

    #[test]
    fn image_tags_action_is_the_last_resort() {
        let payload = json!({
            "tags": [ { "displayName": "", "actions": [
                { "actionType": "PagesIncluding", "data": { "value": [ { "displayName": "ignored" } ] } },
                { "actionType": "ImageTags", "data": { "value": [ { "displayName": "Sneaker" } ] } }
            ] } ]
        });
        assert_eq!(best_product_name(&payload).as_deref(), Some("Sneaker"));
    }

    #[test]
    fn odd_shapes_mean_no_match() {
        assert_eq!(best_product_name(&json!({ "tags": "nope" })), None);
        assert_eq!(best_product_name(&json!({ "tags": [ { "actions": 3 } ] })), None);
        assert_eq!(
            best_product_name(&json!({ "tags": [ { "actions": [
                { "actionType": "ProductVisualSearch", "data": { "value": { "name": "x" } } }
            ] } ] })),
            None
        );
        assert_eq!(best_product_name(&json!([])), None);
    }

    #[test]
    fn missing_input_is_rejected() {
        assert!(matches!(
            ImageQuery::from_parts(None, None),
            Err(VisionError::MissingImage)
        ));
        assert!(matches!(
            ImageQuery::from_parts(Some((Vec::new(), None)), Some("  ".into())),
            Err(VisionError::MissingImage)
        ));
        assert_eq!(
            ImageQuery::from_parts(None, Some("https://img.example/shoe.jpg".into())).unwrap(),
            ImageQuery::Url("https://img.example/shoe.jpg".into())
        );
    }

    #[tokio::test]
    async fn upload_sends_key_market_and_image() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", PATH)
            .match_query(Matcher::UrlEncoded("mkt".into(), "en-US".into()))
            .match_header(KEY_HEADER, "secret")
            .match_body(Matcher::Regex(r#"name="image"; filename="shoe.jpg""#.into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({ "tags": [ { "actions": [
                    { "actionType": "ProductVisualSearch",
                      "data": { "value": [ { "name": "Air Max 90" } ] } }
                ] } ] })
                .to_string(),
            )
            .create_async()
            .await;

        let name = search(&server).extract_product_name(upload()).await;
        assert_eq!(name.as_deref(), Some("Air Max 90"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn url_mode_sends_knowledge_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", PATH)
            .match_query(Matcher::Any)
            .match_body(Matcher::Regex(r#"name="knowledgeRequest""#.into()))
            .with_status(200)
            .with_body(r#"{"tags":[{"displayName":"Red Sneakers"}]}"#)
            .create_async()
            .await;

        let query = ImageQuery::Url("https://img.example/shoe.jpg".into());
        let name = search(&server).extract_product_name(query).await;
        assert_eq!(name.as_deref(), Some("Red Sneakers"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_json_body_is_absence() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("definitely not json")
            .create_async()
            .await;

        assert_eq!(search(&server).extract_product_name(upload()).await, None);
    }

    #[tokio::test]
    async fn error_status_is_absence() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", PATH)
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body(r#"{"tags":[{"displayName":"Red Sneakers"}]}"#)
            .create_async()
            .await;

        assert_eq!(search(&server).extract_product_name(upload()).await, None);
    }
}
