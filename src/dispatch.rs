use crate::config::{ActionConfig, BackendConfig};
use crate::tracker::Tracker;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("No registered action found for name '{0}'.")]
    UnknownAction(String),
}

/// 创建 Dispatcher 时的错误
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid backend url: {0}")]
    BaseUrl(#[from] url::ParseError),

    #[error("cannot build http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// 每次动作调用产生且只产生一条回复
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// 结构化数据消息
    Json(Value),
    /// 纯文本消息
    Text(String),
}

/// 查询失败的原因，只用于日志，对用户统一回复 fallback
#[derive(Debug, thiserror::Error)]
enum LookupError {
    #[error("backend answered {0}")]
    NotFound(StatusCode),

    #[error("backend unavailable: {0}")]
    Unavailable(#[source] reqwest::Error),

    #[error("malformed body: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("cannot build url: {0}")]
    Url(String),
}

pub struct Dispatcher {
    http: Client,
    base_url: Url,
    actions: HashMap<String, ActionConfig>,
}

impl Dispatcher {
    pub fn new(backend: &BackendConfig, actions: Vec<ActionConfig>) -> Result<Self, BuildError> {
        let mut builder = Client::builder();
        if let Some(timeout) = backend.timeout() {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;

        // join 需要以 / 结尾，否则会丢掉最后一段路径
        let mut base = backend.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;

        let actions = actions
            .into_iter()
            .map(|a| (a.name.clone(), a))
            .collect();
        Ok(Self {
            http,
            base_url,
            actions,
        })
    }

    pub fn action_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// 执行一个动作：读取实体、请求后端、生成回复
    pub async fn run(&self, name: &str, tracker: &Tracker) -> Result<Reply, DispatchError> {
        let action = self
            .actions
            .get(name)
            .ok_or_else(|| DispatchError::UnknownAction(name.to_string()))?;

        let mut params = HashMap::new();
        for entity in &action.required_entities {
            // 只有点的值会被当成 . / .. 路径段解析，按缺失处理
            match tracker
                .latest_entity_value(entity)
                .filter(|value| !is_dot_segment(value))
            {
                Some(value) => {
                    params.insert(entity.clone(), encode(&value));
                }
                None => {
                    info!(action = %action.name, %entity, "required entity missing");
                    return Ok(Reply::Text(action.prompt_text().to_string()));
                }
            }
        }

        let payload = match self.lookup(action, &params).await {
            Ok(payload) => payload,
            Err(e @ LookupError::NotFound(_)) => {
                info!(action = %action.name, error = %e, "nothing found");
                None
            }
            Err(e) => {
                warn!(action = %action.name, error = %e, "backend lookup failed");
                None
            }
        };

        Ok(match payload {
            Some(payload) => Reply::Json(payload),
            None => Reply::Text(action.fallback.clone()),
        })
    }

    async fn lookup(
        &self,
        action: &ActionConfig,
        params: &HashMap<String, String>,
    ) -> Result<Option<Value>, LookupError> {
        let url = self.endpoint_url(action, params)?;
        debug!(action = %action.name, %url, "querying backend");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(LookupError::Unavailable)?;
        if response.status() != StatusCode::OK {
            return Err(LookupError::NotFound(response.status()));
        }
        let body = response.text().await.map_err(LookupError::Unavailable)?;
        let parsed: Value = serde_json::from_str(&body).map_err(LookupError::Malformed)?;

        let payload = select(parsed, action.select.as_deref());
        if is_empty_payload(&payload) {
            info!(action = %action.name, "backend returned an empty payload");
            return Ok(None);
        }
        Ok(Some(payload))
    }

    fn endpoint_url(
        &self,
        action: &ActionConfig,
        params: &HashMap<String, String>,
    ) -> Result<Url, LookupError> {
        let path = strfmt::strfmt(&action.endpoint, params)
            .map_err(|e| LookupError::Url(format!("{}: {}", action.endpoint, e)))?;
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| LookupError::Url(format!("{}: {}", path, e)))
    }
}

fn is_dot_segment(value: &str) -> bool {
    value.chars().all(|c| c == '.')
}

/// 实体值可能出现在路径或查询参数里，统一编码，空格编码为 %20
fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

fn select(payload: Value, path: Option<&str>) -> Value {
    let Some(path) = path else {
        return payload;
    };
    let selected = jsonpath::select(&payload, path);
    match selected {
        Ok(mut found) => match found.len() {
            0 => Value::Null,
            1 => found.remove(0).clone(),
            _ => Value::Array(found.into_iter().cloned().collect()),
        },
        Err(e) => {
            warn!(%path, error = ?e, "json path select failed");
            Value::Null
        }
    }
}

pub fn is_empty_payload(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}
