use crate::dispatch::{DispatchError, Dispatcher, Reply as ActionReply};
use crate::tracker::ActionRequest;
use crate::vision::{ImageProductSearch, ImageQuery};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{info_span, Instrument};
use warp::filters::BoxedFilter;
use futures::{Stream, StreamExt};
use warp::hyper::body::{Buf, Bytes};
use warp::reply::Response;
use warp::{hyper::StatusCode, Filter, Rejection, Reply};

/// 识图上传的大小上限，分块上传（无 Content-Length）同样适用
const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

pub fn routes(
    dispatcher: Arc<Dispatcher>,
    vision: Option<Arc<ImageProductSearch>>,
) -> BoxedFilter<(Response,)> {
    // POST /webhook
    let webhook = warp::path("webhook")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(with_state(dispatcher.clone()))
        .and_then(handle_webhook);

    // GET /health
    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| warp::reply::json(&json!({ "status": "ok" })).into_response());

    // GET /actions
    let actions = warp::path("actions")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(dispatcher))
        .map(|dispatcher: Arc<Dispatcher>| {
            let names: Vec<Value> = dispatcher
                .action_names()
                .into_iter()
                .map(|name| json!({ "name": name }))
                .collect();
            warp::reply::json(&names).into_response()
        });

    let routes = webhook.or(health).unify().or(actions).unify().boxed();

    match vision {
        // POST /vision/product-name
        Some(search) => {
            let vision_route = warp::path("vision")
                .and(warp::path("product-name"))
                .and(warp::path::end())
                .and(warp::post())
                .and(warp::query::<VisionParams>())
                .and(warp::body::stream())
                .and(with_state(search))
                .and_then(handle_vision);
            routes.or(vision_route).unify().boxed()
        }
        None => routes,
    }
}

fn with_state<T: Clone + Send + Sync + 'static>(state: T) -> impl Filter<Extract = (T,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

async fn handle_webhook(
    request: ActionRequest,
    dispatcher: Arc<Dispatcher>,
) -> Result<Response, Rejection> {
    let span = info_span!(
        "action",
        action = %request.next_action,
        sender = %request.sender()
    );
    let result = dispatcher
        .run(&request.next_action, &request.tracker)
        .instrument(span)
        .await;
    Ok(WebhookReply::from(result).into_response())
}

#[derive(Deserialize)]
struct VisionParams {
    filename: Option<String>,
    url: Option<String>,
}

async fn handle_vision(
    params: VisionParams,
    body: impl Stream<Item = Result<impl Buf, warp::Error>>,
    search: Arc<ImageProductSearch>,
) -> Result<Response, Rejection> {
    let bytes = match read_capped(body, MAX_IMAGE_BYTES).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            return Ok(error_reply(
                format!("image larger than {} bytes", MAX_IMAGE_BYTES),
                StatusCode::PAYLOAD_TOO_LARGE,
            ))
        }
        Err(e) => return Ok(error_reply(e.to_string(), StatusCode::BAD_REQUEST)),
    };

    let upload = Some((bytes, params.filename));
    let query = match ImageQuery::from_parts(upload, params.url) {
        Ok(query) => query,
        Err(e) => return Ok(error_reply(e.to_string(), StatusCode::BAD_REQUEST)),
    };
    let product = search.extract_product_name(query).await;
    Ok(warp::reply::json(&json!({ "product": product })).into_response())
}

/// 读取请求体，超过 cap 字节时返回 None
async fn read_capped(
    body: impl Stream<Item = Result<impl Buf, warp::Error>>,
    cap: usize,
) -> Result<Option<Vec<u8>>, warp::Error> {
    futures::pin_mut!(body);
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        let mut chunk = chunk?;
        if bytes.len() + chunk.remaining() > cap {
            return Ok(None);
        }
        while chunk.has_remaining() {
            let part = chunk.chunk();
            let n = part.len();
            bytes.extend_from_slice(part);
            chunk.advance(n);
        }
    }
    Ok(Some(bytes))
}

fn error_reply(error: String, status: StatusCode) -> Response {
    warp::reply::with_status(warp::reply::json(&json!({ "error": error })), status).into_response()
}

/// 对话框架的消息格式，json 回复放在 custom 里
#[derive(Debug, Serialize)]
struct BotMessage {
    text: Option<String>,
    buttons: Vec<Value>,
    elements: Vec<Value>,
    custom: Value,
    template: Option<String>,
    response: Option<String>,
    image: Option<String>,
    attachment: Option<Value>,
}

impl From<ActionReply> for BotMessage {
    fn from(reply: ActionReply) -> Self {
        let (text, custom) = match reply {
            ActionReply::Json(payload) => (None, payload),
            ActionReply::Text(text) => (Some(text), Value::Object(Map::new())),
        };
        BotMessage {
            text,
            buttons: Vec::new(),
            elements: Vec::new(),
            custom,
            template: None,
            response: None,
            image: None,
            attachment: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ActionResponse {
    events: Vec<Value>,
    responses: Vec<BotMessage>,
}

#[derive(Debug, Serialize)]
struct ActionFailure {
    error: String,
    action_name: String,
}

enum WebhookReply {
    Done(ActionResponse),
    NotFound(ActionFailure),
}

impl From<Result<ActionReply, DispatchError>> for WebhookReply {
    fn from(result: Result<ActionReply, DispatchError>) -> Self {
        match result {
            Ok(reply) => WebhookReply::Done(ActionResponse {
                events: Vec::new(),
                responses: vec![reply.into()],
            }),
            Err(e) => {
                let error = e.to_string();
                match e {
                    DispatchError::UnknownAction(action_name) => {
                        WebhookReply::NotFound(ActionFailure { error, action_name })
                    }
                }
            }
        }
    }
}

impl Reply for WebhookReply {
    fn into_response(self) -> Response {
        match self {
            WebhookReply::Done(body) => {
                warp::reply::with_status(warp::reply::json(&body), StatusCode::OK).into_response()
            }
            WebhookReply::NotFound(body) => {
                warp::reply::with_status(warp::reply::json(&body), StatusCode::NOT_FOUND)
                    .into_response()
            }
        }
    }
}
