//! Test doubles shared by the unit tests

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::transport::{HttpClient, HttpRequest, HttpResponse, Method};
use crate::types::error::{EasError, Result};
use crate::wbxml::{decode, encode, Element};

type Handler = Box<dyn Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync>;

/// [`HttpClient`] answering from routes, a queue, or a handler, in that order.
///
/// Every request is recorded. Requests nothing answers fail with a network
/// error, like an unreachable host.
#[derive(Default)]
pub struct ScriptedHttp {
    routes: Mutex<Vec<(Method, String, HttpResponse)>>,
    queue: Mutex<VecDeque<Result<HttpResponse>>>,
    handler: Mutex<Option<Handler>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every `method` request whose URL starts with `prefix`
    pub fn on(&self, method: Method, prefix: &str, response: HttpResponse) {
        self.routes
            .lock()
            .unwrap()
            .push((method, prefix.to_string(), response));
    }

    /// Queue one answer
    pub fn push(&self, response: Result<HttpResponse>) {
        self.queue.lock().unwrap().push_back(response);
    }

    pub fn push_wbxml(&self, tree: &Element) {
        self.push(Ok(wbxml_response(tree)));
    }

    pub fn with_handler(
        self,
        handler: impl Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync + 'static,
    ) -> Self {
        *self.handler.lock().unwrap() = Some(Box::new(handler));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Values of the `Cmd` query parameter, in request order
    pub fn commands(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|request| {
                url::Url::parse(&request.url).ok().and_then(|url| {
                    url.query_pairs()
                        .find(|(key, _)| key == "Cmd")
                        .map(|(_, value)| value.into_owned())
                })
            })
            .collect()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttp {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());

        let routed = self
            .routes
            .lock()
            .unwrap()
            .iter()
            .find(|(method, prefix, _)| {
                *method == request.method && request.url.starts_with(prefix)
            })
            .map(|(_, _, response)| response.clone());
        if let Some(response) = routed {
            return Ok(response);
        }

        if let Some(response) = self.queue.lock().unwrap().pop_front() {
            return response;
        }

        if let Some(handler) = self.handler.lock().unwrap().as_ref() {
            return handler(&request);
        }

        Err(EasError::Network(format!("{} unreachable", request.url)))
    }
}

/// 200 response carrying `tree` as WBXML
pub fn wbxml_response(tree: &Element) -> HttpResponse {
    HttpResponse::new(200)
        .with_header("Content-Type", "application/vnd.ms-sync.wbxml")
        .with_body(encode(tree).unwrap())
}

/// Fake ActiveSync server.
///
/// OPTIONS advertises `versions` and the commands the engine uses; POST bodies
/// are decoded and handed to `respond` together with the command name.
pub fn eas_server(
    versions: &'static str,
    respond: impl Fn(&str, &Element) -> Result<HttpResponse> + Send + Sync + 'static,
) -> ScriptedHttp {
    ScriptedHttp::new().with_handler(move |request| {
        if request.method == Method::Options {
            return Ok(HttpResponse::new(200)
                .with_header("MS-ASProtocolVersions", versions)
                .with_header(
                    "MS-ASProtocolCommands",
                    "Sync,FolderSync,Provision,GetItemEstimate,ItemOperations",
                ));
        }
        let tree = decode(&request.body)
            .map_err(EasError::from)?
            .ok_or_else(|| EasError::MalformedPayload("empty request".to_string()))?;
        respond(&tree.name, &tree)
    })
}
