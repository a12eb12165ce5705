use std::sync::PoisonError;

use futures_util::Stream;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION},
    Client, Method, Response,
};
use reqwest_eventsource::EventSource;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::{
    assistants::stream::{frames_from_event_source, SseFrame},
    ApiResponseOrError, Credentials, Error, OpenAiError, Result, DEFAULT_CREDENTIALS,
};

#[derive(Clone)]
pub struct OpenAiClient {
    credentials: Credentials,
    client: Client,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.credentials.base_url())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiErrorWrapper {
    error: OpenAiError,
}

/// The error carried by the body of a failed response. A body that is not
/// an API error becomes the message of one typed `unknown`.
pub(crate) fn api_error(body: String) -> Error {
    match serde_json::from_str::<OpenAiErrorWrapper>(&body) {
        Ok(wrapper) => Error::Api(wrapper.error),
        Err(_) => Error::Api(OpenAiError::new(body, "unknown".to_owned())),
    }
}

/// Response of a delete call.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Deleted {
    pub id: String,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct List<T> {
    pub first_id: Option<String>,
    pub last_id: Option<String>,
    pub data: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
}

/// A request body with `stream: true` added.
#[derive(Serialize)]
struct Streaming<S> {
    #[serde(flatten)]
    request: S,
    stream: bool,
}

const BETA_VERSION: &str = "assistants=v2";

impl OpenAiClient {
    /// Builds a client from the process-wide credentials.
    pub fn from_default() -> Result<Self> {
        let credentials = DEFAULT_CREDENTIALS
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Self::new(credentials)
    }

    pub fn new(credentials: Credentials) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", credentials.api_key()))?,
        );
        headers.insert(HeaderName::from_static("openai-beta"), HeaderValue::from_static(BETA_VERSION));

        let client = Client::builder().default_headers(headers).build()?;

        Ok(Self {
            credentials,
            client,
        })
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    fn url(&self, route: impl Into<String>) -> String {
        format!("{}{}", self.credentials.base_url(), route.into())
    }

    async fn request_inner<S, R>(&self, method: Method, route: R, body: Option<S>) -> Result<Response, reqwest::Error>
    where
        R: Into<String>,
        S: Serialize,
    {
        let url = self.url(route);
        debug!("OpenAI Request[{method}] {url}");

        let mut request = self.client.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;

        debug!("OpenAI Response[{method}] {} {url}", response.status().as_str());
        Ok(response)
    }

    pub async fn request<S, R, T>(&self, method: Method, route: R, body: Option<S>) -> ApiResponseOrError<T>
    where
        R: Into<String>,
        S: Serialize,
        T: DeserializeOwned,
    {
        let response = self.request_inner(method, route, body).await?;
        if response.status().is_success() {
            return Ok(response.json::<T>().await?);
        }

        Err(api_error(response.text().await?))
    }

    pub async fn get<R, T>(&self, route: R) -> ApiResponseOrError<T>
    where
        R: Into<String>,
        T: DeserializeOwned,
    {
        self.request::<(), R, T>(Method::GET, route, None).await
    }

    pub async fn post<S, R, T>(&self, route: R, body: S) -> ApiResponseOrError<T>
    where
        R: Into<String>,
        S: Serialize,
        T: DeserializeOwned,
    {
        self.request(Method::POST, route, Some(body)).await
    }

    pub async fn delete<R>(&self, route: R) -> ApiResponseOrError<Deleted>
    where
        R: Into<String>,
    {
        self.request::<(), R, Deleted>(Method::DELETE, route, None)
            .await
    }

    /// Collects every page of a list endpoint, oldest first.
    pub async fn list<R, T>(&self, route: R, after: Option<String>) -> ApiResponseOrError<Vec<T>>
    where
        R: Into<String>,
        T: DeserializeOwned,
    {
        let base = route.into();
        let mut after = after;
        let mut data = Vec::new();

        loop {
            let route = match &after {
                Some(after) => format!("{base}?order=asc&after={after}"),
                None => format!("{base}?order=asc"),
            };
            let page: List<T> = self.get(route).await?;
            data.extend(page.data);

            match page.last_id {
                Some(last_id) if page.has_more => after = Some(last_id),
                _ => break,
            }
        }

        Ok(data)
    }

    /// POSTs `body` with `stream: true` and returns the response's frames.
    pub fn stream<S, R>(&self, route: R, body: S) -> Result<impl Stream<Item = Result<SseFrame>>>
    where
        R: Into<String>,
        S: Serialize,
    {
        let url = self.url(route);
        debug!("OpenAI Stream[POST] {url}");

        let request = self
            .client
            .post(&url)
            .json(&Streaming {
                request: body,
                stream: true,
            });
        let source = EventSource::new(request)?;
        Ok(frames_from_event_source(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn streaming_body_is_flattened() {
        let body = Streaming {
            request: json!({"assistant_id": "asst_1"}),
            stream: true,
        };
        assert_eq!(
            serde_json::to_value(body).unwrap(),
            json!({"assistant_id": "asst_1", "stream": true})
        );
    }

    #[test]
    fn routes_are_joined_to_base_url() {
        let client = OpenAiClient::new(Credentials::new("sk-test", "http://localhost:8080/v1")).unwrap();
        assert_eq!(client.url("threads/runs"), "http://localhost:8080/v1/threads/runs");
    }

    #[test]
    fn error_body_is_unwrapped() {
        let body = json!({
            "error": {"message": "No thread found", "type": "invalid_request_error", "param": null, "code": null}
        });
        let Error::Api(error) = api_error(body.to_string()) else {
            panic!("expected an api error");
        };
        assert_eq!(error.error_type, "invalid_request_error");
        assert_eq!(error.to_string(), "No thread found");
    }

    #[test]
    fn unparsable_error_body_is_kept_as_message() {
        let Error::Api(error) = api_error("<html>Bad Gateway</html>".to_owned()) else {
            panic!("expected an api error");
        };
        assert_eq!(error.error_type, "unknown");
        assert_eq!(error.message, "<html>Bad Gateway</html>");
    }
}
