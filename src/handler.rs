//! Method dispatch: turns a parsed request into a response.

use bytes::Bytes;
use tracing::{debug, warn};

use crate::request::{Method, Request};
use crate::response::{content_type_for, Response, Status};
use crate::storage::FileStore;

pub const NOT_FOUND_BODY: &str = "File Not Found";
pub const METHOD_NOT_ALLOWED_BODY: &str = "Method Not Allowed";
pub const BAD_REQUEST_BODY: &str = "Bad Request";

/// A response plus whether the connection must close after sending it
#[derive(Debug)]
pub struct Outcome {
    pub response: Response,
    pub close: bool,
}

impl Outcome {
    fn keep_open(response: Response) -> Self {
        Outcome {
            response,
            close: false,
        }
    }
}

/// Route a request to its method handler.
pub async fn dispatch(request: &Request, store: &FileStore) -> Outcome {
    let outcome = match &request.method {
        Method::Get => handle_get(&request.path, store).await,
        Method::Post => handle_post(&request.path, &request.body, store).await,
        Method::Unsupported(method) => {
            debug!(method = %method, "Unsupported method");
            Outcome::keep_open(Response::error(
                Status::MethodNotAllowed,
                METHOD_NOT_ALLOWED_BODY,
            ))
        }
    };

    Outcome {
        close: outcome.close || request.wants_close(),
        ..outcome
    }
}

/// Response to a request that could not be framed or parsed
pub fn bad_request() -> Outcome {
    Outcome {
        response: Response::error(Status::BadRequest, BAD_REQUEST_BODY),
        close: true,
    }
}

async fn handle_get(path: &str, store: &FileStore) -> Outcome {
    let contents = match store.read(path).await {
        Ok(contents) => contents,
        Err(e) => {
            warn!(path, error = %e, "Read failed");
            None
        }
    };

    let response = match contents {
        Some(contents) => Response::new(Status::Ok)
            .with_header("Connection", "keep-alive")
            .with_header("Content-Type", content_type_for(path))
            .with_body(contents),
        None => Response::error(Status::NotFound, NOT_FOUND_BODY),
    };

    Outcome::keep_open(response)
}

async fn handle_post(path: &str, body: &[u8], store: &FileStore) -> Outcome {
    if let Err(e) = store.write(path, body).await {
        warn!(path, error = %e, "Upload rejected");
        return bad_request();
    }

    let message = format!("File '{}' saved successfully.", path);
    Outcome::keep_open(
        Response::new(Status::Ok)
            .with_header("Connection", "keep-alive")
            .with_header("Content-Type", "text/plain")
            .with_body(Bytes::from(message)),
    )
}
