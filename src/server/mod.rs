use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use std::{convert, net, str::FromStr};
use tokio::time;
use tracing::*;
use ulid::Ulid;

use crate::config;
use crate::constructs::SchemaDefinition;
use crate::errors::{Error, Result};
use crate::executor::ReadQuery;
use crate::orchestrator::{Orchestrator, WriteOutcome};

#[derive(Debug, PartialEq, Eq)]
pub enum Route {
    Health,
    CreateSchema,
    ListSchemas,
    DeleteSchema { id: String },
    ReadData { table_name: String },
    InsertData { table_name: String },
    UpdateData { table_name: String, id: String },
    DeleteData { table_name: String, id: String },
}

#[derive(Debug, PartialEq, Eq)]
pub enum RouteMatch {
    Found(Route),
    MethodNotAllowed,
    NotFound,
}

/// Map a request line onto a route.
pub fn resolve(method: &Method, path: &str) -> RouteMatch {
    let segments: Vec<&str> = path
        .trim_matches('/')
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();
    let route = match (segments.as_slice(), method) {
        (["health"], &Method::GET) => Route::Health,
        (["schema"], &Method::POST) => Route::CreateSchema,
        (["schema"], &Method::GET) => Route::ListSchemas,
        (["schema", "data", table_name], &Method::GET) => Route::ReadData {
            table_name: table_name.to_string(),
        },
        (["schema", "data", table_name], &Method::POST) => Route::InsertData {
            table_name: table_name.to_string(),
        },
        (["schema", "data", table_name, id], &Method::PUT) => Route::UpdateData {
            table_name: table_name.to_string(),
            id: id.to_string(),
        },
        (["schema", "data", table_name, id], &Method::DELETE) => Route::DeleteData {
            table_name: table_name.to_string(),
            id: id.to_string(),
        },
        (["schema", id], &Method::DELETE) => Route::DeleteSchema { id: id.to_string() },
        (["health"], _)
        | (["schema"], _)
        | (["schema", _], _)
        | (["schema", "data", _], _)
        | (["schema", "data", _, _], _) => return RouteMatch::MethodNotAllowed,
        _ => return RouteMatch::NotFound,
    };
    RouteMatch::Found(route)
}

pub fn status_of(error: &Error) -> StatusCode {
    match error {
        Error::Validation(_)
        | Error::EmptyPayload
        | Error::SchemaInvalid(_)
        | Error::SchemaCorrupt(_)
        | Error::Database(_) => StatusCode::BAD_REQUEST,
        Error::DuplicateName(_) => StatusCode::CONFLICT,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn empty_response(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    match serde_json::to_vec(body) {
        Ok(bytes) => {
            let mut response = Response::new(Body::from(bytes));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(error) => {
            error!("‼️ Could not serialize response: {}", error);
            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn error_response(error: &Error) -> Response<Body> {
    let status = status_of(error);
    if error.is_client_error() {
        debug!("Request failed: {}", error);
    } else {
        warn!("Request failed: {}", error);
    }
    json_response(status, error)
}

async fn read_json<T: DeserializeOwned>(req: Request<Body>) -> Result<T> {
    let body_bytes = hyper::body::to_bytes(req.into_body())
        .await
        .map_err(|error| Error::Validation(format!("Could not read request body: {}", error)))?;
    serde_json::from_slice(&body_bytes)
        .map_err(|error| Error::Validation(format!("Invalid JSON body: {}", error)))
}

/// Run a datastore-bound closure on the blocking thread pool.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|error| {
        error!("‼️ Blocking task failed: {}", error);
        Error::Internal("Request handling failed".to_string())
    })?
}

async fn dispatch(orchestrator: Orchestrator, req: Request<Body>) -> Result<Response<Body>> {
    let route = match resolve(req.method(), req.uri().path()) {
        RouteMatch::Found(route) => route,
        RouteMatch::MethodNotAllowed => return Ok(empty_response(StatusCode::METHOD_NOT_ALLOWED)),
        RouteMatch::NotFound => return Ok(empty_response(StatusCode::NOT_FOUND)),
    };
    match route {
        Route::Health => Ok(json_response(StatusCode::OK, &json!({ "status": "ok" }))),
        Route::CreateSchema => {
            let definition: SchemaDefinition = read_json(req).await?;
            let record = blocking(move || orchestrator.create(&definition)).await?;
            Ok(json_response(StatusCode::CREATED, &record))
        }
        Route::ListSchemas => {
            let records = blocking(move || orchestrator.list()).await?;
            Ok(json_response(StatusCode::OK, &records))
        }
        Route::DeleteSchema { id } => {
            let outcome = blocking(move || orchestrator.delete(&id)).await?;
            Ok(json_response(StatusCode::OK, &outcome))
        }
        Route::ReadData { table_name } => {
            let query: ReadQuery = serde_urlencoded::from_str(req.uri().query().unwrap_or(""))
                .map_err(|error| Error::Validation(format!("Invalid query string: {}", error)))?;
            let table = blocking(move || orchestrator.read_table_data(&table_name, &query)).await?;
            Ok(json_response(StatusCode::OK, &table))
        }
        Route::InsertData { table_name } => {
            let data: serde_json::Map<String, serde_json::Value> = read_json(req).await?;
            let outcome =
                blocking(move || orchestrator.write_table_data(&table_name, None, data)).await?;
            Ok(json_response(StatusCode::CREATED, &outcome))
        }
        Route::UpdateData { table_name, id } => {
            let data: serde_json::Map<String, serde_json::Value> = read_json(req).await?;
            let outcome: WriteOutcome = blocking(move || {
                orchestrator.write_table_data(&table_name, Some(id.as_str()), data)
            })
            .await?;
            Ok(json_response(StatusCode::OK, &outcome))
        }
        Route::DeleteData { table_name, id } => {
            let row = blocking(move || orchestrator.delete_table_data(&table_name, &id)).await?;
            Ok(json_response(
                StatusCode::OK,
                &json!({ "message": "Record deleted successfully", "data": row }),
            ))
        }
    }
}

async fn handle(
    orchestrator: Orchestrator,
    req: Request<Body>,
) -> std::result::Result<Response<Body>, convert::Infallible> {
    let timer = time::Instant::now();
    let request_id = Ulid::new();
    debug!(
        "⚡️ Received request ID {}: {} {}",
        request_id,
        req.method(),
        req.uri().path()
    );
    let response = match dispatch(orchestrator, req).await {
        Ok(response) => response,
        Err(error) => error_response(&error),
    };
    debug!(
        "🪃 Finished request ID {} with {} in {} µs",
        request_id,
        response.status(),
        timer.elapsed().as_micros()
    );
    Ok(response)
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!("‼️ Failed to install Ctrl+C signal handler: {}", error);
        return;
    }
    info!("💤 Shutting down gracefully...");
}

/// Start server loop.
pub async fn start_server(config: &config::Config, orchestrator: Orchestrator) -> anyhow::Result<()> {
    let http_listen_address = net::SocketAddr::new(
        net::IpAddr::from_str(&config.http_listen_host)?,
        config.http_listen_port,
    );

    let server = Server::try_bind(&http_listen_address)?
        .serve(make_service_fn(move |_conn| {
            let orchestrator = orchestrator.clone();
            async move {
                Ok::<_, convert::Infallible>(service_fn(move |req| {
                    handle(orchestrator.clone(), req)
                }))
            }
        }))
        .with_graceful_shutdown(shutdown_signal());

    info!("👂 Server listening on {}...", http_listen_address);

    if let Err(e) = server.await {
        error!("‼️ Encountered server error: {}", e);
        return Err(e.into());
    }
    debug!("⏹ Server no longer listening");
    Ok(())
}
