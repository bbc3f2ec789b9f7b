use std::convert::Infallible;
use std::sync::Arc;

use log::error;
use serde::{Deserialize, Serialize};
use serde_json::json;
use warp::http::StatusCode;
use warp::reply::{Json, WithStatus};
use warp::{Filter, Rejection, Reply};

use crate::auth::TokenVerifier;
use crate::store::{Store, StoreError};

#[derive(Debug)]
enum ApiError {
    Unauthorized,
    NotFound(&'static str),
    Conflict(&'static str),
    Internal,
}

impl warp::reject::Reject for ApiError {}

#[derive(Deserialize)]
struct CreateRoomBody {
    slug: String,
}

fn envelope<T: Serialize>(status: StatusCode, success: bool, message: &T) -> WithStatus<Json> {
    warp::reply::with_status(
        warp::reply::json(&json!({ "success": success, "message": message })),
        status,
    )
}

fn reject_store(err: StoreError) -> Rejection {
    match err {
        StoreError::NotFound => warp::reject::custom(ApiError::NotFound("Room not found")),
        StoreError::SlugTaken => warp::reject::custom(ApiError::Conflict("Slug already taken")),
        other => {
            error!("store failure on REST path: {other}");
            warp::reject::custom(ApiError::Internal)
        }
    }
}

// Bearer-token filter shared by every REST endpoint. The websocket path
// authenticates separately from its upgrade query string.
fn with_auth(
    verifier: Arc<TokenVerifier>,
) -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization").and_then(move |header: Option<String>| {
        let verifier = verifier.clone();
        async move {
            let token = header
                .as_deref()
                .and_then(|h| h.strip_prefix("Bearer "))
                .ok_or_else(|| warp::reject::custom(ApiError::Unauthorized))?;
            verifier
                .verify(token)
                .map_err(|_| warp::reject::custom(ApiError::Unauthorized))
        }
    })
}

fn with_store(
    store: Arc<dyn Store>,
) -> impl Filter<Extract = (Arc<dyn Store>,), Error = Infallible> + Clone {
    warp::any().map(move || store.clone())
}

pub fn api(
    store: Arc<dyn Store>,
    verifier: Arc<TokenVerifier>,
    chat_history_limit: i64,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let chats = warp::path!("rooms" / i64 / "chats")
        .and(warp::get())
        .and(with_auth(verifier.clone()))
        .and(with_store(store.clone()))
        .and(warp::any().map(move || chat_history_limit))
        .and_then(get_chats);

    let shapes = warp::path!("shapes" / "room" / i64)
        .and(warp::get())
        .and(with_auth(verifier.clone()))
        .and(with_store(store.clone()))
        .and_then(get_shapes);

    let create_room = warp::path!("rooms")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_auth(verifier.clone()))
        .and(with_store(store.clone()))
        .and_then(create_room);

    let list_rooms = warp::path!("rooms")
        .and(warp::get())
        .and(with_auth(verifier.clone()))
        .and(with_store(store.clone()))
        .and_then(list_rooms);

    let delete_room = warp::path!("rooms" / String)
        .and(warp::delete())
        .and(with_auth(verifier))
        .and(with_store(store))
        .and_then(delete_room);

    chats
        .or(shapes)
        .or(create_room)
        .or(list_rooms)
        .or(delete_room)
}

// Replay endpoints require authentication but not room ownership: any
// signed-in member fetching history or the shape snapshot gets the full
// room view. Ownership only gates the mutating CRUD below.
async fn get_chats(
    room_id: i64,
    _user_id: String,
    store: Arc<dyn Store>,
    limit: i64,
) -> Result<WithStatus<Json>, Rejection> {
    store.room_by_id(room_id).await.map_err(reject_store)?;
    let chats = store
        .chats_for_room(room_id, limit)
        .await
        .map_err(reject_store)?;
    Ok(envelope(StatusCode::OK, true, &chats))
}

async fn get_shapes(
    room_id: i64,
    _user_id: String,
    store: Arc<dyn Store>,
) -> Result<WithStatus<Json>, Rejection> {
    store.room_by_id(room_id).await.map_err(reject_store)?;
    let shapes = store.shapes_for_room(room_id).await.map_err(reject_store)?;
    Ok(envelope(StatusCode::OK, true, &shapes))
}

async fn create_room(
    body: CreateRoomBody,
    user_id: String,
    store: Arc<dyn Store>,
) -> Result<WithStatus<Json>, Rejection> {
    let room = store
        .create_room(&body.slug, &user_id)
        .await
        .map_err(reject_store)?;
    Ok(envelope(StatusCode::CREATED, true, &room))
}

async fn list_rooms(
    user_id: String,
    store: Arc<dyn Store>,
) -> Result<WithStatus<Json>, Rejection> {
    let rooms = store.rooms_for_admin(&user_id).await.map_err(reject_store)?;
    Ok(envelope(StatusCode::OK, true, &rooms))
}

async fn delete_room(
    slug: String,
    user_id: String,
    store: Arc<dyn Store>,
) -> Result<WithStatus<Json>, Rejection> {
    store
        .delete_room(&slug, &user_id)
        .await
        .map_err(reject_store)?;
    Ok(envelope(StatusCode::OK, true, &"Room deleted"))
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if let Some(api) = err.find::<ApiError>() {
        match api {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, *message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, *message),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        }
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found")
    } else {
        (StatusCode::BAD_REQUEST, "Bad request")
    };

    Ok(envelope(status, false, &message))
}
