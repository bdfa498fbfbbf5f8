use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path as UrlPath, Query, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;

use pantry_core::catalog::{Catalog, CatalogItem};
use pantry_core::db::Database;
use pantry_core::error::ApiError as CatalogError;
use pantry_core::models::{
    Consumable, Ingredient, ItemKind, ItemPatch, NewItem, NewRecipe, Recipe, RecipePatch,
    ServerId,
};

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) catalog: Arc<Catalog>,
    db: Arc<Mutex<Option<Database>>>,
}

impl AppState {
    pub(crate) fn new(catalog: Catalog, db: Option<Database>) -> Self {
        Self {
            catalog: Arc::new(catalog),
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Apply one catalog write and mirror the catalog to disk.
    ///
    /// The database lock is held across both steps, so snapshots are saved
    /// in the order the writes happened. A failed save leaves the previous
    /// snapshot in place.
    fn write<R>(
        &self,
        f: impl FnOnce(&Catalog) -> Result<R, CatalogError>,
    ) -> Result<R, CatalogError> {
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        let out = f(&self.catalog)?;
        if let Some(db) = db.as_ref() {
            if let Err(e) = db.save_state(&self.catalog.to_state()) {
                log::error!("Failed to persist catalog: {e:#}");
            }
        }
        Ok(out)
    }
}

// --- Request types ---

#[derive(Deserialize)]
struct NameQuery {
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct TagQuery {
    #[serde(default)]
    tag: String,
}

#[derive(Deserialize)]
struct SourceQuery {
    #[serde(default)]
    source: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(err) => {
                log::error!("Internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Status {
                status: 404,
                message,
                ..
            } => Self::NotFound(message),
            CatalogError::Status {
                status: 400,
                message,
                ..
            } => Self::BadRequest(message),
            other => Self::Internal(other.into()),
        }
    }
}

// --- Middleware ---

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Ingredient and consumable handlers ---

async fn list_items<T: CatalogItem + Serialize>(State(state): State<AppState>) -> Json<Vec<T>> {
    Json(state.catalog.list_items())
}

async fn get_item<T: CatalogItem + Serialize>(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Result<Json<T>, ApiError> {
    Ok(Json(state.catalog.get_item(&ServerId::new(id))?))
}

async fn create_item<T: CatalogItem + Serialize>(
    State(state): State<AppState>,
    Json(draft): Json<NewItem>,
) -> Result<(StatusCode, Json<T>), ApiError> {
    let item = state.write(|c| c.create_item::<T>(&draft))?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn update_item<T: CatalogItem + Serialize>(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
    Json(patch): Json<ItemPatch>,
) -> Result<Json<T>, ApiError> {
    let id = ServerId::new(id);
    let item = state.write(|c| c.update_item::<T>(&id, &patch))?;
    Ok(Json(item))
}

async fn delete_item<T: CatalogItem>(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Result<StatusCode, ApiError> {
    let id = ServerId::new(id);
    committed(state.write(|c| c.delete_item::<T>(&id)))
}

async fn item_categories<T: CatalogItem>(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.catalog.categories::<T>())
}

// --- Recipe handlers ---

async fn list_recipes(State(state): State<AppState>) -> Json<Vec<Recipe>> {
    Json(state.catalog.list_recipes())
}

async fn get_recipe(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Result<Json<Recipe>, ApiError> {
    Ok(Json(state.catalog.get_recipe(&ServerId::new(id))?))
}

async fn create_recipe(
    State(state): State<AppState>,
    Json(draft): Json<NewRecipe>,
) -> Result<(StatusCode, Json<Recipe>), ApiError> {
    let recipe = state.write(|c| c.create_recipe(&draft))?;
    Ok((StatusCode::CREATED, Json(recipe)))
}

async fn update_recipe(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
    Json(patch): Json<RecipePatch>,
) -> Result<Json<Recipe>, ApiError> {
    let id = ServerId::new(id);
    let recipe = state.write(|c| c.update_recipe(&id, &patch))?;
    Ok(Json(recipe))
}

async fn delete_recipe(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Result<StatusCode, ApiError> {
    let id = ServerId::new(id);
    committed(state.write(|c| c.delete_recipe(&id)))
}

async fn link_ingredient(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
    Query(query): Query<NameQuery>,
) -> Result<StatusCode, ApiError> {
    let id = ServerId::new(id);
    committed(state.write(|c| c.link_ingredient(&id, &query.name)))
}

async fn unlink_ingredient(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
    Query(query): Query<NameQuery>,
) -> Result<StatusCode, ApiError> {
    let id = ServerId::new(id);
    committed(state.write(|c| c.unlink_ingredient(&id, &query.name)))
}

async fn add_tag(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
    Query(query): Query<TagQuery>,
) -> Result<StatusCode, ApiError> {
    let id = ServerId::new(id);
    committed(state.write(|c| c.add_tag(&id, &query.tag)))
}

async fn remove_tag(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
    Query(query): Query<TagQuery>,
) -> Result<StatusCode, ApiError> {
    let id = ServerId::new(id);
    committed(state.write(|c| c.remove_tag(&id, &query.tag)))
}

async fn add_source(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
    Query(query): Query<SourceQuery>,
) -> Result<StatusCode, ApiError> {
    let id = ServerId::new(id);
    committed(state.write(|c| c.add_source(&id, &query.source)))
}

async fn remove_source(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
    Query(query): Query<SourceQuery>,
) -> Result<StatusCode, ApiError> {
    let id = ServerId::new(id);
    committed(state.write(|c| c.remove_source(&id, &query.source)))
}

/// Response for a successful write that has no body.
fn committed(result: Result<(), CatalogError>) -> Result<StatusCode, ApiError> {
    result?;
    Ok(StatusCode::NO_CONTENT)
}

fn item_routes<T: CatalogItem + Serialize>() -> Router<AppState> {
    Router::new()
        .route("/", get(list_items::<T>).post(create_item::<T>))
        .route("/categories", get(item_categories::<T>))
        .route(
            "/{id}",
            get(get_item::<T>)
                .patch(update_item::<T>)
                .delete(delete_item::<T>),
        )
}

pub(crate) fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .nest("/ingredients", item_routes::<Ingredient>())
        .nest("/consumables", item_routes::<Consumable>())
        .route("/recipes", get(list_recipes).post(create_recipe))
        .route(
            "/recipes/{id}",
            get(get_recipe).patch(update_recipe).delete(delete_recipe),
        )
        .route(
            "/recipes/{id}/ingredients",
            post(link_ingredient).delete(unlink_ingredient),
        )
        .route("/recipes/{id}/tags", post(add_tag).delete(remove_tag))
        .route(
            "/recipes/{id}/sources",
            post(add_source).delete(remove_source),
        );

    Router::new()
        .nest("/pantry", api)
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(db_path: &Path, port: u16, bind: &str) -> anyhow::Result<()> {
    let db = Database::open(db_path)?;
    let catalog = Catalog::from_state(db.load_all().context("Failed to load catalog")?);
    eprintln!(
        "Loaded {} ingredients, {} consumables, {} recipes from {}",
        catalog.kind_count(ItemKind::Ingredient),
        catalog.kind_count(ItemKind::Consumable),
        catalog.list_recipes().len(),
        db_path.display(),
    );

    let app = build_router(AppState::new(catalog, Some(db)));

    if bind != "127.0.0.1" && bind != "localhost" {
        eprintln!(
            "Warning: Listening on {bind} with no authentication. Any device on your network can access this API."
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("Failed to bind {bind}:{port}"))?;
    eprintln!("Listening on http://{bind}:{port}/pantry");
    axum::serve(listener, app).await?;

    Ok(())
}
