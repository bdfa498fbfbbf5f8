use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

use pantry_core::api::{CategoryEndpoints, Endpoints, RecipeEndpoints};
use pantry_core::error::{ApiError, Operation};
use pantry_core::models::{CollectionKey, Entity, ServerId};

/// REST implementation of the pantry API.
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("pantry-cli/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{path}", self.base_url))
    }

    fn sub_resource(
        &self,
        method: Method,
        recipe: &ServerId,
        resource: &str,
        key: &str,
        value: &str,
    ) -> RequestBuilder {
        self.request(method, &format!("recipes/{recipe}/{resource}"))
            .query(&[(key, value)])
    }

    /// Send `request`, turning transport failures and non-2xx statuses into [`ApiError`].
    async fn send(&self, operation: Operation, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request.send().await.map_err(|e| ApiError::Transport {
            operation,
            message: e.to_string(),
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => body.error,
            Err(_) if text.trim().is_empty() => status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string(),
            Err(_) => text,
        };
        log::debug!("{operation} returned {status}: {message}");
        Err(ApiError::Status {
            operation,
            status: status.as_u16(),
            message,
        })
    }

    async fn fetch<R: DeserializeOwned>(
        &self,
        operation: Operation,
        request: RequestBuilder,
    ) -> Result<R, ApiError> {
        let response = self.send(operation, request).await?;
        response.json::<R>().await.map_err(|e| ApiError::Decode {
            operation,
            message: e.to_string(),
        })
    }

    async fn execute(&self, operation: Operation, request: RequestBuilder) -> Result<(), ApiError> {
        self.send(operation, request).await.map(drop)
    }
}

fn item_path(key: CollectionKey, id: &ServerId) -> String {
    format!("{key}/{id}")
}

impl<T> Endpoints<T> for HttpClient
where
    T: Entity + DeserializeOwned,
    T::Draft: Serialize,
    T::Patch: Serialize,
{
    async fn fetch_all(&self) -> Result<Vec<T>, ApiError> {
        let request = self.request(Method::GET, T::COLLECTION.as_str());
        self.fetch(Operation::list(T::COLLECTION), request).await
    }

    async fn fetch_one(&self, id: &ServerId) -> Result<T, ApiError> {
        let request = self.request(Method::GET, &item_path(T::COLLECTION, id));
        self.fetch(Operation::get(T::COLLECTION), request).await
    }

    async fn create(&self, draft: &T::Draft) -> Result<T, ApiError> {
        let request = self
            .request(Method::POST, T::COLLECTION.as_str())
            .json(draft);
        self.fetch(Operation::create(T::COLLECTION), request).await
    }

    async fn update(&self, id: &ServerId, patch: &T::Patch) -> Result<T, ApiError> {
        let request = self
            .request(Method::PATCH, &item_path(T::COLLECTION, id))
            .json(patch);
        self.fetch(Operation::update(T::COLLECTION), request).await
    }

    async fn delete(&self, id: &ServerId) -> Result<(), ApiError> {
        let request = self.request(Method::DELETE, &item_path(T::COLLECTION, id));
        self.execute(Operation::delete(T::COLLECTION), request).await
    }
}

impl RecipeEndpoints for HttpClient {
    async fn link_ingredient(&self, recipe: &ServerId, name: &str) -> Result<(), ApiError> {
        let request = self.sub_resource(Method::POST, recipe, "ingredients", "name", name);
        self.execute(Operation::LinkIngredient, request).await
    }

    async fn unlink_ingredient(&self, recipe: &ServerId, name: &str) -> Result<(), ApiError> {
        let request = self.sub_resource(Method::DELETE, recipe, "ingredients", "name", name);
        self.execute(Operation::UnlinkIngredient, request).await
    }

    async fn add_tag(&self, recipe: &ServerId, tag: &str) -> Result<(), ApiError> {
        let request = self.sub_resource(Method::POST, recipe, "tags", "tag", tag);
        self.execute(Operation::AddTag, request).await
    }

    async fn remove_tag(&self, recipe: &ServerId, tag: &str) -> Result<(), ApiError> {
        let request = self.sub_resource(Method::DELETE, recipe, "tags", "tag", tag);
        self.execute(Operation::RemoveTag, request).await
    }

    async fn add_source(&self, recipe: &ServerId, source: &str) -> Result<(), ApiError> {
        let request = self.sub_resource(Method::POST, recipe, "sources", "source", source);
        self.execute(Operation::AddSource, request).await
    }

    async fn remove_source(&self, recipe: &ServerId, source: &str) -> Result<(), ApiError> {
        let request = self.sub_resource(Method::DELETE, recipe, "sources", "source", source);
        self.execute(Operation::RemoveSource, request).await
    }
}

impl CategoryEndpoints for HttpClient {
    async fn ingredient_categories(&self) -> Result<Vec<String>, ApiError> {
        let request = self.request(Method::GET, "ingredients/categories");
        self.fetch(Operation::IngredientCategories, request).await
    }

    async fn consumable_categories(&self) -> Result<Vec<String>, ApiError> {
        let request = self.request(Method::GET, "consumables/categories");
        self.fetch(Operation::ConsumableCategories, request).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use axum::Router;
    use axum::routing::get;

    use super::*;
    use crate::server::{AppState, build_router};
    use pantry_core::Pantry;
    use pantry_core::catalog::Catalog;
    use pantry_core::db::Database;
    use pantry_core::models::{
        Consumable, Ingredient, ItemPatch, NewItem, NewRecipe, Recipe, RecipePatch,
    };
    use pantry_core::persist::Persistence;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/pantry")
    }

    async fn spawn_server() -> (HttpClient, AppState) {
        let state = AppState::new(Catalog::new(), None);
        let url = serve(build_router(state.clone())).await;
        (HttpClient::new(&url).unwrap(), state)
    }

    fn server_id<T: Entity>(entity: &T) -> ServerId {
        entity.id().saved().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_item_crud_over_http() {
        let (client, state) = spawn_server().await;

        let milk = Endpoints::<Ingredient>::create(&client, &NewItem::new("  Milk ").category("Dairy"))
            .await
            .unwrap();
        assert_eq!(milk.name, "milk");
        assert_eq!(milk.category, "dairy");
        assert!(!milk.needed);

        let id = server_id(&milk);
        let updated = Endpoints::<Ingredient>::update(&client, &id, &ItemPatch::needed(true))
            .await
            .unwrap();
        assert!(updated.needed);

        let all = Endpoints::<Ingredient>::fetch_all(&client).await.unwrap();
        assert_eq!(all, vec![updated.clone()]);
        assert_eq!(state.catalog.list_items::<Ingredient>(), vec![updated]);

        Endpoints::<Ingredient>::delete(&client, &id).await.unwrap();
        let err = Endpoints::<Ingredient>::fetch_one(&client, &id)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.operation(), Operation::GetIngredient);
        assert_eq!(
            err.to_string(),
            "Failed to fetch ingredient: HTTP 404: Ingredient not found"
        );
    }

    #[tokio::test]
    async fn test_duplicate_consumable_is_rejected() {
        let (client, _state) = spawn_server().await;
        Endpoints::<Consumable>::create(&client, &NewItem::new("soap"))
            .await
            .unwrap();
        let err = Endpoints::<Consumable>::create(&client, &NewItem::new("SOAP"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.operation(), Operation::CreateConsumable);
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn test_recipe_sub_resources_over_http() {
        let (client, _state) = spawn_server().await;
        let draft = NewRecipe::new("Pancakes").ingredient("flour").tag("breakfast");
        let recipe = Endpoints::<Recipe>::create(&client, &draft).await.unwrap();
        let id = server_id(&recipe);

        client.link_ingredient(&id, "Eggs").await.unwrap();
        client.link_ingredient(&id, "eggs").await.unwrap();
        client.add_tag(&id, "sweet").await.unwrap();
        client.remove_tag(&id, "breakfast").await.unwrap();
        client.add_source(&id, "https://example.com/pancakes").await.unwrap();
        client.unlink_ingredient(&id, "flour").await.unwrap();

        let fresh = Endpoints::<Recipe>::fetch_one(&client, &id).await.unwrap();
        let names: Vec<&str> = fresh.ingredients.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["eggs"]);
        assert_eq!(fresh.tags, BTreeSet::from(["sweet".to_string()]));
        assert_eq!(fresh.sources, vec!["https://example.com/pancakes".to_string()]);

        let patch = RecipePatch {
            name: Some("Crepes".to_string()),
            notes: None,
        };
        let renamed = Endpoints::<Recipe>::update(&client, &id, &patch)
            .await
            .unwrap();
        assert_eq!(renamed.name, "Crepes");

        // Unlinking keeps the ingredient itself.
        let ingredients = Endpoints::<Ingredient>::fetch_all(&client).await.unwrap();
        assert_eq!(ingredients.len(), 2);

        let err = client.add_tag(&id, "  ").await.unwrap_err();
        assert_eq!(err.status(), Some(400));
    }

    #[tokio::test]
    async fn test_categories_over_http() {
        let (client, _state) = spawn_server().await;
        Endpoints::<Ingredient>::create(&client, &NewItem::new("basil").category("Herbs"))
            .await
            .unwrap();
        assert_eq!(client.ingredient_categories().await.unwrap(), vec!["herbs"]);
        assert!(client.consumable_categories().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpClient::new(&format!("http://{addr}/pantry")).unwrap();
        let err = Endpoints::<Ingredient>::fetch_all(&client).await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::Transport {
                operation: Operation::ListIngredients,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let app = Router::new().route("/pantry/ingredients", get(|| async { "not json" }));
        let client = HttpClient::new(&serve(app).await).unwrap();
        let err = Endpoints::<Ingredient>::fetch_all(&client).await.unwrap_err();
        assert!(matches!(err, ApiError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_plain_text_error_body_is_kept() {
        let app = Router::new().route(
            "/pantry/consumables",
            get(|| async { (axum::http::StatusCode::BAD_GATEWAY, "upstream down") }),
        );
        let client = HttpClient::new(&serve(app).await).unwrap();
        let err = Endpoints::<Consumable>::fetch_all(&client).await.unwrap_err();
        assert_eq!(err.status(), Some(502));
        assert!(err.to_string().ends_with("upstream down"));
    }

    #[tokio::test]
    async fn test_pantry_round_trip_against_server() {
        let (client, state) = spawn_server().await;
        let pantry = Pantry::new(
            Arc::new(client),
            Persistence::new(Database::open_in_memory().unwrap()),
        );
        pantry.sync().await.unwrap();

        let (milk, created) = pantry
            .add_item::<Ingredient>(&NewItem::new("milk").category("dairy"))
            .await
            .unwrap();
        assert!(created);
        pantry
            .add_item::<Consumable>(&NewItem::new("soap").needed(true))
            .await
            .unwrap();
        pantry
            .entity::<Ingredient>()
            .toggle_needed(milk.id())
            .await
            .unwrap();

        let grocery: Vec<String> = pantry
            .grocery_list()
            .into_iter()
            .flat_map(|g| g.items)
            .map(|row| row.name)
            .collect();
        assert_eq!(grocery, vec!["milk".to_string(), "soap".to_string()]);

        pantry
            .entity::<Recipe>()
            .create(&NewRecipe::new("Latte").ingredient("milk").ingredient("coffee"))
            .await
            .unwrap();
        assert_eq!(pantry.ingredients().len(), 2);
        assert_eq!(state.catalog.list_recipes().len(), 1);

        pantry
            .entity::<Ingredient>()
            .delete(milk.id())
            .await
            .unwrap();
        let latte = pantry.find::<Recipe>("latte").unwrap();
        let names: Vec<&str> = latte.ingredients.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["coffee"]);
    }
}
